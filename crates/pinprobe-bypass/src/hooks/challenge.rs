//! Session authentication challenge
//!
//! The delegate's completion block is rewritten so that, whatever the app
//! decides, it is invoked with `UseCredential` and a credential built from
//! the challenge's own server trust.

use crate::interceptor::{InvocationListener, Value};
use crate::TargetSymbol;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Argument index of the challenge (after self, _cmd and the session)
pub const CHALLENGE_ARG: usize = 3;
/// Argument index of the completion block
pub const COMPLETION_ARG: usize = 4;

/// How the delegate answers a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ChallengeDisposition {
    /// Use the supplied credential
    UseCredential = 0,
    /// System default handling
    PerformDefaultHandling = 1,
    /// Cancel the challenge
    CancelAuthenticationChallenge = 2,
    /// Reject this protection space
    RejectProtectionSpace = 3,
}

/// Opaque server trust object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTrust(pub u64);

/// Credential accepting a server trust
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Trust the credential was made for
    pub server_trust: ServerTrust,
}

impl Credential {
    /// Credential for `trust`
    pub fn for_trust(trust: ServerTrust) -> Self {
        Self { server_trust: trust }
    }
}

/// Server-trust authentication challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Protection space host
    pub host: String,
    /// Trust under evaluation, absent for non-TLS challenges
    pub server_trust: Option<ServerTrust>,
}

type BlockFn = Arc<dyn Fn(ChallengeDisposition, Option<Credential>) + Send + Sync>;

/// Completion block whose implementation can be swapped
#[derive(Clone)]
pub struct CompletionBlock(Arc<Mutex<BlockFn>>);

impl CompletionBlock {
    /// Block running `f`
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ChallengeDisposition, Option<Credential>) + Send + Sync + 'static,
    {
        Self(Arc::new(Mutex::new(Arc::new(f))))
    }

    /// Invoke the current implementation
    pub fn invoke(&self, disposition: ChallengeDisposition, credential: Option<Credential>) {
        let f = self.0.lock().clone();
        f(disposition, credential);
    }

    fn implementation(&self) -> BlockFn {
        self.0.lock().clone()
    }

    fn set_implementation(&self, f: BlockFn) {
        *self.0.lock() = f;
    }
}

impl fmt::Debug for CompletionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionBlock")
    }
}

/// Forces every challenge answer to `UseCredential`
#[derive(Debug, Default)]
pub struct ChallengeHook {
    overridden: AtomicU64,
}

impl ChallengeHook {
    /// Challenges whose completion was rewritten
    pub fn overridden(&self) -> u64 {
        self.overridden.load(Ordering::Relaxed)
    }
}

impl InvocationListener for ChallengeHook {
    fn on_enter(&self, _symbol: &TargetSymbol, args: &mut [Value]) {
        let (Some(Value::Challenge(challenge)), Some(Value::Block(block))) =
            (args.get(CHALLENGE_ARG), args.get(COMPLETION_ARG))
        else {
            warn!("Challenge hook called with unexpected arguments");
            return;
        };
        info!(host = %challenge.host, "SSL challenge received");
        let Some(trust) = challenge.server_trust else {
            // not a server-trust challenge
            return;
        };

        let credential = Credential::for_trust(trust);
        let original = block.implementation();
        block.set_implementation(Arc::new(move |_disposition, _credential| {
            original(ChallengeDisposition::UseCredential, Some(credential.clone()));
        }));
        self.overridden.fetch_add(1, Ordering::Relaxed);
        info!(host = %challenge.host, "Challenge answer forced to UseCredential");
    }
}
