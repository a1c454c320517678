//! Process-wide trust evaluation override

use crate::interceptor::{HookId, Implementation, Interceptor, Value};
use crate::symbols::{SEC_TRUST_EVALUATE, SEC_TRUST_EVALUATE_WITH_ERROR};
use crate::{HookError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// `errSecSuccess`
pub const ERR_SEC_SUCCESS: i64 = 0;

/// `kSecTrustResultProceed`
pub const TRUST_RESULT_PROCEED: u32 = 1;

/// Replaces both trust evaluation entry points with unconditional success
#[derive(Debug, Default)]
pub struct TrustEvaluationHook {
    forced: Arc<AtomicU64>,
}

impl TrustEvaluationHook {
    /// Evaluations forced to succeed
    pub fn forced(&self) -> u64 {
        self.forced.load(Ordering::Relaxed)
    }

    /// Replace whichever entry points the image exports
    ///
    /// Fails only when neither is present.
    pub fn install(&self, interceptor: &Interceptor) -> Result<Vec<HookId>> {
        let mut ids = Vec::new();
        let mut missing = None;

        match interceptor.replace(SEC_TRUST_EVALUATE, self.evaluate()) {
            Ok(id) => ids.push(id),
            Err(e @ HookError::SymbolNotFound { .. }) => {
                warn!("{}", e);
                missing = Some(e);
            }
            Err(e) => return Err(e),
        }
        match interceptor.replace(SEC_TRUST_EVALUATE_WITH_ERROR, self.evaluate_with_error()) {
            Ok(id) => ids.push(id),
            Err(e @ HookError::SymbolNotFound { .. }) => {
                warn!("{}", e);
                missing = Some(e);
            }
            Err(e) => {
                ids.into_iter().for_each(|id| {
                    let _ = interceptor.revert(id);
                });
                return Err(e);
            }
        }

        match (ids.is_empty(), missing) {
            (true, Some(e)) => Err(e),
            _ => Ok(ids),
        }
    }

    /// `OSStatus SecTrustEvaluate(SecTrustRef, SecTrustResultType *)`
    fn evaluate(&self) -> Implementation {
        let forced = self.forced.clone();
        Arc::new(move |args: &mut [Value]| {
            if let Some(result) = args.get(1).and_then(Value::as_memory) {
                result.write_u32(0, TRUST_RESULT_PROCEED);
            }
            forced.fetch_add(1, Ordering::Relaxed);
            info!("SecTrustEvaluate forced to succeed");
            Value::Int(ERR_SEC_SUCCESS)
        })
    }

    /// `bool SecTrustEvaluateWithError(SecTrustRef, CFErrorRef *)`
    fn evaluate_with_error(&self) -> Implementation {
        let forced = self.forced.clone();
        Arc::new(move |args: &mut [Value]| {
            if let Some(error) = args.get(1).and_then(Value::as_memory) {
                error.clear();
            }
            forced.fetch_add(1, Ordering::Relaxed);
            info!("SecTrustEvaluateWithError forced to succeed");
            Value::Bool(true)
        })
    }
}
