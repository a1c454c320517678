//! Installs the selected hooks, each at most once

use crate::hooks::{ChallengeHook, ConnectRedirectHook, ObservationHook, ObservedApi, TrustEvaluationHook};
use crate::interceptor::{HookId, Interceptor, ProcessImage};
use crate::symbols::{CONNECT, SESSION_DID_RECEIVE_CHALLENGE};
use crate::{BypassConfig, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Hook family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    /// Session challenge answer
    Challenge,
    /// Trust evaluation override
    TrustEvaluation,
    /// Connect redirection
    ConnectRedirect,
    /// Request API observation
    Observation,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Challenge => "challenge",
            HookKind::TrustEvaluation => "trustEvaluation",
            HookKind::ConnectRedirect => "connectRedirect",
            HookKind::Observation => "observation",
        };
        f.write_str(name)
    }
}

/// Outcome of one `install` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    /// Installed by this call
    pub installed: Vec<HookKind>,
    /// Requested but already in place
    pub already_installed: Vec<HookKind>,
    /// Requested and failed, with the reason
    pub failed: Vec<(HookKind, String)>,
}

impl InstallReport {
    /// Whether every requested hook is in place
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct Installed {
    hooks: BTreeMap<HookKind, Vec<HookId>>,
    challenge: Option<Arc<ChallengeHook>>,
    trust: Option<Arc<TrustEvaluationHook>>,
    redirect: Option<Arc<ConnectRedirectHook>>,
    observers: Vec<Arc<ObservationHook>>,
}

/// Hook installer over one process image
pub struct BypassEngine {
    interceptor: Interceptor,
    installed: Mutex<Installed>,
}

impl BypassEngine {
    /// Engine hooking `image`
    pub fn new(image: Arc<ProcessImage>) -> Self {
        Self {
            interceptor: Interceptor::new(image),
            installed: Mutex::new(Installed::default()),
        }
    }

    /// Underlying interceptor
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Install every hook `config` selects that is not yet installed
    ///
    /// Failures are logged and recorded in the report, never returned.
    pub fn install(&self, config: &BypassConfig) -> InstallReport {
        let mut report = InstallReport::default();
        let mut installed = self.installed.lock();
        let layout = config.layout();

        let mut wanted = Vec::new();
        if config.accept_all_certs {
            wanted.push(HookKind::Challenge);
        }
        if config.trust_evaluation {
            wanted.push(HookKind::TrustEvaluation);
        }
        if config.redirect.is_some() {
            wanted.push(HookKind::ConnectRedirect);
        }
        if config.observe {
            wanted.push(HookKind::Observation);
        }

        for kind in wanted {
            if installed.hooks.contains_key(&kind) {
                report.already_installed.push(kind);
                continue;
            }
            let result: Result<Vec<HookId>> = match kind {
                HookKind::Challenge => {
                    let hook = Arc::new(ChallengeHook::default());
                    self.interceptor
                        .attach(SESSION_DID_RECEIVE_CHALLENGE, hook.clone())
                        .map(|id| {
                            installed.challenge = Some(hook);
                            vec![id]
                        })
                }
                HookKind::TrustEvaluation => {
                    let hook = Arc::new(TrustEvaluationHook::default());
                    hook.install(&self.interceptor).map(|ids| {
                        installed.trust = Some(hook);
                        ids
                    })
                }
                HookKind::ConnectRedirect => match config.redirect {
                    Some(proxy) => {
                        let hook = Arc::new(ConnectRedirectHook::new(proxy.socket_addr(), layout));
                        self.interceptor.attach(CONNECT, hook.clone()).map(|id| {
                            installed.redirect = Some(hook);
                            vec![id]
                        })
                    }
                    None => Ok(Vec::new()),
                },
                HookKind::Observation => self.install_observers(&mut installed, layout),
            };

            match result {
                Ok(ids) => {
                    info!(hook = %kind, count = ids.len(), "Hook installed");
                    installed.hooks.insert(kind, ids);
                    report.installed.push(kind);
                }
                Err(e) => {
                    warn!(hook = %kind, "Hook install failed: {}", e);
                    report.failed.push((kind, e.to_string()));
                }
            }
        }
        report
    }

    /// Attach every observer the image exports; fails only if none is
    fn install_observers(
        &self,
        installed: &mut Installed,
        layout: crate::SockaddrLayout,
    ) -> Result<Vec<HookId>> {
        let mut ids = Vec::new();
        let mut last_error = None;
        for api in ObservedApi::ALL {
            let hook = Arc::new(ObservationHook::new(api, layout));
            match self.interceptor.attach(api.symbol(), hook.clone()) {
                Ok(id) => {
                    ids.push(id);
                    installed.observers.push(hook);
                }
                Err(e) => {
                    warn!(api = api.label(), "Observer not attached: {}", e);
                    last_error = Some(e);
                }
            }
        }
        match (ids.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(ids),
        }
    }

    /// Installed hook families
    pub fn installed(&self) -> Vec<HookKind> {
        self.installed.lock().hooks.keys().copied().collect()
    }

    /// Revert every installed hook
    pub fn uninstall(&self) {
        let mut installed = self.installed.lock();
        for (kind, ids) in std::mem::take(&mut installed.hooks) {
            for id in ids {
                if let Err(e) = self.interceptor.revert(id) {
                    warn!(hook = %kind, "Revert failed: {}", e);
                }
            }
        }
        *installed = Installed::default();
        info!("All hooks reverted");
    }

    /// Calls seen per observed API
    pub fn observation_hits(&self) -> BTreeMap<ObservedApi, u64> {
        self.installed
            .lock()
            .observers
            .iter()
            .map(|o| (o.api(), o.hits()))
            .collect()
    }

    /// Connections redirected so far
    pub fn redirected_connections(&self) -> u64 {
        self.installed.lock().redirect.as_ref().map_or(0, |h| h.redirected())
    }

    /// Challenges answered with `UseCredential`
    pub fn overridden_challenges(&self) -> u64 {
        self.installed.lock().challenge.as_ref().map_or(0, |h| h.overridden())
    }

    /// Trust evaluations forced to succeed
    pub fn forced_evaluations(&self) -> u64 {
        self.installed.lock().trust.as_ref().map_or(0, |h| h.forced())
    }
}
