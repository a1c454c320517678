//! Exports the hooks target

use std::fmt;

/// A named export: `module!name`, or `Class` plus `- selector` for methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetSymbol {
    /// Module or class
    pub module: &'static str,
    /// Export name or method selector
    pub name: &'static str,
}

impl TargetSymbol {
    /// Symbol `module!name`
    pub const fn new(module: &'static str, name: &'static str) -> Self {
        Self { module, name }
    }
}

impl fmt::Display for TargetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.module, self.name)
    }
}

/// Session delegate authentication challenge
pub const SESSION_DID_RECEIVE_CHALLENGE: TargetSymbol = TargetSymbol::new(
    "NSURLSession",
    "- URLSession:didReceiveChallenge:completionHandler:",
);

/// Legacy trust evaluation with a result out-parameter
pub const SEC_TRUST_EVALUATE: TargetSymbol = TargetSymbol::new("Security", "SecTrustEvaluate");

/// Trust evaluation with an error out-parameter
pub const SEC_TRUST_EVALUATE_WITH_ERROR: TargetSymbol =
    TargetSymbol::new("Security", "SecTrustEvaluateWithError");

/// Socket connect
pub const CONNECT: TargetSymbol = TargetSymbol::new("libsystem_kernel.dylib", "connect");

/// Web view navigation
pub const WEBVIEW_LOAD_REQUEST: TargetSymbol = TargetSymbol::new("WKWebView", "- loadRequest:");

/// Session data task creation
pub const SESSION_DATA_TASK: TargetSymbol =
    TargetSymbol::new("NSURLSession", "- dataTaskWithRequest:completionHandler:");

/// Synchronous legacy connection
pub const CONNECTION_SEND_SYNCHRONOUS: TargetSymbol = TargetSymbol::new(
    "NSURLConnection",
    "+ sendSynchronousRequest:returningResponse:error:",
);

/// Core networking connection creation
pub const CF_URL_CONNECTION_CREATE: TargetSymbol =
    TargetSymbol::new("CFNetwork", "CFURLConnectionCreateWithRequest");
