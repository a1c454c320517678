//! Hook implementations

pub mod challenge;
pub mod connect;
pub mod observe;
pub mod trust_eval;

pub use challenge::{AuthChallenge, ChallengeDisposition, ChallengeHook, CompletionBlock, Credential, ServerTrust};
pub use connect::ConnectRedirectHook;
pub use observe::{ObservationHook, ObservedApi};
pub use trust_eval::TrustEvaluationHook;
