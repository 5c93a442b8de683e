//! Error types, one per layer.

use crate::OriginParseError;

/// Terminal failure of a notifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifierError {
    /// The updater called `fail`.
    #[error("notifier failed: {0}")]
    Failed(String),
    /// The updater went away without finishing.
    #[error("notifier abandoned by its updater")]
    Abandoned,
}

/// The approval mechanism itself broke.
///
/// An unapproved dapp is not an error: its requests simply stay pending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("cannot establish identity of dapp {origin}: {reason}")]
    Identity { origin: String, reason: String },
}

/// Failure reported by the Admin Facet.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdminError {
    #[error("no {kind} found for {id}")]
    UnknownTarget { kind: &'static str, id: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("dapp {origin} cannot be identified: {reason}")]
    Identity { origin: String, reason: String },
    #[error("wallet state cannot be serialized: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AdminError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Failure of a bridge method.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid dapp origin: {0}")]
    Origin(#[from] OriginParseError),
    #[error("connection carries no dapp origin")]
    MissingOrigin,
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

/// Failure of a single dispatched channel message.
///
/// Never affects the channel or other messages on it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid dapp origin: {0}")]
    Origin(#[from] OriginParseError),
    #[error("message carries no dapp origin")]
    MissingOrigin,
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Admin(#[from] AdminError),
}
