//! Core types and services for the wallet bridge.
//!
//! Untrusted dapps reach a user's wallet through this crate. Every dapp is
//! identified by its origin and must be approved by the wallet owner before
//! any of its requests reach the Admin Facet; while approval is pending the
//! requests simply wait. Wallet state (purses, the offer inbox) is published
//! as whole snapshots and fanned out to subscribers, filtered per dapp.
//!
//! Two surfaces are provided: [`WalletBridge`], an origin-scoped object for
//! capability-aware clients, and [`CommandDispatcher`], the legacy
//! string-typed channel protocol. [`WalletService`] wires both to a wallet.

mod admin;
mod approval;
mod bridge;
mod dispatcher;
mod error;
mod memory;
mod message;
mod notifier;
mod origin;
mod pubsub;
mod service;
mod view;

pub use admin::{AdminFacet, OfferActions, OfferRequest, SuggestionKind};
pub use approval::{
    ApprovalAuthority, ApprovalGate, ApprovalObserver, ApprovalRegistry, ApprovalStatus,
    PendingHook,
};
pub use bridge::{Access, WalletBridge};
pub use dispatcher::{ChannelState, CommandDispatcher, Transport};
pub use error::{AdminError, ApprovalError, BridgeError, DispatchError, NotifierError};
pub use memory::{BoardKind, MemoryWallet, Suggestion};
pub use message::{
    ChannelHandle, ChannelMeta, ErrorReply, PushMessage, RequestEnvelope, WalletRequest,
};
pub use notifier::{
    IterationObserver, Notifier, NotifierCursor, UpdateRecord, Updater, notifier_kit,
    observe_iteration,
};
pub use origin::{DappOrigin, OriginParseError};
pub use pubsub::{StateListener, StatePublisher};
pub use service::{WalletPublishers, WalletService};
pub use view::{IssuerView, OfferFilter, OfferView, Petname, PurseView, RequestContext};
