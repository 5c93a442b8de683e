//! The wallet bridge service: wires the wallet's state publishers into
//! notifiers, and hands out bridges and the channel dispatcher.

use crate::admin::AdminFacet;
use crate::approval::{ApprovalObserver, ApprovalRegistry};
use crate::bridge::WalletBridge;
use crate::dispatcher::{CommandDispatcher, Transport};
use crate::message::ChannelMeta;
use crate::notifier::{Notifier, notifier_kit};
use crate::pubsub::StatePublisher;
use crate::view::{OfferView, PurseView};
use crate::{BridgeError, DappOrigin};
use std::sync::Arc;

/// The publishers a wallet reports its state changes to.
#[derive(Clone)]
pub struct WalletPublishers {
    pub purses: Arc<StatePublisher>,
    pub inbox: Arc<StatePublisher>,
}

impl WalletPublishers {
    pub fn new() -> Self {
        Self {
            purses: Arc::new(StatePublisher::new("purses")),
            inbox: Arc::new(StatePublisher::new("inbox")),
        }
    }
}

impl Default for WalletPublishers {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WalletService {
    admin: Arc<dyn AdminFacet>,
    approvals: Arc<ApprovalRegistry>,
    purses: Notifier<Vec<PurseView>>,
    inbox: Notifier<Vec<OfferView>>,
    dispatcher: Arc<CommandDispatcher>,
}

impl WalletService {
    /// Subscribe to `publishers` and build the dispatcher on `transport`.
    ///
    /// Subscribing delivers the publishers' current snapshots right away.
    pub fn new(
        admin: Arc<dyn AdminFacet>,
        publishers: &WalletPublishers,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let approvals = Arc::new(ApprovalRegistry::new(admin.clone()));
        let (purses_updater, purses) = notifier_kit(Some(Vec::<PurseView>::new()));
        let (inbox_updater, inbox) = notifier_kit(Some(Vec::<OfferView>::new()));

        let dispatcher = Arc::new(CommandDispatcher::new(
            admin.clone(),
            approvals.clone(),
            transport,
            purses.clone(),
            inbox.clone(),
        ));

        publishers.purses.subscribe(Arc::new(move |serialized: &str| {
            match serde_json::from_str::<Vec<PurseView>>(serialized) {
                Ok(snapshot) => purses_updater.update_state(snapshot),
                Err(e) => tracing::warn!(error = %e, "unreadable purses snapshot"),
            }
        }));

        let fan_out = dispatcher.clone();
        publishers.inbox.subscribe(Arc::new(move |serialized: &str| {
            match serde_json::from_str::<Vec<OfferView>>(serialized) {
                Ok(snapshot) => {
                    inbox_updater.update_state(snapshot.clone());
                    fan_out.push_offers(&snapshot);
                }
                Err(e) => tracing::warn!(error = %e, "unreadable inbox snapshot"),
            }
        }));

        Self {
            admin,
            approvals,
            purses,
            inbox,
            dispatcher,
        }
    }

    /// A bridge for `origin` that waits on the wallet's approval of it.
    pub fn scoped_bridge(&self, suggested_petname: &str, origin: DappOrigin) -> WalletBridge {
        let gate = self.approvals.gate(suggested_petname, &origin);
        WalletBridge::gated(self.admin.clone(), gate, None, ChannelMeta::default())
    }

    /// A bridge that never waits for approval, for trusted local use.
    pub fn preapproved_bridge(&self) -> WalletBridge {
        WalletBridge::preapproved(self.admin.clone())
    }

    /// Entry point for capability-aware clients.
    ///
    /// `other_side` hears `needs_approval` and `approved` for this dapp. The
    /// origin is `dapp_origin` if given, else the connection's.
    pub fn bootstrap(
        &self,
        other_side: Arc<dyn ApprovalObserver>,
        meta: &ChannelMeta,
        dapp_origin: Option<String>,
    ) -> Result<WalletBridge, BridgeError> {
        let origin: DappOrigin = dapp_origin
            .or_else(|| meta.origin.clone())
            .ok_or(BridgeError::MissingOrigin)?
            .parse()?;
        let suggested_petname = meta
            .suggested_dapp_petname()
            .map_or_else(|| origin.to_string(), str::to_string);
        let gate = self.approvals.gate(&suggested_petname, &origin);
        Ok(WalletBridge::gated(
            self.admin.clone(),
            gate,
            Some(other_side),
            meta.clone(),
        ))
    }

    /// The legacy channel protocol handler.
    pub fn command_handler(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// The full, ungated wallet.
    pub fn admin_facet(&self) -> Arc<dyn AdminFacet> {
        self.admin.clone()
    }

    pub fn inbox_notifier(&self) -> Notifier<Vec<OfferView>> {
        self.inbox.clone()
    }

    pub fn purses_notifier(&self) -> Notifier<Vec<PurseView>> {
        self.purses.clone()
    }
}
