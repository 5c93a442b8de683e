//! Channel command dispatcher: the legacy string-typed protocol.
//!
//! Many dapps talk to the wallet over a few long-lived channels. Each channel
//! is opened, may collect offer subscriptions, and is closed by the
//! transport. Every inbound message passes the approval gate of its dapp
//! before it is interpreted; while the gate is pending the channel hears
//! `walletNeedDappApproval` once, and `walletHaveDappApproval` once when it
//! resolves.

use crate::admin::{AdminFacet, OfferActions, OfferRequest};
use crate::approval::{ApprovalObserver, ApprovalRegistry};
use crate::message::{ChannelHandle, ChannelMeta, PushMessage, RequestEnvelope, WalletRequest};
use crate::notifier::Notifier;
use crate::view::{OfferFilter, OfferView, PurseView};
use crate::{AdminError, DappOrigin, DispatchError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outbound side of the channel transport.
pub trait Transport: Send + Sync {
    /// Deliver `message` to every listed channel. Must not block; channels
    /// that are gone drop the message silently.
    fn send(&self, message: &PushMessage, channels: &[ChannelHandle]);
}

/// Lifecycle of one channel as the dispatcher sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Subscribed,
    Closed,
}

struct ChannelEntry {
    subscriptions: Vec<OfferFilter>,
    notice: Arc<dyn ApprovalObserver>,
}

/// Tells one channel about approval transitions.
struct ApprovalNotice {
    transport: Arc<dyn Transport>,
    channel: ChannelHandle,
}

impl ApprovalObserver for ApprovalNotice {
    fn needs_approval(&self, origin: &DappOrigin, suggested_petname: &str) {
        self.transport.send(
            &PushMessage::WalletNeedDappApproval {
                dapp_origin: origin.clone(),
                suggested_dapp_petname: suggested_petname.to_string(),
            },
            &[self.channel],
        );
    }

    fn approved(&self, origin: &DappOrigin) {
        self.transport.send(
            &PushMessage::WalletHaveDappApproval {
                dapp_origin: origin.clone(),
            },
            &[self.channel],
        );
    }
}

/// Pushes `walletOfferHandled` the first time the wallet reports the offer
/// handled.
struct OfferHandledNotice {
    transport: Arc<dyn Transport>,
    channel: Option<ChannelHandle>,
    fired: AtomicBool,
}

impl OfferActions for OfferHandledNotice {
    fn handled(&self, offer: &OfferView) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(channel) = self.channel {
            self.transport
                .send(&PushMessage::WalletOfferHandled(offer.id.clone()), &[channel]);
        }
    }
}

pub struct CommandDispatcher {
    admin: Arc<dyn AdminFacet>,
    approvals: Arc<ApprovalRegistry>,
    transport: Arc<dyn Transport>,
    purses: Notifier<Vec<PurseView>>,
    inbox: Notifier<Vec<OfferView>>,
    channels: Mutex<BTreeMap<ChannelHandle, ChannelEntry>>,
}

impl CommandDispatcher {
    pub fn new(
        admin: Arc<dyn AdminFacet>,
        approvals: Arc<ApprovalRegistry>,
        transport: Arc<dyn Transport>,
        purses: Notifier<Vec<PurseView>>,
        inbox: Notifier<Vec<OfferView>>,
    ) -> Self {
        Self {
            admin,
            approvals,
            transport,
            purses,
            inbox,
            channels: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn on_open(&self, meta: &ChannelMeta) {
        let Some(channel) = meta.channel_handle else {
            return;
        };
        let notice: Arc<dyn ApprovalObserver> = Arc::new(ApprovalNotice {
            transport: self.transport.clone(),
            channel,
        });
        self.lock_channels().entry(channel).or_insert(ChannelEntry {
            subscriptions: Vec::new(),
            notice,
        });
        tracing::info!(%channel, origin = ?meta.origin, "channel opened");
    }

    /// Forget the channel and every subscription on it.
    pub fn on_close(&self, meta: &ChannelMeta) {
        let Some(channel) = meta.channel_handle else {
            return;
        };
        let removed = self.lock_channels().remove(&channel);
        if let Some(entry) = removed {
            self.approvals.forget(&entry.notice);
            tracing::info!(
                %channel,
                subscriptions = entry.subscriptions.len(),
                "channel closed"
            );
        }
    }

    pub fn channel_state(&self, channel: ChannelHandle) -> ChannelState {
        match self.lock_channels().get(&channel) {
            None => ChannelState::Closed,
            Some(entry) if entry.subscriptions.is_empty() => ChannelState::Open,
            Some(_) => ChannelState::Subscribed,
        }
    }

    /// Handle one inbound message.
    ///
    /// Returns the reply, or `None` for message types this wallet does not
    /// handle. An error fails this message only.
    pub async fn on_message(
        &self,
        obj: Value,
        meta: &ChannelMeta,
    ) -> Result<Option<PushMessage>, DispatchError> {
        let envelope: RequestEnvelope = serde_json::from_value(obj.clone())?;
        let origin: DappOrigin = envelope
            .dapp_origin
            .clone()
            .or_else(|| meta.origin.clone())
            .ok_or(DispatchError::MissingOrigin)?
            .parse()?;
        let suggested_petname = envelope
            .suggested_dapp_petname
            .clone()
            .or_else(|| meta.suggested_dapp_petname().map(str::to_string))
            .or_else(|| envelope.dapp_origin.clone())
            .or_else(|| meta.origin.clone())
            .unwrap_or_else(|| origin.to_string());

        let notice = meta.channel_handle.and_then(|channel| self.notice_for(channel));
        self.approvals
            .gate(&suggested_petname, &origin)
            .approve_observed(notice.as_ref())
            .await?;

        let request: WalletRequest = serde_json::from_value(obj)?;
        tracing::debug!(kind = %envelope.kind, %origin, channel = ?meta.channel_handle, "dispatching");

        let reply = match request {
            WalletRequest::WalletGetPurses => {
                let purses = self.purses.current().unwrap_or_default();
                let serialized = serde_json::to_string(&purses).map_err(AdminError::from)?;
                PushMessage::WalletUpdatePurses(serialized)
            }
            WalletRequest::WalletAddOffer { data } => {
                let actions = Arc::new(OfferHandledNotice {
                    transport: self.transport.clone(),
                    channel: meta.channel_handle,
                    fired: AtomicBool::new(false),
                });
                let id = self
                    .admin
                    .add_offer(
                        OfferRequest::new(data).with_actions(actions),
                        meta.request_context(&origin),
                    )
                    .await?;
                PushMessage::WalletOfferAdded(id)
            }
            WalletRequest::WalletSubscribeOffers { status } => {
                let subscribed = match meta.channel_handle {
                    Some(channel) => self.subscribe(channel, OfferFilter::new(origin, status)),
                    None => false,
                };
                PushMessage::WalletSubscribedOffers(subscribed)
            }
            WalletRequest::WalletGetOffers { status } => {
                let offers = self.admin.get_offers(Some(&origin)).await?;
                PushMessage::WalletOfferDescriptions(OfferFilter::any_origin(status).select(&offers))
            }
            WalletRequest::WalletGetDepositFacetId { brand_board_id } => {
                let id = self.admin.get_deposit_facet_id(&brand_board_id).await?;
                PushMessage::WalletDepositFacetIdResponse(id)
            }
            WalletRequest::WalletSuggestIssuer { petname, board_id } => {
                let name = self
                    .admin
                    .suggest_issuer(petname, &board_id, Some(&origin))
                    .await?;
                PushMessage::WalletSuggestIssuerResponse(name)
            }
            WalletRequest::WalletSuggestInstance { petname, board_id } => {
                let name = self
                    .admin
                    .suggest_instance(petname, &board_id, Some(&origin))
                    .await?;
                PushMessage::WalletSuggestInstanceResponse(name)
            }
            WalletRequest::WalletSuggestInstallation { petname, board_id } => {
                let name = self
                    .admin
                    .suggest_installation(petname, &board_id, Some(&origin))
                    .await?;
                PushMessage::WalletSuggestInstallationResponse(name)
            }
            WalletRequest::Unknown => {
                tracing::debug!(kind = %envelope.kind, "message type not handled");
                return Ok(None);
            }
        };
        Ok(Some(reply))
    }

    /// Push a new inbox snapshot to every subscription, channel by channel,
    /// each channel's subscriptions in the order they were made.
    pub fn push_offers(&self, offers: &[OfferView]) {
        let channels = self.lock_channels();
        for (channel, entry) in channels.iter() {
            for filter in &entry.subscriptions {
                self.transport.send(
                    &PushMessage::WalletOfferDescriptions(filter.select(offers)),
                    &[*channel],
                );
            }
        }
    }

    /// Add a subscription and push its first view. Closed or unknown
    /// channels get nothing.
    fn subscribe(&self, channel: ChannelHandle, filter: OfferFilter) -> bool {
        let mut channels = self.lock_channels();
        let Some(entry) = channels.get_mut(&channel) else {
            tracing::debug!(%channel, "subscription on closed channel ignored");
            return false;
        };
        let offers = self.inbox.current().unwrap_or_default();
        let first = PushMessage::WalletOfferDescriptions(filter.select(&offers));
        entry.subscriptions.push(filter);
        self.transport.send(&first, &[channel]);
        true
    }

    fn notice_for(&self, channel: ChannelHandle) -> Option<Arc<dyn ApprovalObserver>> {
        self.lock_channels()
            .get(&channel)
            .map(|entry| entry.notice.clone())
    }

    fn lock_channels(&self) -> MutexGuard<'_, BTreeMap<ChannelHandle, ChannelEntry>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
