//! An in-memory wallet implementing the Admin Facet.
//!
//! Keeps purses, issuers, offers, a board and the dapp approval records in
//! process memory, and reports every change to the [`WalletPublishers`] it
//! was built with. Nothing survives a restart.

use crate::admin::{AdminFacet, OfferActions, OfferRequest, SuggestionKind};
use crate::approval::{ApprovalAuthority, PendingHook};
use crate::notifier::{Notifier, Updater, notifier_kit};
use crate::service::WalletPublishers;
use crate::view::{IssuerView, OfferFilter, OfferView, Petname, PurseView, RequestContext};
use crate::{AdminError, DappOrigin};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// What a board id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    Issuer,
    Instance,
    Installation,
    Brand,
    DepositFacet,
}

impl From<SuggestionKind> for BoardKind {
    fn from(kind: SuggestionKind) -> Self {
        match kind {
            SuggestionKind::Issuer => BoardKind::Issuer,
            SuggestionKind::Instance => BoardKind::Instance,
            SuggestionKind::Installation => BoardKind::Installation,
        }
    }
}

#[derive(Debug, Clone)]
struct BoardEntry {
    kind: BoardKind,
    value: Value,
}

/// A petname a dapp proposed for a board object.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub petname: Petname,
    pub board_id: String,
    pub origin: Option<DappOrigin>,
}

struct StoredOffer {
    view: OfferView,
    actions: Option<Arc<dyn OfferActions>>,
    ui: Updater<Value>,
    ui_notifier: Notifier<Value>,
}

type ApprovalWaiter = oneshot::Sender<Result<(), AdminError>>;

struct DappRecord {
    petname: String,
    approved: bool,
    failure: Option<String>,
    waiters: Vec<ApprovalWaiter>,
}

#[derive(Default)]
struct WalletState {
    purses: Vec<PurseView>,
    issuers: Vec<IssuerView>,
    offers: Vec<StoredOffer>,
    board: BTreeMap<String, BoardEntry>,
    deposit_facets: BTreeMap<String, String>,
    suggestions: Vec<Suggestion>,
    dapps: HashMap<DappOrigin, DappRecord>,
    agoric_names: Value,
    names_by_address: Value,
    auto_approve: bool,
}

pub struct MemoryWallet {
    state: Mutex<WalletState>,
    publishers: WalletPublishers,
    purses: Updater<Vec<PurseView>>,
    purses_notifier: Notifier<Vec<PurseView>>,
    issuers: Updater<Vec<IssuerView>>,
    issuers_notifier: Notifier<Vec<IssuerView>>,
    offers: Updater<Vec<OfferView>>,
    offers_notifier: Notifier<Vec<OfferView>>,
}

impl MemoryWallet {
    /// An empty wallet. Publishes its (empty) purses and inbox right away.
    pub fn new(publishers: &WalletPublishers) -> Self {
        let (purses, purses_notifier) = notifier_kit(Some(Vec::new()));
        let (issuers, issuers_notifier) = notifier_kit(Some(Vec::new()));
        let (offers, offers_notifier) = notifier_kit(Some(Vec::new()));
        let wallet = Self {
            state: Mutex::new(WalletState {
                agoric_names: json!({}),
                names_by_address: json!({}),
                ..WalletState::default()
            }),
            publishers: publishers.clone(),
            purses,
            purses_notifier,
            issuers,
            issuers_notifier,
            offers,
            offers_notifier,
        };
        let state = wallet.lock();
        wallet.publish_purses(&state);
        wallet.publish_inbox(&state);
        drop(state);
        wallet
    }

    /// Approve every dapp on its first request.
    pub fn set_auto_approve(&self, auto_approve: bool) {
        self.lock().auto_approve = auto_approve;
    }

    pub fn add_purse(&self, purse: PurseView) {
        let mut state = self.lock();
        if let Some(brand) = &purse.brand_board_id {
            state.board.entry(brand.clone()).or_insert(BoardEntry {
                kind: BoardKind::Brand,
                value: json!({ "brand": purse.brand_petname }),
            });
        }
        state.purses.push(purse);
        self.publish_purses(&state);
    }

    pub fn add_issuer(&self, issuer: IssuerView) {
        let mut state = self.lock();
        if let Some(id) = &issuer.issuer_board_id {
            state.board.entry(id.clone()).or_insert(BoardEntry {
                kind: BoardKind::Issuer,
                value: json!({ "issuer": issuer.issuer_petname }),
            });
        }
        state.issuers.push(issuer);
        self.issuers.update_state(state.issuers.clone());
    }

    pub fn register_board(&self, board_id: impl Into<String>, kind: BoardKind, value: Value) {
        self.lock()
            .board
            .insert(board_id.into(), BoardEntry { kind, value });
    }

    /// Make `deposit_board_id` the deposit facet for purses of `brand_board_id`.
    pub fn add_deposit_facet(&self, brand_board_id: impl Into<String>, deposit_board_id: impl Into<String>) {
        let deposit_board_id = deposit_board_id.into();
        let mut state = self.lock();
        state.board.insert(
            deposit_board_id.clone(),
            BoardEntry {
                kind: BoardKind::DepositFacet,
                value: Value::Null,
            },
        );
        state
            .deposit_facets
            .insert(brand_board_id.into(), deposit_board_id);
    }

    pub fn set_agoric_names(&self, names: Value) {
        self.lock().agoric_names = names;
    }

    pub fn set_names_by_address(&self, names: Value) {
        self.lock().names_by_address = names;
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.lock().suggestions.clone()
    }

    /// Approve `origin`, releasing every request waiting on it.
    pub fn enable_dapp(&self, origin: &DappOrigin) {
        let waiters = {
            let mut state = self.lock();
            let record = state
                .dapps
                .entry(origin.clone())
                .or_insert_with(|| DappRecord::new(origin.to_string(), false));
            record.approved = true;
            std::mem::take(&mut record.waiters)
        };
        tracing::info!(%origin, "dapp enabled");
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Mark `origin` as unidentifiable; its waiters fail with `reason`.
    pub fn fail_dapp(&self, origin: &DappOrigin, reason: impl Into<String>) {
        let reason = reason.into();
        let waiters = {
            let mut state = self.lock();
            let record = state
                .dapps
                .entry(origin.clone())
                .or_insert_with(|| DappRecord::new(origin.to_string(), false));
            record.failure = Some(reason.clone());
            std::mem::take(&mut record.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(AdminError::Identity {
                origin: origin.to_string(),
                reason: reason.clone(),
            }));
        }
    }

    pub fn is_dapp_approved(&self, origin: &DappOrigin) -> bool {
        self.lock()
            .dapps
            .get(origin)
            .is_some_and(|record| record.approved)
    }

    /// Change an offer's status and publish the inbox. The offer's actions
    /// hear `handled` once the status is anything but `pending`.
    pub fn set_offer_status(&self, id: &str, status: &str) -> Result<(), AdminError> {
        let (view, actions) = {
            let mut state = self.lock();
            let offer = state
                .offers
                .iter_mut()
                .find(|offer| offer.view.id == id)
                .ok_or_else(|| AdminError::UnknownTarget {
                    kind: "offer",
                    id: id.to_string(),
                })?;
            offer.view.status = Some(status.to_string());
            offer.ui.update_state(serde_json::to_value(&offer.view)?);
            let handled = (status != "pending").then(|| offer.actions.clone());
            let view = offer.view.clone();
            self.publish_inbox(&state);
            (view, handled.flatten())
        };
        if let Some(actions) = actions {
            actions.handled(&view);
        }
        Ok(())
    }

    fn store_offer(&self, request: OfferRequest, context: RequestContext) -> Result<String, AdminError> {
        let Value::Object(mut fields) = request.offer else {
            return Err(AdminError::Rejected("offer must be an object".into()));
        };
        let raw_id = match fields.remove("id") {
            Some(Value::String(id)) => id,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(AdminError::Rejected("offer is missing its id".into())),
        };
        for reserved in ["rawId", "status", "requestContext"] {
            fields.remove(reserved);
        }

        let scope = context
            .dapp_origin
            .as_ref()
            .map(DappOrigin::to_string)
            .or_else(|| context.origin.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let id = format!("{scope}#{raw_id}");

        let mut state = self.lock();
        if state.offers.iter().any(|offer| offer.view.id == id) {
            return Ok(id);
        }

        let view = OfferView {
            id: id.clone(),
            raw_id: Some(raw_id),
            status: None,
            request_context: Some(context),
            details: fields,
        };
        let (ui, ui_notifier) = notifier_kit(Some(serde_json::to_value(&view)?));
        state.offers.push(StoredOffer {
            view,
            actions: request.actions,
            ui,
            ui_notifier,
        });
        self.publish_inbox(&state);
        tracing::debug!(%id, "offer added");
        Ok(id)
    }

    fn publish_purses(&self, state: &WalletState) {
        self.purses.update_state(state.purses.clone());
        if let Err(e) = self.publishers.purses.publish_serialize(&state.purses) {
            tracing::error!(error = %e, "cannot publish purses");
        }
    }

    fn publish_inbox(&self, state: &WalletState) {
        let views: Vec<OfferView> = state.offers.iter().map(|offer| offer.view.clone()).collect();
        if let Err(e) = self.publishers.inbox.publish_serialize(&views) {
            tracing::error!(error = %e, "cannot publish inbox");
        }
        self.offers.update_state(views);
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DappRecord {
    fn new(petname: String, approved: bool) -> Self {
        Self {
            petname,
            approved,
            failure: None,
            waiters: Vec::new(),
        }
    }
}

fn lookup(root: &Value, path: &[String]) -> Option<Value> {
    path.iter()
        .try_fold(root, |node, key| node.get(key))
        .cloned()
}

#[async_trait]
impl ApprovalAuthority for MemoryWallet {
    async fn wait_for_dapp_approval(
        &self,
        suggested_petname: &str,
        origin: &DappOrigin,
        on_pending: PendingHook,
    ) -> Result<(), AdminError> {
        let waiter = {
            let mut state = self.lock();
            let auto_approve = state.auto_approve;
            let record = state
                .dapps
                .entry(origin.clone())
                .or_insert_with(|| DappRecord::new(suggested_petname.to_string(), auto_approve));
            if let Some(reason) = &record.failure {
                return Err(AdminError::Identity {
                    origin: origin.to_string(),
                    reason: reason.clone(),
                });
            }
            if record.approved {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            record.waiters.push(tx);
            rx
        };
        on_pending();
        waiter
            .await
            .unwrap_or_else(|_| Err(AdminError::Rejected("wallet shut down".into())))
    }
}

#[async_trait]
impl AdminFacet for MemoryWallet {
    async fn add_offer(&self, offer: OfferRequest, context: RequestContext) -> Result<String, AdminError> {
        self.store_offer(offer, context)
    }

    async fn add_offer_invitation(
        &self,
        mut offer: OfferRequest,
        invitation: Value,
        origin: Option<&DappOrigin>,
    ) -> Result<String, AdminError> {
        if let Value::Object(fields) = &mut offer.offer {
            fields.insert("invitation".into(), invitation);
        }
        let context = origin.map(RequestContext::for_origin).unwrap_or_default();
        self.store_offer(offer, context)
    }

    async fn get_offers(&self, origin: Option<&DappOrigin>) -> Result<Vec<OfferView>, AdminError> {
        let filter = OfferFilter {
            origin: origin.cloned(),
            status: None,
        };
        let state = self.lock();
        Ok(state
            .offers
            .iter()
            .map(|offer| &offer.view)
            .filter(|view| filter.matches(view))
            .cloned()
            .collect())
    }

    fn offers_notifier(&self) -> Notifier<Vec<OfferView>> {
        self.offers_notifier.clone()
    }

    fn attenuated_purses_notifier(&self) -> Notifier<Vec<PurseView>> {
        self.purses_notifier.clone()
    }

    fn issuers_notifier(&self) -> Notifier<Vec<IssuerView>> {
        self.issuers_notifier.clone()
    }

    async fn get_deposit_facet_id(&self, brand_board_id: &str) -> Result<String, AdminError> {
        self.lock()
            .deposit_facets
            .get(brand_board_id)
            .cloned()
            .ok_or_else(|| AdminError::UnknownTarget {
                kind: "deposit facet",
                id: brand_board_id.to_string(),
            })
    }

    async fn suggest(
        &self,
        kind: SuggestionKind,
        petname: Petname,
        board_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Petname, AdminError> {
        let mut state = self.lock();
        let entry_kind = state.board.get(board_id).map(|entry| entry.kind);
        if entry_kind != Some(BoardKind::from(kind)) {
            return Err(AdminError::UnknownTarget {
                kind: kind.as_str(),
                id: board_id.to_string(),
            });
        }

        // Dapp suggestions live under the dapp's own petname.
        let name = match (origin, petname) {
            (Some(origin), Petname::Name(name)) => {
                let dapp = state
                    .dapps
                    .get(origin)
                    .map_or_else(|| origin.to_string(), |record| record.petname.clone());
                Petname::Path(vec![dapp, name])
            }
            (_, petname) => petname,
        };

        state.suggestions.push(Suggestion {
            kind,
            petname: name.clone(),
            board_id: board_id.to_string(),
            origin: origin.cloned(),
        });
        if kind == SuggestionKind::Issuer
            && !state
                .issuers
                .iter()
                .any(|issuer| issuer.issuer_board_id.as_deref() == Some(board_id))
        {
            state.issuers.push(IssuerView {
                issuer_petname: name.clone(),
                issuer_board_id: Some(board_id.to_string()),
                extra: Map::new(),
            });
            self.issuers.update_state(state.issuers.clone());
        }
        Ok(name)
    }

    async fn get_ui_notifier(
        &self,
        raw_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Notifier<Value>, AdminError> {
        let state = self.lock();
        state
            .offers
            .iter()
            .find(|offer| {
                let id_matches = match origin {
                    Some(_) => offer.view.raw_id.as_deref() == Some(raw_id),
                    None => offer.view.id == raw_id,
                };
                id_matches && origin.is_none_or(|origin| offer.view.dapp_origin() == Some(origin))
            })
            .map(|offer| offer.ui_notifier.clone())
            .ok_or_else(|| AdminError::UnknownTarget {
                kind: "offer",
                id: raw_id.to_string(),
            })
    }

    async fn get_zoe(&self) -> Result<Value, AdminError> {
        Ok(json!({ "presence": "zoe" }))
    }

    async fn get_board(&self) -> Result<Value, AdminError> {
        let state = self.lock();
        let ids: Vec<&String> = state.board.keys().collect();
        Ok(json!({ "presence": "board", "ids": ids }))
    }

    async fn get_agoric_names(&self, path: &[String]) -> Result<Value, AdminError> {
        lookup(&self.lock().agoric_names, path).ok_or_else(|| AdminError::UnknownTarget {
            kind: "name",
            id: path.join("."),
        })
    }

    async fn get_names_by_address(&self, path: &[String]) -> Result<Value, AdminError> {
        lookup(&self.lock().names_by_address, path).ok_or_else(|| AdminError::UnknownTarget {
            kind: "address name",
            id: path.join("."),
        })
    }

    async fn get_brand_petnames(&self, brands: &[String]) -> Result<Vec<Petname>, AdminError> {
        let state = self.lock();
        brands
            .iter()
            .map(|brand| {
                state
                    .purses
                    .iter()
                    .find(|purse| purse.brand_board_id.as_deref() == Some(brand.as_str()))
                    .map(|purse| purse.brand_petname.clone())
                    .ok_or_else(|| AdminError::UnknownTarget {
                        kind: "brand",
                        id: brand.clone(),
                    })
            })
            .collect()
    }
}
