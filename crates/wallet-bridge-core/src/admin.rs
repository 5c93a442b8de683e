//! The Admin Facet: the fully trusted wallet object that performs the real
//! work. This crate only gates and origin-tags calls into it.

use crate::approval::ApprovalAuthority;
use crate::notifier::Notifier;
use crate::view::{IssuerView, OfferView, Petname, PurseView, RequestContext};
use crate::{AdminError, DappOrigin};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Called back by the wallet when it has handled an offer.
pub trait OfferActions: Send + Sync {
    fn handled(&self, offer: &OfferView);
}

/// An offer as a dapp submits it.
#[derive(Clone)]
pub struct OfferRequest {
    /// The offer record; its `id` is the dapp's own id for it.
    pub offer: Value,
    pub actions: Option<Arc<dyn OfferActions>>,
}

impl OfferRequest {
    pub fn new(offer: Value) -> Self {
        Self {
            offer,
            actions: None,
        }
    }

    pub fn with_actions(mut self, actions: Arc<dyn OfferActions>) -> Self {
        self.actions = Some(actions);
        self
    }
}

impl fmt::Debug for OfferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfferRequest")
            .field("offer", &self.offer)
            .field("actions", &self.actions.is_some())
            .finish()
    }
}

/// Which kind of board object a petname suggestion names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuggestionKind {
    Issuer,
    Instance,
    Installation,
}

impl SuggestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionKind::Issuer => "issuer",
            SuggestionKind::Instance => "instance",
            SuggestionKind::Installation => "installation",
        }
    }
}

/// The wallet operations this crate consumes.
///
/// Every method may fail; failures pass through to the immediate caller
/// unchanged. An `origin` of `None` means the call comes from the trusted
/// operator rather than a dapp.
#[async_trait]
pub trait AdminFacet: ApprovalAuthority {
    async fn add_offer(
        &self,
        offer: OfferRequest,
        context: RequestContext,
    ) -> Result<String, AdminError>;

    async fn add_offer_invitation(
        &self,
        offer: OfferRequest,
        invitation: Value,
        origin: Option<&DappOrigin>,
    ) -> Result<String, AdminError>;

    /// Offers requested by `origin`, or every offer for `None`.
    async fn get_offers(&self, origin: Option<&DappOrigin>) -> Result<Vec<OfferView>, AdminError>;

    fn offers_notifier(&self) -> Notifier<Vec<OfferView>>;

    fn attenuated_purses_notifier(&self) -> Notifier<Vec<PurseView>>;

    fn issuers_notifier(&self) -> Notifier<Vec<IssuerView>>;

    async fn get_deposit_facet_id(&self, brand_board_id: &str) -> Result<String, AdminError>;

    /// Record `petname` as the suggested name of a board object.
    async fn suggest(
        &self,
        kind: SuggestionKind,
        petname: Petname,
        board_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Petname, AdminError>;

    async fn suggest_issuer(
        &self,
        petname: Petname,
        board_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Petname, AdminError> {
        self.suggest(SuggestionKind::Issuer, petname, board_id, origin)
            .await
    }

    async fn suggest_instance(
        &self,
        petname: Petname,
        board_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Petname, AdminError> {
        self.suggest(SuggestionKind::Instance, petname, board_id, origin)
            .await
    }

    async fn suggest_installation(
        &self,
        petname: Petname,
        board_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Petname, AdminError> {
        self.suggest(SuggestionKind::Installation, petname, board_id, origin)
            .await
    }

    async fn get_ui_notifier(
        &self,
        raw_id: &str,
        origin: Option<&DappOrigin>,
    ) -> Result<Notifier<Value>, AdminError>;

    async fn get_zoe(&self) -> Result<Value, AdminError>;

    async fn get_board(&self) -> Result<Value, AdminError>;

    async fn get_agoric_names(&self, path: &[String]) -> Result<Value, AdminError>;

    async fn get_names_by_address(&self, path: &[String]) -> Result<Value, AdminError>;

    async fn get_brand_petnames(&self, brands: &[String]) -> Result<Vec<Petname>, AdminError>;
}
