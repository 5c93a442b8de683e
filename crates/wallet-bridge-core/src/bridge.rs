//! Capability bridge: the attenuated wallet object handed to one dapp.
//!
//! Every method of a gated bridge waits on the dapp's approval gate before
//! it touches the wallet, including the notifier getters, so an unapproved
//! dapp gets neither data nor a handle. Calls that create or name things are
//! tagged with the dapp's origin. The preapproved variant skips the gate and
//! the tagging; otherwise the two behave alike.

use crate::admin::{AdminFacet, OfferRequest};
use crate::approval::{ApprovalGate, ApprovalObserver};
use crate::message::ChannelMeta;
use crate::notifier::Notifier;
use crate::view::{IssuerView, OfferFilter, OfferView, Petname, PurseView, RequestContext};
use crate::{ApprovalError, BridgeError, DappOrigin, NotifierError};
use serde_json::Value;
use std::sync::Arc;

/// How a bridge is allowed to reach the wallet.
#[derive(Clone)]
pub enum Access {
    /// Every call waits on `gate`; `observer`, if any, hears its transitions.
    Gated {
        gate: ApprovalGate,
        observer: Option<Arc<dyn ApprovalObserver>>,
    },
    /// Trusted local use, such as an operator console.
    Preapproved,
}

#[derive(Clone)]
pub struct WalletBridge {
    admin: Arc<dyn AdminFacet>,
    access: Access,
    origin: Option<DappOrigin>,
    meta: ChannelMeta,
}

impl WalletBridge {
    /// A bridge for the dapp at `gate.origin()`.
    pub fn gated(
        admin: Arc<dyn AdminFacet>,
        gate: ApprovalGate,
        observer: Option<Arc<dyn ApprovalObserver>>,
        meta: ChannelMeta,
    ) -> Self {
        let origin = Some(gate.origin().clone());
        Self {
            admin,
            access: Access::Gated { gate, observer },
            origin,
            meta,
        }
    }

    pub fn preapproved(admin: Arc<dyn AdminFacet>) -> Self {
        Self {
            admin,
            access: Access::Preapproved,
            origin: None,
            meta: ChannelMeta::default(),
        }
    }

    /// The dapp this bridge is bound to; `None` for the preapproved bridge.
    pub fn origin(&self) -> Option<&DappOrigin> {
        self.origin.as_ref()
    }

    pub fn is_preapproved(&self) -> bool {
        matches!(self.access, Access::Preapproved)
    }

    async fn approve(&self) -> Result<(), ApprovalError> {
        match &self.access {
            Access::Preapproved => Ok(()),
            Access::Gated { gate, observer } => gate.approve_observed(observer.as_ref()).await,
        }
    }

    /// `source` mapped through `transform`, re-checking approval before each
    /// forwarded update.
    fn approved_notifier<S, U, F>(&self, source: &Notifier<S>, transform: F) -> Notifier<U>
    where
        S: Clone + Send + Sync + 'static,
        U: Clone + Send + Sync + 'static,
        F: Fn(&S) -> U + Send + Sync + 'static,
    {
        match &self.access {
            Access::Preapproved => source.derive(transform),
            Access::Gated { gate, observer } => {
                let gate = gate.clone();
                let observer = observer.clone();
                source.derive_gated(transform, move || {
                    let gate = gate.clone();
                    let observer = observer.clone();
                    async move {
                        gate.approve_observed(observer.as_ref())
                            .await
                            .map_err(|e| NotifierError::Failed(e.to_string()))
                    }
                })
            }
        }
    }

    pub async fn get_purses_notifier(&self) -> Result<Notifier<Vec<PurseView>>, BridgeError> {
        self.approve().await?;
        let purses = self.admin.attenuated_purses_notifier();
        if self.is_preapproved() {
            return Ok(purses);
        }
        Ok(self.approved_notifier(&purses, |all: &Vec<PurseView>| all.clone()))
    }

    pub async fn get_issuers_notifier(&self) -> Result<Notifier<Vec<IssuerView>>, BridgeError> {
        self.approve().await?;
        Ok(self.admin.issuers_notifier())
    }

    /// Offers this dapp made, optionally only those with `status`.
    ///
    /// The filter runs again on every inbox snapshot. Dapps see their own ids
    /// for their offers; the operator sees every offer under wallet ids.
    pub async fn get_offers_notifier(
        &self,
        status: Option<String>,
    ) -> Result<Notifier<Vec<OfferView>>, BridgeError> {
        self.approve().await?;
        let offers = self.admin.offers_notifier();
        let notifier = match &self.origin {
            Some(origin) => {
                let filter = OfferFilter::new(origin.clone(), status);
                self.approved_notifier(&offers, move |all: &Vec<OfferView>| {
                    filter.select_for_client(all)
                })
            }
            None => {
                let filter = OfferFilter::any_origin(status);
                self.approved_notifier(&offers, move |all: &Vec<OfferView>| filter.select(all))
            }
        };
        Ok(notifier)
    }

    pub async fn add_offer(&self, offer: OfferRequest) -> Result<String, BridgeError> {
        self.approve().await?;
        let context = match &self.origin {
            Some(origin) => self.meta.request_context(origin),
            None => RequestContext::default(),
        };
        Ok(self.admin.add_offer(offer, context).await?)
    }

    pub async fn add_offer_invitation(
        &self,
        offer: OfferRequest,
        invitation: Value,
    ) -> Result<String, BridgeError> {
        self.approve().await?;
        Ok(self
            .admin
            .add_offer_invitation(offer, invitation, self.origin.as_ref())
            .await?)
    }

    pub async fn get_deposit_facet_id(&self, brand_board_id: &str) -> Result<String, BridgeError> {
        self.approve().await?;
        Ok(self.admin.get_deposit_facet_id(brand_board_id).await?)
    }

    pub async fn suggest_issuer(
        &self,
        petname: Petname,
        board_id: &str,
    ) -> Result<Petname, BridgeError> {
        self.approve().await?;
        Ok(self
            .admin
            .suggest_issuer(petname, board_id, self.origin.as_ref())
            .await?)
    }

    pub async fn suggest_instance(
        &self,
        petname: Petname,
        board_id: &str,
    ) -> Result<Petname, BridgeError> {
        self.approve().await?;
        Ok(self
            .admin
            .suggest_instance(petname, board_id, self.origin.as_ref())
            .await?)
    }

    pub async fn suggest_installation(
        &self,
        petname: Petname,
        board_id: &str,
    ) -> Result<Petname, BridgeError> {
        self.approve().await?;
        Ok(self
            .admin
            .suggest_installation(petname, board_id, self.origin.as_ref())
            .await?)
    }

    pub async fn get_ui_notifier(&self, raw_id: &str) -> Result<Notifier<Value>, BridgeError> {
        self.approve().await?;
        Ok(self
            .admin
            .get_ui_notifier(raw_id, self.origin.as_ref())
            .await?)
    }

    pub async fn get_zoe(&self) -> Result<Value, BridgeError> {
        self.approve().await?;
        Ok(self.admin.get_zoe().await?)
    }

    pub async fn get_board(&self) -> Result<Value, BridgeError> {
        self.approve().await?;
        Ok(self.admin.get_board().await?)
    }

    pub async fn get_agoric_names(&self, path: &[String]) -> Result<Value, BridgeError> {
        self.approve().await?;
        Ok(self.admin.get_agoric_names(path).await?)
    }

    pub async fn get_names_by_address(&self, path: &[String]) -> Result<Value, BridgeError> {
        self.approve().await?;
        Ok(self.admin.get_names_by_address(path).await?)
    }

    pub async fn get_brand_petnames(&self, brands: &[String]) -> Result<Vec<Petname>, BridgeError> {
        self.approve().await?;
        Ok(self.admin.get_brand_petnames(brands).await?)
    }
}
