//! Snapshot views of wallet state.
//!
//! A snapshot is always the whole current picture (every purse, every
//! offer), never a delta. Domain values the wallet does not interpret here
//! (amounts, proposal terms, display info) stay opaque JSON.

use crate::DappOrigin;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A petname: either a plain name or a path of names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Petname {
    Name(String),
    Path(Vec<String>),
}

impl From<&str> for Petname {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Petname {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// One purse as the wallet UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurseView {
    pub purse_petname: Petname,
    pub brand_petname: Petname,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_board_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_board_id: Option<String>,
    pub current_amount: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One issuer known to the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerView {
    pub issuer_petname: Petname,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_board_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Who asked for an offer, recorded when the offer was added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dapp_origin: Option<DappOrigin>,
    /// Connection origin as reported by the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestContext {
    pub fn for_origin(origin: &DappOrigin) -> Self {
        Self {
            dapp_origin: Some(origin.clone()),
            ..Self::default()
        }
    }
}

/// One offer in the wallet inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferView {
    /// Wallet-internal id.
    pub id: String,
    /// Id as the requesting dapp named it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_context: Option<RequestContext>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl OfferView {
    pub fn dapp_origin(&self) -> Option<&DappOrigin> {
        self.request_context.as_ref()?.dapp_origin.as_ref()
    }

    /// The view handed to the dapp that made the offer: its own id replaces
    /// the wallet-internal one.
    pub fn into_client_view(mut self) -> Self {
        if let Some(raw_id) = self.raw_id.take() {
            self.id = raw_id;
        }
        self
    }
}

/// Selects the offers one dapp may see.
///
/// An offer matches when it was requested by `origin` and, if `status` is
/// set, currently has that status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferFilter {
    pub origin: Option<DappOrigin>,
    pub status: Option<String>,
}

impl OfferFilter {
    pub fn new(origin: DappOrigin, status: Option<String>) -> Self {
        Self {
            origin: Some(origin),
            status,
        }
    }

    /// Status filtering only; every origin passes.
    pub fn any_origin(status: Option<String>) -> Self {
        Self {
            origin: None,
            status,
        }
    }

    pub fn matches(&self, offer: &OfferView) -> bool {
        let status_ok = match &self.status {
            None => true,
            Some(status) => offer.status.as_deref() == Some(status.as_str()),
        };
        let origin_ok = match &self.origin {
            None => true,
            Some(origin) => offer.dapp_origin() == Some(origin),
        };
        status_ok && origin_ok
    }

    /// Matching offers, in snapshot order, with internal ids.
    pub fn select(&self, offers: &[OfferView]) -> Vec<OfferView> {
        offers
            .iter()
            .filter(|offer| self.matches(offer))
            .cloned()
            .collect()
    }

    /// Matching offers, renamed for delivery to the dapp.
    pub fn select_for_client(&self, offers: &[OfferView]) -> Vec<OfferView> {
        offers
            .iter()
            .filter(|offer| self.matches(offer))
            .cloned()
            .map(OfferView::into_client_view)
            .collect()
    }
}
