//! Legacy channel protocol messages.
//!
//! Every message in either direction is a JSON object tagged by `type`.
//! Requests carry their fields inline; pushes carry a single `data` field.

use crate::view::{OfferView, Petname, RequestContext};
use crate::DappOrigin;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque handle of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelHandle(u64);

impl ChannelHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// What the transport knows about a connection. Origin and query are
/// asserted by the client and not verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMeta {
    pub channel_handle: Option<ChannelHandle>,
    pub origin: Option<String>,
    pub query: BTreeMap<String, String>,
}

impl ChannelMeta {
    pub fn for_channel(handle: ChannelHandle, origin: Option<String>) -> Self {
        Self {
            channel_handle: Some(handle),
            origin,
            query: BTreeMap::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn suggested_dapp_petname(&self) -> Option<&str> {
        self.query.get("suggestedDappPetname").map(String::as_str)
    }

    /// The request context recorded with offers made over this connection.
    pub fn request_context(&self, dapp_origin: &DappOrigin) -> RequestContext {
        RequestContext {
            origin: self.origin.clone(),
            ..RequestContext::for_origin(dapp_origin)
        }
    }
}

/// Fields every request may carry, whatever its type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub dapp_origin: Option<String>,
    #[serde(default)]
    pub suggested_dapp_petname: Option<String>,
}

/// Requests a dapp sends over a channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WalletRequest {
    WalletGetPurses,
    WalletAddOffer {
        data: Value,
    },
    WalletSubscribeOffers {
        #[serde(default)]
        status: Option<String>,
    },
    WalletGetOffers {
        #[serde(default)]
        status: Option<String>,
    },
    WalletGetDepositFacetId {
        brand_board_id: String,
    },
    WalletSuggestIssuer {
        petname: Petname,
        board_id: String,
    },
    WalletSuggestInstance {
        petname: Petname,
        board_id: String,
    },
    WalletSuggestInstallation {
        petname: Petname,
        board_id: String,
    },
    /// Any type this wallet does not know.
    #[serde(other)]
    Unknown,
}

/// Messages the wallet sends to a channel, as replies or unprompted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum PushMessage {
    /// The purses snapshot, as serialized JSON text.
    WalletUpdatePurses(String),
    WalletOfferDescriptions(Vec<OfferView>),
    /// Id of an offer the wallet finished handling.
    WalletOfferHandled(String),
    WalletOfferAdded(String),
    WalletSubscribedOffers(bool),
    WalletNeedDappApproval {
        dapp_origin: DappOrigin,
        suggested_dapp_petname: String,
    },
    WalletHaveDappApproval {
        dapp_origin: DappOrigin,
    },
    WalletDepositFacetIdResponse(String),
    WalletSuggestIssuerResponse(Petname),
    WalletSuggestInstanceResponse(Petname),
    WalletSuggestInstallationResponse(Petname),
}

impl PushMessage {
    /// The `type` tag on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::WalletUpdatePurses(_) => "walletUpdatePurses",
            PushMessage::WalletOfferDescriptions(_) => "walletOfferDescriptions",
            PushMessage::WalletOfferHandled(_) => "walletOfferHandled",
            PushMessage::WalletOfferAdded(_) => "walletOfferAdded",
            PushMessage::WalletSubscribedOffers(_) => "walletSubscribedOffers",
            PushMessage::WalletNeedDappApproval { .. } => "walletNeedDappApproval",
            PushMessage::WalletHaveDappApproval { .. } => "walletHaveDappApproval",
            PushMessage::WalletDepositFacetIdResponse(_) => "walletDepositFacetIdResponse",
            PushMessage::WalletSuggestIssuerResponse(_) => "walletSuggestIssuerResponse",
            PushMessage::WalletSuggestInstanceResponse(_) => "walletSuggestInstanceResponse",
            PushMessage::WalletSuggestInstallationResponse(_) => {
                "walletSuggestInstallationResponse"
            }
        }
    }
}

/// Reply to a request that failed, sent where its normal reply would go.
///
/// Typed after that normal reply, so a dapp waiting for
/// `walletDepositFacetIdResponse` hears about a bad board id there. Types
/// this wallet does not know get `<type>Response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: String,
}

impl ErrorReply {
    pub fn new(request_kind: Option<&str>, error: impl fmt::Display) -> Self {
        let kind = match request_kind {
            Some(kind) => reply_kind(kind).map_or_else(|| format!("{kind}Response"), str::to_string),
            None => "walletErrorResponse".to_string(),
        };
        Self {
            kind,
            error: error.to_string(),
        }
    }
}

/// Type of the normal reply to a request type.
fn reply_kind(request_kind: &str) -> Option<&'static str> {
    let kind = match request_kind {
        "walletGetPurses" => "walletUpdatePurses",
        "walletAddOffer" => "walletOfferAdded",
        "walletSubscribeOffers" => "walletSubscribedOffers",
        "walletGetOffers" => "walletOfferDescriptions",
        "walletGetDepositFacetId" => "walletDepositFacetIdResponse",
        "walletSuggestIssuer" => "walletSuggestIssuerResponse",
        "walletSuggestInstance" => "walletSuggestInstanceResponse",
        "walletSuggestInstallation" => "walletSuggestInstallationResponse",
        _ => return None,
    };
    Some(kind)
}
