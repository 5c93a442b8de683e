mod common;

use common::{RecordingObserver, harness, origin};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wallet_bridge_core::{
    AdminError, AdminFacet, ApprovalError, ApprovalObserver, BridgeError, ChannelHandle,
    ChannelMeta, OfferRequest, OriginParseError, Petname, PurseView,
};

const DAPP: &str = "https://dapp.example";
const OTHER: &str = "https://other.example";

fn meta(origin: &str) -> ChannelMeta {
    ChannelMeta::for_channel(ChannelHandle::new(1), Some(origin.to_string()))
}

#[tokio::test]
async fn concurrent_calls_share_one_approval() {
    let h = harness();
    let observer = Arc::new(RecordingObserver::default());
    let bridge = h
        .service
        .bootstrap(observer.clone(), &meta(DAPP).with_query("suggestedDappPetname", "Dapp"), None)
        .unwrap();

    let mut calls = Vec::new();
    for _ in 0..5 {
        let bridge = bridge.clone();
        calls.push(tokio::spawn(async move { bridge.get_zoe().await }));
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while observer.events().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(calls.iter().all(|call| !call.is_finished()));

    h.wallet.enable_dapp(&origin(DAPP));
    for call in calls {
        assert_eq!(call.await.unwrap().unwrap(), json!({ "presence": "zoe" }));
    }
    assert_eq!(
        observer.events(),
        vec![
            "needs https://dapp.example as Dapp".to_string(),
            "approved https://dapp.example".to_string(),
        ]
    );
}

#[tokio::test]
async fn approved_dapp_is_never_asked() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    let observer = Arc::new(RecordingObserver::default());
    let bridge = h.service.bootstrap(observer.clone(), &meta(DAPP), None).unwrap();

    bridge.get_board().await.unwrap();
    bridge.get_issuers_notifier().await.unwrap();
    assert!(observer.events().is_empty());
}

#[tokio::test]
async fn offers_notifier_first_read_is_filtered_and_immediate() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    h.wallet.enable_dapp(&origin(OTHER));
    let dapp = h.service.scoped_bridge("Dapp", origin(DAPP));
    let other = h.service.scoped_bridge("Other", origin(OTHER));

    dapp.add_offer(OfferRequest::new(json!({ "id": 17, "proposalTemplate": {} })))
        .await
        .unwrap();
    other
        .add_offer(OfferRequest::new(json!({ "id": 18 })))
        .await
        .unwrap();

    let notifier = dapp.get_offers_notifier(None).await.unwrap();
    let first = tokio::time::timeout(Duration::from_millis(50), notifier.get_update_since(None))
        .await
        .expect("first read must not wait")
        .unwrap();
    let ids: Vec<_> = first.value.iter().map(|offer| offer.id.as_str()).collect();
    assert_eq!(ids, vec!["17"]);
}

#[tokio::test]
async fn offers_notifier_follows_updates_for_its_origin_only() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    h.wallet.enable_dapp(&origin(OTHER));
    let dapp = h.service.scoped_bridge("Dapp", origin(DAPP));
    let other = h.service.scoped_bridge("Other", origin(OTHER));

    let notifier = dapp.get_offers_notifier(Some("accept".into())).await.unwrap();
    let mut record = notifier.get_update_since(None).await.unwrap();
    assert!(record.value.is_empty());

    other.add_offer(OfferRequest::new(json!({ "id": 1 }))).await.unwrap();
    dapp.add_offer(OfferRequest::new(json!({ "id": 2 }))).await.unwrap();
    h.wallet
        .set_offer_status("https://other.example#1", "accept")
        .unwrap();
    h.wallet
        .set_offer_status("https://dapp.example#2", "accept")
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while record.value.is_empty() {
            record = notifier
                .get_update_since(record.update_count)
                .await
                .unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(record.value.len(), 1);
    assert_eq!(record.value[0].id, "2");
    assert_eq!(record.value[0].status.as_deref(), Some("accept"));
}

#[tokio::test]
async fn pending_offer_is_seen_by_its_dapp_only() {
    let h = harness();
    h.wallet.enable_dapp(&origin("dapp.example"));
    h.wallet.enable_dapp(&origin("other.example"));
    let a = h.service.scoped_bridge("A", origin("dapp.example"));
    let b = h.service.scoped_bridge("B", origin("other.example"));
    let a_offers = a.get_offers_notifier(Some("pending".into())).await.unwrap();
    let b_offers = b.get_offers_notifier(Some("pending".into())).await.unwrap();

    a.add_offer(OfferRequest::new(json!({ "id": "swap-1" }))).await.unwrap();
    h.wallet
        .set_offer_status("dapp.example#swap-1", "pending")
        .unwrap();

    let mut record = a_offers.get_update_since(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while record.value.is_empty() {
            record = a_offers
                .get_update_since(record.update_count)
                .await
                .unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(record.value.len(), 1);
    assert_eq!(record.value[0].id, "swap-1");

    tokio::task::yield_now().await;
    assert_eq!(b_offers.current(), Some(Vec::new()));
}

#[tokio::test]
async fn preapproved_bridge_sees_every_offer() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    h.wallet.enable_dapp(&origin(OTHER));
    h.service
        .scoped_bridge("Dapp", origin(DAPP))
        .add_offer(OfferRequest::new(json!({ "id": 1 })))
        .await
        .unwrap();
    h.service
        .scoped_bridge("Other", origin(OTHER))
        .add_offer(OfferRequest::new(json!({ "id": 1 })))
        .await
        .unwrap();

    let operator = h.service.preapproved_bridge();
    assert!(operator.is_preapproved());
    assert_eq!(operator.origin(), None);
    let offers = operator
        .get_offers_notifier(None)
        .await
        .unwrap()
        .current()
        .unwrap();
    let ids: Vec<_> = offers.iter().map(|offer| offer.id.as_str()).collect();
    assert_eq!(ids, vec!["https://dapp.example#1", "https://other.example#1"]);
}

#[tokio::test]
async fn gated_bridge_tags_offers_with_its_origin() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    let bridge = h.service.bootstrap(
        Arc::new(RecordingObserver::default()),
        &meta("https://ui.example"),
        Some(DAPP.to_string()),
    );
    let bridge = bridge.unwrap();
    assert_eq!(bridge.origin(), Some(&origin(DAPP)));

    let id = bridge
        .add_offer(OfferRequest::new(json!({ "id": 5 })))
        .await
        .unwrap();
    assert_eq!(id, "https://dapp.example#5");

    let offers = h.service.admin_facet().get_offers(Some(&origin(DAPP))).await.unwrap();
    let context = offers[0].request_context.as_ref().unwrap();
    assert_eq!(context.origin.as_deref(), Some("https://ui.example"));
}

#[tokio::test]
async fn suggestions_are_scoped_to_the_dapp() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    h.wallet
        .register_board("board0371", wallet_bridge_core::BoardKind::Instance, json!({}));
    let bridge = h.service.scoped_bridge("Dapp", origin(DAPP));

    let name = bridge
        .suggest_instance("Fancy Swap".into(), "board0371")
        .await
        .unwrap();
    assert_eq!(
        name,
        Petname::Path(vec!["https://dapp.example".into(), "Fancy Swap".into()])
    );

    let operator = h.service.preapproved_bridge();
    let name = operator
        .suggest_instance("Plain".into(), "board0371")
        .await
        .unwrap();
    assert_eq!(name, Petname::from("Plain"));

    let result = bridge.suggest_issuer("Moola".into(), "board0371").await;
    assert!(matches!(result, Err(BridgeError::Admin(_))));
}

fn moola_purse() -> PurseView {
    serde_json::from_value(json!({
        "pursePetname": "Fun budget",
        "brandPetname": "moola",
        "brandBoardId": "board0074",
        "currentAmount": { "value": "100" },
    }))
    .unwrap()
}

#[tokio::test]
async fn offer_invitation_is_attached_and_tagged() {
    let h = harness();
    let bridge = h.service.scoped_bridge("Dapp", origin(DAPP));
    let adding = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            bridge
                .add_offer_invitation(
                    OfferRequest::new(json!({ "id": 3, "proposalTemplate": {} })),
                    json!({ "handle": "invitation-3" }),
                )
                .await
        }
    });
    tokio::task::yield_now().await;
    assert!(!adding.is_finished());
    assert!(h.service.admin_facet().get_offers(None).await.unwrap().is_empty());

    h.wallet.enable_dapp(&origin(DAPP));
    assert_eq!(adding.await.unwrap().unwrap(), "https://dapp.example#3");

    let offers = h.service.admin_facet().get_offers(Some(&origin(DAPP))).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].dapp_origin(), Some(&origin(DAPP)));
    assert_eq!(offers[0].details["invitation"], json!({ "handle": "invitation-3" }));
    assert_eq!(offers[0].details["proposalTemplate"], json!({}));
}

#[tokio::test]
async fn purses_notifier_after_approval_follows_the_wallet() {
    let h = harness();
    let bridge = h.service.scoped_bridge("Dapp", origin(DAPP));
    let getting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.get_purses_notifier().await }
    });
    tokio::task::yield_now().await;
    assert!(!getting.is_finished());

    h.wallet.enable_dapp(&origin(DAPP));
    let purses = getting.await.unwrap().unwrap();
    let first = tokio::time::timeout(Duration::from_millis(50), purses.get_update_since(None))
        .await
        .expect("first read must not wait")
        .unwrap();
    assert!(first.value.is_empty());

    h.wallet.add_purse(moola_purse());
    let mut record = first;
    tokio::time::timeout(Duration::from_secs(5), async {
        while record.value.is_empty() {
            record = purses.get_update_since(record.update_count).await.unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(record.value, vec![moola_purse()]);
}

#[tokio::test]
async fn lookups_wait_for_approval_then_pass_through() {
    let h = harness();
    h.wallet.add_purse(moola_purse());
    h.wallet.add_deposit_facet("board0074", "board0559");
    h.wallet
        .set_agoric_names(json!({ "brand": { "IST": "board0257" } }));
    h.wallet
        .set_names_by_address(json!({ "agoric1xyz": { "depositFacet": "board0559" } }));
    let bridge = h.service.scoped_bridge("Dapp", origin(DAPP));

    let lookups = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            let deposit = bridge.get_deposit_facet_id("board0074").await;
            let names = bridge
                .get_agoric_names(&["brand".to_string(), "IST".to_string()])
                .await;
            let by_address = bridge
                .get_names_by_address(&["agoric1xyz".to_string(), "depositFacet".to_string()])
                .await;
            let petnames = bridge.get_brand_petnames(&["board0074".to_string()]).await;
            (deposit, names, by_address, petnames)
        }
    });
    tokio::task::yield_now().await;
    assert!(!lookups.is_finished());

    h.wallet.enable_dapp(&origin(DAPP));
    let (deposit, names, by_address, petnames) = lookups.await.unwrap();
    assert_eq!(deposit.unwrap(), "board0559");
    assert_eq!(names.unwrap(), json!("board0257"));
    assert_eq!(by_address.unwrap(), json!("board0559"));
    assert_eq!(petnames.unwrap(), vec![Petname::from("moola")]);

    assert_eq!(
        bridge.get_deposit_facet_id("board404").await,
        Err(BridgeError::Admin(AdminError::UnknownTarget {
            kind: "deposit facet",
            id: "board404".into(),
        }))
    );
    assert!(matches!(
        bridge.get_agoric_names(&["nope".to_string()]).await,
        Err(BridgeError::Admin(AdminError::UnknownTarget { kind: "name", .. }))
    ));
    assert!(matches!(
        bridge.get_brand_petnames(&["board999".to_string()]).await,
        Err(BridgeError::Admin(AdminError::UnknownTarget { kind: "brand", .. }))
    ));
}

#[tokio::test]
async fn ui_notifier_is_limited_to_own_offers() {
    let h = harness();
    h.wallet.enable_dapp(&origin(DAPP));
    h.wallet.enable_dapp(&origin(OTHER));
    let dapp = h.service.scoped_bridge("Dapp", origin(DAPP));
    let other = h.service.scoped_bridge("Other", origin(OTHER));
    dapp.add_offer(OfferRequest::new(json!({ "id": 9 }))).await.unwrap();

    let ui = dapp.get_ui_notifier("9").await.unwrap();
    assert_eq!(ui.current().unwrap()["id"], json!("https://dapp.example#9"));
    assert!(other.get_ui_notifier("9").await.is_err());
}

#[tokio::test]
async fn identity_failure_reaches_every_caller() {
    let h = harness();
    let bridge = h.service.scoped_bridge("Dapp", origin(DAPP));
    let waiting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.get_purses_notifier().await.map(|_| ()) }
    });
    tokio::task::yield_now().await;

    h.wallet.fail_dapp(&origin(DAPP), "origin spoofed");
    let result = waiting.await.unwrap();
    assert!(matches!(
        result,
        Err(BridgeError::Approval(ApprovalError::Identity { .. }))
    ));
    assert!(matches!(
        bridge.get_zoe().await,
        Err(BridgeError::Approval(_))
    ));
}

#[test]
fn bootstrap_needs_a_usable_origin() {
    let h = harness();
    let observer: Arc<dyn ApprovalObserver> = Arc::new(RecordingObserver::default());
    assert_eq!(
        h.service
            .bootstrap(observer.clone(), &ChannelMeta::default(), None)
            .err(),
        Some(BridgeError::MissingOrigin)
    );
    assert_eq!(
        h.service
            .bootstrap(observer, &ChannelMeta::default(), Some(String::new()))
            .err(),
        Some(BridgeError::Origin(OriginParseError::Empty))
    );
}
