mod common;

use common::{plant, started, PLANT_NS};
use std::{
    collections::BTreeMap,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tag_gateway_core::ControllerCommand;
use tag_gateway_error::{GatewayError, NotFoundKind};
use tag_gateway_models::{request::ValueUpdateRequest, MappingDesc, ModelKey};
use tag_gateway_sdk::{
    DataSample, NodeAddress, SampleValue, StatusClass, SubscriptionEvent, UaScalar,
};

fn good(v: f64) -> DataSample {
    DataSample::good(v)
}

#[tokio::test]
async fn subscribe_seeds_cache_and_returns_values() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    backend.set_value(plant(2, 1), good(5.0));

    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("temp", 2, 1)])
        .await
        .unwrap();
    let seeded = registry.subscribe("boiler", "iot", &[]).await.unwrap();

    assert_eq!(seeded["temp"].value, Some(5.0));
    assert_eq!(seeded["temp"].status, StatusClass::Good);
    assert_eq!(backend.created(), 1);

    let cached = registry.values("boiler", "iot").unwrap();
    assert_eq!(cached["temp"].value, Some(5.0));
}

#[tokio::test]
async fn item_failures_are_aggregated_and_nothing_is_kept() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    backend.bad_items.lock().unwrap().insert(plant(2, 2));
    backend.bad_items.lock().unwrap().insert(plant(2, 3));

    let registry = h.gateway.registry();
    registry
        .replace_mappings(
            "boiler",
            "iot",
            vec![
                MappingDesc::numeric("a", 2, 1),
                MappingDesc::numeric("b", 2, 2),
                MappingDesc::numeric("c", 2, 3),
            ],
        )
        .await
        .unwrap();

    match registry.subscribe("boiler", "iot", &[]).await {
        Err(GatewayError::Subscription(items)) => {
            let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
            assert_eq!(keys, vec!["b", "c"]);
            assert_eq!(items[0].address, "ns=2;i=2");
            assert!(items[0].message.contains("create data item failure"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(backend.created(), 1);
    assert_eq!(backend.deleted(), 1);
    assert!(!h
        .gateway
        .subscriptions()
        .is_subscribed(&ModelKey::new("boiler", "iot")));
}

#[tokio::test]
async fn subscribe_by_unknown_key_names_every_key() {
    let h = started(&["iot"]).await;
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();

    let keys = vec!["a".to_string(), "x".to_string(), "y".to_string()];
    match registry.subscribe("boiler", "iot", &keys).await {
        Err(GatewayError::Validation { fields, .. }) => {
            assert_eq!(fields.len(), 2);
            assert_eq!(fields["x"], "Unknown mapping");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.backend("iot").created(), 0);
}

#[tokio::test]
async fn unsubscribe_of_unknown_model_never_touches_transport() {
    let h = started(&["iot"]).await;
    h.gateway.registry().unsubscribe("ghost", "iot").await.unwrap();
    assert!(h
        .gateway
        .subscriptions()
        .unsubscribe(&ModelKey::new("ghost", "iot"))
        .await
        .unwrap());
    assert_eq!(h.backend("iot").deleted(), 0);
}

#[tokio::test]
async fn unsubscribe_clears_cache() {
    let h = started(&["iot"]).await;
    h.backend("iot").set_value(plant(2, 1), good(1.0));
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();
    registry.subscribe("boiler", "iot", &[]).await.unwrap();

    registry.unsubscribe("boiler", "iot").await.unwrap();
    assert_eq!(h.backend("iot").deleted(), 1);
    assert!(registry.values("boiler", "iot").unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_timeout_keeps_subscription_for_retry() {
    let h = started(&["iot"]).await;
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();
    registry.subscribe("boiler", "iot", &[]).await.unwrap();

    h.backend("iot")
        .hang_delete
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let err = registry.unsubscribe("boiler", "iot").await.unwrap_err();
    assert!(matches!(err, GatewayError::Internal(_)));

    let model = ModelKey::new("boiler", "iot");
    assert!(h.gateway.subscriptions().is_subscribed(&model));

    h.backend("iot")
        .hang_delete
        .store(false, std::sync::atomic::Ordering::SeqCst);
    registry.unsubscribe("boiler", "iot").await.unwrap();
    assert!(!h.gateway.subscriptions().is_subscribed(&model));
}

#[tokio::test]
async fn read_surfaces_bad_items_and_caches_only_good_ones() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    backend.set_value(plant(2, 1), good(1.5));
    backend.set_value(
        plant(2, 2),
        DataSample::with_status(SampleValue::Empty, StatusClass::Bad),
    );

    let registry = h.gateway.registry();
    registry
        .replace_mappings(
            "boiler",
            "iot",
            vec![MappingDesc::numeric("a", 2, 1), MappingDesc::numeric("b", 2, 2)],
        )
        .await
        .unwrap();

    let values = registry.read_values("boiler", "iot", &[]).await.unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values["a"].value, Some(1.5));
    assert_eq!(values["b"].status, StatusClass::Bad);
    assert_eq!(values["b"].value, None);

    let cached = registry.values("boiler", "iot").unwrap();
    assert!(cached.contains_key("a"));
    assert!(!cached.contains_key("b"));
}

#[tokio::test]
async fn notifications_update_cache_and_route_commands_in_order() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    backend.set_value(plant(2, 7), good(1.0));

    let registry = h.gateway.registry();
    registry
        .replace_mappings(
            "boiler",
            "iot",
            vec![MappingDesc::numeric("State.Update", 2, 7)],
        )
        .await
        .unwrap();
    registry.subscribe("boiler", "iot", &[]).await.unwrap();
    let id = h
        .gateway
        .subscriptions()
        .subscription_id(&ModelKey::new("boiler", "iot"))
        .unwrap();

    backend.push(
        id,
        SubscriptionEvent::DataReceived(vec![
            (plant(2, 7), good(3.0)),
            (plant(2, 7), good(3.0)),
            (plant(2, 7), DataSample::with_status(SampleValue::Text("x".into()), StatusClass::Good)),
            (plant(2, 7), good(2.0)),
        ]),
    );

    let commands = h.controller.wait_for(3).await;
    assert_eq!(
        commands,
        vec![
            ControllerCommand::Stop,
            ControllerCommand::Start,
            ControllerCommand::StartPredict
        ]
    );
    let cached = registry.values("boiler", "iot").unwrap();
    assert_eq!(cached["State.Update"].value, Some(2.0));
}

#[tokio::test]
async fn transfer_failure_recreates_subscription() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();
    registry.subscribe("boiler", "iot", &[]).await.unwrap();
    let model = ModelKey::new("boiler", "iot");
    let old = h.gateway.subscriptions().subscription_id(&model).unwrap();

    backend.push(old, SubscriptionEvent::TransferFailed("BadSubscriptionIdInvalid".into()));

    for _ in 0..200 {
        if h.gateway.subscriptions().subscription_id(&model) != Some(old) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let new = h.gateway.subscriptions().subscription_id(&model).unwrap();
    assert_ne!(new, old);
    assert_eq!(backend.created(), 2);

    // the recreated subscription keeps feeding the same cache
    backend.push(new, SubscriptionEvent::DataReceived(vec![(plant(2, 1), good(9.0))]));
    assert_eq!(registry.values("boiler", "iot").unwrap()["a"].value, Some(9.0));
}

#[tokio::test]
async fn renumbered_namespace_is_followed() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    backend.set_value(plant(2, 1), good(1.0));
    backend.set_value(plant(3, 1), good(2.0));

    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();
    let first = registry.read_values("boiler", "iot", &[]).await.unwrap();
    assert_eq!(first["a"].value, Some(1.0));

    backend.set_namespaces(&[
        "http://opcfoundation.org/UA/",
        "urn:server",
        "urn:inserted",
        PLANT_NS,
    ]);
    let second = registry.read_values("boiler", "iot", &[]).await.unwrap();
    assert_eq!(second["a"].value, Some(2.0));
}

#[tokio::test]
async fn undeclared_environment_is_not_found() {
    let h = started(&["iot"]).await;
    let registry = h.gateway.registry();
    match registry
        .replace_mappings("boiler", "nowhere", vec![MappingDesc::numeric("a", 2, 1)])
        .await
    {
        Err(GatewayError::NotFound { kind, id }) => {
            assert_eq!(kind, NotFoundKind::Environment);
            assert_eq!(id, "nowhere");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        registry.mappings("boiler", "iot"),
        Err(GatewayError::NotFound {
            kind: NotFoundKind::Model,
            ..
        })
    ));
}

#[tokio::test]
async fn replacing_mappings_drops_the_live_subscription() {
    let h = started(&["iot"]).await;
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();
    registry.subscribe("boiler", "iot", &[]).await.unwrap();

    let meta = registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("b", 2, 2)])
        .await
        .unwrap();
    assert_eq!(meta.mappings.len(), 1);
    assert_eq!(h.backend("iot").deleted(), 1);
    assert!(registry.mappings("boiler", "iot").unwrap().mapping("a").is_none());
}

#[tokio::test]
async fn remove_all_mappings_unsubscribes_every_environment() {
    let h = started(&["iot", "sim"]).await;
    let registry = h.gateway.registry();
    for env in ["iot", "sim"] {
        registry
            .replace_mappings("boiler", env, vec![MappingDesc::numeric("a", 2, 1)])
            .await
            .unwrap();
        registry.subscribe("boiler", env, &[]).await.unwrap();
    }
    assert_eq!(registry.mappings_all("boiler").unwrap().len(), 2);

    registry.remove_all_mappings("boiler").await.unwrap();
    assert_eq!(h.backend("iot").deleted(), 1);
    assert_eq!(h.backend("sim").deleted(), 1);
    assert!(registry.mappings_all("boiler").is_err());
    // removing again is a no-op
    registry.remove_all_mappings("boiler").await.unwrap();
}

#[tokio::test]
async fn writes_follow_required_and_optional_rules() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    let registry = h.gateway.registry();
    registry
        .replace_mappings(
            "boiler",
            "iot",
            vec![
                MappingDesc::numeric("status", 2, 1),
                MappingDesc::numeric("temp", 2, 2),
                MappingDesc::numeric("flow", 2, 3),
            ],
        )
        .await
        .unwrap();

    let mut required = BTreeMap::new();
    required.insert("temp".to_string(), Some(1.0));
    required.insert("nope".to_string(), Some(1.0));
    required.insert("gone".to_string(), None);
    let rejected = registry
        .set_values(
            "boiler",
            "iot",
            &ValueUpdateRequest {
                required,
                optional: BTreeMap::new(),
            },
        )
        .await;
    match rejected {
        Err(GatewayError::Validation { fields, .. }) => {
            assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["gone", "nope"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(backend.written.lock().unwrap().is_empty());

    let mut required = BTreeMap::new();
    required.insert("status".to_string(), Some(2.0));
    required.insert("temp".to_string(), Some(21.5));
    let mut optional = BTreeMap::new();
    optional.insert("flow".to_string(), None);
    optional.insert("unknown".to_string(), Some(3.0));
    let statuses = registry
        .set_values("boiler", "iot", &ValueUpdateRequest { required, optional })
        .await
        .unwrap();
    assert_eq!(statuses.len(), 2);

    let written = backend.written.lock().unwrap().clone();
    assert_eq!(
        written,
        vec![
            (NodeAddress::numeric(2, 1), UaScalar::Int32(2)),
            (NodeAddress::numeric(2, 2), UaScalar::Float(21.5)),
        ]
    );
    assert_eq!(backend.events().iter().filter(|e| *e == "write").count(), 1);

    let cached = registry.values("boiler", "iot").unwrap();
    assert_eq!(cached["temp"].value, Some(21.5));
    assert_eq!(cached["status"].status, StatusClass::Good);
}

#[tokio::test]
async fn subscribe_queued_behind_a_replacement_uses_the_new_mappings() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("old", 2, 1)])
        .await
        .unwrap();
    registry
        .replace_mappings("turbine", "iot", vec![MappingDesc::numeric("a", 2, 3)])
        .await
        .unwrap();

    backend.hold_subscribe.store(true, Ordering::SeqCst);
    let r = Arc::clone(registry);
    let parked = tokio::spawn(async move { r.subscribe("turbine", "iot", &[]).await.map(|_| ()) });
    backend.entered.notified().await;

    let r = Arc::clone(registry);
    let replacing = tokio::spawn(async move {
        r.replace_mappings("boiler", "iot", vec![MappingDesc::numeric("new", 2, 2)])
            .await
            .map(|_| ())
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let r = Arc::clone(registry);
    let subscribing = tokio::spawn(async move { r.subscribe("boiler", "iot", &[]).await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(50)).await;

    backend.hold_subscribe.store(false, Ordering::SeqCst);
    backend.release.notify_one();
    parked.await.unwrap().unwrap();
    replacing.await.unwrap().unwrap();
    subscribing.await.unwrap().unwrap();

    let model = ModelKey::new("boiler", "iot");
    assert!(h.gateway.subscriptions().is_subscribed(&model));
    let cache = h.gateway.cache();
    assert_eq!(
        cache.binding(&model, &plant(2, 2).cache_key()),
        Some("new".to_string())
    );
    assert_eq!(cache.binding(&model, &plant(2, 1).cache_key()), None);
}

#[tokio::test]
async fn failed_item_creation_discards_the_new_subscription() {
    let h = started(&["iot"]).await;
    let backend = h.backend("iot");
    let registry = h.gateway.registry();
    registry
        .replace_mappings("boiler", "iot", vec![MappingDesc::numeric("a", 2, 1)])
        .await
        .unwrap();

    backend.fail_items.store(true, Ordering::SeqCst);
    assert!(registry.subscribe("boiler", "iot", &[]).await.is_err());
    assert_eq!(backend.created(), 1);
    assert_eq!(backend.deleted(), 1);
    assert!(!h
        .gateway
        .subscriptions()
        .is_subscribed(&ModelKey::new("boiler", "iot")));
}
