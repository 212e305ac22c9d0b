//! Bridge/dispatcher tests over paired in-memory transports.
//!
//! The tests that need precise control over response ordering play the
//! platform side by hand on the raw peer transport instead of going through
//! a `Dispatcher`.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::timeout;

use spanwire::Kind;
use spanwire::WireError;
use spanwire::WireMessage;
use spanwire::catalog::CheckUpdateAvailability;
use spanwire::catalog::CopyToClipboard;
use spanwire::catalog::DeepLinkURL;
use spanwire::catalog::GetKeyIDs;
use spanwire::catalog::GetPrivateKeyData;
use spanwire::catalog::ScanQRCode;
use spanwire::catalog::SignTransaction;
use spanwire::payload::PrivateKeyData;

use crate::bridge;
use crate::bridge::Bridge;
use crate::dispatcher;
use crate::dispatcher::Dispatcher;
use crate::dispatcher::HandlerError;
use crate::mock_transport::DeadTransport;
use crate::mock_transport::DuplexChannelTransport;
use crate::registry::SubscriberRegistry;
use crate::transport;
use crate::transport::Transport;

/// Poll until `condition` holds, failing the test after a second.
async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

fn connected_pair() -> (Bridge, Dispatcher) {
    let (a, b) = DuplexChannelTransport::pair();
    (Bridge::new(Box::new(a)), Dispatcher::new(Box::new(b)))
}

/// Transport whose receive stream fails as soon as a send begins, so bridge
/// teardown interleaves with an in-flight call.
struct CollapsingTransport {
    collapse: Arc<Notify>,
}

#[async_trait::async_trait]
impl Transport for CollapsingTransport {
    async fn send(&self, _payload: &[u8]) -> transport::Result<()> {
        self.collapse.notify_one();
        // Let the pump observe the failure before the send resolves.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        self.collapse.notified().await;
        Err(transport::Error::ConnectionLost("link collapsed".into()))
    }
}

#[tokio::test]
async fn call_resolves_with_handler_result() {
    let (bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async {
            Ok::<_, HandlerError>("qr-payload".to_string())
        })
        .unwrap();

    let scanned = bridge.invoke::<ScanQRCode>(()).await.unwrap();
    assert_eq!(scanned, "qr-payload");
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn unknown_kind_rejects_then_resolves_after_registration() {
    let (bridge, dispatcher) = connected_pair();

    let err = bridge.invoke::<GetKeyIDs>(()).await.unwrap_err();
    match err {
        bridge::Error::Remote(WireError::UnknownMessageKind { kind }) => {
            assert_eq!(kind, Kind::GetKeyIDs);
        }
        other => panic!("expected UnknownMessageKind, got {other:?}"),
    }

    dispatcher
        .register::<GetKeyIDs, _, _>(|_: ()| async {
            Ok::<_, HandlerError>(vec!["a".to_string(), "b".to_string()])
        })
        .unwrap();

    let ids = bridge.invoke::<GetKeyIDs>(()).await.unwrap();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn handler_failure_is_carried_verbatim() {
    let (bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<CopyToClipboard, _, _>(|_: (String,)| async {
            Err::<(), _>(HandlerError::from("clipboard unavailable"))
        })
        .unwrap();

    let err = bridge.invoke::<CopyToClipboard>(("hello".to_string(),)).await.unwrap_err();
    match err {
        bridge::Error::Remote(WireError::HandlerFailure { detail }) => {
            assert_eq!(detail, "clipboard unavailable");
        }
        other => panic!("expected HandlerFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_handler_does_not_take_the_dispatcher_down() {
    let (bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async { panic!("camera driver crashed") })
        .unwrap();
    dispatcher
        .register::<CheckUpdateAvailability, _, _>(|_: ()| async { Ok::<_, HandlerError>(true) })
        .unwrap();

    let err = bridge.invoke::<ScanQRCode>(()).await.unwrap_err();
    match err {
        bridge::Error::Remote(WireError::HandlerFailure { detail }) => {
            assert!(detail.contains("panicked"), "unexpected detail: {detail}");
        }
        other => panic!("expected HandlerFailure, got {other:?}"),
    }

    // Routing still works after the panic.
    assert!(bridge.invoke::<CheckUpdateAvailability>(()).await.unwrap());
}

#[tokio::test]
async fn duplicate_registration_fails_at_setup() {
    let (_bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async { Ok::<_, HandlerError>(String::new()) })
        .unwrap();

    let err = dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async { Ok::<_, HandlerError>(String::new()) })
        .unwrap_err();
    match err {
        dispatcher::Error::DuplicateHandler(kind) => assert_eq!(kind, Kind::ScanQRCode),
        other => panic!("expected DuplicateHandler, got {other:?}"),
    }
}

#[tokio::test]
async fn out_of_order_responses_settle_their_own_callers() {
    let (a, b) = DuplexChannelTransport::pair();
    let bridge = Arc::new(Bridge::new(Box::new(a)));

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .invoke::<SignTransaction>((
                    "acct-1".to_string(),
                    "xdr".to_string(),
                    "pw".to_string(),
                ))
                .await
        })
    };
    let second = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .invoke::<SignTransaction>((
                    "acct-2".to_string(),
                    "xdr".to_string(),
                    "pw".to_string(),
                ))
                .await
        })
    };

    // Collect both calls, then answer in reverse order, echoing each call's
    // first argument back as its result.
    let mut calls = Vec::new();
    for _ in 0..2 {
        let bytes = b.recv().await.unwrap().unwrap();
        match WireMessage::decode(&bytes).unwrap() {
            WireMessage::Call { call_id, args, .. } => calls.push((call_id, args[0].clone())),
            other => panic!("expected call, got {other:?}"),
        }
    }
    for (call_id, result) in calls.into_iter().rev() {
        b.send(&WireMessage::Result { call_id, result }.encode().unwrap()).await.unwrap();
    }

    assert_eq!(first.await.unwrap().unwrap(), "acct-1");
    assert_eq!(second.await.unwrap().unwrap(), "acct-2");
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn shuffled_delivery_never_cross_settles() {
    let (a, b) = DuplexChannelTransport::pair();
    let bridge = Arc::new(Bridge::new(Box::new(a)));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let bridge = bridge.clone();
        tasks.spawn(async move {
            let key_id = format!("key-{i}");
            let private = bridge
                .invoke::<GetPrivateKeyData>((key_id.clone(), "pw".to_string()))
                .await
                .unwrap();
            assert_eq!(private.private_key, format!("secret-for-{key_id}"));
        });
    }

    let mut replies = Vec::new();
    for _ in 0..8 {
        let bytes = b.recv().await.unwrap().unwrap();
        let WireMessage::Call { call_id, args, .. } = WireMessage::decode(&bytes).unwrap() else {
            panic!("expected call");
        };
        let key_id: String = serde_json::from_value(args[0].clone()).unwrap();
        let private = PrivateKeyData { private_key: format!("secret-for-{key_id}") };
        let reply = WireMessage::Result {
            call_id,
            result: serde_json::to_value(private).unwrap(),
        };
        replies.push(reply.encode().unwrap());
    }
    replies.shuffle(&mut rand::thread_rng());
    for reply in replies {
        b.send(&reply).await.unwrap();
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn stale_response_is_discarded_without_harm() {
    let (a, b) = DuplexChannelTransport::pair();
    let bridge = Arc::new(Bridge::new(Box::new(a)));

    // No call with this ID was ever issued.
    b.send(&WireMessage::Result { call_id: 9999, result: json!("ghost") }.encode().unwrap())
        .await
        .unwrap();

    let pending = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.invoke::<ScanQRCode>(()).await })
    };
    let bytes = b.recv().await.unwrap().unwrap();
    let WireMessage::Call { call_id, .. } = WireMessage::decode(&bytes).unwrap() else {
        panic!("expected call");
    };
    b.send(&WireMessage::Result { call_id, result: json!("real") }.encode().unwrap())
        .await
        .unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), "real");
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn send_failure_rejects_immediately_and_rolls_back() {
    let bridge = Bridge::new(Box::new(DeadTransport));
    let err = bridge.invoke::<ScanQRCode>(()).await.unwrap_err();
    match err {
        bridge::Error::Transport(transport::Error::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn transport_close_rejects_all_pending() {
    let (a, b) = DuplexChannelTransport::pair();
    let bridge = Arc::new(Bridge::new(Box::new(a)));

    let pending = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.invoke::<ScanQRCode>(()).await })
    };
    // Make sure the call is in flight before the peer dies.
    let _ = b.recv().await.unwrap().unwrap();
    drop(b);

    let err = pending.await.unwrap().unwrap_err();
    match err {
        bridge::Error::Transport(transport::Error::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }

    // The bridge is now closed; further calls fail fast without sending.
    match bridge.invoke::<ScanQRCode>(()).await.unwrap_err() {
        bridge::Error::Closed => {}
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_rejects_pending_and_refuses_new_calls() {
    let (a, b) = DuplexChannelTransport::pair();
    let bridge = Arc::new(Bridge::new(Box::new(a)));

    let pending = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.invoke::<ScanQRCode>(()).await })
    };
    let _ = b.recv().await.unwrap().unwrap();

    bridge.shutdown();
    match pending.await.unwrap().unwrap_err() {
        bridge::Error::Closed => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    match bridge.invoke::<ScanQRCode>(()).await.unwrap_err() {
        bridge::Error::Closed => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn teardown_racing_an_in_flight_call_settles_it() {
    let bridge = Bridge::new(Box::new(CollapsingTransport { collapse: Arc::new(Notify::new()) }));

    let outcome = timeout(Duration::from_secs(1), bridge.invoke::<ScanQRCode>(()))
        .await
        .expect("call must settle once the transport dies");
    assert!(matches!(
        outcome.unwrap_err(),
        bridge::Error::Transport(_) | bridge::Error::Closed
    ));
    assert_eq!(bridge.pending_calls(), 0);
}

#[tokio::test]
async fn shutdown_clears_subscribers_and_stops_event_delivery() {
    let (bridge, dispatcher) = connected_pair();

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let _subscription = {
        let seen = seen.clone();
        bridge.subscribe::<DeepLinkURL, _>(move |url| seen.lock().unwrap().push(url))
    };

    bridge.shutdown();
    assert_eq!(bridge.subscribers().count(Kind::DeepLinkURL), 0);

    dispatcher.emit::<DeepLinkURL>("app://after-teardown".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transport_loss_clears_subscribers() {
    let (a, b) = DuplexChannelTransport::pair();
    let bridge = Bridge::new(Box::new(a));
    let _subscription = bridge.subscribe::<DeepLinkURL, _>(|_url| {});
    assert_eq!(bridge.subscribers().count(Kind::DeepLinkURL), 1);

    drop(b);
    wait_until(|| bridge.subscribers().count(Kind::DeepLinkURL) == 0).await;
}

#[tokio::test]
async fn dropping_the_bridge_releases_its_transport() {
    let (a, b) = DuplexChannelTransport::pair();
    drop(Bridge::new(Box::new(a)));

    // The aborted pump drops its half of the channel, closing ours.
    let closed = timeout(Duration::from_secs(1), b.recv()).await.unwrap().unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn dropping_the_dispatcher_releases_its_transport() {
    let (a, b) = DuplexChannelTransport::pair();
    drop(Dispatcher::new(Box::new(a)));

    let closed = timeout(Duration::from_secs(1), b.recv()).await.unwrap().unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn subscribers_receive_events_until_unsubscribed() {
    let (bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async { Ok::<_, HandlerError>(String::new()) })
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let subscription = {
        let seen = seen.clone();
        bridge.subscribe::<DeepLinkURL, _>(move |url| seen.lock().unwrap().push(url))
    };

    dispatcher.emit::<DeepLinkURL>("app://one".to_string()).await.unwrap();
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    subscription.unsubscribe();
    subscription.unsubscribe(); // idempotent
    assert_eq!(bridge.subscribers().count(Kind::DeepLinkURL), 0);

    dispatcher.emit::<DeepLinkURL>("app://two".to_string()).await.unwrap();
    // A round-trip after the emit flushes the pump: the event was delivered
    // (and ignored) before this call's response was processed.
    let _ = bridge.invoke::<ScanQRCode>(()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["app://one".to_string()]);
}

#[tokio::test]
async fn panicking_subscriber_does_not_suppress_the_others() {
    let (bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async { Ok::<_, HandlerError>(String::new()) })
        .unwrap();

    // Registered first, so it runs first and panics first.
    let _angry = bridge.subscribe::<DeepLinkURL, _>(|_url| panic!("subscriber bug"));
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let _calm = {
        let seen = seen.clone();
        bridge.subscribe::<DeepLinkURL, _>(move |url| seen.lock().unwrap().push(url))
    };
    assert_eq!(bridge.subscribers().count(Kind::DeepLinkURL), 2);

    dispatcher.emit::<DeepLinkURL>("app://x".to_string()).await.unwrap();
    let _ = bridge.invoke::<ScanQRCode>(()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["app://x".to_string()]);
}

#[tokio::test]
async fn events_are_delivered_in_emit_order() {
    let (bridge, dispatcher) = connected_pair();
    dispatcher
        .register::<ScanQRCode, _, _>(|_: ()| async { Ok::<_, HandlerError>(String::new()) })
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let _subscription = {
        let seen = seen.clone();
        bridge.subscribe::<DeepLinkURL, _>(move |url| seen.lock().unwrap().push(url))
    };

    for url in ["app://1", "app://2", "app://3"] {
        dispatcher.emit::<DeepLinkURL>(url.to_string()).await.unwrap();
    }
    let _ = bridge.invoke::<ScanQRCode>(()).await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["app://1".to_string(), "app://2".to_string(), "app://3".to_string()]
    );
}

#[tokio::test]
async fn wire_level_arity_mismatch_is_a_failure_response() {
    let (a, b) = DuplexChannelTransport::pair();
    let dispatcher = Dispatcher::new(Box::new(b));
    dispatcher
        .register::<GetPrivateKeyData, _, _>(|_: (String, String)| async {
            Ok::<_, HandlerError>(PrivateKeyData { private_key: "S..".to_string() })
        })
        .unwrap();

    // A hand-rolled call with only one of the two declared arguments.
    let call = WireMessage::Call {
        kind: Kind::GetPrivateKeyData,
        call_id: 5,
        args: vec![json!("key-1")],
    };
    a.send(&call.encode().unwrap()).await.unwrap();

    let bytes = a.recv().await.unwrap().unwrap();
    match WireMessage::decode(&bytes).unwrap() {
        WireMessage::Error { call_id, error: WireError::ArgumentMismatch { kind, .. } } => {
            assert_eq!(call_id, 5);
            assert_eq!(kind, Kind::GetPrivateKeyData);
        }
        other => panic!("expected ArgumentMismatch error, got {other:?}"),
    }
}

#[tokio::test]
async fn emit_surfaces_transport_failure() {
    let dispatcher = Dispatcher::new(Box::new(DeadTransport));
    let err = dispatcher.emit::<DeepLinkURL>("app://x".to_string()).await.unwrap_err();
    match err {
        dispatcher::Error::Transport(transport::Error::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }
}

#[test]
fn registry_revocation_is_token_scoped_and_idempotent() {
    let registry = SubscriberRegistry::new();
    let hits = Arc::new(Mutex::new(0u32));

    let first = {
        let hits = hits.clone();
        registry.add(Kind::DeepLinkURL, Arc::new(move |_| *hits.lock().unwrap() += 1))
    };
    let second = {
        let hits = hits.clone();
        registry.add(Kind::DeepLinkURL, Arc::new(move |_| *hits.lock().unwrap() += 1))
    };
    assert_ne!(first, second);
    assert_eq!(registry.count(Kind::DeepLinkURL), 2);

    registry.dispatch(Kind::DeepLinkURL, &json!("x"));
    assert_eq!(*hits.lock().unwrap(), 2);

    registry.remove(Kind::DeepLinkURL, first);
    registry.remove(Kind::DeepLinkURL, first); // second removal is a no-op
    assert_eq!(registry.count(Kind::DeepLinkURL), 1);

    registry.dispatch(Kind::DeepLinkURL, &json!("y"));
    assert_eq!(*hits.lock().unwrap(), 3);

    // Dispatching a kind nobody subscribed to is a no-op, not an error.
    registry.dispatch(Kind::ScanQRCode, &json!("z"));
}
