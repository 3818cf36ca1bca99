//! Resilience tests for the session registry and dispatcher
//!
//! These tests verify behavior under failure conditions like:
//! - Receivers disappearing mid-broadcast
//! - Explicit closes racing heartbeat eviction
//! - Rapid reconnect churn under the same id
//! - Concurrent data merges on one session

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard::server::{
    HeartbeatMonitor, JsonObject, Outbound, PendingClients, Session, SessionRegistry,
};
use switchboard::{Dispatcher, Message};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn dispatcher() -> (Dispatcher, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Dispatcher::new(registry.clone(), Arc::new(PendingClients::new()));
    (dispatcher, registry)
}

fn add_session(
    registry: &SessionRegistry,
    id: &str,
    capacity: usize,
) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    let session = Arc::new(Session::new(id, tx, JsonObject::new()));
    registry.put(session.clone());
    (session, rx)
}

/// Broadcasting keeps going when half the receivers are gone
#[tokio::test]
async fn test_broadcast_with_disappearing_receivers() {
    let (dispatcher, registry) = dispatcher();

    let mut receivers: Vec<_> = (0..100)
        .map(|i| add_session(&registry, &format!("client-{i}"), 10).1)
        .collect();
    // Drop half the receivers to simulate disconnects
    receivers.truncate(50);

    let mut total = 0;
    for i in 0..20 {
        let delivered = dispatcher.broadcast(&Message::broadcast(format!("seq {i}")));
        assert!(delivered <= 50);
        total += delivered;
    }
    // Live receivers accept until their buffer of 10 is full
    assert_eq!(total, 50 * 10);

    for mut rx in receivers {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        // Buffer holds 10; the rest were dropped for this receiver only
        assert_eq!(count, 10);
    }
}

/// close_client and eviction racing on the same sessions never error
#[tokio::test(start_paused = true)]
async fn test_close_and_eviction_race() {
    let (dispatcher, registry) = dispatcher();
    let mut receivers = Vec::new();
    for i in 0..200 {
        receivers.push(add_session(&registry, &format!("client-{i}"), 4));
    }

    tokio::time::advance(Duration::from_secs(31)).await;

    let monitor = Arc::new(HeartbeatMonitor::new(
        registry.clone(),
        Duration::from_secs(10),
        Duration::from_secs(30),
    ));

    let closer = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut closed = 0;
            for i in 0..200 {
                if dispatcher.close_client(&format!("client-{i}")) {
                    closed += 1;
                }
                if i % 20 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            closed
        })
    };
    let sweeper = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.sweep(Instant::now()).len() })
    };

    let closed = closer.await.unwrap();
    let evicted = sweeper.await.unwrap();

    // Every session was removed exactly once, by one path or the other
    assert_eq!(closed + evicted, 200);
    assert!(registry.is_empty());
    assert!(receivers.iter().all(|(session, _)| !session.is_open()));

    // Repeating either path afterwards is a no-op
    assert!(!dispatcher.close_client("client-0"));
    assert!(monitor.sweep(Instant::now()).is_empty());
}

/// Rapid reconnects under one id leave exactly one current session
#[tokio::test]
async fn test_rapid_reconnect_churn() {
    let (dispatcher, registry) = dispatcher();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(4);
            let session = Arc::new(Session::new("churn", tx, JsonObject::new()));
            if let Some(previous) = registry.put(session.clone()) {
                previous.close();
            }
            tokio::task::yield_now().await;
            // The connection ends; only the current one may remove the entry
            session.close();
            registry.remove_if_current(&session);
            drop(rx);
        }));
    }

    // Broadcasting during churn must not panic
    for _ in 0..100 {
        dispatcher.broadcast(&Message::log("tick"));
        tokio::task::yield_now().await;
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(registry.len() <= 1);
    assert!(!dispatcher.has_active_session("churn"));
}

/// Concurrent merges on one session keep every key
#[tokio::test]
async fn test_concurrent_data_merges() {
    let (dispatcher, registry) = dispatcher();
    let (session, _rx) = add_session(&registry, "shared", 4);

    let mut handles = Vec::new();
    for i in 0..100 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            let mut update = JsonObject::new();
            update.insert(format!("key-{i}"), json!(i));
            session.merge_data(update);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let data = dispatcher.get_session("shared").unwrap().data();
    assert_eq!(data.len(), 100);
    assert_eq!(data["key-42"], 42);
}

/// Pending registrations from many tasks collapse to one entry per id
#[tokio::test]
async fn test_concurrent_pending_registration() {
    let (dispatcher, _registry) = dispatcher();

    let mut handles = Vec::new();
    for i in 0..100 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.register_pending_client(&format!("client-{}", i % 10));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..10 {
        assert!(dispatcher.is_pending(&format!("client-{i}")));
    }
    assert!(dispatcher.unregister_pending_client("client-3"));
    assert!(!dispatcher.unregister_pending_client("client-3"));
}
