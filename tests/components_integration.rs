//! Cross-component integration tests
//!
//! These tests drive the session controller, registry, dispatcher and cache
//! together over in-memory channels, without starting the server.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use magia_relay_server::connection_manager::{ConnectionHandle, ConnectionRegistry};
use magia_relay_server::relay::{PerformanceCache, RelayDispatcher};
use magia_relay_server::session::SessionController;
use magia_relay_server::websocket::{ClientMessage, OutboundMessage, ServerMessage, StartTrigger};

struct TestEnvironment {
    registry: Arc<ConnectionRegistry>,
    cache: Arc<PerformanceCache>,
    controller: Arc<SessionController>,
}

fn create_test_environment() -> TestEnvironment {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(RelayDispatcher::new(registry.clone()));
    let cache = Arc::new(PerformanceCache::new());
    let controller = Arc::new(SessionController::new(
        registry.clone(),
        dispatcher,
        cache.clone(),
    ));

    TestEnvironment {
        registry,
        cache,
        controller,
    }
}

struct TestClient {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl TestClient {
    /// Everything queued for this client so far
    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            match item {
                OutboundMessage::Raw(msg) => out.push(msg),
                OutboundMessage::Preserialized(json) => {
                    out.push(serde_json::from_str(&json).expect("valid frame"))
                }
                OutboundMessage::Ping => {}
            }
        }
        out
    }
}

async fn connect(env: &TestEnvironment) -> TestClient {
    let (tx, rx) = mpsc::channel(64);
    let handle = env
        .controller
        .connect(Uuid::new_v4(), true, tx)
        .await
        .expect("connect should succeed");
    TestClient { handle, rx }
}

fn performances(messages: &[ServerMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::BroadcastPerformance(p) => Some((**p).clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Connection / total tracking
// =============================================================================

mod connection_tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_disconnect_scenario() {
        let env = create_test_environment();

        let mut c1 = connect(&env).await;
        assert_eq!(
            c1.drain(),
            vec![
                ServerMessage::Connection { index: 0, total: 1 },
                ServerMessage::TotalUpdate { total: 1 },
            ]
        );

        let mut c2 = connect(&env).await;
        assert_eq!(
            c2.drain(),
            vec![
                ServerMessage::Connection { index: 1, total: 2 },
                ServerMessage::TotalUpdate { total: 2 },
            ]
        );
        assert_eq!(c1.drain(), vec![ServerMessage::TotalUpdate { total: 2 }]);

        assert_eq!(env.controller.disconnect(c1.handle.id), Some(1));
        assert_eq!(c2.drain(), vec![ServerMessage::TotalUpdate { total: 1 }]);
        assert_eq!(env.registry.count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_gets_fresh_index() {
        let env = create_test_environment();

        let c1 = connect(&env).await;
        env.controller.disconnect(c1.handle.id);
        let c1_again = connect(&env).await;

        assert_eq!(c1.handle.index, 0);
        assert_eq!(c1_again.handle.index, 1);
    }

    #[tokio::test]
    async fn test_count_tracks_live_connections() {
        let env = create_test_environment();
        let mut live = Vec::new();

        for round in 0..20 {
            live.push(connect(&env).await);
            if round % 3 == 0 {
                let gone = live.remove(0);
                env.controller.disconnect(gone.handle.id);
            }
            assert_eq!(env.registry.count(), live.len());
        }
    }

    #[tokio::test]
    async fn test_concurrent_sessions_keep_invariants() {
        let env = create_test_environment();
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let controller = env.controller.clone();
            tasks.push(tokio::spawn(async move {
                let mut indices = Vec::new();
                for _ in 0..25 {
                    let (tx, _rx) = mpsc::channel(64);
                    let id = Uuid::new_v4();
                    let handle = controller.connect(id, false, tx).await.unwrap();
                    indices.push(handle.index);
                    tokio::task::yield_now().await;
                    controller.disconnect(id);
                }
                indices
            }));
        }

        let mut indices = Vec::new();
        for task in tasks {
            indices.extend(task.await.unwrap());
        }

        assert_eq!(env.registry.count(), 0);
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 200);
        assert_eq!(env.registry.next_index(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_last_total_update_matches_live_count() {
        for round in 0..200 {
            let env = create_test_environment();
            let mut observer = connect(&env).await;

            let mut tasks = Vec::new();
            for worker in 0..8 {
                let controller = env.controller.clone();
                tasks.push(tokio::spawn(async move {
                    let (tx, _rx) = mpsc::channel(64);
                    let id = Uuid::new_v4();
                    controller.connect(id, false, tx).await.unwrap();
                    if (worker + round) % 2 == 0 {
                        controller.disconnect(id);
                    }
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            let last_total = observer
                .drain()
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::TotalUpdate { total } => Some(total),
                    _ => None,
                })
                .last();
            assert_eq!(
                last_total,
                Some(env.registry.count()),
                "round {}: observer left with a stale total",
                round
            );
        }
    }
}

// =============================================================================
// Performance relay
// =============================================================================

mod performance_tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_reaches_every_connection_once() {
        let env = create_test_environment();
        let mut admin = connect(&env).await;
        let mut viewer = connect(&env).await;
        admin.drain();
        viewer.drain();

        env.controller
            .handle_message(&admin.handle, ClientMessage::UploadPerformance(json!({"show": "A"})))
            .await
            .unwrap();

        assert_eq!(performances(&admin.drain()), vec![json!({"show": "A"})]);
        assert_eq!(performances(&viewer.drain()), vec![json!({"show": "A"})]);
    }

    #[tokio::test]
    async fn test_late_joiner_receives_cached_performance() {
        let env = create_test_environment();

        let admin = connect(&env).await;
        env.controller
            .handle_message(&admin.handle, ClientMessage::UploadPerformance(json!({"show": "A"})))
            .await
            .unwrap();
        env.controller.disconnect(admin.handle.id);

        // Nobody is connected, the upload is only cached
        assert_eq!(env.registry.count(), 0);

        let mut c3 = connect(&env).await;
        let messages = c3.drain();
        assert_eq!(messages[0], ServerMessage::Connection { index: 1, total: 1 });
        assert_eq!(performances(&messages), vec![json!({"show": "A"})]);
    }

    #[tokio::test]
    async fn test_late_joiner_receives_only_latest_upload() {
        let env = create_test_environment();
        let admin = connect(&env).await;

        for show in ["P1", "P2"] {
            env.controller
                .handle_message(&admin.handle, ClientMessage::UploadPerformance(json!({"show": show})))
                .await
                .unwrap();
        }

        let mut joiner = connect(&env).await;
        assert_eq!(performances(&joiner.drain()), vec![json!({"show": "P2"})]);
        assert_eq!(
            env.cache.current_or_absent().await.map(|p| (*p).clone()),
            Some(json!({"show": "P2"}))
        );
    }

    #[tokio::test]
    async fn test_rejected_upload_leaves_cache_untouched() {
        let env = create_test_environment();
        let mut admin = connect(&env).await;
        let mut viewer = connect(&env).await;

        env.controller
            .handle_message(&admin.handle, ClientMessage::UploadPerformance(json!({"show": "A"})))
            .await
            .unwrap();
        let result = env
            .controller
            .handle_message(&admin.handle, ClientMessage::UploadPerformance(json!(42)))
            .await;

        assert!(result.is_err());
        assert_eq!(
            env.cache.current_or_absent().await.map(|p| (*p).clone()),
            Some(json!({"show": "A"}))
        );
        assert_eq!(performances(&viewer.drain()), vec![json!({"show": "A"})]);
        assert_eq!(performances(&admin.drain()), vec![json!({"show": "A"})]);
    }

    #[tokio::test]
    async fn test_upload_racing_connects_delivers_exactly_once() {
        let env = create_test_environment();
        let admin = connect(&env).await;

        let mut joiners = Vec::new();
        for _ in 0..32 {
            let controller = env.controller.clone();
            joiners.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(64);
                let handle = controller.connect(Uuid::new_v4(), false, tx).await.unwrap();
                TestClient { handle, rx }
            }));
        }

        env.controller
            .handle_message(&admin.handle, ClientMessage::UploadPerformance(json!({"show": "race"})))
            .await
            .unwrap();

        for joiner in joiners {
            let mut client = joiner.await.unwrap();
            assert_eq!(
                performances(&client.drain()),
                vec![json!({"show": "race"})],
                "connection {} must see the upload exactly once",
                client.handle.index
            );
        }
    }
}

// =============================================================================
// Time sync and start trigger
// =============================================================================

mod trigger_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_time_is_not_broadcast() {
        let env = create_test_environment();
        let mut asker = connect(&env).await;
        let mut other = connect(&env).await;
        asker.drain();
        other.drain();

        env.controller
            .handle_message(&asker.handle, ClientMessage::GetTime)
            .await
            .unwrap();

        let replies = asker.drain();
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], ServerMessage::SyncTime { .. }));
        assert!(other.drain().is_empty());
    }

    #[tokio::test]
    async fn test_start_trigger_not_replayed_to_late_joiner() {
        let env = create_test_environment();
        let mut admin = connect(&env).await;
        let mut viewer = connect(&env).await;
        admin.drain();
        viewer.drain();

        env.controller
            .handle_message(
                &admin.handle,
                ClientMessage::StartTrigger(StartTrigger {
                    start_time: 1_700_000_000_000,
                }),
            )
            .await
            .unwrap();

        let expected = ServerMessage::PerformanceStart {
            start_time: 1_700_000_000_000,
        };
        assert_eq!(admin.drain(), vec![expected.clone()]);
        assert_eq!(viewer.drain(), vec![expected]);

        let mut late = connect(&env).await;
        assert!(late
            .drain()
            .iter()
            .all(|m| !matches!(m, ServerMessage::PerformanceStart { .. })));
    }
}
