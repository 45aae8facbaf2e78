//! RingCache Integration Tests
//!
//! End-to-end behaviour of the coordinator:
//! - Replication and backup fallback
//! - Ring membership changes, including under concurrent traffic
//! - Local tier expiry
//! - Health checking and self-healing
//! - Metrics consistency
//! - Redis transport

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ringcache::adapters::InMemoryBackend;
use ringcache::{CacheConfig, DistributedCache, Error};

type Backends = HashMap<String, Arc<InMemoryBackend>>;

fn test_config() -> CacheConfig {
    CacheConfig {
        virtual_nodes_per_physical: 150,
        replication_factor: 2,
        operation_timeout_ms: 250,
        ..Default::default()
    }
}

async fn cluster(ids: &[&str], config: CacheConfig) -> (DistributedCache, Backends) {
    let cache = DistributedCache::with_memory_backends(config).unwrap();
    let mut backends = HashMap::new();
    for id in ids {
        let backend = Arc::new(InMemoryBackend::new(*id));
        assert!(
            cache
                .add_node_with_backend(id, id, 6379, 1, backend.clone())
                .await
        );
        backends.insert(id.to_string(), backend);
    }
    (cache, backends)
}

fn holders(backends: &Backends, key: &str) -> Vec<String> {
    let mut ids: Vec<String> = backends
        .iter()
        .filter(|(_, b)| b.contains(key))
        .map(|(id, _)| id.clone())
        .collect();
    ids.sort();
    ids
}

// =============================================================================
// Replication
// =============================================================================

mod replication_tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_write_lands_on_exactly_replication_factor_nodes() {
        let (cache, backends) = cluster(&["A", "B", "C"], test_config()).await;

        assert!(assert_ok!(cache.set("k1", "v1", None).await));
        assert_eq!(holders(&backends, "k1").len(), 2);

        let mut expected = cache.replicas_for("k1").unwrap();
        expected.sort();
        assert_eq!(holders(&backends, "k1"), expected);

        assert_eq!(
            assert_ok!(cache.get("k1").await),
            Some(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn test_set_then_get_for_many_keys() {
        let (cache, _) = cluster(&["A", "B", "C", "D"], test_config()).await;

        for i in 0..200 {
            let key = format!("keyword:{}", i);
            assert!(cache.set(&key, format!("volume-{}", i), None).await.unwrap());
        }
        cache.local_tier().clear();

        for i in 0..200 {
            let key = format!("keyword:{}", i);
            let value = cache.get(&key).await.unwrap();
            assert_eq!(value, Some(Bytes::from(format!("volume-{}", i))));
        }
    }

    #[tokio::test]
    async fn test_backup_serves_when_primary_disconnected() {
        let (cache, backends) = cluster(&["A", "B", "C"], test_config()).await;
        cache.set("k1", "v1", None).await.unwrap();
        cache.local_tier().clear();

        let primary = cache.primary_for("k1").unwrap();
        backends[&primary].set_available(false);
        cache.node(&primary).unwrap().mark_disconnected();

        assert_eq!(
            cache.get("k1").await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn test_backup_serves_when_primary_failing() {
        let (cache, backends) = cluster(&["A", "B", "C"], test_config()).await;
        cache.set("k1", "v1", None).await.unwrap();
        cache.local_tier().clear();

        // Still marked connected, but every call fails
        let primary = cache.primary_for("k1").unwrap();
        backends[&primary].set_available(false);

        assert_eq!(
            cache.get("k1").await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
        assert!(cache.metrics().errors > 0);
        assert!(cache.node(&primary).unwrap().error_count() >= 3);
    }

    #[tokio::test]
    async fn test_fewer_nodes_than_replication_factor() {
        let config = CacheConfig {
            replication_factor: 3,
            ..test_config()
        };
        let (cache, backends) = cluster(&["A", "B"], config).await;

        assert!(cache.set("k", "v", None).await.unwrap());
        assert_eq!(holders(&backends, "k").len(), 2);
    }
}

// =============================================================================
// Membership
// =============================================================================

mod membership_tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_removing_primary_keeps_value_readable() {
        let (cache, _) = cluster(&["A", "B", "C"], test_config()).await;
        cache.set("k1", "v1", None).await.unwrap();

        let primary = cache.primary_for("k1").unwrap();
        assert!(cache.remove_node(&primary).await);
        cache.local_tier().clear();

        assert_eq!(
            cache.get("k1").await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn test_removing_other_node_keeps_unrelated_keys() {
        let (cache, _) = cluster(&["A", "B", "C", "D"], test_config()).await;
        let keys: Vec<String> = (0..100).map(|i| format!("k{}", i)).collect();
        for key in &keys {
            cache.set(key, key.clone(), None).await.unwrap();
        }

        let before: HashMap<&String, String> = keys
            .iter()
            .map(|k| (k, cache.primary_for(k).unwrap()))
            .collect();
        assert!(cache.remove_node("D").await);
        cache.local_tier().clear();

        for key in &keys {
            if before[key] != "D" {
                assert_eq!(cache.primary_for(key).unwrap(), before[key]);
                assert_eq!(
                    cache.get(key).await.unwrap(),
                    Some(Bytes::from(key.clone()))
                );
            }
        }
    }

    #[tokio::test]
    async fn test_removing_only_node_empties_ring() {
        let (cache, _) = cluster(&["A"], test_config()).await;
        cache.set("k1", "v1", None).await.unwrap();

        assert!(cache.remove_node("A").await);
        assert_matches!(cache.get("k1").await, Err(Error::EmptyRing));
        assert_matches!(cache.primary_for("k1"), Err(Error::EmptyRing));
    }

    #[tokio::test]
    async fn test_weighted_node_owns_more_keys() {
        let cache = DistributedCache::with_memory_backends(test_config()).unwrap();
        assert!(cache.add_node("light", "light", 6379, 1).await);
        assert!(cache.add_node("heavy", "heavy", 6379, 3).await);

        let heavy = (0..2000)
            .filter(|i| cache.primary_for(&format!("key-{}", i)).unwrap() == "heavy")
            .count();
        assert!(heavy > 1200, "heavy node owns {} of 2000 keys", heavy);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_added_disconnected() {
        let cache = DistributedCache::with_memory_backends(test_config()).unwrap();
        let backend = Arc::new(InMemoryBackend::new("down"));
        backend.set_available(false);

        assert!(cache.add_node_with_backend("down", "down", 6379, 1, backend).await);
        let status = cache.node_status();
        assert_eq!(status.len(), 1);
        assert!(!status[0].connected);
        assert_eq!(status[0].error_count, 1);
    }
}

// =============================================================================
// Concurrent Membership Changes
// =============================================================================

mod concurrency_tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_traffic_during_topology_churn() {
        let (cache, _) = cluster(&["A", "B", "C"], test_config()).await;
        let cache = Arc::new(cache);
        let stop = Arc::new(AtomicBool::new(false));
        let gets = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::new();
        for worker in 0..4 {
            let cache = cache.clone();
            let stop = stop.clone();
            let gets = gets.clone();
            workers.push(tokio::spawn(async move {
                let mut i = 0u64;
                while i < 50 || !stop.load(Ordering::Relaxed) {
                    let key = format!("w{}-k{}", worker, i % 64);
                    cache.set(&key, format!("v{}", i), None).await.unwrap();
                    cache.get(&key).await.unwrap();
                    gets.fetch_add(1, Ordering::Relaxed);

                    // Ring and node set always agree within one snapshot
                    let topology = cache.registry().snapshot();
                    assert_eq!(topology.ring().node_count(), topology.nodes().len());
                    for id in topology.ring().node_ids() {
                        assert!(topology.node(id).is_some(), "ring node {} has no entry", id);
                    }
                    let replicas = topology.replicas_for(&key, 2).unwrap();
                    assert_eq!(replicas.len(), topology.nodes().len().min(2));

                    i += 1;
                    tokio::task::yield_now().await;
                }
            }));
        }

        let churn = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for round in 0..30 {
                    let id = format!("extra-{}", round % 3);
                    assert!(cache.add_node(&id, &id, 6379, 1).await);
                    tokio::task::yield_now().await;
                    assert!(cache.remove_node(&id).await);
                }
            })
        };

        churn.await.unwrap();
        stop.store(true, Ordering::Relaxed);
        for worker in workers {
            worker.await.unwrap();
        }

        let gets = gets.load(Ordering::Relaxed);
        let metrics = cache.metrics();
        assert!(gets >= 200);
        assert_eq!(metrics.hits + metrics.misses, gets);

        let ids: Vec<String> = cache.node_status().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        for i in 0..64 {
            for replica in cache.replicas_for(&format!("w0-k{}", i)).unwrap() {
                assert!(ids.contains(&replica));
            }
        }
    }
}

// =============================================================================
// Degraded Operation
// =============================================================================

mod degraded_tests {
    use super::*;

    #[tokio::test]
    async fn test_all_nodes_disconnected_is_a_miss() {
        let (cache, _) = cluster(&["A", "B", "C"], test_config()).await;
        for status in cache.node_status() {
            cache.node(&status.id).unwrap().mark_disconnected();
        }

        assert_eq!(cache.get("any").await.unwrap(), None);
        let metrics = cache.metrics();
        assert!(metrics.errors > 0);
        assert_eq!(metrics.connected_node_count, 0);
        assert_eq!(metrics.node_count, 3);
    }

    #[tokio::test]
    async fn test_write_with_all_nodes_down_still_serves_locally() {
        let (cache, _) = cluster(&["A", "B"], test_config()).await;
        for status in cache.node_status() {
            cache.node(&status.id).unwrap().mark_disconnected();
        }

        assert!(!cache.set("k", "v", None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn test_slow_node_times_out() {
        let (cache, backends) = cluster(&["A"], test_config()).await;
        cache.set("k", "v", None).await.unwrap();
        cache.local_tier().clear();

        backends["A"].set_latency(Some(Duration::from_secs(2)));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.node("A").unwrap().error_count() > 0);
    }
}

// =============================================================================
// Local Tier
// =============================================================================

mod local_tier_tests {
    use super::*;

    #[tokio::test]
    async fn test_ttl_expires_in_both_tiers() {
        let (cache, backends) = cluster(&["A", "B", "C"], test_config()).await;

        cache
            .set("k2", "v2", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(cache.get("k2").await.unwrap(), Some(Bytes::from_static(b"v2")));
        assert_eq!(cache.metrics().local_hits, 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        cache.local_tier().purge_expired();

        assert!(cache.local_tier().get("k2").is_none());
        assert_eq!(cache.get("k2").await.unwrap(), None);
        assert!(holders(&backends, "k2").is_empty());
    }

    #[tokio::test]
    async fn test_evicted_entry_refetched_from_nodes() {
        let config = CacheConfig {
            local_tier_max_entries: 2,
            ..test_config()
        };
        let (cache, _) = cluster(&["A", "B"], config).await;

        for key in ["a", "b", "c"] {
            cache.set(key, key, None).await.unwrap();
        }
        assert_eq!(cache.local_tier().len(), 2);

        assert_eq!(cache.get("a").await.unwrap(), Some(Bytes::from_static(b"a")));
        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.local_hits, 0);
    }
}

// =============================================================================
// Health Checking
// =============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnected_node_heals_within_one_interval() {
        let config = CacheConfig {
            health_check_interval_seconds: 1,
            ..test_config()
        };
        let (cache, _) = cluster(&["A", "B"], config).await;
        let handle = cache.spawn_health_checker();

        // Let the immediate first round pass
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.node("A").unwrap().mark_disconnected();
        assert!(!cache.node("A").unwrap().is_connected());

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(cache.node("A").unwrap().is_connected());
        assert!(handle.shutdown().await);
    }

    #[tokio::test]
    async fn test_failing_node_marked_down_then_recovers() {
        let config = CacheConfig {
            node_failure_threshold: 1,
            ..test_config()
        };
        let (cache, backends) = cluster(&["A"], config.clone()).await;
        let checker = ringcache::HealthChecker::new(
            Arc::downgrade(&cache.registry()),
            ringcache::health::HealthCheckConfig::from(&config),
        );

        backends["A"].set_available(false);
        checker.check_once().await.unwrap();
        let report = checker.check_once().await.unwrap();
        assert_eq!(report.marked_down, 1);
        assert_eq!(
            cache.node_status()[0].state,
            ringcache::NodeState::Unreachable
        );

        backends["A"].set_available(true);
        let report = checker.check_once().await.unwrap();
        assert_eq!(report.reconnected, 1);
        assert_eq!(cache.node_status()[0].state, ringcache::NodeState::Connected);
    }
}

// =============================================================================
// Metrics
// =============================================================================

mod metrics_tests {
    use super::*;

    #[tokio::test]
    async fn test_hits_plus_misses_equals_gets() {
        let (cache, backends) = cluster(&["A", "B", "C"], test_config()).await;
        for i in 0..20 {
            cache.set(&format!("k{}", i), "v", None).await.unwrap();
        }

        let mut gets = 0u64;
        for round in 0..3 {
            if round == 1 {
                cache.local_tier().clear();
                backends["B"].set_available(false);
            }
            for i in 0..40 {
                let _ = cache.get(&format!("k{}", i)).await.unwrap();
                gets += 1;

                let metrics = cache.metrics();
                assert_eq!(metrics.hits + metrics.misses, gets);
            }
        }

        let metrics = cache.metrics();
        assert!(metrics.hit_rate > 0.0 && metrics.hit_rate < 1.0);
    }

    #[tokio::test]
    async fn test_empty_ring_get_counts_as_miss() {
        let cache = DistributedCache::with_memory_backends(test_config()).unwrap();
        assert!(cache.get("k").await.is_err());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[tokio::test]
    async fn test_node_status_reports_activity() {
        let (cache, _) = cluster(&["A", "B"], test_config()).await;
        cache.set("k", "v", None).await.unwrap();

        let status = cache.node_status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.connected && s.last_heartbeat.is_some()));
        assert_eq!(status.iter().map(|s| s.operations).sum::<u64>(), 2);
    }
}

// =============================================================================
// RESP Transport
// =============================================================================

mod resp_tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_line(stream: &mut BufStream<TcpStream>) -> Option<String> {
        let mut line = Vec::new();
        if stream.read_until(b'\n', &mut line).await.ok()? == 0 {
            return None;
        }
        String::from_utf8(line).ok().map(|l| l.trim_end().to_string())
    }

    async fn read_request(stream: &mut BufStream<TcpStream>) -> Option<Vec<Vec<u8>>> {
        let count: usize = read_line(stream).await?.strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let len: usize = read_line(stream).await?.strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0u8; len + 2];
            stream.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(buf);
        }
        Some(args)
    }

    /// In-process RESP server holding its own keyspace
    async fn spawn_resp_node() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store: Arc<parking_lot::Mutex<HashMap<Vec<u8>, Vec<u8>>>> = Arc::default();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut stream = BufStream::new(socket);
                    while let Some(args) = read_request(&mut stream).await {
                        let reply = match args[0].as_slice() {
                            b"PING" => b"+PONG\r\n".to_vec(),
                            b"CLIENT" => b"+OK\r\n".to_vec(),
                            b"GET" => match store.lock().get(&args[1]) {
                                Some(v) => {
                                    let mut out = format!("${}\r\n", v.len()).into_bytes();
                                    out.extend_from_slice(v);
                                    out.extend_from_slice(b"\r\n");
                                    out
                                }
                                None => b"$-1\r\n".to_vec(),
                            },
                            b"SET" => {
                                store.lock().insert(args[1].clone(), args[2].clone());
                                b"+OK\r\n".to_vec()
                            }
                            b"DEL" => {
                                let removed = store.lock().remove(&args[1]).is_some();
                                format!(":{}\r\n", removed as i64).into_bytes()
                            }
                            b"FLUSHDB" => {
                                store.lock().clear();
                                b"+OK\r\n".to_vec()
                            }
                            _ => b"-ERR unknown command\r\n".to_vec(),
                        };
                        if stream.write_all(&reply).await.is_err() || stream.flush().await.is_err()
                        {
                            return;
                        }
                    }
                });
            }
        });

        port
    }

    #[tokio::test]
    async fn test_coordinator_over_resp_nodes() {
        let cache = DistributedCache::with_resp_backends(test_config()).unwrap();
        for i in 0..3 {
            let port = spawn_resp_node().await;
            assert!(cache.add_node(&format!("resp-{}", i), "127.0.0.1", port, 1).await);
        }
        assert_eq!(cache.metrics().connected_node_count, 3);

        let large = "x".repeat(8 * 1024);
        assert!(cache.set("small", "v1", None).await.unwrap());
        assert!(cache.set("large", large.clone(), None).await.unwrap());
        cache.local_tier().clear();

        assert_eq!(cache.get("small").await.unwrap(), Some(Bytes::from_static(b"v1")));
        assert_eq!(cache.get("large").await.unwrap(), Some(Bytes::from(large)));

        assert!(cache.delete("small").await.unwrap());
        assert_eq!(cache.get("small").await.unwrap(), None);
        assert!(cache.clear().await);
        assert_eq!(cache.get("large").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_resp_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cache = DistributedCache::with_resp_backends(test_config()).unwrap();
        assert!(cache.add_node("gone", "127.0.0.1", port, 1).await);
        assert_eq!(cache.metrics().connected_node_count, 0);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
