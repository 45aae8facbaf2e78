//! Redis Node Backend
//!
//! Talks to any Redis-compatible server through the `redis` crate. Only the
//! handful of commands the cache needs are issued: `PING`, `GET`,
//! `SET [PX]`, `DEL`, `FLUSHDB`.
//!
//! Each node holds one multiplexed connection. Clones of it share a single
//! socket whose driver task pairs every reply with its request, so callers
//! pipeline concurrently and a call dropped mid-flight (timeout,
//! cancellation) never leaves its reply for the next caller. A dropped
//! connection is discarded; the next call reconnects.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo, RedisError};
use tracing::debug;

use crate::domain::NodeBackend;
use crate::error::{Error, Result};

/// Default TCP connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time to wait for a single reply
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-protocol backend
pub struct RespBackend {
    addr: String,
    info: ConnectionInfo,
    connect_timeout: Duration,
    response_timeout: Duration,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RespBackend {
    /// Create a backend for `host:port`; no connection is made yet
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            info: ConnectionInfo {
                addr: ConnectionAddr::Tcp(host.to_string(), port),
                redis: RedisConnectionInfo::default(),
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    /// Override the TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-reply timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    async fn open(&self) -> Result<MultiplexedConnection> {
        let client = redis::Client::open(self.info.clone()).map_err(|e| self.unreachable(&e))?;
        let conn = client
            .get_multiplexed_async_connection_with_timeouts(
                self.response_timeout,
                self.connect_timeout,
            )
            .await
            .map_err(|e| self.unreachable(&e))?;
        debug!(node = %self.addr, "Opened Redis connection");
        Ok(conn)
    }

    /// Shared connection, opened on first use
    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.conn.lock().clone() {
            return Ok(conn);
        }
        let conn = self.open().await?;
        *self.conn.lock() = Some(conn.clone());
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        match cmd.query_async(&mut conn).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // A timed-out reply is still paired by the driver; the socket stays usable
                if !e.is_timeout() && (e.is_io_error() || e.is_connection_dropped()) {
                    debug!(node = %self.addr, error = %e, "Discarding Redis connection");
                    self.conn.lock().take();
                }
                Err(self.classify(e))
            }
        }
    }

    fn unreachable(&self, e: &RedisError) -> Error {
        Error::NodeUnreachable {
            node: self.addr.clone(),
            reason: e.to_string(),
        }
    }

    fn classify(&self, e: RedisError) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                node: self.addr.clone(),
                timeout_ms: self.response_timeout.as_millis() as u64,
            }
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            self.unreachable(&e)
        } else {
            Error::Protocol(format!("server {} replied error: {}", self.addr, e))
        }
    }
}

impl std::fmt::Debug for RespBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespBackend")
            .field("addr", &self.addr)
            .field("connected", &self.conn.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl NodeBackend for RespBackend {
    async fn connect(&self) -> Result<()> {
        let conn = self.open().await?;
        *self.conn.lock() = Some(conn);
        self.ping().await
    }

    async fn disconnect(&self) {
        // The driver task exits once the last clone is dropped
        if self.conn.lock().take().is_some() {
            debug!(node = %self.addr, "Closed Redis connection");
        }
    }

    async fn ping(&self) -> Result<()> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "unexpected reply to PING from {}: {}",
                self.addr, reply
            )))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.query(redis::cmd("GET").arg(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = self.query(&cmd).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<()> {
        let _: () = self.query(&redis::cmd("FLUSHDB")).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "resp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::CacheNode;
    use assert_matches::assert_matches;
    use futures::future::join_all;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
    use tokio::net::{TcpListener, TcpStream};

    /// Key whose GET reply the loopback server holds back
    const SLOW_KEY: &[u8] = b"slow";
    const SLOW_REPLY_DELAY: Duration = Duration::from_millis(300);

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

    fn bulk(value: Option<&Vec<u8>>) -> Vec<u8> {
        match value {
            Some(v) => {
                let mut out = format!("${}\r\n", v.len()).into_bytes();
                out.extend_from_slice(v);
                out.extend_from_slice(b"\r\n");
                out
            }
            None => b"$-1\r\n".to_vec(),
        }
    }

    /// Minimal Redis server answering the cache's command subset
    async fn spawn_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store: Arc<parking_lot::Mutex<HashMap<Vec<u8>, Vec<u8>>>> = Arc::default();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut stream = BufStream::new(socket);
                    while let Some(args) = read_request(&mut stream).await {
                        let reply: Vec<u8> = match args[0].to_ascii_uppercase().as_slice() {
                            b"PING" => b"+PONG\r\n".to_vec(),
                            b"CLIENT" => b"+OK\r\n".to_vec(),
                            b"GET" => {
                                if args[1] == SLOW_KEY {
                                    tokio::time::sleep(SLOW_REPLY_DELAY).await;
                                }
                                let value = store.lock().get(&args[1]).cloned();
                                bulk(value.as_ref())
                            }
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
    async fn test_backend_against_loopback_server() {
        let port = spawn_server().await;
        let backend = RespBackend::new("127.0.0.1", port);

        backend.connect().await.unwrap();
        backend.ping().await.unwrap();

        assert_eq!(backend.get("missing").await.unwrap(), None);

        backend
            .set("k", Bytes::from_static(b"v1"), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from_static(b"v1")));

        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());

        backend.set("a", Bytes::from_static(b"1"), None).await.unwrap();
        backend.clear().await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);

        backend.disconnect().await;
        // Lazy reconnect on next call
        backend.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_values_survive() {
        let port = spawn_server().await;
        let backend = RespBackend::new("127.0.0.1", port);
        backend.connect().await.unwrap();

        let value = Bytes::from_static(b"\x00\r\n\xff");
        backend.set("bin", value.clone(), None).await.unwrap();
        assert_eq!(backend.get("bin").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_connection() {
        let port = spawn_server().await;
        let backend = Arc::new(RespBackend::new("127.0.0.1", port));
        backend.connect().await.unwrap();

        let writes = (0..32).map(|i| {
            let backend = backend.clone();
            async move {
                let key = format!("key-{}", i);
                backend
                    .set(&key, Bytes::from(format!("value-{}", i)), None)
                    .await
                    .unwrap();
                backend.get(&key).await.unwrap()
            }
        });

        for (i, value) in join_all(writes).await.into_iter().enumerate() {
            assert_eq!(value, Some(Bytes::from(format!("value-{}", i))));
        }
    }

    #[tokio::test]
    async fn test_timed_out_reply_is_not_returned_for_next_key() {
        let port = spawn_server().await;
        let node = CacheNode::new(
            "slow-node",
            "127.0.0.1",
            port,
            1,
            Arc::new(RespBackend::new("127.0.0.1", port)),
        )
        .with_timeout(Duration::from_millis(100));
        node.connect().await.unwrap();

        node.store("slow", b"SLOW-SECRET", None).await.unwrap();
        node.store("fast", b"fast-value", None).await.unwrap();

        assert_matches!(node.fetch("slow").await, Err(Error::Timeout { .. }));

        // Let the held-back reply arrive on the shared socket
        tokio::time::sleep(SLOW_REPLY_DELAY + Duration::from_millis(100)).await;

        assert_eq!(node.fetch("other").await.unwrap(), None);
        assert_eq!(
            node.fetch("fast").await.unwrap(),
            Some(Bytes::from_static(b"fast-value"))
        );
    }

    #[tokio::test]
    async fn test_response_timeout_is_reported() {
        let port = spawn_server().await;
        let backend =
            RespBackend::new("127.0.0.1", port).with_response_timeout(Duration::from_millis(50));
        backend.connect().await.unwrap();

        assert_matches!(backend.get("slow").await, Err(e) if e.is_transport());
    }

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = RespBackend::new("127.0.0.1", port);
        assert_matches!(backend.connect().await, Err(Error::NodeUnreachable { .. }));
        assert_matches!(backend.get("k").await, Err(Error::NodeUnreachable { .. }));
    }
}
