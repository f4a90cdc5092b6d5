//! The event loop.
//!
//! One [`Reactor`] owns the listening socket, every client socket and the
//! [`Server`]. Each iteration waits for the first of:
//!
//! ```text
//!   shutdown signal ──> return
//!   new connection  ──> register client
//!   socket ready    ──> read / execute / write
//!   tick deadline   ──> Server::cron()
//! ```
//!
//! No task is spawned per connection and nothing is shared between threads;
//! command execution happens synchronously between two waits.
//!
//! Reads are done with `try_read_buf` after readiness has been reported, one
//! read per ready client per iteration, so a single busy client cannot keep
//! others waiting. Replies are written eagerly; whatever the socket does not
//! accept stays in the client's output buffer and the client is polled for
//! writability on the next iteration.
//!
//! A client that has too much unsent output, or that is blocked with a full
//! input buffer, is not polled for readability until that changes. A failed
//! accept pauses accepting until the next tick.

use super::ClientId;
use crate::config::{Config, ConfigError};
use crate::server::Server;
use bytes::Buf;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur while running the reactor or serving a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Client closed its end of the connection
    #[error("Client disconnected")]
    ClientDisconnected,
}

enum Event {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Ready(Vec<(ClientId, io::Result<Ready>)>),
    Tick,
}

pub struct Reactor {
    listener: TcpListener,
    server: Server,
    streams: HashMap<ClientId, TcpStream>,
    tick_interval: Duration,
    next_tick: Instant,
    accept_paused: bool,
}

impl Reactor {
    /// Validates the configuration and binds the listening socket.
    pub async fn bind(config: Config) -> Result<Self, ConnectionError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_address()).await?;
        let tick_interval = config.tick_interval();

        Ok(Self {
            listener,
            server: Server::new(config),
            streams: HashMap::new(),
            tick_interval,
            next_tick: Instant::now() + tick_interval,
            accept_paused: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Runs the event loop until `shutdown` completes.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), ConnectionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, "Reactor started");

        loop {
            self.server.refresh_clock();
            if Instant::now() >= self.next_tick {
                self.tick();
            }

            match self.wait(&mut shutdown).await {
                Event::Shutdown => break,
                Event::Accepted(Ok((stream, addr))) => self.accept(stream, addr),
                Event::Accepted(Err(e)) => self.accept_failed(e),
                Event::Ready(ready) => {
                    self.server.refresh_clock();
                    for (id, readiness) in ready {
                        self.handle_ready(id, readiness);
                    }
                    self.flush_pending();
                }
                Event::Tick => {}
            }
        }

        info!(clients = self.streams.len(), "Reactor stopped");
        let open: Vec<ClientId> = self.streams.drain().map(|(id, _)| id).collect();
        for id in open {
            self.server.disconnect(id);
        }
        Ok(())
    }

    async fn wait<F>(&self, shutdown: &mut std::pin::Pin<&mut F>) -> Event
    where
        F: Future<Output = ()>,
    {
        let mut waits: FuturesUnordered<_> = self
            .streams
            .iter()
            .filter_map(|(id, stream)| {
                let interest = self.interest(*id)?;
                Some(async move { (*id, stream.ready(interest).await) })
            })
            .collect();

        tokio::select! {
            _ = shutdown.as_mut() => Event::Shutdown,
            accepted = self.listener.accept(), if !self.accept_paused => Event::Accepted(accepted),
            Some(first) = waits.next(), if !waits.is_empty() => {
                let mut ready = vec![first];
                while let Some(Some(more)) = waits.next().now_or_never() {
                    ready.push(more);
                }
                Event::Ready(ready)
            }
            _ = sleep_until(self.next_tick) => Event::Tick,
        }
    }

    /// Readiness to wait for, or `None` when the client has nothing to write
    /// and may not read.
    fn interest(&self, id: ClientId) -> Option<Interest> {
        let client = self.server.client(id)?;
        let readable = client.accepts_input(self.server.config().output_pause_limit);
        match (readable, client.has_pending_output() || client.close_after_reply) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn tick(&mut self) {
        self.accept_paused = false;
        self.server.cron();
        self.flush_pending();

        let now = Instant::now();
        self.next_tick += self.tick_interval;
        if self.next_tick <= now {
            self.next_tick = now + self.tick_interval;
        }
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let id = self.server.connect(addr);
        self.streams.insert(id, stream);
        info!(client = %id, addr = %addr, "Client connected");
    }

    /// Logs the error and stops accepting until the next tick.
    fn accept_failed(&mut self, e: io::Error) {
        error!(error = %e, "Failed to accept connection");
        self.accept_paused = true;
    }

    fn handle_ready(&mut self, id: ClientId, readiness: io::Result<Ready>) {
        let result = readiness.map_err(ConnectionError::from).and_then(|ready| {
            if ready.is_readable() {
                self.read_client(id)?;
            }
            self.flush_client(id)
        });

        if let Err(e) = result {
            self.close(id, Some(e));
        } else if self.finished(id) {
            self.close(id, None);
        }
    }

    /// Performs one non-blocking read and executes whatever became complete.
    fn read_client(&mut self, id: ClientId) -> Result<(), ConnectionError> {
        let limit = self.server.config().output_pause_limit;
        let (Some(stream), Some(client)) = (self.streams.get(&id), self.server.client_mut(id)) else {
            return Ok(());
        };
        if !client.accepts_input(limit) {
            return Ok(());
        }

        client.reserve_input();
        match stream.try_read_buf(&mut client.input) {
            Ok(0) => Err(ConnectionError::ClientDisconnected),
            Ok(n) => {
                trace!(client = %id, bytes = n, "Read data");
                self.server.process_input(id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes as much pending output as the socket accepts.
    fn flush_client(&mut self, id: ClientId) -> Result<(), ConnectionError> {
        let (Some(stream), Some(client)) = (self.streams.get(&id), self.server.client_mut(id)) else {
            return Ok(());
        };

        while client.has_pending_output() {
            match stream.try_write(&client.output) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    client.output.advance(n);
                    trace!(client = %id, bytes = n, "Sent response");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Flushes every client that has output waiting, including clients that
    /// received replies on behalf of someone else's command, and closes the
    /// ones marked for closing once they are drained.
    fn flush_pending(&mut self) {
        let pending: Vec<ClientId> = self
            .streams
            .keys()
            .copied()
            .filter(|id| {
                self.server
                    .client(*id)
                    .is_some_and(|c| c.has_pending_output() || c.close_after_reply)
            })
            .collect();

        for id in pending {
            match self.flush_client(id) {
                Err(e) => self.close(id, Some(e)),
                Ok(()) if self.finished(id) => self.close(id, None),
                Ok(()) => {}
            }
        }
    }

    fn finished(&self, id: ClientId) -> bool {
        self.server
            .client(id)
            .is_some_and(|c| c.close_after_reply && !c.has_pending_output())
    }

    fn close(&mut self, id: ClientId, reason: Option<ConnectionError>) {
        let addr = self.server.client(id).map(|c| c.addr);
        match reason {
            None | Some(ConnectionError::ClientDisconnected) => {
                info!(client = %id, addr = ?addr, "Client disconnected")
            }
            Some(ConnectionError::Io(ref e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(client = %id, addr = ?addr, "Connection reset by client")
            }
            Some(e) => warn!(client = %id, addr = ?addr, error = %e, "Connection error"),
        }
        self.streams.remove(&id);
        self.server.disconnect(id);
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("listener", &self.listener.local_addr().ok())
            .field("connections", &self.streams.len())
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::client::MAX_BLOCKED_INPUT;
    use crate::connection::ClientState;
    use crate::protocol::RespValue;
    use crate::server::test_support::encode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> Config {
        Config {
            port: 0,
            ..Config::default()
        }
    }

    async fn with_server<F, Fut>(config: Config, script: F)
    where
        F: FnOnce(SocketAddr) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut reactor = Reactor::bind(config).await.unwrap();
        let addr = reactor.local_addr().unwrap();
        tokio::select! {
            result = reactor.run(std::future::pending()) => panic!("reactor stopped: {:?}", result),
            _ = script(addr) => {}
        }
    }

    async fn send(client: &mut TcpStream, parts: &[&str]) {
        client.write_all(&encode(parts)).await.unwrap();
    }

    /// Reads exactly `expected.len()` bytes and compares them.
    async fn expect(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    async fn expect_closed(client: &mut TcpStream) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        with_server(test_config(), |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
            expect(&mut client, b"+PONG\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_set_get() {
        with_server(test_config(), |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            send(&mut client, &["SET", "name", "bolt"]).await;
            expect(&mut client, b"+OK\r\n").await;
            send(&mut client, &["GET", "name"]).await;
            expect(&mut client, b"$4\r\nbolt\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        with_server(test_config(), |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let mut batch = encode(&["SET", "k1", "v1"]);
            batch.extend(encode(&["SET", "k2", "v2"]));
            batch.extend(encode(&["GET", "k1"]));
            batch.extend(encode(&["GET", "k2"]));
            client.write_all(&batch).await.unwrap();
            expect(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        with_server(test_config(), |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            for byte in encode(&["ECHO", "chunked"]) {
                client.write_all(&[byte]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            expect(&mut client, b"$7\r\nchunked\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_malformed_request_closes_connection() {
        with_server(test_config(), |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let mut batch = encode(&["PING"]);
            batch.extend_from_slice(b"+oops\r\n");
            client.write_all(&batch).await.unwrap();
            expect(&mut client, b"+PONG\r\n").await;
            expect_closed(&mut client).await;

            let mut other = TcpStream::connect(addr).await.unwrap();
            send(&mut other, &["PING"]).await;
            expect(&mut other, b"+PONG\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        with_server(test_config(), |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            send(&mut client, &["QUIT"]).await;
            expect(&mut client, b"+OK\r\n").await;
            expect_closed(&mut client).await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_watch_aborts_across_connections() {
        with_server(test_config(), |addr| async move {
            let mut c1 = TcpStream::connect(addr).await.unwrap();
            let mut c2 = TcpStream::connect(addr).await.unwrap();

            send(&mut c1, &["WATCH", "k"]).await;
            expect(&mut c1, b"+OK\r\n").await;
            send(&mut c2, &["SET", "k", "changed"]).await;
            expect(&mut c2, b"+OK\r\n").await;

            send(&mut c1, &["MULTI"]).await;
            expect(&mut c1, b"+OK\r\n").await;
            send(&mut c1, &["SET", "k", "mine"]).await;
            expect(&mut c1, b"+QUEUED\r\n").await;
            send(&mut c1, &["EXEC"]).await;
            expect(
                &mut c1,
                b"-ERR EXECABORT Transaction discarded because a watched key was modified\r\n",
            )
            .await;

            send(&mut c1, &["GET", "k"]).await;
            expect(&mut c1, b"$7\r\nchanged\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        with_server(test_config(), |addr| async move {
            let mut subscriber = TcpStream::connect(addr).await.unwrap();
            let mut publisher = TcpStream::connect(addr).await.unwrap();

            send(&mut subscriber, &["SUBSCRIBE", "news"]).await;
            expect(
                &mut subscriber,
                b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n",
            )
            .await;

            send(&mut publisher, &["PUBLISH", "news", "hello"]).await;
            expect(&mut publisher, b":1\r\n").await;
            expect(
                &mut subscriber,
                b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n",
            )
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_blpop_woken_by_push() {
        with_server(test_config(), |addr| async move {
            let mut waiter = TcpStream::connect(addr).await.unwrap();
            let mut pusher = TcpStream::connect(addr).await.unwrap();

            send(&mut waiter, &["BLPOP", "jobs", "0"]).await;
            // make sure the waiter is registered before the push
            send(&mut waiter, &["PING"]).await;
            tokio::time::sleep(Duration::from_millis(50)).await;

            send(&mut pusher, &["RPUSH", "jobs", "a", "b"]).await;
            expect(&mut pusher, b":2\r\n").await;

            expect(&mut waiter, b"*2\r\n$4\r\njobs\r\n$1\r\na\r\n+PONG\r\n").await;

            send(&mut pusher, &["LRANGE", "jobs", "0", "-1"]).await;
            expect(&mut pusher, b"*1\r\n$1\r\nb\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_blpop_times_out() {
        let config = Config {
            tick_hz: 100,
            ..test_config()
        };
        with_server(config, |addr| async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            send(&mut client, &["BLPOP", "nothing", "0.05"]).await;
            expect(&mut client, &RespValue::Null.serialize()).await;

            send(&mut client, &["PING"]).await;
            expect(&mut client, b"+PONG\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_slow_subscriber_disconnected() {
        let config = Config {
            pubsub_output_limit: 16,
            ..test_config()
        };
        with_server(config, |addr| async move {
            let mut subscriber = TcpStream::connect(addr).await.unwrap();
            let mut publisher = TcpStream::connect(addr).await.unwrap();

            send(&mut subscriber, &["SUBSCRIBE", "news"]).await;
            expect(
                &mut subscriber,
                b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n",
            )
            .await;

            send(&mut publisher, &["PUBLISH", "news", "hello"]).await;
            expect(&mut publisher, b":1\r\n").await;
            expect_closed(&mut subscriber).await;

            send(&mut publisher, &["PUBLISH", "news", "hello"]).await;
            expect(&mut publisher, b":0\r\n").await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_interest_follows_buffer_limits() {
        let config = Config {
            output_pause_limit: 16,
            ..test_config()
        };
        let mut reactor = Reactor::bind(config).await.unwrap();
        let addr = reactor.local_addr().unwrap();
        let _peer = TcpStream::connect(addr).await.unwrap();
        let (stream, peer_addr) = reactor.listener.accept().await.unwrap();
        reactor.accept(stream, peer_addr);
        let id = *reactor.streams.keys().next().unwrap();

        assert_eq!(reactor.interest(id), Some(Interest::READABLE));

        reactor.server.client_mut(id).unwrap().output.extend_from_slice(b"+OK\r\n");
        assert_eq!(
            reactor.interest(id),
            Some(Interest::READABLE | Interest::WRITABLE)
        );

        // too much unsent output: only wait for the socket to drain
        reactor.server.client_mut(id).unwrap().output.extend_from_slice(&[b'x'; 32]);
        assert_eq!(reactor.interest(id), Some(Interest::WRITABLE));
        reactor.server.take_output(id);

        let client = reactor.server.client_mut(id).unwrap();
        client.state = ClientState::Blocked;
        client.input.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(reactor.interest(id), Some(Interest::READABLE));

        let client = reactor.server.client_mut(id).unwrap();
        client.input.extend_from_slice(&vec![0u8; MAX_BLOCKED_INPUT]);
        assert_eq!(reactor.interest(id), None);
    }

    #[tokio::test]
    async fn test_accept_failure_pauses_until_tick() {
        let mut reactor = Reactor::bind(test_config()).await.unwrap();
        reactor.accept_failed(io::Error::from_raw_os_error(24));
        assert!(reactor.accept_paused);

        reactor.tick();
        assert!(!reactor.accept_paused);

        // accepting resumes once the tick has run
        let addr = reactor.local_addr().unwrap();
        let script = async {
            let mut client = TcpStream::connect(addr).await.unwrap();
            send(&mut client, &["PING"]).await;
            expect(&mut client, b"+PONG\r\n").await;
        };
        reactor.accept_failed(io::Error::from_raw_os_error(24));
        tokio::select! {
            result = reactor.run(std::future::pending()) => panic!("reactor stopped: {:?}", result),
            _ = script => {}
        }
    }

    #[tokio::test]
    async fn test_disconnect_releases_client() {
        let mut reactor = Reactor::bind(test_config()).await.unwrap();
        let addr = reactor.local_addr().unwrap();

        let script = async {
            let mut client = TcpStream::connect(addr).await.unwrap();
            send(&mut client, &["SUBSCRIBE", "ch"]).await;
            let mut buf = [0u8; 64];
            let _ = client.read(&mut buf).await.unwrap();
            drop(client);
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        tokio::select! {
            result = reactor.run(std::future::pending()) => panic!("reactor stopped: {:?}", result),
            _ = script => {}
        }

        assert_eq!(reactor.server().client_count(), 0);
        assert_eq!(reactor.server().stats().connections_received, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_reactor() {
        let mut reactor = Reactor::bind(test_config()).await.unwrap();
        let result = reactor
            .run(tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = Config {
            databases: 0,
            ..test_config()
        };
        assert!(matches!(
            Reactor::bind(config).await,
            Err(ConnectionError::Config(ConfigError::NoDatabases))
        ));
    }
}
