// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistent TCP connection to the collector.
//!
//! Every asynchronous step (resolve, connect, peer close, retry timer) runs in
//! its own task and reports back by posting a [`TcpEvent`]. The owner of the
//! client pulls those with [`TcpClient::next_event`] and feeds them to
//! [`TcpClient::handle`], which is the only place the state machine moves:
//!
//! ```text
//!  resolve ──> connect ──ok──> ESTABLISHED ──eof/error──┐
//!     ^           │                                     │
//!     │         failed                                  │
//!     │           v                                     v
//!     └──── retry timer <───────────────────────── INITIALIZED
//! ```
//!
//! Consecutive failed connects are counted; reaching `max_connect_attempts`
//! is fatal because the daemon has nowhere to ship to. A name that does not
//! resolve is only logged and retried.

use crate::client::Submission;
use crate::config::Config;
use crate::constants::TCP_READ_BUFFER_SIZE;
use crate::errors::Fatal;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initialized,
    Established,
}

#[derive(Debug)]
pub enum TcpEvent {
    Resolved(io::Result<Vec<SocketAddr>>),
    Connected(io::Result<TcpStream>),
    /// The read side of connection `generation` hit EOF or an error.
    Disconnected { generation: u64, reason: String },
    RetryElapsed,
}

struct Connection {
    writer: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The write task exits once `writer` is gone and drops its half.
        self.reader.abort();
    }
}

pub struct TcpClient {
    host: String,
    port: u16,
    max_connect_attempts: u32,
    connect_retry_delay: Duration,
    state: ConnectionState,
    attempts: u32,
    generation: u64,
    connection: Option<Connection>,
    events_tx: mpsc::UnboundedSender<TcpEvent>,
    events_rx: mpsc::UnboundedReceiver<TcpEvent>,
}

impl TcpClient {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        TcpClient {
            host: config.host.clone(),
            port: config.port,
            max_connect_attempts: config.max_connect_attempts,
            connect_retry_delay: config.connect_retry_delay,
            state: ConnectionState::Initialized,
            attempts: 0,
            generation: 0,
            connection: None,
            events_tx,
            events_rx,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn start(&mut self) {
        self.start_resolve();
    }

    pub async fn next_event(&mut self) -> Option<TcpEvent> {
        self.events_rx.recv().await
    }

    pub fn handle(&mut self, event: TcpEvent) -> Result<(), Fatal> {
        match event {
            TcpEvent::Resolved(Ok(addrs)) => match pick_address(&addrs) {
                Some(addr) => {
                    debug!("server resolved: {} -> {}", self.host, addr);
                    self.start_connect(addr);
                    Ok(())
                }
                None => {
                    self.resolve_failed("no addresses returned");
                    Ok(())
                }
            },
            TcpEvent::Resolved(Err(e)) => {
                self.resolve_failed(&e.to_string());
                Ok(())
            }
            TcpEvent::Connected(Ok(stream)) => {
                self.established(stream);
                Ok(())
            }
            TcpEvent::Connected(Err(e)) => self.attempt_failed(&e.to_string()),
            TcpEvent::Disconnected { generation, reason } => {
                if generation == self.generation && self.state == ConnectionState::Established {
                    warn!(
                        "Connection dropped: {}:{} ({}), attempting to re-connect",
                        self.host, self.port, reason
                    );
                    self.connection = None;
                    self.state = ConnectionState::Initialized;
                    self.start_retry_timer();
                }
                Ok(())
            }
            TcpEvent::RetryElapsed => {
                self.start_resolve();
                Ok(())
            }
        }
    }

    /// Hands `message` to the connection's writer. While the connection is
    /// not established the message is dropped on the spot.
    pub fn submit(&mut self, message: Bytes) -> Submission {
        match (&self.state, &self.connection) {
            (ConnectionState::Established, Some(connection)) => {
                match connection.writer.send(message) {
                    Ok(()) => Submission::Submitted,
                    Err(_) => Submission::Dropped,
                }
            }
            _ => Submission::Dropped,
        }
    }

    /// Releases the socket. No reconnect is scheduled.
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!("Closing connection to {}:{}", self.host, self.port);
        }
        self.state = ConnectionState::Initialized;
    }

    fn start_resolve(&self) {
        debug!("server resolving: {}", self.host);
        let host = self.host.clone();
        let port = self.port;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let resolved = lookup_host((host.as_str(), port))
                .await
                .map(|addrs| addrs.collect::<Vec<_>>());
            let _ = events.send(TcpEvent::Resolved(resolved));
        });
    }

    fn start_connect(&self, addr: SocketAddr) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let connected = TcpStream::connect(addr).await;
            let _ = events.send(TcpEvent::Connected(connected));
        });
    }

    fn start_retry_timer(&self) {
        let delay = self.connect_retry_delay;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(TcpEvent::RetryElapsed);
        });
    }

    /// Resolution failures stay in `Initialized` and are retried forever;
    /// only refused or failed connects count towards the attempt bound.
    fn resolve_failed(&self, reason: &str) {
        warn!("server did not resolve: {}: {}", self.host, reason);
        self.start_retry_timer();
    }

    fn attempt_failed(&mut self, reason: &str) -> Result<(), Fatal> {
        self.attempts += 1;
        warn!(
            "Error connecting to {}:{} ({}/{}): {}",
            self.host, self.port, self.attempts, self.max_connect_attempts, reason
        );
        if self.attempts == self.max_connect_attempts {
            warn!("Reached max connect attempts: {}:{}", self.host, self.port);
            return Err(Fatal::ConnectAttemptsExhausted {
                host: self.host.clone(),
                port: self.port,
                attempts: self.attempts,
            });
        }
        self.start_retry_timer();
        Ok(())
    }

    fn established(&mut self, stream: TcpStream) {
        info!("Connection established: {}:{}", self.host, self.port);
        self.generation += 1;
        self.state = ConnectionState::Established;
        self.attempts = 0;

        let (read_half, write_half) = stream.into_split();
        let (writer, messages) = mpsc::unbounded_channel();
        tokio::spawn(write_messages(write_half, messages));
        let reader = tokio::spawn(watch_for_close(
            read_half,
            self.generation,
            self.events_tx.clone(),
        ));
        self.connection = Some(Connection { writer, reader });
    }
}

/// Owns the write half and every message queued on it. Each message is
/// released once its write completes, whether or not it succeeded.
async fn write_messages(mut socket: OwnedWriteHalf, mut messages: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(message) = messages.recv().await {
        if let Err(e) = socket.write_all(&message).await {
            debug!("Failed to write message: {}", e);
        }
    }
}

/// The collector never talks back, so reading only serves to notice the peer
/// going away.
async fn watch_for_close(
    mut socket: OwnedReadHalf,
    generation: u64,
    events: mpsc::UnboundedSender<TcpEvent>,
) {
    let mut buf = [0u8; TCP_READ_BUFFER_SIZE];
    let reason = loop {
        match socket.read(&mut buf).await {
            Ok(0) => break "closed by peer".to_string(),
            Ok(n) => warn!(
                "server responded unexpectedly: {}",
                String::from_utf8_lossy(&buf[..n])
            ),
            Err(e) => break e.to_string(),
        }
    };
    let _ = events.send(TcpEvent::Disconnected { generation, reason });
}

fn pick_address(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
