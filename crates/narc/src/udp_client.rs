// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget datagrams to the collector.
//!
//! There is no connection to lose, so the only state is the resolved
//! destination. Until resolution succeeds every message is dropped and
//! resolution is retried every `connect_retry_delay`.

use crate::client::Submission;
use crate::config::Config;
use crate::errors::Fatal;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub enum UdpEvent {
    Resolved(io::Result<Vec<SocketAddr>>),
    RetryElapsed,
}

pub struct UdpClient {
    host: String,
    port: u16,
    retry_delay: Duration,
    socket: UdpSocket,
    destination: Option<SocketAddr>,
    events_tx: mpsc::UnboundedSender<UdpEvent>,
    events_rx: mpsc::UnboundedReceiver<UdpEvent>,
}

impl UdpClient {
    pub async fn new(config: &Config) -> Result<Self, Fatal> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(Fatal::UdpBind)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(UdpClient {
            host: config.host.clone(),
            port: config.port,
            retry_delay: config.connect_retry_delay,
            socket,
            destination: None,
            events_tx,
            events_rx,
        })
    }

    #[must_use]
    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    pub fn start(&mut self) {
        self.start_resolve();
    }

    pub async fn next_event(&mut self) -> Option<UdpEvent> {
        self.events_rx.recv().await
    }

    pub fn handle(&mut self, event: UdpEvent) {
        match event {
            UdpEvent::Resolved(Ok(addrs)) => {
                match addrs.iter().find(|addr| addr.is_ipv4()) {
                    Some(addr) => {
                        debug!("server resolved: {} -> {}", self.host, addr);
                        self.destination = Some(*addr);
                    }
                    None => {
                        warn!("server has no ipv4 address: {}", self.host);
                        self.start_retry_timer();
                    }
                }
            }
            UdpEvent::Resolved(Err(e)) => {
                warn!("server did not resolve: {}: {}", self.host, e);
                self.start_retry_timer();
            }
            UdpEvent::RetryElapsed => self.start_resolve(),
        }
    }

    /// Sends `message` as a single datagram. Whatever happens, the message is
    /// released before this returns.
    pub fn submit(&mut self, message: Bytes) -> Submission {
        let Some(destination) = self.destination else {
            return Submission::Dropped;
        };
        match self.socket.try_send_to(&message, destination) {
            Ok(_) => Submission::Submitted,
            Err(e) => {
                trace!("Failed to send datagram to {}: {}", destination, e);
                Submission::Dropped
            }
        }
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
            let _ = events.send(UdpEvent::Resolved(resolved));
        });
    }

    fn start_retry_timer(&self) {
        let delay = self.retry_delay;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(UdpEvent::RetryElapsed);
        });
    }
}
