// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Owns the delivery client. Streams hand lines over through a cheap,
//! cloneable [`DispatchHandle`]; the service frames them and submits them to
//! the client, in the order they arrive.

use crate::client::{DeliveryClient, Submission};
use crate::config::Config;
use crate::constants::CLOCK_TICK;
use crate::errors::Fatal;
use crate::formatter::{Clock, MessageFormatter};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug)]
pub enum DispatchCommand {
    Ship { id: Arc<str>, body: Bytes },
}

#[derive(Clone, Debug)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl DispatchHandle {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<DispatchCommand>) -> Self {
        DispatchHandle { tx }
    }

    pub fn ship(
        &self,
        id: &Arc<str>,
        body: Bytes,
    ) -> Result<(), mpsc::error::SendError<DispatchCommand>> {
        self.tx.send(DispatchCommand::Ship {
            id: Arc::clone(id),
            body,
        })
    }
}

pub struct DispatchService {
    formatter: MessageFormatter,
    clock: Clock,
    client: DeliveryClient,
    rx: mpsc::UnboundedReceiver<DispatchCommand>,
    cancel_token: CancellationToken,
    shipped: u64,
    dropped: u64,
}

impl DispatchService {
    pub fn new(
        config: &Config,
        client: DeliveryClient,
        cancel_token: CancellationToken,
    ) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = DispatchService {
            formatter: MessageFormatter::new(config),
            clock: Clock::new(),
            client,
            rx,
            cancel_token,
            shipped: 0,
            dropped: 0,
        };
        (service, DispatchHandle { tx })
    }

    /// Runs until cancelled. Returns early only when the delivery client hits
    /// a fatal condition.
    ///
    /// The service outlives its handles: the connection to the collector is
    /// kept up even once every stream has gone away.
    pub async fn run(mut self) -> Result<(), Fatal> {
        debug!("Dispatch service started");
        self.client.start();

        let mut clock_tick = interval_at(Instant::now() + CLOCK_TICK, CLOCK_TICK);

        let result = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break Ok(()),
                _ = clock_tick.tick() => self.clock.refresh(),
                Some(event) = self.client.next_event() => {
                    if let Err(fatal) = self.client.handle(event) {
                        break Err(fatal);
                    }
                }
                Some(DispatchCommand::Ship { id, body }) = self.rx.recv() => self.ship(&id, &body),
            }
        };

        self.client.close();
        debug!(
            "Dispatch service stopped, {} messages submitted, {} dropped",
            self.shipped, self.dropped
        );
        result
    }

    fn ship(&mut self, id: &str, body: &[u8]) {
        let message = self.formatter.frame(self.clock.now(), id, body);
        trace!("Shipping {} bytes from {}", message.len(), id);
        match self.client.submit(message) {
            Submission::Submitted => self.shipped += 1,
            Submission::Dropped => self.dropped += 1,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use std::time::Duration;
    use tokio::net::{TcpListener, UdpSocket};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_ships_framed_lines_over_udp() {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            port: collector.local_addr().unwrap().port(),
            stream_id: "host01".to_string(),
            ..Config::default()
        };

        let client = DeliveryClient::new(&config).await.unwrap();
        let cancel_token = CancellationToken::new();
        let (service, handle) = DispatchService::new(&config, client, cancel_token.clone());
        let service_task = tokio::spawn(service.run());

        let id: Arc<str> = Arc::from("app");
        let mut buf = [0u8; 1024];
        // the first lines may race resolution and be dropped
        let n = timeout(Duration::from_secs(5), async {
            loop {
                handle
                    .ship(&id, Bytes::from_static(b"hello world"))
                    .unwrap();
                tokio::select! {
                    received = collector.recv_from(&mut buf) => break received.unwrap().0,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        })
        .await
        .unwrap();

        let frame = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(frame.starts_with("<134>"));
        assert!(frame.ends_with(" host01 app hello world\n"));

        cancel_token.cancel();
        service_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_stops_service() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = Config {
            port,
            protocol: Protocol::Tcp,
            max_connect_attempts: 2,
            connect_retry_delay: Duration::from_millis(10),
            ..Config::default()
        };

        let client = DeliveryClient::new(&config).await.unwrap();
        let (service, _handle) = DispatchService::new(&config, client, CancellationToken::new());

        let result = timeout(Duration::from_secs(5), service.run()).await.unwrap();
        assert!(matches!(
            result,
            Err(Fatal::ConnectAttemptsExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_service() {
        let config = Config::default();
        let client = DeliveryClient::new(&config).await.unwrap();
        let cancel_token = CancellationToken::new();
        let (service, handle) = DispatchService::new(&config, client, cancel_token.clone());
        // dropping every handle does not stop the service
        drop(handle);

        let service_task = tokio::spawn(service.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!service_task.is_finished());
        cancel_token.cancel();
        timeout(Duration::from_secs(5), service_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
