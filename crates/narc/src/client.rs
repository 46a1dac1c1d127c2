// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The delivery client, selected once at startup from the configured protocol.

use crate::config::{Config, Protocol};
use crate::errors::Fatal;
use crate::tcp_client::{TcpClient, TcpEvent};
use crate::udp_client::{UdpClient, UdpEvent};
use bytes::Bytes;

/// Outcome of handing a framed message to the client. Neither variant means
/// the collector received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Submitted,
    Dropped,
}

#[derive(Debug)]
pub enum ClientEvent {
    Tcp(TcpEvent),
    Udp(UdpEvent),
}

pub enum DeliveryClient {
    Tcp(TcpClient),
    Udp(UdpClient),
}

impl DeliveryClient {
    pub async fn new(config: &Config) -> Result<Self, Fatal> {
        match config.protocol {
            Protocol::Tcp => Ok(DeliveryClient::Tcp(TcpClient::new(config))),
            Protocol::Udp => Ok(DeliveryClient::Udp(UdpClient::new(config).await?)),
            Protocol::Syslog => Err(Fatal::UnsupportedProtocol(config.protocol)),
        }
    }

    /// Kicks off resolution of the collector's address.
    pub fn start(&mut self) {
        match self {
            DeliveryClient::Tcp(client) => client.start(),
            DeliveryClient::Udp(client) => client.start(),
        }
    }

    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        match self {
            DeliveryClient::Tcp(client) => client.next_event().await.map(ClientEvent::Tcp),
            DeliveryClient::Udp(client) => client.next_event().await.map(ClientEvent::Udp),
        }
    }

    pub fn handle(&mut self, event: ClientEvent) -> Result<(), Fatal> {
        match (self, event) {
            (DeliveryClient::Tcp(client), ClientEvent::Tcp(event)) => client.handle(event),
            (DeliveryClient::Udp(client), ClientEvent::Udp(event)) => {
                client.handle(event);
                Ok(())
            }
            // events only ever come from the client that produced them
            _ => Ok(()),
        }
    }

    pub fn submit(&mut self, message: Bytes) -> Submission {
        match self {
            DeliveryClient::Tcp(client) => client.submit(message),
            DeliveryClient::Udp(client) => client.submit(message),
        }
    }

    pub fn close(&mut self) {
        if let DeliveryClient::Tcp(client) = self {
            client.close();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_protocol_selection() {
        let tcp = Config {
            protocol: Protocol::Tcp,
            ..Config::default()
        };
        assert!(matches!(
            DeliveryClient::new(&tcp).await.unwrap(),
            DeliveryClient::Tcp(_)
        ));

        let udp = Config::default();
        assert!(matches!(
            DeliveryClient::new(&udp).await.unwrap(),
            DeliveryClient::Udp(_)
        ));
    }

    #[tokio::test]
    async fn test_syslog_protocol_is_fatal() {
        let config = Config {
            protocol: Protocol::Syslog,
            ..Config::default()
        };
        match DeliveryClient::new(&config).await {
            Err(Fatal::UnsupportedProtocol(Protocol::Syslog)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("syslog protocol should be rejected"),
        }
    }
}
