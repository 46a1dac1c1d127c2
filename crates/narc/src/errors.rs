// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the crate.

use crate::config::Protocol;
use std::path::PathBuf;

/// Reasons a configuration can be rejected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Can't open config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reading the configuration file, at line {line}\n>>> '{text}'\n{reason}")]
    Directive {
        line: usize,
        text: String,
        reason: String,
    },

    #[error("Invalid value for {name}: '{value}'")]
    Env { name: &'static str, value: String },
}

/// Conditions that terminate the daemon with a non-zero exit status.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    #[error("Reached max open attempts ({attempts}) for {}", path.display())]
    OpenAttemptsExhausted { path: PathBuf, attempts: u32 },

    #[error("Reached max connect attempts ({attempts}): {host}:{port}")]
    ConnectAttemptsExhausted {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("{0} is not yet implemented")]
    UnsupportedProtocol(Protocol),

    #[error("Unable to bind udp socket: {0}")]
    UdpBind(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_display() {
        let error = Fatal::ConnectAttemptsExhausted {
            host: "logs.example.com".to_string(),
            port: 514,
            attempts: 10,
        };
        assert_eq!(
            error.to_string(),
            "Reached max connect attempts (10): logs.example.com:514"
        );

        let error = Fatal::UnsupportedProtocol(Protocol::Syslog);
        assert_eq!(error.to_string(), "syslog is not yet implemented");
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Directive {
            line: 3,
            text: "remote-port 99999".to_string(),
            reason: "Invalid port".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Reading the configuration file, at line 3\n>>> 'remote-port 99999'\nInvalid port"
        );
    }
}
