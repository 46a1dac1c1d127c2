// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails local files and forwards every newly appended line to a remote
//! collector as a syslog-style framed message, over TCP or UDP.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod constants;
pub mod daemon;
pub mod dispatch;
pub mod errors;
pub mod formatter;
pub mod line;
pub mod policy;
pub mod stream;
pub mod tcp_client;
pub mod udp_client;
