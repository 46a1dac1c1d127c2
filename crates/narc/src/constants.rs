// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 514;
pub const DEFAULT_STREAM_ID: &str = "narc";
pub const DEFAULT_SYSLOG_IDENT: &str = "narc";

pub const DEFAULT_OPEN_ATTEMPTS: u32 = 10;
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_millis(5_000);

// 0 disables rate limiting
pub const DEFAULT_RATE_LIMIT: u32 = 0;
pub const DEFAULT_RATE_TIME: Duration = Duration::from_millis(1_000);
pub const DEFAULT_TRUNCATE_LIMIT: usize = 1_024;

/// Upper bound on bytes pulled from a file in a single read. Anything past it
/// is picked up by an immediate follow-up read.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How often the cached wall-clock string used in message frames is refreshed.
pub const CLOCK_TICK: Duration = Duration::from_millis(500);

/// Fallback stat interval for streams whose change notifications go missing.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pending change notifications per stream before further ones are coalesced.
pub const WATCH_QUEUE: usize = 16;

pub const TCP_READ_BUFFER_SIZE: usize = 4_096;
