// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Frames shipped lines as `<PRI>TIMESTAMP HOSTID MSGID BODY\n`.

use crate::config::Config;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;

pub const TIMESTAMP_FORMAT: &str = "%b %d %H:%M:%S";

#[must_use]
pub fn timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Wall-clock string shared by every frame until the next refresh.
///
/// Formatting the time for each message is wasted work when thousands of
/// lines land within the same second, so the dispatcher refreshes this on a
/// coarse tick instead.
#[derive(Debug)]
pub struct Clock {
    now: String,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        let mut clock = Clock { now: String::new() };
        clock.refresh();
        clock
    }

    pub fn refresh(&mut self) {
        self.now = timestamp(&Local::now());
    }

    #[must_use]
    pub fn now(&self) -> &str {
        &self.now
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MessageFormatter {
    priority: u16,
    host_id: String,
}

impl MessageFormatter {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        MessageFormatter {
            priority: config.frame_priority(),
            host_id: config.stream_id.clone(),
        }
    }

    /// The body is copied verbatim; it is not required to be UTF-8.
    #[must_use]
    pub fn frame(&self, time: &str, message_id: &str, body: &[u8]) -> Bytes {
        let header = format!("<{}>{} {} {} ", self.priority, time, self.host_id, message_id);
        let mut frame = BytesMut::with_capacity(header.len() + body.len() + 1);
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(body);
        frame.put_u8(b'\n');
        frame.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_frame() {
        let config = Config::parse("stream-id web01").unwrap();
        let formatter = MessageFormatter::new(&config);

        let frame = formatter.frame("Mar 05 07:08:09", "nginx", b"GET / 200");
        assert_eq!(&frame[..], b"<134>Mar 05 07:08:09 web01 nginx GET / 200\n");
    }

    #[test]
    fn test_priority_is_facility_plus_severity() {
        let config = Config::parse("stream-facility user\nstream-priority debug").unwrap();
        let formatter = MessageFormatter::new(&config);

        let frame = formatter.frame("Jan 01 00:00:00", "id", b"x");
        assert!(frame.starts_with(b"<15>"));
    }

    #[test]
    fn test_body_bytes_are_kept_verbatim() {
        let formatter = MessageFormatter::new(&Config::default());

        let frame = formatter.frame("Jan 01 00:00:00", "app", b"caf\xe9 \xff");
        assert_eq!(&frame[..], b"<134>Jan 01 00:00:00 narc app caf\xe9 \xff\n");
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamp(&at), "Mar 05 07:08:09");

        let at = Utc.with_ymd_and_hms(2024, 11, 23, 23, 59, 1).unwrap();
        assert_eq!(timestamp(&at), "Nov 23 23:59:01");
    }

    #[test]
    fn test_clock_has_fixed_width() {
        let clock = Clock::new();
        assert_eq!(clock.now().len(), "Mar 05 07:08:09".len());
    }
}
