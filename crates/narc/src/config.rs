// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration.
//!
//! The configuration is a list of directives, one per line, in the form
//! `name arg1 arg2 ...`. Blank lines and lines starting with `#` are ignored,
//! arguments may be wrapped in double or single quotes. The same directives
//! can be passed on the command line as `--name value`; they are appended
//! after the file's contents so they take precedence.
//!
//! ```text
//! remote-host logs.example.com
//! remote-port 514
//! remote-proto tcp
//! stream-id web01
//! stream nginx /var/log/nginx/access.log
//! stream app "/var/log/my app/app.log"
//! ```

use crate::constants::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY, DEFAULT_HOST, DEFAULT_OPEN_ATTEMPTS,
    DEFAULT_OPEN_DELAY, DEFAULT_PORT, DEFAULT_RATE_LIMIT, DEFAULT_RATE_TIME, DEFAULT_STREAM_ID,
    DEFAULT_SYSLOG_IDENT, DEFAULT_TRUNCATE_LIMIT,
};
use crate::errors::ConfigError;
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Syslog facilities accepted by `stream-facility` and `syslog-facility`.
///
/// Values are the pre-shifted codes from `<syslog.h>`, so adding a priority
/// to one of them yields the syslog PRI value directly.
pub const FACILITIES: &[(&str, u8)] = &[
    ("user", 8),
    ("local0", 128),
    ("local1", 136),
    ("local2", 144),
    ("local3", 152),
    ("local4", 160),
    ("local5", 168),
    ("local6", 176),
    ("local7", 184),
];

pub const PRIORITIES: &[(&str, u8)] = &[
    ("emergency", 0),
    ("alert", 1),
    ("critical", 2),
    ("error", 3),
    ("warning", 4),
    ("notice", 5),
    ("info", 6),
    ("debug", 7),
];

/// Transport used to reach the remote collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Protocol {
    #[display("udp")]
    Udp,
    #[display("tcp")]
    Tcp,
    /// Accepted by the parser, rejected at startup.
    #[display("syslog")]
    Syslog,
}

impl Protocol {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "udp" => Some(Protocol::Udp),
            "tcp" => Some(Protocol::Tcp),
            "syslog" => Some(Protocol::Syslog),
            _ => None,
        }
    }
}

/// Verbosity of the daemon's own diagnostics, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "verbose" => Some(LogLevel::Verbose),
            "notice" => Some(LogLevel::Notice),
            "warning" => Some(LogLevel::Warning),
            _ => None,
        }
    }

    /// The `tracing` level this verbosity maps onto.
    #[must_use]
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "trace",
            LogLevel::Verbose => "debug",
            LogLevel::Notice => "info",
            LogLevel::Warning => "warn",
        }
    }
}

/// One watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Message id written in front of every line shipped from this file
    pub id: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub daemonize: bool,
    pub pidfile: Option<PathBuf>,
    pub verbosity: LogLevel,
    /// Diagnostics go to stdout when unset
    pub logfile: Option<PathBuf>,
    pub syslog_enabled: bool,
    pub syslog_ident: String,
    pub syslog_facility: u8,

    pub host: String,
    pub port: u16,
    pub protocol: Protocol,

    /// Tag written in the host position of every frame
    pub stream_id: String,
    pub stream_facility: u8,
    pub stream_priority: u8,

    pub max_open_attempts: u32,
    pub open_retry_delay: Duration,
    /// Whether exhausting `max_open_attempts` stops the whole daemon or only
    /// abandons the stream.
    pub open_attempts_fatal: bool,
    pub max_connect_attempts: u32,
    pub connect_retry_delay: Duration,

    /// Lines per stream per `rate_time` window, 0 means unlimited
    pub rate_limit: u32,
    pub rate_time: Duration,
    /// Lines longer than this many bytes are cut at the limit
    pub truncate_limit: usize,

    pub streams: Vec<StreamConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            daemonize: false,
            pidfile: None,
            verbosity: LogLevel::Notice,
            logfile: None,
            syslog_enabled: false,
            syslog_ident: DEFAULT_SYSLOG_IDENT.to_string(),
            syslog_facility: 128,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::Udp,
            stream_id: DEFAULT_STREAM_ID.to_string(),
            stream_facility: 128,
            stream_priority: 6,
            max_open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_retry_delay: DEFAULT_OPEN_DELAY,
            open_attempts_fatal: true,
            max_connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_retry_delay: DEFAULT_CONNECT_DELAY,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_time: DEFAULT_RATE_TIME,
            truncate_limit: DEFAULT_TRUNCATE_LIMIT,
            streams: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from `filename` (`-` reads stdin) and then
    /// applies the extra directives in `options`.
    ///
    /// Either part may be absent, in which case defaults fill the gaps.
    pub fn load(filename: Option<&Path>, options: &str) -> Result<Config, ConfigError> {
        let mut text = String::new();
        if let Some(path) = filename {
            let read = if path == Path::new("-") {
                std::io::stdin().read_to_string(&mut text).map(|_| ())
            } else {
                std::fs::read_to_string(path).map(|contents| text = contents)
            };
            read.map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        }
        if !options.is_empty() {
            text.push('\n');
            text.push_str(options);
        }
        Config::parse(&text)
    }

    /// Builds a configuration from directive text on top of the defaults.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        config.apply_directives(text)?;
        Ok(config)
    }

    pub fn apply_directives(&mut self, text: &str) -> Result<(), ConfigError> {
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let directive_error = |reason: String| ConfigError::Directive {
                line: i + 1,
                text: line.to_string(),
                reason,
            };

            let argv = split_args(line)
                .ok_or_else(|| directive_error("Unbalanced quotes in configuration line".into()))?;
            if argv.is_empty() {
                continue;
            }
            self.apply_directive(&argv).map_err(directive_error)?;
        }
        Ok(())
    }

    fn apply_directive(&mut self, argv: &[String]) -> Result<(), String> {
        let name = argv[0].to_ascii_lowercase();
        match (name.as_str(), &argv[1..]) {
            ("daemonize", [value]) => self.daemonize = yes_no(value)?,
            ("pidfile", [path]) => self.pidfile = Some(PathBuf::from(path)),
            ("loglevel", [level]) => {
                self.verbosity = LogLevel::parse(level)
                    .ok_or("Invalid log level. Must be one of debug, verbose, notice, warning")?
            }
            ("logfile", [path]) => {
                self.logfile = (!path.is_empty()).then(|| PathBuf::from(path));
            }
            ("syslog-enabled", [value]) => self.syslog_enabled = yes_no(value)?,
            ("syslog-ident", [ident]) => self.syslog_ident = ident.clone(),
            ("syslog-facility", [facility]) => {
                self.syslog_facility = lookup(FACILITIES, facility).ok_or(
                    "Invalid log facility. Must be one of 'user' or between 'local0-local7'",
                )?
            }
            ("remote-host", [host]) => self.host = host.clone(),
            ("remote-port", [port]) => {
                self.port = port.parse::<u16>().map_err(|_| "Invalid port")?;
            }
            ("remote-proto", [proto]) => {
                self.protocol =
                    Protocol::parse(proto).ok_or("Invalid protocol. Must be either udp or tcp")?
            }
            ("max-connect-attempts", [n]) => self.max_connect_attempts = number(n)?,
            ("connect-retry-delay", [ms]) => self.connect_retry_delay = millis(ms)?,
            ("max-open-attempts", [n]) => self.max_open_attempts = number(n)?,
            ("open-retry-delay", [ms]) => self.open_retry_delay = millis(ms)?,
            ("open-attempts-fatal", [value]) => self.open_attempts_fatal = yes_no(value)?,
            ("stream-id", [id]) => self.stream_id = id.clone(),
            ("stream-facility", [facility]) => {
                self.stream_facility = lookup(FACILITIES, facility).ok_or(
                    "Invalid stream facility. Must be one of 'user' or between 'local0-local7'",
                )?
            }
            ("stream-priority", [priority]) => {
                self.stream_priority = lookup(PRIORITIES, priority).ok_or(
                    "Invalid stream priority. Must be one of: 'emergency', 'alert', 'critical', \
                     'error', 'warning', 'info', 'notice', or 'debug'",
                )?
            }
            ("stream", [id, file]) => self.streams.push(StreamConfig {
                id: id.clone(),
                file: PathBuf::from(file),
            }),
            ("rate-limit", [n]) => self.rate_limit = number(n)?,
            ("rate-time", [ms]) => {
                let window = millis(ms)?;
                if window.is_zero() {
                    return Err("rate-time must be greater than 0".to_string());
                }
                self.rate_time = window;
            }
            ("truncate-limit", [n]) => {
                let limit: u32 = number(n)?;
                if limit == 0 {
                    return Err("truncate-limit must be greater than 0".to_string());
                }
                self.truncate_limit = limit as usize;
            }
            _ => return Err("Bad directive or wrong number of arguments".to_string()),
        }
        Ok(())
    }

    /// Overrides the remote endpoint from `NARC_REMOTE_HOST`,
    /// `NARC_REMOTE_PORT` and `NARC_REMOTE_PROTO` when they are set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("NARC_REMOTE_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("NARC_REMOTE_PORT") {
            self.port = port.parse::<u16>().map_err(|_| ConfigError::Env {
                name: "NARC_REMOTE_PORT",
                value: port.clone(),
            })?;
        }
        if let Ok(proto) = env::var("NARC_REMOTE_PROTO") {
            self.protocol = Protocol::parse(&proto).ok_or_else(|| ConfigError::Env {
                name: "NARC_REMOTE_PROTO",
                value: proto.clone(),
            })?;
        }
        Ok(())
    }

    /// Warnings for directives that are accepted but have no effect: the
    /// process always stays in the foreground and logs through `tracing`.
    #[must_use]
    pub fn ignored_directives(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.daemonize {
            warnings.push("daemonize is not supported, running in the foreground".to_string());
        }
        if self.syslog_enabled {
            let facility = FACILITIES
                .iter()
                .find(|(_, code)| *code == self.syslog_facility)
                .map_or("unknown", |(name, _)| *name);
            warnings.push(format!(
                "syslog-enabled is not supported, ignoring syslog-ident '{}' and \
                 syslog-facility {}",
                self.syslog_ident, facility
            ));
        }
        warnings
    }

    /// PRI value placed between the angle brackets of every frame.
    #[must_use]
    pub fn frame_priority(&self) -> u16 {
        u16::from(self.stream_facility) + u16::from(self.stream_priority)
    }
}

/// Turns `--name value ...` command-line arguments into directive text,
/// one directive per line.
#[must_use]
pub fn cli_options(args: &[String]) -> String {
    let mut options = String::new();
    for arg in args {
        if let Some(name) = arg.strip_prefix("--") {
            if !options.is_empty() {
                options.push('\n');
            }
            options.push_str(name);
        } else {
            options.push_str(&quote(arg));
        }
        options.push(' ');
    }
    options
}

fn quote(arg: &str) -> String {
    let escaped = arg
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Splits a directive line into arguments. Returns `None` on unbalanced
/// quotes or when a closing quote is not followed by whitespace.
#[must_use]
pub fn split_args(line: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            return Some(args);
        };

        let mut current = String::new();
        match first {
            '"' => {
                chars.next();
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            'n' => current.push('\n'),
                            'r' => current.push('\r'),
                            't' => current.push('\t'),
                            other => current.push(other),
                        },
                        c => current.push(c),
                    }
                }
            }
            '\'' => {
                chars.next();
                loop {
                    match chars.next()? {
                        '\'' => break,
                        '\\' if chars.peek() == Some(&'\'') => {
                            chars.next();
                            current.push('\'');
                        }
                        c => current.push(c),
                    }
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    current.push(c);
                    chars.next();
                }
            }
        }

        if matches!(first, '"' | '\'') && chars.peek().is_some_and(|c| !c.is_whitespace()) {
            return None;
        }
        args.push(current);
    }
}

fn yes_no(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err("argument must be 'yes' or 'no'".to_string())
    }
}

fn lookup(table: &[(&str, u8)], name: &str) -> Option<u8> {
    table
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, value)| *value)
}

fn number(value: &str) -> Result<u32, String> {
    value
        .parse::<u32>()
        .map_err(|_| format!("Invalid number: '{value}'"))
}

fn millis(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("Invalid delay in milliseconds: '{value}'"))
}
