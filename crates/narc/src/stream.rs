// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails a single file.
//!
//! A [`Stream`] opens its file, seeks to the end and from then on reacts to
//! change notifications (plus a coarse polling fallback) with a stat/read
//! cycle:
//!
//! ```text
//!   change ──> stat ──size < offset──> truncated: offset = 0
//!                │
//!                ├──size == offset──> nothing new
//!                v
//!              read [offset, size) ──> lines ──> dedup / rate limit ──> dispatch
//! ```
//!
//! The stat and the read run off the event loop and report back as
//! completions. Only one cycle is ever in flight per stream: the stream is
//! `locked` from the moment the stat is issued until the read completes. A
//! change that shows up in the meantime is folded into a single follow-up
//! cycle rather than a second concurrent read.

use crate::config::{Config, StreamConfig};
use crate::constants::{POLL_INTERVAL, READ_BUFFER_SIZE, WATCH_QUEUE};
use crate::dispatch::DispatchHandle;
use crate::errors::Fatal;
use crate::line::LineAssembler;
use crate::policy::{LinePolicy, Verdict};
use bytes::Bytes;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Byte range of a single read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRange {
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug)]
enum Completion {
    Stat(io::Result<u64>),
    Read(io::Result<Vec<u8>>),
}

pub struct Stream {
    id: Arc<str>,
    file: PathBuf,
    handle: Option<Arc<File>>,
    attempts: u32,
    max_open_attempts: u32,
    open_retry_delay: Duration,
    open_attempts_fatal: bool,
    rate_time: Duration,

    last_known_size: u64,
    offset: u64,
    read_limit: usize,
    locked: bool,
    rescan: bool,
    truncated: bool,

    assembler: LineAssembler,
    policy: LinePolicy,
}

impl Stream {
    #[must_use]
    pub fn new(stream: &StreamConfig, config: &Config) -> Self {
        Stream {
            id: Arc::from(stream.id.as_str()),
            file: stream.file.clone(),
            handle: None,
            attempts: 0,
            max_open_attempts: config.max_open_attempts,
            open_retry_delay: config.open_retry_delay,
            open_attempts_fatal: config.open_attempts_fatal,
            rate_time: config.rate_time,
            last_known_size: 0,
            offset: 0,
            read_limit: READ_BUFFER_SIZE,
            locked: false,
            rescan: false,
            truncated: false,
            assembler: LineAssembler::new(config.truncate_limit),
            policy: LinePolicy::new(config.rate_limit),
        }
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn last_known_size(&self) -> u64 {
        self.last_known_size
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn policy(&self) -> &LinePolicy {
        &self.policy
    }

    #[must_use]
    pub fn assembler(&self) -> &LineAssembler {
        &self.assembler
    }

    /// Opens the file and positions at its current end; whatever the file
    /// already holds is never shipped.
    pub async fn open(&mut self) -> io::Result<()> {
        let file = tokio::fs::File::open(&self.file).await?;
        let size = file.metadata().await?.len();
        self.handle = Some(Arc::new(file.into_std().await));
        self.offset = size;
        self.last_known_size = size;
        info!(
            "Watching {} as '{}' from byte {}",
            self.file.display(),
            self.id,
            size
        );
        Ok(())
    }

    /// Takes the read lock for a new stat/read cycle. Returns `false` when the
    /// file is not open or a cycle is already in flight; in the latter case
    /// one more cycle runs once the current one completes.
    pub fn begin_cycle(&mut self) -> bool {
        if self.handle.is_none() {
            return false;
        }
        if self.locked {
            self.rescan = true;
            return false;
        }
        self.locked = true;
        true
    }

    /// Applies a freshly observed file size and returns the range to read, if
    /// any. Without a range to read the lock is released here.
    pub fn on_stat(&mut self, size: u64) -> Option<ReadRange> {
        if size < self.offset {
            warn!(
                "{} was truncated ({} -> {} bytes), reading from the start",
                self.file.display(),
                self.offset,
                size
            );
            self.truncated = true;
            self.offset = 0;
            self.assembler.reset();
        }
        self.last_known_size = size;

        if size == self.offset {
            self.release();
            return None;
        }

        let remaining = size - self.offset;
        let len = remaining.min(self.read_limit as u64);
        if len < remaining {
            self.rescan = true;
        }
        Some(ReadRange {
            offset: self.offset,
            len: len as usize,
        })
    }

    /// Consumes the bytes of a completed read and returns the lines that
    /// survived repeat suppression and rate limiting.
    pub fn on_read(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.offset += bytes.len() as u64;
        self.release();

        let mut emitted = Vec::new();
        for line in self.assembler.feed(bytes) {
            match self.policy.judge(&line) {
                Verdict::Emit => emitted.push(line),
                Verdict::Repeat => trace!("{}: repeated line suppressed", self.id),
                Verdict::RateLimited => trace!("{}: line dropped by rate limit", self.id),
                Verdict::Empty => {}
            }
        }
        emitted
    }

    /// A failed stat or read just ends the cycle; the next notification tries
    /// again.
    pub fn on_failure(&mut self, operation: &str, error: &io::Error) {
        debug!(
            "Failed to {} {}: {}",
            operation,
            self.file.display(),
            error
        );
        self.rescan = false;
        self.release();
    }

    /// Whether another cycle was requested while the last one was in flight.
    pub fn take_rescan(&mut self) -> bool {
        std::mem::take(&mut self.rescan)
    }

    /// Closes the current rate window.
    pub fn end_window(&mut self) {
        let missed = self.policy.reset_window();
        if missed > 0 {
            info!(
                "{}: {} messages dropped by rate limit in the last {:?}",
                self.id, missed, self.rate_time
            );
        }
    }

    fn release(&mut self) {
        self.locked = false;
        self.truncated = false;
    }

    /// Tails the file until cancelled, shipping every accepted line through
    /// `dispatch`.
    ///
    /// Returns an error only when the file cannot be opened within
    /// `max_open_attempts` and that is configured to be fatal.
    pub async fn run(
        mut self,
        dispatch: DispatchHandle,
        cancel_token: CancellationToken,
    ) -> Result<(), Fatal> {
        if !self.open_with_retry(&cancel_token).await? {
            return Ok(());
        }

        let (changes_tx, mut changes) = mpsc::channel(WATCH_QUEUE);
        let _watcher = match watch(&self.file, changes_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(
                    "Unable to watch {}: {}, falling back to polling",
                    self.file.display(),
                    e
                );
                None
            }
        };

        let (completions_tx, mut completions) = mpsc::unbounded_channel();
        let mut poll = interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        let mut window = interval_at(Instant::now() + self.rate_time, self.rate_time);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                Some(()) = changes.recv() => self.start_cycle(&completions_tx),
                _ = poll.tick() => self.start_cycle(&completions_tx),
                _ = window.tick() => self.end_window(),
                Some(completion) = completions.recv() => {
                    self.complete(completion, &completions_tx, &dispatch);
                }
            }
        }

        debug!("Stream {} stopped at byte {}", self.id, self.offset);
        Ok(())
    }

    async fn open_with_retry(&mut self, cancel_token: &CancellationToken) -> Result<bool, Fatal> {
        while self.handle.is_none() {
            match self.open().await {
                Ok(()) => break,
                Err(e) => {
                    self.attempts += 1;
                    warn!(
                        "Error opening {} ({}/{}): {}",
                        self.file.display(),
                        self.attempts,
                        self.max_open_attempts,
                        e
                    );
                    if self.attempts == self.max_open_attempts {
                        if self.open_attempts_fatal {
                            warn!("Reached max open attempts: {}", self.file.display());
                            return Err(Fatal::OpenAttemptsExhausted {
                                path: self.file.clone(),
                                attempts: self.attempts,
                            });
                        }
                        warn!("Giving up on {}", self.file.display());
                        return Ok(false);
                    }
                }
            }

            tokio::select! {
                _ = cancel_token.cancelled() => return Ok(false),
                _ = sleep(self.open_retry_delay) => {}
            }
        }
        Ok(true)
    }

    fn start_cycle(&mut self, completions: &mpsc::UnboundedSender<Completion>) {
        if !self.begin_cycle() {
            return;
        }
        if let Some(file) = &self.handle {
            let file = Arc::clone(file);
            let completions = completions.clone();
            tokio::task::spawn_blocking(move || {
                let size = file.metadata().map(|metadata| metadata.len());
                let _ = completions.send(Completion::Stat(size));
            });
        }
    }

    fn complete(
        &mut self,
        completion: Completion,
        completions: &mpsc::UnboundedSender<Completion>,
        dispatch: &DispatchHandle,
    ) {
        match completion {
            Completion::Stat(Ok(size)) => {
                if let (Some(range), Some(file)) = (self.on_stat(size), &self.handle) {
                    let file = Arc::clone(file);
                    let completions = completions.clone();
                    tokio::task::spawn_blocking(move || {
                        let _ = completions.send(Completion::Read(read_range(&file, range)));
                    });
                    return;
                }
            }
            Completion::Stat(Err(e)) => self.on_failure("stat", &e),
            Completion::Read(Ok(bytes)) => {
                for line in self.on_read(&bytes) {
                    if let Err(e) = dispatch.ship(&self.id, line) {
                        debug!("Failed to hand line from {} to dispatch: {}", self.id, e);
                    }
                }
            }
            Completion::Read(Err(e)) => self.on_failure("read", &e),
        }

        if self.take_rescan() {
            self.start_cycle(completions);
        }
    }
}

fn read_range(file: &File, range: ReadRange) -> io::Result<Vec<u8>> {
    let mut reader = file;
    reader.seek(SeekFrom::Start(range.offset))?;
    let mut buf = Vec::with_capacity(range.len);
    reader.take(range.len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn watch(path: &Path, changes: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                // a full queue already guarantees a pending cycle
                let _ = changes.try_send(());
            }
        }
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
