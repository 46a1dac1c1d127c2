// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream repeat suppression and rate limiting.

/// What happens to a completed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Ship it.
    Emit,
    /// Identical to the previous line, suppressed.
    Repeat,
    /// The stream already used up its budget for the current window.
    RateLimited,
    /// Empty lines carry nothing to ship.
    Empty,
}

#[derive(Debug, Default)]
pub struct LinePolicy {
    previous_line: Vec<u8>,
    repeat_count: u32,
    // 0 disables the limit
    rate_limit: u32,
    rate_count: u32,
    missed_count: u32,
}

impl LinePolicy {
    #[must_use]
    pub fn new(rate_limit: u32) -> Self {
        LinePolicy {
            rate_limit,
            ..Default::default()
        }
    }

    /// Decides the fate of `line`. Repeats are checked before the rate limit,
    /// so a suppressed repeat never consumes budget.
    pub fn judge(&mut self, line: &[u8]) -> Verdict {
        if line.is_empty() {
            return Verdict::Empty;
        }

        if line == self.previous_line.as_slice() {
            self.repeat_count += 1;
            return Verdict::Repeat;
        }
        self.repeat_count = 0;
        self.previous_line.clear();
        self.previous_line.extend_from_slice(line);

        if self.rate_limit > 0 && self.rate_count >= self.rate_limit {
            self.missed_count += 1;
            return Verdict::RateLimited;
        }
        self.rate_count += 1;
        Verdict::Emit
    }

    /// Starts a new rate window and returns how many lines the closing one
    /// dropped.
    pub fn reset_window(&mut self) -> u32 {
        let missed = self.missed_count;
        self.rate_count = 0;
        self.missed_count = 0;
        missed
    }

    #[must_use]
    pub fn previous_line(&self) -> &[u8] {
        &self.previous_line
    }

    #[must_use]
    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    #[must_use]
    pub fn rate_count(&self) -> u32 {
        self.rate_count
    }

    #[must_use]
    pub fn missed_count(&self) -> u32 {
        self.missed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(policy: &mut LinePolicy, lines: &[&str]) -> Vec<String> {
        lines
            .iter()
            .filter(|line| policy.judge(line.as_bytes()) == Verdict::Emit)
            .map(|line| line.to_string())
            .collect()
    }

    #[test]
    fn test_repeat_is_suppressed_without_summary() {
        let mut policy = LinePolicy::new(0);
        assert_eq!(emitted(&mut policy, &["a", "a", "b"]), vec!["a", "b"]);
        assert_eq!(policy.repeat_count(), 0);
        assert_eq!(policy.previous_line(), b"b");
    }

    #[test]
    fn test_repeat_count_tracks_consecutive_duplicates() {
        let mut policy = LinePolicy::new(0);
        assert_eq!(policy.judge(b"x"), Verdict::Emit);
        assert_eq!(policy.judge(b"x"), Verdict::Repeat);
        assert_eq!(policy.judge(b"x"), Verdict::Repeat);
        assert_eq!(policy.repeat_count(), 2);
        assert!(!policy.previous_line().is_empty());

        assert_eq!(policy.judge(b"y"), Verdict::Emit);
        assert_eq!(policy.repeat_count(), 0);
        // non-consecutive duplicates are shipped
        assert_eq!(policy.judge(b"x"), Verdict::Emit);
    }

    #[test]
    fn test_empty_lines_leave_state_alone() {
        let mut policy = LinePolicy::new(0);
        assert_eq!(policy.judge(b""), Verdict::Empty);
        assert_eq!(policy.judge(b""), Verdict::Empty);
        assert_eq!(policy.repeat_count(), 0);
        assert_eq!(policy.rate_count(), 0);
    }

    #[test]
    fn test_rate_limit_window() {
        let limit = 3;
        let mut policy = LinePolicy::new(limit);
        let lines: Vec<String> = (0..limit + 5).map(|i| format!("line {i}")).collect();

        let verdicts: Vec<Verdict> = lines
            .iter()
            .map(|line| policy.judge(line.as_bytes()))
            .collect();
        assert_eq!(
            verdicts.iter().filter(|v| **v == Verdict::Emit).count(),
            limit as usize
        );
        assert_eq!(policy.missed_count(), 5);

        assert_eq!(policy.reset_window(), 5);
        assert_eq!(policy.rate_count(), 0);
        assert_eq!(policy.missed_count(), 0);
        assert_eq!(policy.judge(b"after the window"), Verdict::Emit);
    }

    #[test]
    fn test_repeats_do_not_consume_rate_budget() {
        let mut policy = LinePolicy::new(2);
        assert_eq!(policy.judge(b"a"), Verdict::Emit);
        assert_eq!(policy.judge(b"a"), Verdict::Repeat);
        assert_eq!(policy.judge(b"b"), Verdict::Emit);
        assert_eq!(policy.judge(b"c"), Verdict::RateLimited);
        assert_eq!(policy.rate_count(), 2);
    }
}
