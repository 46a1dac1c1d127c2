// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reassembles lines out of the arbitrary byte chunks handed back by file
//! reads.

use bytes::Bytes;

/// Accumulates bytes until a `\n` closes the current line.
///
/// At most `max_len` bytes of a line are kept; the rest of that line is
/// discarded as it arrives, so memory stays bounded no matter how long a
/// line gets. A line that has not been terminated yet survives across calls
/// to [`LineAssembler::feed`].
#[derive(Debug)]
pub struct LineAssembler {
    line: Vec<u8>,
    // bytes seen for the current line, including discarded ones
    index: usize,
    max_len: usize,
}

impl LineAssembler {
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        LineAssembler {
            line: Vec::with_capacity(max_len.min(4_096)),
            index: 0,
            max_len,
        }
    }

    /// Consumes `chunk` and returns every line it completed, in order. Line
    /// contents are passed through untouched, whatever their encoding.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(Bytes::copy_from_slice(&self.line));
                self.line.clear();
                self.index = 0;
                continue;
            }
            if self.line.len() < self.max_len {
                self.line.push(byte);
            }
            self.index += 1;
        }
        lines
    }

    /// Bytes retained for the line currently being assembled.
    #[must_use]
    pub fn partial(&self) -> &[u8] {
        &self.line
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Drops any partially assembled line.
    pub fn reset(&mut self) {
        self.line.clear();
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_line_spanning_two_reads() {
        let mut assembler = LineAssembler::new(1024);

        assert!(assembler.feed(b"ab").is_empty());
        assert_eq!(assembler.index(), 2);

        assert_eq!(assembler.feed(b"c\nd"), vec!["abc".to_string()]);
        assert_eq!(assembler.partial(), b"d");
        assert_eq!(assembler.index(), 1);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut assembler = LineAssembler::new(1024);
        assert_eq!(
            assembler.feed(b"one\ntwo\n\nthree\n"),
            vec!["one", "two", "", "three"]
        );
        assert!(assembler.partial().is_empty());
    }

    #[test]
    fn test_long_line_is_truncated() {
        let mut assembler = LineAssembler::new(4);

        assert!(assembler.feed(b"abcdefgh").is_empty());
        assert_eq!(assembler.partial(), b"abcd");
        assert_eq!(assembler.index(), 8);

        assert_eq!(assembler.feed(b"ij\nnext\n"), vec!["abcd", "next"]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut assembler = LineAssembler::new(16);
        assembler.feed(b"half a li");
        assembler.reset();
        assert_eq!(assembler.index(), 0);
        assert_eq!(assembler.feed(b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_non_utf8_bytes_pass_through() {
        let mut assembler = LineAssembler::new(16);
        let lines = assembler.feed(b"ok\xff\ncaf\xe9\n");
        assert_eq!(&lines[0][..], b"ok\xff");
        assert_eq!(&lines[1][..], b"caf\xe9");
    }

    #[test]
    fn test_truncation_inside_multibyte_character() {
        let mut assembler = LineAssembler::new(5);
        let lines = assembler.feed("abcd\u{e9}z\n".as_bytes());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 5);
        assert_eq!(&lines[0][..], b"abcd\xc3");
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_lines(input in "[a-c\n]{0,200}", split in 0usize..200) {
            let bytes = input.as_bytes();
            let split = split.min(bytes.len());

            let mut whole = LineAssembler::new(1024);
            let expected = whole.feed(bytes);

            let mut chunked = LineAssembler::new(1024);
            let mut lines = chunked.feed(&bytes[..split]);
            lines.extend(chunked.feed(&bytes[split..]));

            prop_assert_eq!(lines, expected);
            prop_assert_eq!(chunked.partial(), whole.partial());
        }

        #[test]
        fn lines_never_exceed_the_limit(input in "[a-zé€\n]{0,400}", limit in 1usize..32) {
            let mut assembler = LineAssembler::new(limit);
            for line in assembler.feed(input.as_bytes()) {
                prop_assert!(line.len() <= limit);
            }
            prop_assert!(assembler.partial().len() <= limit);
        }
    }
}
