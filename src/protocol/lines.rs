//! Line reassembly for inbound text.
//!
//! Text notifications are arbitrary slices of a line-oriented stream. Lines
//! may end in `\n` or `\r\n`, and both may appear on the same connection.

/// Rolling buffer that turns text chunks into complete messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineReassembler {
    buffer: String,
}

impl LineReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every message it completes, in order.
    ///
    /// Messages are trimmed; whitespace-only lines are dropped. After this
    /// returns, no terminator remains in the buffer.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        std::iter::from_fn(|| self.next_message()).collect()
    }

    /// Text received after the last terminator.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Length of the pending text in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard pending text.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn next_message(&mut self) -> Option<String> {
        loop {
            let (end, terminator_len) = self.find_terminator()?;
            let message = self.buffer[..end].trim().to_string();
            self.buffer.drain(..end + terminator_len);

            if !message.is_empty() {
                return Some(message);
            }
        }
    }

    /// Position and length of the earliest terminator.
    ///
    /// A `\r\n` wins when it starts at or before the first `\n`, so a CRLF
    /// line is never split on its embedded line feed.
    fn find_terminator(&self) -> Option<(usize, usize)> {
        let lf = self.buffer.find('\n')?;

        match self.buffer.find("\r\n") {
            Some(crlf) if crlf <= lf => Some((crlf, 2)),
            _ => Some((lf, 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_message_split_across_chunks() {
        let mut lines = LineReassembler::new();
        assert!(lines.feed("AB").is_empty());
        assert_eq!(lines.feed("C\n"), vec!["ABC"]);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_mixed_terminators() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.feed("X\r\n"), vec!["X"]);
        assert_eq!(lines.feed("Y\n"), vec!["Y"]);
        assert_eq!(lines.pending(), "");
    }

    #[test]
    fn test_single_byte_chunks() {
        let mut split = LineReassembler::new();
        let mut out = Vec::new();
        for chunk in ["H", "i", "\n"] {
            out.extend(split.feed(chunk));
        }

        let mut whole = LineReassembler::new();
        assert_eq!(out, whole.feed("Hi\n"));
        assert_eq!(out, vec!["Hi"]);
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut lines = LineReassembler::new();
        assert!(lines.feed("OK\r").is_empty());
        assert_eq!(lines.feed("\nNEXT"), vec!["OK"]);
        assert_eq!(lines.pending(), "NEXT");
    }

    #[test]
    fn test_several_messages_in_one_chunk() {
        let mut lines = LineReassembler::new();
        assert_eq!(
            lines.feed("TEMP:21.5\r\nHUM:40\nBAT:88\r\npartial"),
            vec!["TEMP:21.5", "HUM:40", "BAT:88"]
        );
        assert_eq!(lines.pending(), "partial");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn test_whitespace_only_lines_dropped() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.feed("\n  \r\n\t\nA\n"), vec!["A"]);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_messages_are_trimmed() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.feed("  OK  \r\n"), vec!["OK"]);
    }

    #[test]
    fn test_lone_lf_before_crlf() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.feed("A\nB\r\n"), vec!["A", "B"]);
    }

    #[test]
    fn test_terminator_positions() {
        let mut lines = LineReassembler::new();
        lines.buffer.push_str("A\r\nB\n");
        assert_eq!(lines.find_terminator(), Some((1, 2)));

        lines.buffer = "A\nB\r\n".to_string();
        assert_eq!(lines.find_terminator(), Some((1, 1)));

        lines.buffer = "bare\rcarriage".to_string();
        assert_eq!(lines.find_terminator(), None);
    }

    #[test]
    fn test_clear() {
        let mut lines = LineReassembler::new();
        lines.feed("half a line");
        lines.clear();
        assert_eq!(lines.feed("fresh\n"), vec!["fresh"]);
    }

    fn chunked(text: &str, cuts: &[usize]) -> Vec<String> {
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (text.len() + 1)).collect();
        points.push(0);
        points.push(text.len());
        points.sort_unstable();
        points.dedup();
        points
            .windows(2)
            .map(|w| text[w[0]..w[1]].to_string())
            .collect()
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_messages(
            text in "[ab \r\n]{0,64}",
            cuts in proptest::collection::vec(0usize..65, 0..16),
        ) {
            let mut whole = LineReassembler::new();
            let expected = whole.feed(&text);

            let mut split = LineReassembler::new();
            let mut actual = Vec::new();
            for chunk in chunked(&text, &cuts) {
                actual.extend(split.feed(&chunk));
            }

            prop_assert_eq!(actual, expected);
            prop_assert_eq!(split.pending(), whole.pending());
            prop_assert!(!split.pending().contains('\n'));
        }

        #[test]
        fn prop_non_blank_lines_survive(lines in proptest::collection::vec("[a-z]{1,8}", 0..10)) {
            let mut reassembler = LineReassembler::new();
            let text: String = lines.iter().map(|l| format!("{}\r\n", l)).collect();
            prop_assert_eq!(reassembler.feed(&text), lines);
        }
    }
}
