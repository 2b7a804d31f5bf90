//! Telnet/line assembler
//!
//! Turns an inbound byte stream from a MUD socket into a sequence of
//! logical lines. Strips IAC framing, detects Go-Ahead, and holds a
//! trailing partial line across `feed` calls until a terminator, a GA, or
//! the caller's packet-patch timeout releases it.

const IAC: u8 = 255;
const GA: u8 = 249;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const WONT: u8 = 252;
const DO: u8 = 253;
const DONT: u8 = 254;

/// Result of feeding one chunk of bytes to the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssembledLines {
    /// Complete lines produced by this `feed` call (and, if `has_ga` or a
    /// `flush` follows, the trailing partial too).
    pub lines: Vec<Vec<u8>>,
    /// Whether a telnet Go-Ahead was observed in this chunk.
    pub has_ga: bool,
}

/// Reassembles a telnet byte stream into logical lines.
///
/// Owns only the partial-line buffer; the packet-patch timer itself is the
/// caller's responsibility (armed/cancelled around calls to `feed`), since
/// that's a suspension point and this type must stay synchronous per the
/// concurrency model.
#[derive(Debug, Default)]
pub struct LineAssembler {
    line_buffer: Vec<u8>,
}

impl LineAssembler {
    /// Construct an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes read from the MUD socket.
    ///
    /// IAC sequences are stripped per the telnet subset this proxy
    /// understands: IAC IAC is a literal 255, IAC SB..IAC SE is discarded,
    /// WILL/WONT/DO/DONT option negotiation is discarded without replying,
    /// IAC GA sets `has_ga`, and any other IAC command byte is discarded.
    /// The cleaned stream is then split on LF; any part that doesn't end in
    /// LF is incomplete and is buffered for the next `feed` (or released by
    /// `flush` on GA / packet-patch timeout).
    pub fn feed(&mut self, data: &[u8]) -> AssembledLines {
        let mut cleaned = Vec::with_capacity(data.len());
        let mut has_ga = false;

        let mut i = 0;
        while i < data.len() {
            if data[i] != IAC {
                cleaned.push(data[i]);
                i += 1;
                continue;
            }

            // Malformed IAC at end-of-buffer: stop here, bytes are lost
            // from this chunk but nothing is emitted as a line either;
            // the next feed starts fresh (no partial IAC state carried).
            if i + 1 >= data.len() {
                break;
            }

            match data[i + 1] {
                IAC => {
                    cleaned.push(IAC);
                    i += 2;
                }
                GA => {
                    has_ga = true;
                    i += 2;
                }
                SB => {
                    // Discard until IAC SE (inclusive). If SE never
                    // arrives in this chunk, discard the remainder.
                    i += 2;
                    while i + 1 < data.len() && !(data[i] == IAC && data[i + 1] == SE) {
                        i += 1;
                    }
                    if i + 1 < data.len() {
                        i += 2; // consume the terminating IAC SE
                    } else {
                        i = data.len();
                    }
                }
                WILL | WONT | DO | DONT => {
                    i += 3.min(data.len() - i);
                }
                _ => {
                    i += 2;
                }
            }
        }

        self.line_buffer.extend_from_slice(&cleaned);

        let mut lines = Vec::new();
        let mut rest: &[u8] = &self.line_buffer;
        loop {
            match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let mut line = rest[..pos].to_vec();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    lines.push(line);
                    rest = &rest[pos + 1..];
                }
                None => break,
            }
        }
        let remainder = rest.to_vec();

        if has_ga {
            if !remainder.is_empty() {
                lines.push(remainder);
            }
            self.line_buffer.clear();
        } else {
            self.line_buffer = remainder;
        }

        AssembledLines { lines, has_ga }
    }

    /// Release the current partial line, e.g. because the packet-patch
    /// timer fired with no further data arriving. Returns `None` if there
    /// is nothing buffered.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.line_buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.line_buffer))
        }
    }

    /// Whether a partial line is currently buffered (used by the caller to
    /// decide whether to (re)arm the packet-patch timer).
    pub fn has_partial(&self) -> bool {
        !self.line_buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_to_strings(lines: &[Vec<u8>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| String::from_utf8_lossy(l).to_string())
            .collect()
    }

    #[test]
    fn scenario_a_reassembly_across_packets() {
        let mut assembler = LineAssembler::new();

        let r1 = assembler.feed(b"hello ");
        assert!(r1.lines.is_empty());
        assert!(!r1.has_ga);

        let r2 = assembler.feed(b"world\r\nfoo");
        assert_eq!(lines_to_strings(&r2.lines), vec!["hello world"]);
        assert!(!r2.has_ga);

        let r3 = assembler.feed(b"bar\r\n");
        assert_eq!(lines_to_strings(&r3.lines), vec!["foobar"]);
        assert!(!r3.has_ga);
    }

    #[test]
    fn single_chunk_matches_split_chunks() {
        let whole = b"line one\r\nline two\r\nline thr".to_vec();
        let mut parts: Vec<&[u8]> = Vec::new();
        for chunk in whole.chunks(3) {
            parts.push(chunk);
        }

        let mut incremental = LineAssembler::new();
        let mut got = Vec::new();
        for part in &parts {
            got.extend(incremental.feed(part).lines);
        }

        let mut single = LineAssembler::new();
        let mut want = single.feed(&whole).lines;
        // Both leave "line thr" buffered as partial; compare only completed lines.
        want.truncate(2);

        assert_eq!(lines_to_strings(&got), lines_to_strings(&want));
        assert_eq!(lines_to_strings(&got), vec!["line one", "line two"]);
    }

    #[test]
    fn iac_will_wont_do_dont_are_stripped() {
        let mut assembler = LineAssembler::new();
        let mut data = vec![IAC, WILL, 1];
        data.extend_from_slice(b"hi\r\n");
        data.splice(0..0, vec![]);
        let mut full = vec![IAC, DO, 24];
        full.extend(data);
        let r = assembler.feed(&full);
        assert_eq!(lines_to_strings(&r.lines), vec!["hi"]);
    }

    #[test]
    fn iac_iac_is_literal_255() {
        let mut assembler = LineAssembler::new();
        let data = vec![b'a', IAC, IAC, b'b', b'\r', b'\n'];
        let r = assembler.feed(&data);
        assert_eq!(r.lines.len(), 1);
        assert_eq!(r.lines[0], vec![b'a', 255, b'b']);
    }

    #[test]
    fn iac_ga_flushes_partial_as_line() {
        let mut assembler = LineAssembler::new();
        let mut data = b"Prompt> ".to_vec();
        data.extend_from_slice(&[IAC, GA]);
        let r = assembler.feed(&data);
        assert!(r.has_ga);
        assert_eq!(lines_to_strings(&r.lines), vec!["Prompt> "]);
        assert!(!assembler.has_partial());
    }

    #[test]
    fn iac_sb_se_block_is_discarded() {
        let mut assembler = LineAssembler::new();
        let mut data = b"before ".to_vec();
        data.extend_from_slice(&[IAC, SB, 1, 2, 3, IAC, SE]);
        data.extend_from_slice(b"after\r\n");
        let r = assembler.feed(&data);
        assert_eq!(lines_to_strings(&r.lines), vec!["before after"]);
    }

    #[test]
    fn flush_releases_partial_line() {
        let mut assembler = LineAssembler::new();
        assembler.feed(b"no terminator yet");
        assert!(assembler.has_partial());
        let flushed = assembler.flush();
        assert_eq!(flushed, Some(b"no terminator yet".to_vec()));
        assert!(!assembler.has_partial());
        assert_eq!(assembler.flush(), None);
    }

    #[test]
    fn malformed_trailing_iac_leaves_residual_for_next_feed() {
        let mut assembler = LineAssembler::new();
        let r1 = assembler.feed(&[b'x', b'y', IAC]);
        assert!(r1.lines.is_empty());
        let r2 = assembler.feed(b"z\r\n");
        assert_eq!(lines_to_strings(&r2.lines), vec!["xyz"]);
    }
}
