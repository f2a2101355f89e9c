//! Worker output classification and line draining.

use std::io;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncRead, BufReader};

/// Longest line kept from a worker stream; the rest up to the newline is dropped.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Structured progress as emitted by a worker, e.g.
/// `{"cycle": 2, "total_cycles": 5, "errors": 0, "timeouts": 1}`.
pub type ProgressRecord = Map<String, Value>;

/// One line of worker stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Progress(ProgressRecord),
    Text(String),
}

impl WorkerOutput {
    /// A line is progress only if it is a complete JSON object; anything else,
    /// including bare JSON scalars, is plain text.
    pub fn parse(line: &str) -> Self {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Object(record)) => Self::Progress(record),
            _ => Self::Text(line.to_string()),
        }
    }
}

/// Read one line into `buf`, keeping at most `max` bytes of it.
///
/// Returns `None` at EOF, otherwise whether the line was cut short.
async fn read_line_capped<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    let mut read_any = false;
    let mut truncated = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any.then_some(truncated));
        }
        read_any = true;

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let room = max.saturating_sub(buf.len());
        if chunk.len() > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        let used = chunk.len();
        reader.consume(used);

        if done {
            return Ok(Some(truncated));
        }
    }
}

/// Read `reader` to EOF, handing each line (without its terminator) to `on_line`.
/// Invalid UTF-8 is replaced rather than ending the drain. Lines longer than
/// [`MAX_LINE_BYTES`] are truncated.
pub(crate) async fn drain_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_line_capped(&mut reader, &mut buf, MAX_LINE_BYTES).await {
            Ok(None) => break,
            Ok(Some(truncated)) => {
                if truncated {
                    log::warn!(
                        "Worker output line exceeded {} bytes, truncated",
                        MAX_LINE_BYTES
                    );
                }
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                log::warn!("Worker output stream failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_is_progress() {
        let out = WorkerOutput::parse(r#"{"cycle": 1, "total_cycles": 5, "errors": 0}"#);
        match out {
            WorkerOutput::Progress(record) => {
                assert_eq!(record["cycle"], 1);
                assert_eq!(record["total_cycles"], 5);
            }
            WorkerOutput::Text(_) => unreachable!("expected progress"),
        }
    }

    #[test]
    fn everything_else_is_text() {
        for line in [
            "Connected to COM3 at 115200 baud.",
            "42",
            "\"quoted\"",
            "[1, 2]",
            "{\"cycle\": 1",
            "",
        ] {
            assert_eq!(WorkerOutput::parse(line), WorkerOutput::Text(line.to_string()));
        }
    }

    #[tokio::test]
    async fn drains_lines_without_terminators() {
        let input: &[u8] = b"first\r\nsecond\n\xffthird";
        let mut lines = Vec::new();
        drain_lines(input, |line| lines.push(line.to_string())).await;
        assert_eq!(lines, vec!["first", "second", "\u{fffd}third"]);
    }

    #[tokio::test]
    async fn overlong_lines_are_capped() {
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3];
        input.extend_from_slice(b"\nnext\n");
        input.extend_from_slice(&vec![b'y'; MAX_LINE_BYTES + 1]);

        let mut lines = Vec::new();
        drain_lines(input.as_slice(), |line| lines.push(line.to_string())).await;

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert!(lines[0].bytes().all(|b| b == b'x'));
        assert_eq!(lines[1], "next");
        assert_eq!(lines[2].len(), MAX_LINE_BYTES);
    }
}
