use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Largest single frame a reader accepts before treating the stream as malformed.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Message,
}

/// The wire envelope wrapping one line of user text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl Envelope {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Message,
        }
    }

    /// Serializes the envelope as one newline-terminated JSON frame.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut encoded = serde_json::to_vec(self)?;
        encoded.push(b'\n');
        Ok(encoded)
    }
}

/// Reads the next envelope from a line-framed stream.
///
/// Returns `Ok(None)` on a clean end of stream. Frames that are not valid
/// UTF-8, are not an envelope, or exceed [`MAX_FRAME_LEN`] surface as
/// [`io::ErrorKind::InvalidData`] so callers can tell them apart from
/// socket failures.
pub fn read_envelope<R>(reader: &mut R) -> io::Result<Option<Envelope>>
where
    R: BufRead,
{
    let mut line = String::new();
    loop {
        line.clear();
        // Borrow the reader so the cap applies per line, not per stream.
        let mut capped = io::Read::take(&mut *reader, MAX_FRAME_LEN as u64 + 1);
        let bytes = capped.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }

        if bytes > MAX_FRAME_LEN && !line.ends_with('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame exceeds {MAX_FRAME_LEN} bytes"),
            ));
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor};

    use super::*;

    #[test]
    fn encodes_content_and_type_fields() {
        let frame = Envelope::message("test message").encode().expect("encode");
        assert_eq!(
            frame,
            b"{\"content\":\"test message\",\"type\":\"message\"}\n".to_vec()
        );
    }

    #[test]
    fn reads_coalesced_frames_in_order() {
        let mut bytes = Envelope::message("one").encode().expect("encode");
        bytes.extend(Envelope::message("two").encode().expect("encode"));
        let mut reader = BufReader::new(Cursor::new(bytes));

        let first = read_envelope(&mut reader).expect("read").expect("frame");
        let second = read_envelope(&mut reader).expect("read").expect("frame");
        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert!(read_envelope(&mut reader).expect("read").is_none());
    }

    #[test]
    fn skips_blank_lines_and_accepts_missing_type() {
        let mut reader = BufReader::new(Cursor::new(b"\r\n\n{\"content\":\"hi\"}\n".to_vec()));
        let envelope = read_envelope(&mut reader).expect("read").expect("frame");
        assert_eq!(envelope, Envelope::message("hi"));
    }

    #[test]
    fn malformed_frame_is_invalid_data() {
        let mut reader = BufReader::new(Cursor::new(b"not json\n".to_vec()));
        let err = read_envelope(&mut reader).expect_err("should reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn large_frames_back_to_back_share_one_reader() {
        let big = "x".repeat(MAX_FRAME_LEN - 64);
        let mut bytes = Envelope::message(big.clone()).encode().expect("encode");
        bytes.extend(Envelope::message("tail").encode().expect("encode"));
        let mut reader = BufReader::new(Cursor::new(bytes));

        let first = read_envelope(&mut reader).expect("read").expect("frame");
        assert_eq!(first.content, big);
        let second = read_envelope(&mut reader).expect("read").expect("frame");
        assert_eq!(second.content, "tail");
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let bytes = vec![b'a'; MAX_FRAME_LEN + 10];
        let mut reader = BufReader::new(Cursor::new(bytes));
        let err = read_envelope(&mut reader).expect_err("should reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
