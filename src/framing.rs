//! NETCONF message framing (RFC 6242)
//!
//! Sessions start with end-of-message framing, where each message is followed
//! by `]]>]]>`. Once both peers have advertised `base:1.1` in their hello, the
//! session switches to chunked framing:
//!
//! ```text
//! \n#<chunk-size>\n<chunk-data> ... \n##\n
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Delimiter terminating every NETCONF 1.0 message
pub const EOM_MARKER: &[u8] = b"]]>]]>";

/// Largest chunk size allowed by RFC 6242 (2^32 - 1)
const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// Default ceiling for a single reassembled message (16 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// `]]>]]>` delimited (base:1.0)
    EndOfMessage,
    /// Length-prefixed chunks (base:1.1)
    Chunked,
}

/// tokio codec producing one `String` per NETCONF message
#[derive(Debug, Clone)]
pub struct FrameCodec {
    mode: FramingMode,
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    /// Codec in end-of-message mode, rejecting frames over `max_frame_len` bytes
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            mode: FramingMode::EndOfMessage,
            max_frame_len,
        }
    }

    /// Current framing mode
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Switch to chunked framing after a base:1.1 hello exchange
    pub fn upgrade(&mut self) {
        self.mode = FramingMode::Chunked;
    }

    fn decode_eom(&self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        let Some(pos) = find(src, EOM_MARKER) else {
            if src.len() > self.max_frame_len + EOM_MARKER.len() {
                return Err(self.too_large(src.len()));
            }
            return Ok(None);
        };
        if pos > self.max_frame_len {
            return Err(self.too_large(pos));
        }

        let message = src.split_to(pos);
        src.advance(EOM_MARKER.len());
        into_string(&message).map(Some)
    }

    fn decode_chunked(&self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        // Scan without consuming until the end-of-chunks marker is present
        let mut pos = 0;
        let mut chunks: Vec<(usize, usize)> = Vec::new();
        let mut total = 0usize;

        loop {
            if src.len() < pos + 3 {
                return Ok(None);
            }
            if &src[pos..pos + 2] != b"\n#" {
                return Err(TransportError::Framing(
                    "expected chunk header".to_string(),
                ));
            }

            if src[pos + 2] == b'#' {
                if src.len() < pos + 4 {
                    return Ok(None);
                }
                if src[pos + 3] != b'\n' {
                    return Err(TransportError::Framing(
                        "malformed end-of-chunks marker".to_string(),
                    ));
                }
                if chunks.is_empty() {
                    return Err(TransportError::Framing(
                        "message without chunks".to_string(),
                    ));
                }
                let end = pos + 4;
                let mut message = Vec::with_capacity(total);
                for (start, len) in &chunks {
                    message.extend_from_slice(&src[*start..*start + *len]);
                }
                src.advance(end);
                return into_string(&message).map(Some);
            }

            // chunk-size = 1-10 digits, no leading zero
            let digits_start = pos + 2;
            let Some(newline) = src[digits_start..]
                .iter()
                .take(11)
                .position(|b| *b == b'\n')
            else {
                if src.len() - digits_start > 10 {
                    return Err(TransportError::Framing("chunk size too long".to_string()));
                }
                return Ok(None);
            };
            let digits = &src[digits_start..digits_start + newline];
            let size = parse_chunk_size(digits)?;

            total += size;
            if total > self.max_frame_len {
                return Err(self.too_large(total));
            }

            let data_start = digits_start + newline + 1;
            if src.len() < data_start + size {
                return Ok(None);
            }
            chunks.push((data_start, size));
            pos = data_start + size;
        }
    }

    fn too_large(&self, len: usize) -> TransportError {
        TransportError::Framing(format!(
            "message of {} bytes exceeds limit of {}",
            len, self.max_frame_len
        ))
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            FramingMode::EndOfMessage => self.decode_eom(src),
            FramingMode::Chunked => self.decode_chunked(src),
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, message: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if message.len() > self.max_frame_len {
            return Err(self.too_large(message.len()));
        }
        match self.mode {
            FramingMode::EndOfMessage => {
                dst.reserve(message.len() + EOM_MARKER.len());
                dst.put_slice(message.as_bytes());
                dst.put_slice(EOM_MARKER);
            }
            FramingMode::Chunked => {
                if message.is_empty() {
                    return Err(TransportError::Framing(
                        "cannot send an empty chunked message".to_string(),
                    ));
                }
                let header = format!("\n#{}\n", message.len());
                dst.reserve(header.len() + message.len() + 4);
                dst.put_slice(header.as_bytes());
                dst.put_slice(message.as_bytes());
                dst.put_slice(b"\n##\n");
            }
        }
        Ok(())
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize, TransportError> {
    let invalid = || {
        TransportError::Framing(format!(
            "invalid chunk size {:?}",
            String::from_utf8_lossy(digits)
        ))
    };
    if digits.is_empty() || digits[0] == b'0' || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let size: u64 = std::str::from_utf8(digits)
        .map_err(|_| invalid())?
        .parse()
        .map_err(|_| invalid())?;
    if size > MAX_CHUNK_SIZE {
        return Err(invalid());
    }
    usize::try_from(size).map_err(|_| invalid())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn into_string(bytes: &[u8]) -> Result<String, TransportError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| TransportError::Framing(format!("message is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eom_split_across_reads() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"<hello/>]]>"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"]]><rpc/>]]>]]>");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("<hello/>".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("<rpc/>".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_multiple_chunks() {
        let mut codec = FrameCodec::default();
        codec.upgrade();

        let mut buf = BytesMut::from(&b"\n#4\n<rpc\n#17\n message-id=\"1\"/>\n##\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("<rpc message-id=\"1\"/>".to_string())
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_partial_input() {
        let mut codec = FrameCodec::default();
        codec.upgrade();

        let full = b"\n#5\nhello\n##\n";
        for cut in 1..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert_eq!(codec.decode(&mut buf).unwrap(), None, "cut at {}", cut);
        }
    }

    #[test]
    fn test_chunked_rejects_bad_headers() {
        let mut codec = FrameCodec::default();
        codec.upgrade();

        for input in [&b"\n#0\n\n##\n"[..], b"\n#abc\n", b"xx#5\nhello", b"\n##\n"] {
            let mut buf = BytesMut::from(input);
            assert!(codec.decode(&mut buf).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_encode_both_modes() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode("<hello/>".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"<hello/>]]>]]>");

        codec.upgrade();
        let mut dst = BytesMut::new();
        codec.encode("<rpc/>".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"\n#6\n<rpc/>\n##\n");
        assert_eq!(codec.decode(&mut dst).unwrap(), Some("<rpc/>".to_string()));
    }

    #[test]
    fn test_frame_limit() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
