// SPDX-FileCopyrightText: 2024 The pelican developers
//
// SPDX-License-Identifier: Apache-2.0

use pelican_deps::{
    bytes::{Buf, BufMut, BytesMut},
    tokio_util::codec::{Decoder, Encoder},
};
use thiserror::Error;

/// Errors of the line codec
#[derive(Error, Debug)]
pub enum LinesCodecError {
    /// A line exceeded the configured maximum length
    #[error("line length limit exceeded")]
    MaxLineLengthExceeded,
    /// The underlying transport failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A codec that decodes raw lines (bytes, terminator stripped) and encodes
/// reply strings with CRLF appended.
///
/// Decoding yields bytes rather than strings so that 8-bit message payloads
/// survive the DATA phase untouched.
#[derive(Debug)]
pub struct LinesCodec {
    max_length: usize,
    // Index where the next terminator scan should resume.
    next_index: usize,
}

impl LinesCodec {
    /// Creates a codec with the given maximum line length.
    #[must_use]
    pub const fn new_with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Decoder for LinesCodec {
    type Item = Vec<u8>;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, LinesCodecError> {
        if let Some(pos) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let pos = self.next_index + pos;
            let mut line = buf.split_to(pos + 1);
            self.next_index = 0;
            // Strip LF and an optional preceding CR.
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.len() > self.max_length {
                return Err(LinesCodecError::MaxLineLengthExceeded);
            }
            return Ok(Some(line.to_vec()));
        }
        if buf.len() > self.max_length {
            buf.advance(buf.len());
            self.next_index = 0;
            return Err(LinesCodecError::MaxLineLengthExceeded);
        }
        self.next_index = buf.len();
        Ok(None)
    }
}

impl Encoder<String> for LinesCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        buf.reserve(line.len() + 2);
        buf.put_slice(line.as_bytes());
        buf.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_crlf_and_bare_lf() {
        let mut codec = LinesCodec::new_with_max_length(64);
        let mut buf = BytesMut::from(&b"EHLO client\r\nNOOP\npartial"[..]);

        assert_eq!(
            codec.decode(&mut buf).expect("decode"),
            Some(b"EHLO client".to_vec())
        );
        assert_eq!(codec.decode(&mut buf).expect("decode"), Some(b"NOOP".to_vec()));
        assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    }

    #[test]
    fn rejects_overlong_lines() {
        let mut codec = LinesCodec::new_with_max_length(8);
        let mut buf = BytesMut::from(&b"AAAAAAAAAAAAAAAA\r\n"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encodes_with_crlf() {
        let mut codec = LinesCodec::new_with_max_length(64);
        let mut buf = BytesMut::new();
        codec.encode(String::from("250 OK"), &mut buf).expect("encode");
        assert_eq!(&buf[..], b"250 OK\r\n");
    }
}
