//! Bounded body capture and rendering
//!
//! A body is either kept whole or not at all: the first chunk that would push
//! the buffer over its ceiling discards everything accumulated so far.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::fmt;
use std::io::Read;

/// Decoded output may grow to this multiple of the capture ceiling
const MAX_DECODE_RATIO: usize = 16;

/// Bytes of a binary body shown in the diagnostic preview
const BINARY_PREVIEW_BYTES: usize = 48;

/// Accumulates body chunks up to a fixed ceiling
#[derive(Debug, Clone)]
pub struct BodyBuffer {
    limit: usize,
    data: Vec<u8>,
    observed: u64,
    truncated: bool,
}

impl BodyBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::new(),
            observed: 0,
            truncated: false,
        }
    }

    /// Append a chunk
    ///
    /// Returns false once the buffer has been truncated; from then on chunks
    /// only advance the observed byte counter.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        self.observed += chunk.len() as u64;
        if self.truncated {
            return false;
        }
        if self.data.len() + chunk.len() > self.limit {
            self.data = Vec::new();
            self.truncated = true;
            return false;
        }
        self.data.extend_from_slice(chunk);
        true
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Total bytes seen, including bytes past the ceiling
    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Render the captured body for export
    ///
    /// `content_encoding` is the raw `Content-Encoding` header value of the
    /// side this body belongs to.
    pub fn render(&self, content_encoding: Option<&str>) -> Option<BodyContent> {
        if self.truncated {
            return Some(BodyContent::Truncated { limit: self.limit });
        }
        if self.data.is_empty() {
            return None;
        }

        match content_encoding.and_then(compression_token) {
            Some(encoding) => {
                let max_output = self.limit.saturating_mul(MAX_DECODE_RATIO);
                match decompress(&self.data, &encoding, max_output) {
                    Some(decoded) => Some(classify(&decoded)),
                    None => {
                        tracing::debug!(
                            encoding = %encoding,
                            size = self.data.len(),
                            "Could not decode compressed body, exporting as base64"
                        );
                        Some(BodyContent::Encoded {
                            base64: STANDARD.encode(&self.data),
                            encoding,
                        })
                    }
                }
            }
            None => Some(classify(&self.data)),
        }
    }
}

/// Exportable form of a captured body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyContent {
    Text(String),
    /// Compressed body that could not be decoded within bounds
    Encoded { encoding: String, base64: String },
    /// Mostly non-text content
    Binary { size: usize, preview: String },
    Truncated { limit: usize },
}

impl BodyContent {
    /// Value of the body attribute
    pub fn render(&self) -> String {
        match self {
            BodyContent::Text(text) => text.clone(),
            BodyContent::Encoded { base64, .. } => base64.clone(),
            BodyContent::Binary { size, preview } => {
                format!("[binary body: {} bytes, preview: {}]", size, preview)
            }
            BodyContent::Truncated { limit } => {
                format!("[body truncated: exceeded {} byte limit]", limit)
            }
        }
    }

    /// Content encoding of an `Encoded` body
    pub fn encoding(&self) -> Option<&str> {
        match self {
            BodyContent::Encoded { encoding, .. } => Some(encoding),
            _ => None,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, BodyContent::Truncated { .. })
    }
}

impl fmt::Display for BodyContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// First content-coding if it is one we can decode
fn compression_token(header: &str) -> Option<String> {
    let token = header.split(',').next()?.trim().to_ascii_lowercase();
    match token.as_str() {
        "gzip" | "x-gzip" | "deflate" | "x-deflate" | "br" => Some(token),
        _ => None,
    }
}

fn decompress(data: &[u8], encoding: &str, max_output: usize) -> Option<Vec<u8>> {
    match encoding {
        "gzip" | "x-gzip" => read_bounded(GzDecoder::new(data), max_output),
        // HTTP deflate is zlib-wrapped, but raw deflate is common in practice
        "deflate" | "x-deflate" => read_bounded(ZlibDecoder::new(data), max_output)
            .or_else(|| read_bounded(DeflateDecoder::new(data), max_output)),
        "br" => read_bounded(brotli_decompressor::Decompressor::new(data, 4096), max_output),
        _ => None,
    }
}

/// Read at most `max_output` bytes; overflow counts as failure
fn read_bounded<R: Read>(reader: R, max_output: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(max_output as u64 + 1)
        .read_to_end(&mut out)
        .ok()?;
    if out.len() > max_output {
        return None;
    }
    Some(out)
}

fn classify(data: &[u8]) -> BodyContent {
    let text = String::from_utf8_lossy(data);
    let mut total = 0usize;
    let mut suspicious = 0usize;
    for c in text.chars() {
        total += 1;
        if c == char::REPLACEMENT_CHARACTER || (c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
        {
            suspicious += 1;
        }
    }

    if suspicious * 10 > total {
        let preview_len = data.len().min(BINARY_PREVIEW_BYTES);
        BodyContent::Binary {
            size: data.len(),
            preview: STANDARD.encode(&data[..preview_len]),
        }
    } else {
        BodyContent::Text(text.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_push_within_limit() {
        let mut buffer = BodyBuffer::new(10);
        assert!(buffer.push(b"hello"));
        assert!(buffer.push(b"world"));
        assert_eq!(buffer.as_bytes(), b"helloworld");
        assert!(!buffer.is_truncated());
        assert_eq!(
            buffer.render(None),
            Some(BodyContent::Text("helloworld".to_string()))
        );
    }

    #[test]
    fn test_overflow_discards_whole_buffer() {
        let mut buffer = BodyBuffer::new(10);
        assert!(buffer.push(b"hello"));
        assert!(!buffer.push(b"world!"));
        assert!(buffer.is_truncated());
        assert!(buffer.is_empty());

        // Later chunks, even small ones, are only counted
        assert!(!buffer.push(b"x"));
        assert!(buffer.is_empty());
        assert_eq!(buffer.observed(), 12);
    }

    #[test]
    fn test_response_over_default_ceiling_renders_marker() {
        let mut buffer = BodyBuffer::new(4096);
        for chunk in vec![b'a'; 5000].chunks(1000) {
            buffer.push(chunk);
        }
        let content = buffer.render(None).unwrap();
        assert!(content.is_truncated());
        assert_eq!(
            content.render(),
            "[body truncated: exceeded 4096 byte limit]"
        );
        assert_eq!(buffer.observed(), 5000);
    }

    #[test]
    fn test_exact_limit_is_kept() {
        let mut buffer = BodyBuffer::new(4);
        assert!(buffer.push(b"abcd"));
        assert!(!buffer.is_truncated());
    }

    #[test]
    fn test_empty_body_renders_nothing() {
        let buffer = BodyBuffer::new(16);
        assert_eq!(buffer.render(None), None);
        assert_eq!(buffer.render(Some("gzip")), None);
    }

    #[test]
    fn test_gzip_body_is_decoded() {
        let mut buffer = BodyBuffer::new(4096);
        buffer.push(&gzip(br#"{"ok":true}"#));
        assert_eq!(
            buffer.render(Some("GZIP")),
            Some(BodyContent::Text(r#"{"ok":true}"#.to_string()))
        );
    }

    #[test]
    fn test_deflate_body_is_decoded() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"plain text").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut buffer = BodyBuffer::new(4096);
        buffer.push(&compressed);
        assert_eq!(
            buffer.render(Some("deflate, identity")),
            Some(BodyContent::Text("plain text".to_string()))
        );
    }

    #[test]
    fn test_invalid_compressed_body_falls_back_to_base64() {
        let mut buffer = BodyBuffer::new(4096);
        buffer.push(b"definitely not gzip");
        let content = buffer.render(Some("gzip")).unwrap();
        assert_eq!(content.encoding(), Some("gzip"));
        assert_eq!(content.render(), STANDARD.encode(b"definitely not gzip"));
    }

    #[test]
    fn test_decompression_bomb_is_bounded() {
        let bomb = gzip(&vec![0u8; 200_000]);
        let mut buffer = BodyBuffer::new(4096);
        assert!(buffer.push(&bomb));
        let content = buffer.render(Some("gzip")).unwrap();
        assert!(matches!(content, BodyContent::Encoded { .. }));
    }

    #[test]
    fn test_unknown_encoding_is_treated_as_identity() {
        let mut buffer = BodyBuffer::new(64);
        buffer.push(b"hello");
        assert_eq!(
            buffer.render(Some("zstd")),
            Some(BodyContent::Text("hello".to_string()))
        );
    }

    #[test]
    fn test_binary_body_gets_preview() {
        let data: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let mut buffer = BodyBuffer::new(4096);
        buffer.push(&data);

        match buffer.render(None).unwrap() {
            BodyContent::Binary { size, preview } => {
                assert_eq!(size, 300);
                assert_eq!(preview, STANDARD.encode(&data[..48]));
            }
            other => panic!("expected binary body, got {:?}", other),
        }
    }

    #[test]
    fn test_text_with_whitespace_controls_is_text() {
        let mut buffer = BodyBuffer::new(64);
        buffer.push("línea 1\r\n\tlínea 2\n".as_bytes());
        assert!(matches!(buffer.render(None), Some(BodyContent::Text(_))));
    }
}
