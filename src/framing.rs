//! Payload extraction pipeline: unwraps captured HTTP bodies down to raw
//! Protobuf payloads. Stages run in order, each gated on an observable
//! precondition: base64 normalization, grpc-web-text reconstruction,
//! whole-body gzip, then gRPC length-prefixed framing with trailer
//! extraction. Also provides the frame writer used to build reflection
//! request bodies.

use std::collections::HashMap;
use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tracing::{debug, warn};

/// gRPC frame header: flags byte + u32 big-endian length.
pub const FRAME_HEADER_LEN: usize = 5;
/// Flags bit 0: this data frame is individually gzip-compressed.
pub const FLAG_COMPRESSED: u8 = 0x01;
/// Flags bit 7: trailer frame (gRPC-Web).
pub const FLAG_TRAILERS: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("frame length {length} exceeds remaining {remaining} bytes")]
    FrameBeyondEnd { length: usize, remaining: usize },
    #[error("gzip inflate failed: {0}")]
    Decompression(String),
    #[error("inflated output exceeds budget of {0} bytes")]
    DecompressionBudget(u64),
}

/// Framing tunables, carried from [`crate::settings::FramingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct FramingOptions {
    /// Bomb guard: maximum inflated size per buffer.
    pub gzip_max_output_bytes: u64,
}

impl Default for FramingOptions {
    fn default() -> Self {
        Self {
            gzip_max_output_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Captured body as delivered by the capture collaborator: either raw
/// bytes or text (optionally base64 of the true bytes).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum RawBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl RawBody {
    pub fn len(&self) -> usize {
        match self {
            RawBody::Bytes(b) => b.len(),
            RawBody::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The unwrapped result: payload slices in wire order, trailer metadata
/// when a trailer frame was present, and any stage warnings.
#[derive(Debug, Clone, Default)]
pub struct UnframedBody {
    pub payloads: Vec<Bytes>,
    pub trailers: Option<HashMap<String, String>>,
    /// Raw trailer-frame bytes, kept even when no line parses.
    pub raw_trailers: Vec<u8>,
    pub warnings: Vec<String>,
}

/// Run the full pipeline over a captured body.
pub fn unwrap_body(
    options: &FramingOptions,
    raw: &RawBody,
    base64_encoded: bool,
    headers: &HashMap<String, String>,
) -> UnframedBody {
    let mut warnings = Vec::new();
    let content_type = header(headers, "content-type").unwrap_or_default();

    // Stage 1: normalize to bytes.
    let mut buffer = match raw {
        RawBody::Bytes(bytes) => bytes.clone(),
        RawBody::Text(text) => {
            if base64_encoded {
                match BASE64.decode(text.trim()) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warnings.push(format!("body base64 decode failed: {}", err));
                        text.as_bytes().to_vec()
                    }
                }
            } else {
                text.as_bytes().to_vec()
            }
        }
    };

    // Stage 2: grpc-web-text double-base64 reconstruction.
    if content_type.contains("grpc-web-text") {
        buffer = unwrap_grpc_web_text(buffer);
    }

    // Stage 3: whole-body gzip.
    let encoding = header(headers, "grpc-encoding")
        .or_else(|| header(headers, "connect-content-encoding"))
        .unwrap_or_default();
    if encoding == "gzip" {
        match gunzip(&buffer, options.gzip_max_output_bytes) {
            Ok(inflated) => buffer = inflated,
            Err(err) => {
                warn!(error = %err, "body decompression failed, keeping original buffer");
                warnings.push(err.to_string());
            }
        }
    }

    // Stage 4: length-prefixed framing.
    if content_type.contains("grpc") || content_type.contains("connect") {
        let mut unframed = read_frames(options, &buffer);
        unframed.warnings.splice(0..0, warnings);
        return unframed;
    }

    UnframedBody {
        payloads: vec![Bytes::from(buffer)],
        trailers: None,
        raw_trailers: Vec::new(),
        warnings,
    }
}

/// grpc-web-text bodies are base64 on the wire, but capture layers often
/// hand us the already-decoded binary. Heuristic: mostly non-printable
/// leading bytes, or a leading 0x00/0x01 framing flag, means binary.
fn unwrap_grpc_web_text(buffer: Vec<u8>) -> Vec<u8> {
    if looks_binary(&buffer) {
        return buffer;
    }
    // Reconstruct the base64 stream: strip non-alphabet bytes (chunked
    // responses interleave whitespace), re-pad to a multiple of four.
    let mut cleaned: Vec<u8> = buffer
        .iter()
        .copied()
        .filter(|b| {
            b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/' || *b == b'='
        })
        .collect();
    while cleaned.len() % 4 != 0 {
        cleaned.push(b'=');
    }
    match BASE64.decode(&cleaned) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(error = %err, "grpc-web-text base64 reconstruction failed, keeping buffer");
            buffer
        }
    }
}

fn looks_binary(buffer: &[u8]) -> bool {
    if buffer.is_empty() {
        return true;
    }
    if buffer[0] == 0x00 || buffer[0] == 0x01 {
        return true;
    }
    let window = &buffer[..buffer.len().min(64)];
    let non_printable = window
        .iter()
        .filter(|b| !(0x20..0x7F).contains(*b) && !b"\r\n\t".contains(*b))
        .count();
    non_printable * 10 >= window.len()
}

/// Parse length-prefixed frames. Data frames are concatenated in order
/// (per-frame compression inflated first); trailer frames are parsed as
/// HTTP-style header lines. A parse failure mid-buffer keeps the frames
/// read so far; a buffer with no discoverable header at all becomes a
/// single payload.
pub fn read_frames(options: &FramingOptions, buffer: &[u8]) -> UnframedBody {
    let mut payloads = Vec::new();
    let mut trailers: Option<HashMap<String, String>> = None;
    let mut raw_trailers = Vec::new();
    let mut warnings = Vec::new();
    let mut offset = 0usize;

    while buffer.len() - offset >= FRAME_HEADER_LEN {
        let flags = buffer[offset];
        let length = u32::from_be_bytes([
            buffer[offset + 1],
            buffer[offset + 2],
            buffer[offset + 3],
            buffer[offset + 4],
        ]) as usize;
        let body_start = offset + FRAME_HEADER_LEN;
        if length > buffer.len() - body_start {
            if offset == 0 {
                // No framing discoverable: emit the whole buffer as one payload.
                return UnframedBody {
                    payloads: vec![Bytes::copy_from_slice(buffer)],
                    trailers: None,
                    raw_trailers: Vec::new(),
                    warnings,
                };
            }
            warnings.push(
                FramingError::FrameBeyondEnd {
                    length,
                    remaining: buffer.len() - body_start,
                }
                .to_string(),
            );
            break;
        }
        let body = &buffer[body_start..body_start + length];
        offset = body_start + length;

        if flags & FLAG_TRAILERS != 0 {
            raw_trailers.extend_from_slice(body);
            let parsed = parse_trailer_block(body);
            match &mut trailers {
                Some(existing) => existing.extend(parsed),
                None => trailers = Some(parsed),
            }
        } else if flags & FLAG_COMPRESSED != 0 {
            match gunzip(body, options.gzip_max_output_bytes) {
                Ok(inflated) => payloads.push(Bytes::from(inflated)),
                Err(err) => {
                    warn!(error = %err, "frame decompression failed, keeping compressed bytes");
                    warnings.push(err.to_string());
                    payloads.push(Bytes::copy_from_slice(body));
                }
            }
        } else {
            payloads.push(Bytes::copy_from_slice(body));
        }
    }

    if offset == 0 && !buffer.is_empty() {
        // Shorter than one header: not framed.
        return UnframedBody {
            payloads: vec![Bytes::copy_from_slice(buffer)],
            trailers: None,
            raw_trailers: Vec::new(),
            warnings,
        };
    }
    if offset < buffer.len() && buffer.len() - offset < FRAME_HEADER_LEN && !payloads.is_empty() {
        warnings.push(format!(
            "{} trailing bytes after last frame",
            buffer.len() - offset
        ));
    }

    UnframedBody {
        payloads,
        trailers,
        raw_trailers,
        warnings,
    }
}

/// Trailer frames carry `key: value\r\n` lines. Keys are lowercased to
/// match the capture collaborator's header convention.
fn parse_trailer_block(body: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let text = String::from_utf8_lossy(body);
    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            out.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    out
}

/// Frame one payload with the 5-byte gRPC header.
pub fn write_frame(payload: &[u8], flags: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.push(flags);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Frame a sequence of payloads, optionally gzip-compressing each.
pub fn write_frames(payloads: &[Vec<u8>], compress: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in payloads {
        if compress {
            let compressed = gzip(payload);
            out.extend_from_slice(&write_frame(&compressed, FLAG_COMPRESSED));
        } else {
            out.extend_from_slice(&write_frame(payload, 0));
        }
    }
    out
}

/// Whole-buffer gzip inflate with an output budget.
pub fn gunzip(data: &[u8], max_output_bytes: u64) -> Result<Vec<u8>, FramingError> {
    let mut decoder = GzDecoder::new(data).take(max_output_bytes + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| FramingError::Decompression(e.to_string()))?;
    if out.len() as u64 > max_output_bytes {
        return Err(FramingError::DecompressionBudget(max_output_bytes));
    }
    Ok(out)
}

fn gzip(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    // Writing to a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(name).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_data_frame() {
        let buffer = [0x00, 0x00, 0x00, 0x00, 0x03, 0xAA, 0xBB, 0xCC];
        let out = read_frames(&FramingOptions::default(), &buffer);
        assert_eq!(out.payloads, vec![Bytes::from_static(&[0xAA, 0xBB, 0xCC])]);
        assert!(out.trailers.is_none());
    }

    #[test]
    fn unframed_buffer_passes_through_whole() {
        let buffer = [0x08, 0x2A];
        let out = read_frames(&FramingOptions::default(), &buffer);
        assert_eq!(out.payloads, vec![Bytes::from_static(&[0x08, 0x2A])]);
    }

    #[test]
    fn truncated_second_frame_keeps_first() {
        let mut buffer = write_frame(&[0x01, 0x02], 0);
        buffer.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0xFF, 0x01]);
        let out = read_frames(&FramingOptions::default(), &buffer);
        assert_eq!(out.payloads, vec![Bytes::from_static(&[0x01, 0x02])]);
        assert_eq!(out.warnings.len(), 1);
    }
}
