//! Record processor: turns captured HTTP exchanges into enriched
//! records by running both directions through the framing pipeline and
//! the dynamic codec, and extracting gRPC trailer metadata.
//!
//! Raw captured fields are never modified; re-decoding a record against
//! a newer registry replaces only the decoded fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecOptions};
use crate::framing::{self, FramingOptions, RawBody, UnframedBody};
use crate::registry::SchemaRegistry;
use crate::value::DecodedValue;

/// A captured HTTP exchange as delivered by the capture collaborator.
/// Header keys are lowercased by the capture layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub start_time_ms: i64,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub http_status: u16,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    pub request_raw: RawBody,
    #[serde(default)]
    pub request_base64_encoded: bool,
    pub response_raw: RawBody,
    #[serde(default)]
    pub response_base64_encoded: bool,
}

/// The processor's output: the capture plus schema-aware decodings.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedRecord {
    pub id: String,
    pub url: String,
    /// `/pkg.Service/Method`, parsed from the URL path.
    pub method_path: Option<String>,
    pub start_time_ms: i64,
    pub duration_ms: i64,
    pub http_status: u16,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_raw: RawBody,
    pub request_base64_encoded: bool,
    pub response_raw: RawBody,
    pub response_base64_encoded: bool,
    /// gRPC status from trailers (0 = OK).
    pub grpc_status: Option<i32>,
    pub grpc_message: Option<String>,
    pub request_decoded: Option<DecodedValue>,
    /// Single value for unary, ordered sequence for server streaming.
    pub response_decoded: Option<DecodedValue>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecordProcessor {
    pub codec_options: CodecOptions,
    pub framing_options: FramingOptions,
}

impl RecordProcessor {
    pub fn new(codec_options: CodecOptions, framing_options: FramingOptions) -> Self {
        Self {
            codec_options,
            framing_options,
        }
    }

    /// Decode one captured record against the given registry snapshot.
    /// Idempotent: the same record and registry yield an equal result.
    pub fn process(&self, registry: &SchemaRegistry, record: &CaptureRecord) -> EnrichedRecord {
        let method_path = parse_method_path(&record.url);
        let resolved = method_path
            .as_deref()
            .and_then(|path| registry.find_method(path));
        let (input_type, output_type) = match &resolved {
            Some(resolved) => (
                Some(resolved.entry.method.input_type.clone()),
                Some(resolved.entry.method.output_type.clone()),
            ),
            None => (None, None),
        };

        let mut warnings = Vec::new();

        let request_unframed = framing::unwrap_body(
            &self.framing_options,
            &record.request_raw,
            record.request_base64_encoded,
            &record.request_headers,
        );
        warnings.extend(request_unframed.warnings.iter().cloned());
        let request_decoded =
            self.decode_payloads(registry, input_type.as_deref(), &request_unframed);

        let response_unframed = framing::unwrap_body(
            &self.framing_options,
            &record.response_raw,
            record.response_base64_encoded,
            &record.response_headers,
        );
        warnings.extend(response_unframed.warnings.iter().cloned());
        let response_decoded =
            self.decode_payloads(registry, output_type.as_deref(), &response_unframed);

        let (grpc_status, grpc_message) =
            grpc_trailer_metadata(&response_unframed, &record.response_headers);

        // A record without a /Service/Method path can only ever be
        // blind-decoded; surface that as the record's error.
        let error = if method_path.is_none() {
            Some(format!("no gRPC method path in url: {}", record.url))
        } else {
            None
        };

        EnrichedRecord {
            id: record.id.clone(),
            url: record.url.clone(),
            method_path,
            start_time_ms: record.start_time_ms,
            duration_ms: record.duration_ms,
            http_status: record.http_status,
            request_headers: record.request_headers.clone(),
            response_headers: record.response_headers.clone(),
            request_raw: record.request_raw.clone(),
            request_base64_encoded: record.request_base64_encoded,
            response_raw: record.response_raw.clone(),
            response_base64_encoded: record.response_base64_encoded,
            grpc_status,
            grpc_message,
            request_decoded,
            response_decoded,
            error,
            warnings,
        }
    }

    /// One payload decodes to its value; multiple frames (server
    /// streaming) decode to an ordered sequence.
    fn decode_payloads(
        &self,
        registry: &SchemaRegistry,
        type_name: Option<&str>,
        unframed: &UnframedBody,
    ) -> Option<DecodedValue> {
        match unframed.payloads.len() {
            0 => None,
            1 => Some(codec::decode(
                registry,
                &self.codec_options,
                type_name,
                &unframed.payloads[0],
            )),
            _ => Some(DecodedValue::Repeated(
                unframed
                    .payloads
                    .iter()
                    .map(|payload| {
                        codec::decode(registry, &self.codec_options, type_name, payload)
                    })
                    .collect(),
            )),
        }
    }
}

/// Extract `/pkg.Service/Method` from a captured URL. Accepts absolute
/// URLs and bare paths; the method path is the last two path segments.
pub fn parse_method_path(raw_url: &str) -> Option<String> {
    let path = match url::Url::parse(raw_url) {
        Ok(parsed) => parsed.path().to_string(),
        // Not absolute: treat the input as a path, dropping any query.
        Err(_) => raw_url.split('?').next().unwrap_or("").to_string(),
    };
    let trimmed = path.trim_end_matches('/');
    let mut segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let method = segments.pop()?;
    let service = segments.pop()?;
    Some(format!("/{}/{}", service, method))
}

/// `grpc-status` / `grpc-message` come from the trailer frame when one
/// exists, else from the response headers (trailers-only responses).
fn grpc_trailer_metadata(
    unframed: &UnframedBody,
    response_headers: &HashMap<String, String>,
) -> (Option<i32>, Option<String>) {
    let lookup = |name: &str| -> Option<String> {
        unframed
            .trailers
            .as_ref()
            .and_then(|t| t.get(name).cloned())
            .or_else(|| response_headers.get(name).cloned())
    };
    let status = lookup("grpc-status").and_then(|s| s.trim().parse::<i32>().ok());
    let message = lookup("grpc-message").map(|m| percent_decode(&m));
    (status, message)
}

/// Minimal percent-decoding for `grpc-message` values.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_path_from_absolute_url() {
        assert_eq!(
            parse_method_path("https://api.example.test/pkg.Widgets/GetWidget"),
            Some("/pkg.Widgets/GetWidget".to_string())
        );
    }

    #[test]
    fn method_path_survives_proxy_prefix_and_query() {
        assert_eq!(
            parse_method_path("https://edge.example.test/rpc/pkg.Widgets/List?x=1"),
            Some("/pkg.Widgets/List".to_string())
        );
        assert_eq!(parse_method_path("/pkg.Widgets/List"), Some("/pkg.Widgets/List".into()));
    }

    #[test]
    fn method_path_requires_two_segments() {
        assert_eq!(parse_method_path("https://example.test/healthz"), None);
    }

    #[test]
    fn percent_decoding_grpc_message() {
        assert_eq!(percent_decode("not%20found%21"), "not found!");
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("bad%2"), "bad%2");
    }
}
