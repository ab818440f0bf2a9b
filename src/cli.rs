//! Command implementations for the `protolens` binary, kept in the
//! library so tests can drive them without spawning a process.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::codec::{self, CodecOptions};
use crate::framing::{self, FramingOptions, RawBody};
use crate::registry::SchemaRegistry;
use crate::settings::AppConfig;
use crate::value::DecodedValue;

/// Build a registry from an optional `FileDescriptorSet` file.
pub fn load_registry(descriptor_set: Option<&Path>) -> anyhow::Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    if let Some(path) = descriptor_set {
        let bytes = std::fs::read(path)?;
        registry
            .register_file_descriptor_set(&bytes)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", path.display(), e))?;
    }
    Ok(registry)
}

/// Parse a payload argument: hex (optionally 0x-prefixed, whitespace
/// tolerated) first, base64 otherwise.
pub fn parse_payload(input: &str) -> anyhow::Result<Vec<u8>> {
    let compact: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !compact.is_empty()
        && compact.len() % 2 == 0
        && compact.chars().all(|c| c.is_ascii_hexdigit())
    {
        let mut out = Vec::with_capacity(compact.len() / 2);
        let bytes = compact.as_bytes();
        for pair in bytes.chunks(2) {
            let hi = (pair[0] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (pair[1] as char).to_digit(16).unwrap_or(0) as u8;
            out.push(hi * 16 + lo);
        }
        return Ok(out);
    }
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| anyhow::anyhow!("payload is neither hex nor base64: {}", e))
}

/// Decode a payload against an optional schema and render it as JSON.
/// The payload may be a raw message or a framed gRPC body; framing is
/// detected by attempting the 5-byte header first.
pub fn decode_command(
    cfg: &AppConfig,
    registry: &SchemaRegistry,
    payload: &[u8],
    type_name: Option<&str>,
    framed: bool,
) -> serde_json::Value {
    let codec_options: CodecOptions = cfg.codec.to_options();
    let framing_options: FramingOptions = cfg.framing.to_options();

    if framed {
        let headers: HashMap<String, String> = [(
            "content-type".to_string(),
            "application/grpc-web+proto".to_string(),
        )]
        .into();
        let unframed = framing::unwrap_body(
            &framing_options,
            &RawBody::Bytes(payload.to_vec()),
            false,
            &headers,
        );
        let decoded: Vec<serde_json::Value> = unframed
            .payloads
            .iter()
            .map(|p| codec::decode(registry, &codec_options, type_name, p).to_json())
            .collect();
        let mut out = serde_json::Map::new();
        out.insert("payloads".to_string(), serde_json::Value::Array(decoded));
        if let Some(trailers) = unframed.trailers {
            out.insert(
                "trailers".to_string(),
                serde_json::to_value(trailers).unwrap_or_default(),
            );
        }
        return serde_json::Value::Object(out);
    }

    codec::decode(registry, &codec_options, type_name, payload).to_json()
}

/// Zeroed template for a message type or a `/svc/Method` path.
pub fn template_command(
    registry: &SchemaRegistry,
    target: &str,
) -> anyhow::Result<serde_json::Value> {
    let type_name = if target.starts_with('/') {
        registry
            .find_method(target)
            .map(|m| m.entry.method.input_type)
            .ok_or_else(|| anyhow::anyhow!("method {} is not registered", target))?
    } else {
        target.to_string()
    };
    let tree: DecodedValue = codec::template(registry, &type_name)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(tree.to_json())
}

/// Summarize a registry: files, services with methods, message types.
pub fn describe_command(registry: &SchemaRegistry) -> serde_json::Value {
    let files: Vec<&str> = registry.file_names().collect();

    let mut services = serde_json::Map::new();
    let mut paths: Vec<&str> = registry.service_paths().collect();
    paths.sort_unstable();
    for path in paths {
        if let Some(resolved) = registry.find_method(path) {
            services.insert(
                path.to_string(),
                serde_json::json!({
                    "input": resolved.entry.method.input_type,
                    "output": resolved.entry.method.output_type,
                    "server_streaming": resolved.entry.method.server_streaming,
                    "client_streaming": resolved.entry.method.client_streaming,
                }),
            );
        }
    }

    let mut messages: Vec<&str> = registry.message_names().collect();
    messages.sort_unstable();

    serde_json::json!({
        "files": files,
        "services": services,
        "messages": messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_hex_forms() {
        assert_eq!(parse_payload("082a").unwrap(), vec![0x08, 0x2A]);
        assert_eq!(parse_payload("0x08 2A").unwrap(), vec![0x08, 0x2A]);
        assert_eq!(parse_payload("08 2a\n").unwrap(), vec![0x08, 0x2A]);
    }

    #[test]
    fn payload_falls_back_to_base64() {
        let encoded = BASE64.encode([0x08, 0x2A]);
        assert_eq!(parse_payload(&encoded).unwrap(), vec![0x08, 0x2A]);
    }

    #[test]
    fn payload_rejects_garbage() {
        assert!(parse_payload("!!not-a-payload!!").is_err());
    }
}
