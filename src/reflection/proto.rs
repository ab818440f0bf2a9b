//! Hand-framed `ServerReflectionRequest` / `ServerReflectionResponse`
//! messages. The channel is single-shot request/response rather than a
//! streaming client, so the messages are built and parsed directly with
//! the wire reader/writer.
//!
//! Request fields: host=1, file_by_filename=3, file_containing_symbol=4,
//! list_services=7. Response fields: file_descriptor_response=4
//! (repeated file_descriptor_proto=1), list_services_response=6
//! (repeated service=1, each with name=1), error_response=7
//! (error_code=1, error_message=2).

use crate::wire::{WireReader, WireType, WireWriter};

/// One reflection request variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionRequest {
    ListServices,
    FileContainingSymbol(String),
    FileByFilename(String),
}

impl ReflectionRequest {
    /// Encode with the host field always present (field 1).
    pub fn encode(&self, host: &str) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_string_field(1, host);
        match self {
            ReflectionRequest::FileByFilename(file_name) => {
                writer.write_string_field(3, file_name);
            }
            ReflectionRequest::FileContainingSymbol(symbol) => {
                writer.write_string_field(4, symbol);
            }
            ReflectionRequest::ListServices => {
                writer.write_string_field(7, "");
            }
        }
        writer.into_bytes()
    }
}

/// The response payload variants the coordinator consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionResponse {
    /// Raw `FileDescriptorProto` payloads.
    FileDescriptors(Vec<Vec<u8>>),
    /// Full service names from ListServices.
    Services(Vec<String>),
    /// Server-side error (gRPC status code + message).
    Error { code: i32, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReflectionProtoError {
    #[error("malformed reflection response: {0}")]
    Malformed(String),
    #[error("reflection response carries no recognized payload")]
    EmptyResponse,
}

/// Parse a `ServerReflectionResponse` message body.
pub fn parse_response(bytes: &[u8]) -> Result<ReflectionResponse, ReflectionProtoError> {
    let mut reader = WireReader::new(bytes);
    let mut result: Option<ReflectionResponse> = None;

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader
            .read_tag()
            .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
        match (field_number, wire_type) {
            (4, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
                result = Some(ReflectionResponse::FileDescriptors(
                    parse_file_descriptor_response(raw)?,
                ));
            }
            (6, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
                result = Some(ReflectionResponse::Services(parse_list_services_response(
                    raw,
                )?));
            }
            (7, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
                result = Some(parse_error_response(raw)?);
            }
            (_, wt) => reader
                .skip_field(wt)
                .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?,
        }
    }

    result.ok_or(ReflectionProtoError::EmptyResponse)
}

/// FileDescriptorResponse: repeated file_descriptor_proto=1 (bytes).
fn parse_file_descriptor_response(bytes: &[u8]) -> Result<Vec<Vec<u8>>, ReflectionProtoError> {
    let mut reader = WireReader::new(bytes);
    let mut descriptors = Vec::new();
    while !reader.is_at_end() {
        let (field_number, wire_type) = reader
            .read_tag()
            .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => descriptors.push(
                reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?
                    .to_vec(),
            ),
            (_, wt) => reader
                .skip_field(wt)
                .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?,
        }
    }
    Ok(descriptors)
}

/// ListServiceResponse: repeated service=1, ServiceResponse.name=1.
fn parse_list_services_response(bytes: &[u8]) -> Result<Vec<String>, ReflectionProtoError> {
    let mut reader = WireReader::new(bytes);
    let mut services = Vec::new();
    while !reader.is_at_end() {
        let (field_number, wire_type) = reader
            .read_tag()
            .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
                if let Some(name) = parse_service_name(raw)? {
                    services.push(name);
                }
            }
            (_, wt) => reader
                .skip_field(wt)
                .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?,
        }
    }
    Ok(services)
}

fn parse_service_name(bytes: &[u8]) -> Result<Option<String>, ReflectionProtoError> {
    let mut reader = WireReader::new(bytes);
    let mut name = None;
    while !reader.is_at_end() {
        let (field_number, wire_type) = reader
            .read_tag()
            .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
                name = Some(String::from_utf8_lossy(raw).to_string());
            }
            (_, wt) => reader
                .skip_field(wt)
                .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?,
        }
    }
    Ok(name)
}

/// ErrorResponse: error_code=1, error_message=2.
fn parse_error_response(bytes: &[u8]) -> Result<ReflectionResponse, ReflectionProtoError> {
    let mut reader = WireReader::new(bytes);
    let mut code = 0i32;
    let mut message = String::new();
    while !reader.is_at_end() {
        let (field_number, wire_type) = reader
            .read_tag()
            .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
        match (field_number, wire_type) {
            (1, WireType::Varint) => {
                code = reader
                    .read_varint()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?
                    as i32;
            }
            (2, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?;
                message = String::from_utf8_lossy(raw).to_string();
            }
            (_, wt) => reader
                .skip_field(wt)
                .map_err(|e| ReflectionProtoError::Malformed(e.to_string()))?,
        }
    }
    Ok(ReflectionResponse::Error { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_always_carries_host() {
        let bytes = ReflectionRequest::ListServices.encode("example.test");
        let mut reader = WireReader::new(&bytes);
        let (number, _) = reader.read_tag().unwrap();
        assert_eq!(number, 1);
        assert_eq!(reader.read_length_delimited().unwrap(), b"example.test");
        let (number, _) = reader.read_tag().unwrap();
        assert_eq!(number, 7);
    }

    #[test]
    fn error_response_parses_code_and_message() {
        let mut body = WireWriter::new();
        body.write_varint_field(1, 12);
        body.write_string_field(2, "unimplemented");
        let mut outer = WireWriter::new();
        outer.write_bytes_field(7, &body.into_bytes());
        match parse_response(&outer.into_bytes()).unwrap() {
            ReflectionResponse::Error { code, message } => {
                assert_eq!(code, 12);
                assert_eq!(message, "unimplemented");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
