//! Parser for `FileDescriptorProto` bytes as returned by server
//! reflection. Walks tags with the wire reader and dispatches only on the
//! fields the registry needs; everything else is skipped.

use thiserror::Error;

use crate::descriptor::{
    qualify, normalize_type_name, EnumDescriptor, FieldDescriptor, FieldLabel, FieldType,
    FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
use crate::wire::{WireError, WireReader, WireType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("wire error in {context}: {source}")]
    Wire {
        context: &'static str,
        #[source]
        source: WireError,
    },
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("field {field} in {message} has unknown type {type_number}")]
    UnknownFieldType {
        message: String,
        field: String,
        type_number: u64,
    },
}

fn wire_err(context: &'static str) -> impl FnOnce(WireError) -> ParseError {
    move |source| ParseError::Wire { context, source }
}

fn read_string(reader: &mut WireReader<'_>, context: &'static str) -> Result<String, ParseError> {
    let bytes = reader.read_length_delimited().map_err(wire_err(context))?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ParseError::InvalidUtf8(context))
}

/// Parse a `FileDescriptorSet` (repeated file=1) into its files.
pub fn parse_file_descriptor_set(bytes: &[u8]) -> Result<Vec<FileDescriptor>, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut files = Vec::new();
    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("set"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => {
                let raw = reader.read_length_delimited().map_err(wire_err("set.file"))?;
                files.push(parse_file_descriptor(raw)?);
            }
            (_, wt) => reader.skip_field(wt).map_err(wire_err("set"))?,
        }
    }
    Ok(files)
}

/// Parse one `FileDescriptorProto`.
///
/// FileDescriptorProto tags: name=1, package=2, dependency=3,
/// message_type=4, enum_type=5, service=6.
pub fn parse_file_descriptor(bytes: &[u8]) -> Result<FileDescriptor, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut package = String::new();
    let mut dependencies = Vec::new();
    let mut raw_messages: Vec<&[u8]> = Vec::new();
    let mut raw_enums: Vec<&[u8]> = Vec::new();
    let mut raw_services: Vec<&[u8]> = Vec::new();

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("file"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "file.name")?,
            (2, WireType::LengthDelimited) => package = read_string(&mut reader, "file.package")?,
            (3, WireType::LengthDelimited) => {
                dependencies.push(read_string(&mut reader, "file.dependency")?)
            }
            (4, WireType::LengthDelimited) => raw_messages.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("file.message_type"))?,
            ),
            (5, WireType::LengthDelimited) => raw_enums.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("file.enum_type"))?,
            ),
            (6, WireType::LengthDelimited) => raw_services.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("file.service"))?,
            ),
            (_, wt) => reader.skip_field(wt).map_err(wire_err("file"))?,
        }
    }

    let mut file = FileDescriptor::new(name, package.clone());
    file.dependencies = dependencies;
    for raw in raw_messages {
        file.messages.push(parse_message(raw, &package)?);
    }
    for raw in raw_enums {
        file.enums.push(parse_enum(raw, &package)?);
    }
    for raw in raw_services {
        file.services.push(parse_service(raw, &package)?);
    }
    Ok(file)
}

/// DescriptorProto tags: name=1, field=2, nested_type=3, enum_type=4.
fn parse_message(bytes: &[u8], prefix: &str) -> Result<MessageDescriptor, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut raw_fields: Vec<&[u8]> = Vec::new();
    let mut raw_nested: Vec<&[u8]> = Vec::new();
    let mut raw_enums: Vec<&[u8]> = Vec::new();

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("message"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "message.name")?,
            (2, WireType::LengthDelimited) => raw_fields.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("message.field"))?,
            ),
            (3, WireType::LengthDelimited) => raw_nested.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("message.nested_type"))?,
            ),
            (4, WireType::LengthDelimited) => raw_enums.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("message.enum_type"))?,
            ),
            (_, wt) => reader.skip_field(wt).map_err(wire_err("message"))?,
        }
    }

    let full_name = qualify(prefix, &name);
    let mut message = MessageDescriptor::new(full_name.clone());
    for raw in raw_fields {
        message.fields.push(parse_field(raw, &full_name)?);
    }
    for raw in raw_nested {
        message.nested_messages.push(parse_message(raw, &full_name)?);
    }
    for raw in raw_enums {
        message.nested_enums.push(parse_enum(raw, &full_name)?);
    }
    Ok(message)
}

/// FieldDescriptorProto tags: name=1, number=3, label=4, type=5, type_name=6.
fn parse_field(bytes: &[u8], message_name: &str) -> Result<FieldDescriptor, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut number: u32 = 0;
    let mut label = FieldLabel::Optional;
    let mut type_number: u64 = 0;
    let mut type_name: Option<String> = None;

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("field"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "field.name")?,
            (3, WireType::Varint) => {
                number = reader.read_varint().map_err(wire_err("field.number"))? as u32
            }
            (4, WireType::Varint) => {
                label = FieldLabel::from_number(
                    reader.read_varint().map_err(wire_err("field.label"))?,
                )
            }
            (5, WireType::Varint) => {
                type_number = reader.read_varint().map_err(wire_err("field.type"))?
            }
            (6, WireType::LengthDelimited) => {
                let raw = read_string(&mut reader, "field.type_name")?;
                type_name = Some(normalize_type_name(&raw).to_string());
            }
            (_, wt) => reader.skip_field(wt).map_err(wire_err("field"))?,
        }
    }

    let field_type =
        FieldType::from_number(type_number).ok_or_else(|| ParseError::UnknownFieldType {
            message: message_name.to_string(),
            field: name.clone(),
            type_number,
        })?;
    let mut field = FieldDescriptor::new(name, number, field_type);
    field.label = label;
    field.type_name = type_name;
    field.packed = field_type.is_packable();
    Ok(field)
}

/// EnumDescriptorProto tags: name=1, value=2.
/// EnumValueDescriptorProto tags: name=1, number=2.
fn parse_enum(bytes: &[u8], prefix: &str) -> Result<EnumDescriptor, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut values: Vec<(i64, String)> = Vec::new();

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("enum"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "enum.name")?,
            (2, WireType::LengthDelimited) => {
                let raw = reader
                    .read_length_delimited()
                    .map_err(wire_err("enum.value"))?;
                values.push(parse_enum_value(raw)?);
            }
            (_, wt) => reader.skip_field(wt).map_err(wire_err("enum"))?,
        }
    }

    Ok(EnumDescriptor::new(qualify(prefix, &name)).with_values(values))
}

fn parse_enum_value(bytes: &[u8]) -> Result<(i64, String), ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut number: i64 = 0;

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("enum_value"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "enum_value.name")?,
            (2, WireType::Varint) => {
                number = reader
                    .read_varint()
                    .map_err(wire_err("enum_value.number"))? as i64
            }
            (_, wt) => reader.skip_field(wt).map_err(wire_err("enum_value"))?,
        }
    }
    Ok((number, name))
}

/// ServiceDescriptorProto tags: name=1, method=2.
fn parse_service(bytes: &[u8], prefix: &str) -> Result<ServiceDescriptor, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut raw_methods: Vec<&[u8]> = Vec::new();

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("service"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "service.name")?,
            (2, WireType::LengthDelimited) => raw_methods.push(
                reader
                    .read_length_delimited()
                    .map_err(wire_err("service.method"))?,
            ),
            (_, wt) => reader.skip_field(wt).map_err(wire_err("service"))?,
        }
    }

    let mut service = ServiceDescriptor::new(qualify(prefix, &name));
    for raw in raw_methods {
        service.methods.push(parse_method(raw)?);
    }
    Ok(service)
}

/// MethodDescriptorProto tags: name=1, input_type=2, output_type=3,
/// client_streaming=5, server_streaming=6.
fn parse_method(bytes: &[u8]) -> Result<MethodDescriptor, ParseError> {
    let mut reader = WireReader::new(bytes);
    let mut name = String::new();
    let mut input_type = String::new();
    let mut output_type = String::new();
    let mut client_streaming = false;
    let mut server_streaming = false;

    while !reader.is_at_end() {
        let (field_number, wire_type) = reader.read_tag().map_err(wire_err("method"))?;
        match (field_number, wire_type) {
            (1, WireType::LengthDelimited) => name = read_string(&mut reader, "method.name")?,
            (2, WireType::LengthDelimited) => {
                let raw = read_string(&mut reader, "method.input_type")?;
                input_type = normalize_type_name(&raw).to_string();
            }
            (3, WireType::LengthDelimited) => {
                let raw = read_string(&mut reader, "method.output_type")?;
                output_type = normalize_type_name(&raw).to_string();
            }
            (5, WireType::Varint) => {
                client_streaming = reader
                    .read_varint()
                    .map_err(wire_err("method.client_streaming"))?
                    != 0
            }
            (6, WireType::Varint) => {
                server_streaming = reader
                    .read_varint()
                    .map_err(wire_err("method.server_streaming"))?
                    != 0
            }
            (_, wt) => reader.skip_field(wt).map_err(wire_err("method"))?,
        }
    }

    Ok(MethodDescriptor {
        name,
        input_type,
        output_type,
        client_streaming,
        server_streaming,
    })
}
