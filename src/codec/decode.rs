//! Schema-driven and blind decoding of protobuf payloads into
//! [`DecodedValue`] trees.

use crate::codec::{CodecOptions, MAX_RECURSION_DEPTH};
use crate::descriptor::{FieldDescriptor, FieldType, MessageDescriptor};
use crate::registry::SchemaRegistry;
use crate::value::{DecodedValue, MapKey, MessageValue};
use crate::wire::{WireError, WireReader, WireType};

/// Decode `bytes` as `type_name` against the registry. With no resolvable
/// descriptor the payload is blind-decoded. Never fails: errors become
/// in-tree leaves so partial results survive.
pub fn decode(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    type_name: Option<&str>,
    bytes: &[u8],
) -> DecodedValue {
    match type_name.and_then(|name| registry.find_message(name)) {
        Some(descriptor) => decode_message(registry, options, &descriptor, bytes, 0),
        None => decode_blind(options, bytes),
    }
}

/// Blind decode with synthesized `field_<n>` names.
pub fn decode_blind(options: &CodecOptions, bytes: &[u8]) -> DecodedValue {
    blind_message(options, bytes, 0).0
}

fn decode_message(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    descriptor: &MessageDescriptor,
    bytes: &[u8],
    depth: usize,
) -> DecodedValue {
    if depth > MAX_RECURSION_DEPTH {
        return DecodedValue::error("depth", "message nesting exceeds decode limit");
    }

    let mut message = MessageValue::new(Some(descriptor.full_name.clone()));
    let mut reader = WireReader::new(bytes);

    while !reader.is_at_end() {
        let (field_number, wire_type) = match reader.read_tag() {
            Ok(tag) => tag,
            // Field number 0 terminates decoding gracefully.
            Err(WireError::ZeroFieldNumber) => break,
            Err(err) => {
                message.set("_error", wire_error_leaf(&err));
                break;
            }
        };

        match descriptor.field_by_number(field_number) {
            Some(field) => {
                if let Err(stop) =
                    decode_known_field(registry, options, field, wire_type, &mut reader, &mut message, depth)
                {
                    message.set(&field.name, stop);
                    break;
                }
            }
            None => {
                let name = format!("field_{}", field_number);
                match consume_unknown(options, wire_type, &mut reader, depth) {
                    Ok(value) => message.push_repeated_or_set(&name, value),
                    Err(err) => {
                        message.set(&name, wire_error_leaf(&err));
                        break;
                    }
                }
            }
        }
    }

    DecodedValue::Message(message)
}

/// Decode one occurrence of a declared field. `Err` carries the error
/// leaf to attach before stopping the outer loop (position can no longer
/// advance safely).
fn decode_known_field(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    field: &FieldDescriptor,
    wire_type: WireType,
    reader: &mut WireReader<'_>,
    message: &mut MessageValue,
    depth: usize,
) -> Result<(), DecodedValue> {
    // Packed repeated scalars arrive as one length-delimited blob.
    if field.is_repeated()
        && field.field_type.is_packable()
        && wire_type == WireType::LengthDelimited
    {
        let blob = reader
            .read_length_delimited()
            .map_err(|e| wire_error_leaf(&e))?;
        let mut inner = WireReader::new(blob);
        while !inner.is_at_end() {
            match read_scalar(registry, options, field, &mut inner, depth) {
                Ok(value) => message.push_repeated(&field.name, value),
                Err(err) => {
                    message.push_repeated(&field.name, wire_error_leaf(&err));
                    break;
                }
            }
        }
        return Ok(());
    }

    let value = match field.field_type {
        FieldType::Message => {
            let raw = reader
                .read_length_delimited()
                .map_err(|e| wire_error_leaf(&e))?;
            if field.is_map() {
                let entry = decode_map_entry(registry, options, field, raw, depth);
                match entry {
                    Ok((key, value)) => {
                        message.push_map_entry(&field.name, key, value);
                        return Ok(());
                    }
                    Err(leaf) => leaf,
                }
            } else {
                decode_nested(registry, options, field, raw, depth)
            }
        }
        FieldType::Group => {
            // Groups cannot be skipped safely; stop here.
            return Err(DecodedValue::error(
                "unsupported_group",
                format!("field {} uses the deprecated group encoding", field.name),
            ));
        }
        _ => {
            if wire_type == expected_wire_type(field.field_type) {
                read_scalar(registry, options, field, reader, depth).map_err(|e| wire_error_leaf(&e))?
            } else {
                // Declared/wire mismatch: consume per the wire type so the
                // loop stays aligned, keep whatever we can infer.
                consume_unknown(options, wire_type, reader, depth).map_err(|e| wire_error_leaf(&e))?
            }
        }
    };

    if field.is_repeated() {
        message.push_repeated(&field.name, value);
    } else {
        message.set(&field.name, value);
    }
    Ok(())
}

fn decode_nested(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    field: &FieldDescriptor,
    raw: &[u8],
    depth: usize,
) -> DecodedValue {
    match field
        .type_name
        .as_deref()
        .and_then(|name| registry.find_message(name))
    {
        Some(nested) => decode_message(registry, options, &nested, raw, depth + 1),
        None => blind_message(options, raw, depth + 1).0,
    }
}

/// Map entries are embedded messages with key=1, value=2. The entry
/// message descriptor (referenced by the synthetic map field) supplies
/// the concrete key/value types and any value type_name.
fn decode_map_entry(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    field: &FieldDescriptor,
    raw: &[u8],
    depth: usize,
) -> Result<(MapKey, DecodedValue), DecodedValue> {
    let entry_descriptor = field
        .type_name
        .as_deref()
        .and_then(|name| registry.find_message(name));
    let key_type = field.map_key_type.unwrap_or(FieldType::String);
    let value_type = field.map_value_type.unwrap_or(FieldType::String);
    let value_field = entry_descriptor
        .as_ref()
        .and_then(|d| d.field_by_number(2).cloned());

    let mut key = MapKey::String(String::new());
    let mut value = DecodedValue::String(String::new());
    let mut reader = WireReader::new(raw);
    while !reader.is_at_end() {
        let (number, wire_type) = match reader.read_tag() {
            Ok(tag) => tag,
            Err(_) => break,
        };
        match number {
            1 => {
                let scalar = read_scalar_of_type(registry, options, key_type, None, &mut reader, depth)
                    .map_err(|e| wire_error_leaf(&e))?;
                key = match scalar {
                    DecodedValue::Bool(v) => MapKey::Bool(v),
                    DecodedValue::Int(v) => MapKey::Int(v),
                    DecodedValue::UInt(v) => MapKey::UInt(v),
                    DecodedValue::String(v) => MapKey::String(v),
                    other => {
                        return Err(DecodedValue::error(
                            "map_key",
                            format!("unsupported map key {:?}", other),
                        ))
                    }
                };
            }
            2 => {
                value = if value_type == FieldType::Message {
                    let raw_value = reader
                        .read_length_delimited()
                        .map_err(|e| wire_error_leaf(&e))?;
                    match value_field
                        .as_ref()
                        .and_then(|f| f.type_name.as_deref())
                        .and_then(|name| registry.find_message(name))
                    {
                        Some(nested) => {
                            decode_message(registry, options, &nested, raw_value, depth + 1)
                        }
                        None => blind_message(options, raw_value, depth + 1).0,
                    }
                } else {
                    let value_type_name = value_field.as_ref().and_then(|f| f.type_name.as_deref());
                    read_scalar_of_type(
                        registry,
                        options,
                        value_type,
                        value_type_name,
                        &mut reader,
                        depth,
                    )
                    .map_err(|e| wire_error_leaf(&e))?
                };
            }
            _ => reader.skip_field(wire_type).map_err(|e| wire_error_leaf(&e))?,
        }
    }
    Ok((key, value))
}

fn read_scalar(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    field: &FieldDescriptor,
    reader: &mut WireReader<'_>,
    depth: usize,
) -> Result<DecodedValue, WireError> {
    read_scalar_of_type(
        registry,
        options,
        field.field_type,
        field.type_name.as_deref(),
        reader,
        depth,
    )
}

fn read_scalar_of_type(
    registry: &SchemaRegistry,
    options: &CodecOptions,
    field_type: FieldType,
    type_name: Option<&str>,
    reader: &mut WireReader<'_>,
    _depth: usize,
) -> Result<DecodedValue, WireError> {
    Ok(match field_type {
        FieldType::Double => DecodedValue::Double(reader.read_double()?),
        FieldType::Float => DecodedValue::Double(f64::from(reader.read_float()?)),
        FieldType::Int64 => DecodedValue::Int(reader.read_varint()? as i64),
        FieldType::Uint64 => DecodedValue::UInt(reader.read_varint()?),
        FieldType::Int32 => DecodedValue::Int((reader.read_varint()? as i64 as i32).into()),
        FieldType::Fixed64 => DecodedValue::UInt(reader.read_fixed64()?),
        FieldType::Fixed32 => DecodedValue::UInt(u64::from(reader.read_fixed32()?)),
        FieldType::Bool => DecodedValue::Bool(reader.read_varint()? != 0),
        FieldType::String => {
            let raw = reader.read_length_delimited()?;
            match std::str::from_utf8(raw) {
                Ok(s) => DecodedValue::String(s.to_string()),
                Err(_) if options.strict_utf8 => {
                    DecodedValue::error("utf8", "string field holds invalid utf-8")
                }
                Err(_) => DecodedValue::Bytes(raw.to_vec()),
            }
        }
        FieldType::Bytes => DecodedValue::Bytes(reader.read_length_delimited()?.to_vec()),
        FieldType::Uint32 => DecodedValue::UInt(u64::from(reader.read_varint()? as u32)),
        FieldType::Enum => {
            let number = reader.read_varint()? as i64;
            let name = type_name
                .and_then(|n| registry.find_enum(n))
                .and_then(|e| e.name_of(number).map(str::to_string));
            DecodedValue::Enum { number, name }
        }
        FieldType::Sfixed32 => DecodedValue::Int(i64::from(reader.read_fixed32()? as i32)),
        FieldType::Sfixed64 => DecodedValue::Int(reader.read_fixed64()? as i64),
        FieldType::Sint32 => DecodedValue::Int(i64::from(reader.read_sint32()?)),
        FieldType::Sint64 => DecodedValue::Int(reader.read_sint64()?),
        // Handled by the callers; kept total for completeness.
        FieldType::Message | FieldType::Group => {
            let raw = reader.read_length_delimited()?;
            DecodedValue::Bytes(raw.to_vec())
        }
    })
}

fn expected_wire_type(field_type: FieldType) -> WireType {
    match field_type {
        FieldType::Double | FieldType::Fixed64 | FieldType::Sfixed64 => WireType::Fixed64,
        FieldType::Float | FieldType::Fixed32 | FieldType::Sfixed32 => WireType::Fixed32,
        FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group => {
            WireType::LengthDelimited
        }
        _ => WireType::Varint,
    }
}

/// Consume a field we have no declaration for, inferring a value from
/// the wire type alone.
fn consume_unknown(
    options: &CodecOptions,
    wire_type: WireType,
    reader: &mut WireReader<'_>,
    depth: usize,
) -> Result<DecodedValue, WireError> {
    Ok(match wire_type {
        WireType::Varint => DecodedValue::UInt(reader.read_varint()?),
        WireType::Fixed64 => DecodedValue::UInt(reader.read_fixed64()?),
        WireType::Fixed32 => DecodedValue::UInt(u64::from(reader.read_fixed32()?)),
        WireType::LengthDelimited => {
            let raw = reader.read_length_delimited()?;
            blind_leaf(options, raw, depth + 1)
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err(WireError::UnsupportedGroup(wire_type.as_raw()))
        }
    })
}

/// Best-effort message reconstruction with no descriptor. Returns the
/// tree, the bytes consumed before any failure, and the field count.
fn blind_message(options: &CodecOptions, bytes: &[u8], depth: usize) -> (DecodedValue, usize, usize) {
    if depth > MAX_RECURSION_DEPTH {
        return (
            DecodedValue::error("depth", "message nesting exceeds decode limit"),
            0,
            0,
        );
    }

    let mut message = MessageValue::new(None);
    let mut field_count = 0usize;
    let mut reader = WireReader::new(bytes);
    let mut consumed = 0usize;

    while !reader.is_at_end() {
        let (field_number, wire_type) = match reader.read_tag() {
            Ok(tag) => tag,
            Err(_) => break,
        };
        // Protobuf field numbers stop at 2^29 − 1; anything larger means
        // we are not looking at a message.
        if field_number > 0x1FFF_FFFF {
            break;
        }
        let name = format!("field_{}", field_number);
        match consume_unknown(options, wire_type, &mut reader, depth) {
            Ok(value) => {
                message.push_repeated_or_set(&name, value);
                field_count += 1;
                consumed = reader.position();
            }
            Err(_) => break,
        }
    }

    (DecodedValue::Message(message), consumed, field_count)
}

/// Interpret a blind length-delimited payload: nested message if the
/// recursion consumes enough of it, else UTF-8 string, else raw bytes.
fn blind_leaf(options: &CodecOptions, raw: &[u8], depth: usize) -> DecodedValue {
    if raw.is_empty() {
        return DecodedValue::String(String::new());
    }
    let (candidate, consumed, field_count) = blind_message(options, raw, depth);
    let enough = consumed as f64 >= options.blind_decode_threshold * raw.len() as f64;
    if field_count >= 1 && enough {
        return candidate;
    }
    match std::str::from_utf8(raw) {
        Ok(s) => DecodedValue::String(s.to_string()),
        Err(_) => DecodedValue::RawBytes(raw.to_vec()),
    }
}

fn wire_error_leaf(err: &WireError) -> DecodedValue {
    let kind = match err {
        WireError::Truncated(_) => "truncated",
        WireError::VarintOverflow(_) => "varint_overflow",
        WireError::UnsupportedGroup(_) => "unsupported_group",
        WireError::InvalidWireType(_) => "invalid_wire_type",
        WireError::ZeroFieldNumber => "zero_field_number",
    };
    DecodedValue::error(kind, err.to_string())
}

impl MessageValue {
    /// Unknown fields repeat freely on the wire; collapse repeats into a
    /// sequence, single occurrences stay scalar.
    fn push_repeated_or_set(&mut self, name: &str, value: DecodedValue) {
        if self.get(name).is_some() {
            self.push_repeated(name, value);
        } else {
            self.set(name, value);
        }
    }
}
