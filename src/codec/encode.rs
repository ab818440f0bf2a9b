//! Encoding of [`DecodedValue`] trees back into protobuf wire format,
//! plus zeroed template trees for seeding request editors.

use std::collections::HashSet;

use crate::codec::{CodecError, MAX_RECURSION_DEPTH};
use crate::descriptor::{FieldDescriptor, FieldType, MessageDescriptor};
use crate::registry::SchemaRegistry;
use crate::value::{DecodedValue, MapKey, MessageValue};
use crate::wire::{WireType, WireWriter};

/// Encode `value` as `type_name`. Field order is deterministic
/// (ascending field number); missing fields are omitted. Fails with
/// `SchemaMissing` when the type cannot be resolved and `TypeMismatch`
/// when a leaf does not fit its declared type.
pub fn encode(
    registry: &SchemaRegistry,
    type_name: &str,
    value: &DecodedValue,
) -> Result<Vec<u8>, CodecError> {
    let descriptor = registry
        .find_message(type_name)
        .ok_or_else(|| CodecError::SchemaMissing(type_name.to_string()))?;
    let message = value.as_message().ok_or_else(|| CodecError::TypeMismatch {
        field: descriptor.full_name.clone(),
        expected: "message",
        got: value_kind(value),
    })?;
    let mut writer = WireWriter::new();
    encode_message(registry, &descriptor, message, &mut writer)?;
    Ok(writer.into_bytes())
}

fn encode_message(
    registry: &SchemaRegistry,
    descriptor: &MessageDescriptor,
    message: &MessageValue,
    writer: &mut WireWriter,
) -> Result<(), CodecError> {
    let mut fields: Vec<&FieldDescriptor> = descriptor.fields.iter().collect();
    fields.sort_by_key(|f| f.number);

    for field in fields {
        let Some(value) = message.get(&field.name) else {
            continue;
        };
        encode_field(registry, field, value, writer)?;
    }
    Ok(())
}

fn encode_field(
    registry: &SchemaRegistry,
    field: &FieldDescriptor,
    value: &DecodedValue,
    writer: &mut WireWriter,
) -> Result<(), CodecError> {
    if field.is_map() {
        let DecodedValue::Map(entries) = value else {
            return Err(mismatch(field, "map", value));
        };
        return encode_map(registry, field, entries, writer);
    }

    if field.is_repeated() {
        // A bare value is accepted as a one-element sequence; the manual
        // request console produces these.
        let singleton;
        let items: &[DecodedValue] = match value {
            DecodedValue::Repeated(items) => items,
            other => {
                singleton = [other.clone()];
                &singleton
            }
        };
        if items.is_empty() {
            return Ok(());
        }
        if field.packed && field.field_type.is_packable() {
            let mut packed = WireWriter::new();
            for item in items {
                write_scalar(registry, field, item, &mut packed, false)?;
            }
            writer.write_bytes_field(field.number, &packed.into_bytes());
        } else {
            for item in items {
                write_scalar(registry, field, item, writer, true)?;
            }
        }
        return Ok(());
    }

    write_scalar(registry, field, value, writer, true)
}

/// Map entries encode as embedded messages with key=1, value=2.
fn encode_map(
    registry: &SchemaRegistry,
    field: &FieldDescriptor,
    entries: &[(MapKey, DecodedValue)],
    writer: &mut WireWriter,
) -> Result<(), CodecError> {
    let value_field = field
        .type_name
        .as_deref()
        .and_then(|name| registry.find_message(name))
        .and_then(|entry| entry.field_by_number(2).cloned());

    for (key, value) in entries {
        let mut entry = WireWriter::new();
        match key {
            MapKey::Bool(v) => entry.write_varint_field(1, u64::from(*v)),
            MapKey::Int(v) => entry.write_varint_field(1, *v as u64),
            MapKey::UInt(v) => entry.write_varint_field(1, *v),
            MapKey::String(v) => entry.write_string_field(1, v),
        }
        match &value_field {
            Some(vf) => write_scalar(registry, vf, value, &mut entry, true)?,
            None => {
                // No entry descriptor: scalar values can still be written
                // with a synthetic field numbered 2; message values cannot.
                let value_type = field.map_value_type.unwrap_or(FieldType::String);
                if value_type == FieldType::Message {
                    return Err(CodecError::SchemaMissing(
                        field.type_name.clone().unwrap_or_else(|| field.name.clone()),
                    ));
                }
                let synthetic = FieldDescriptor::new("value", 2, value_type);
                write_scalar(registry, &synthetic, value, &mut entry, true)?;
            }
        }
        writer.write_bytes_field(field.number, &entry.into_bytes());
    }
    Ok(())
}

/// Write one occurrence of a field. `tagged` is false inside packed
/// blobs, where elements are written back to back.
fn write_scalar(
    registry: &SchemaRegistry,
    field: &FieldDescriptor,
    value: &DecodedValue,
    writer: &mut WireWriter,
    tagged: bool,
) -> Result<(), CodecError> {
    let tag = |writer: &mut WireWriter, wire_type: WireType| {
        if tagged {
            writer.write_tag(field.number, wire_type);
        }
    };

    match field.field_type {
        FieldType::Bool => {
            let v = match value {
                DecodedValue::Bool(v) => *v,
                _ => return Err(mismatch(field, "bool", value)),
            };
            tag(writer, WireType::Varint);
            writer.write_varint(u64::from(v));
        }
        FieldType::Int32 | FieldType::Int64 => {
            let v = int_value(field, value)?;
            tag(writer, WireType::Varint);
            // Negative int32/int64 sign-extend to ten bytes on the wire.
            writer.write_varint(v as u64);
        }
        FieldType::Uint32 | FieldType::Uint64 => {
            let v = uint_value(field, value)?;
            tag(writer, WireType::Varint);
            writer.write_varint(v);
        }
        FieldType::Sint32 => {
            let v = int_value(field, value)?;
            tag(writer, WireType::Varint);
            writer.write_sint32(v as i32);
        }
        FieldType::Sint64 => {
            let v = int_value(field, value)?;
            tag(writer, WireType::Varint);
            writer.write_sint64(v);
        }
        FieldType::Fixed32 => {
            let v = uint_value(field, value)?;
            tag(writer, WireType::Fixed32);
            writer.write_fixed32(v as u32);
        }
        FieldType::Fixed64 => {
            let v = uint_value(field, value)?;
            tag(writer, WireType::Fixed64);
            writer.write_fixed64(v);
        }
        FieldType::Sfixed32 => {
            let v = int_value(field, value)?;
            tag(writer, WireType::Fixed32);
            writer.write_fixed32(v as i32 as u32);
        }
        FieldType::Sfixed64 => {
            let v = int_value(field, value)?;
            tag(writer, WireType::Fixed64);
            writer.write_fixed64(v as u64);
        }
        FieldType::Float => {
            let v = double_value(field, value)?;
            tag(writer, WireType::Fixed32);
            writer.write_float(v as f32);
        }
        FieldType::Double => {
            let v = double_value(field, value)?;
            tag(writer, WireType::Fixed64);
            writer.write_double(v);
        }
        FieldType::String => {
            let v = match value {
                DecodedValue::String(v) => v.as_str(),
                _ => return Err(mismatch(field, "string", value)),
            };
            tag(writer, WireType::LengthDelimited);
            writer.write_length_delimited(v.as_bytes());
        }
        FieldType::Bytes => {
            let owned;
            let v: &[u8] = match value {
                DecodedValue::Bytes(v) | DecodedValue::RawBytes(v) => v,
                // Strings are accepted for bytes fields as raw UTF-8.
                DecodedValue::String(v) => {
                    owned = v.as_bytes().to_vec();
                    &owned
                }
                _ => return Err(mismatch(field, "bytes", value)),
            };
            tag(writer, WireType::LengthDelimited);
            writer.write_length_delimited(v);
        }
        FieldType::Enum => {
            let number = enum_number(registry, field, value)?;
            tag(writer, WireType::Varint);
            writer.write_varint(number as u64);
        }
        FieldType::Message => {
            let nested_name = field
                .type_name
                .as_deref()
                .ok_or_else(|| CodecError::SchemaMissing(field.name.clone()))?;
            let nested = registry
                .find_message(nested_name)
                .ok_or_else(|| CodecError::SchemaMissing(nested_name.to_string()))?;
            let message = value.as_message().ok_or_else(|| mismatch(field, "message", value))?;
            let mut inner = WireWriter::new();
            encode_message(registry, &nested, message, &mut inner)?;
            tag(writer, WireType::LengthDelimited);
            writer.write_length_delimited(&inner.into_bytes());
        }
        FieldType::Group => {
            return Err(mismatch(field, "non-group", value));
        }
    }
    Ok(())
}

fn int_value(field: &FieldDescriptor, value: &DecodedValue) -> Result<i64, CodecError> {
    match value {
        DecodedValue::Int(v) => Ok(*v),
        DecodedValue::UInt(v) if *v <= i64::MAX as u64 => Ok(*v as i64),
        // Out-of-safe-range integers travel as decimal strings.
        DecodedValue::String(s) => s
            .parse::<i64>()
            .map_err(|_| mismatch(field, "integer", value)),
        _ => Err(mismatch(field, "integer", value)),
    }
}

fn uint_value(field: &FieldDescriptor, value: &DecodedValue) -> Result<u64, CodecError> {
    match value {
        DecodedValue::UInt(v) => Ok(*v),
        DecodedValue::Int(v) if *v >= 0 => Ok(*v as u64),
        DecodedValue::String(s) => s
            .parse::<u64>()
            .map_err(|_| mismatch(field, "unsigned integer", value)),
        _ => Err(mismatch(field, "unsigned integer", value)),
    }
}

fn double_value(field: &FieldDescriptor, value: &DecodedValue) -> Result<f64, CodecError> {
    match value {
        DecodedValue::Double(v) => Ok(*v),
        DecodedValue::Int(v) => Ok(*v as f64),
        DecodedValue::UInt(v) => Ok(*v as f64),
        _ => Err(mismatch(field, "number", value)),
    }
}

fn enum_number(
    registry: &SchemaRegistry,
    field: &FieldDescriptor,
    value: &DecodedValue,
) -> Result<i64, CodecError> {
    match value {
        DecodedValue::Enum { number, .. } => Ok(*number),
        DecodedValue::Int(v) => Ok(*v),
        DecodedValue::UInt(v) if *v <= i64::MAX as u64 => Ok(*v as i64),
        DecodedValue::String(name) => field
            .type_name
            .as_deref()
            .and_then(|n| registry.find_enum(n))
            .and_then(|e| e.number_of(name))
            .ok_or_else(|| mismatch(field, "enum name", value)),
        _ => Err(mismatch(field, "enum", value)),
    }
}

fn mismatch(field: &FieldDescriptor, expected: &'static str, value: &DecodedValue) -> CodecError {
    CodecError::TypeMismatch {
        field: field.name.clone(),
        expected,
        got: value_kind(value),
    }
}

fn value_kind(value: &DecodedValue) -> &'static str {
    match value {
        DecodedValue::Bool(_) => "bool",
        DecodedValue::Int(_) => "int",
        DecodedValue::UInt(_) => "uint",
        DecodedValue::Double(_) => "double",
        DecodedValue::String(_) => "string",
        DecodedValue::Bytes(_) => "bytes",
        DecodedValue::RawBytes(_) => "bytes",
        DecodedValue::Enum { .. } => "enum",
        DecodedValue::Repeated(_) => "repeated",
        DecodedValue::Map(_) => "map",
        DecodedValue::Message(_) => "message",
        DecodedValue::Error { .. } => "error",
    }
}

/// Build a zeroed value tree with every declared field present at its
/// default. Used to seed interactive request editing.
pub fn template(registry: &SchemaRegistry, type_name: &str) -> Result<DecodedValue, CodecError> {
    let mut visiting = HashSet::new();
    template_inner(registry, type_name, &mut visiting, 0)
}

fn template_inner(
    registry: &SchemaRegistry,
    type_name: &str,
    visiting: &mut HashSet<String>,
    depth: usize,
) -> Result<DecodedValue, CodecError> {
    let descriptor = registry
        .find_message(type_name)
        .ok_or_else(|| CodecError::SchemaMissing(type_name.to_string()))?;
    let mut message = MessageValue::new(Some(descriptor.full_name.clone()));

    // Recursive message types bottom out as empty nested templates.
    if depth > MAX_RECURSION_DEPTH || !visiting.insert(descriptor.full_name.clone()) {
        return Ok(DecodedValue::Message(message));
    }

    for field in &descriptor.fields {
        let value = if field.is_map() {
            DecodedValue::Map(Vec::new())
        } else if field.is_repeated() {
            DecodedValue::Repeated(Vec::new())
        } else {
            match field.field_type {
                FieldType::Bool => DecodedValue::Bool(false),
                FieldType::Int32
                | FieldType::Int64
                | FieldType::Sint32
                | FieldType::Sint64
                | FieldType::Sfixed32
                | FieldType::Sfixed64 => DecodedValue::Int(0),
                FieldType::Uint32
                | FieldType::Uint64
                | FieldType::Fixed32
                | FieldType::Fixed64 => DecodedValue::UInt(0),
                FieldType::Float | FieldType::Double => DecodedValue::Double(0.0),
                FieldType::String => DecodedValue::String(String::new()),
                FieldType::Bytes => DecodedValue::Bytes(Vec::new()),
                FieldType::Enum => {
                    let name = field
                        .type_name
                        .as_deref()
                        .and_then(|n| registry.find_enum(n))
                        .and_then(|e| e.name_of(0).map(str::to_string));
                    DecodedValue::Enum { number: 0, name }
                }
                FieldType::Message => match field.type_name.as_deref() {
                    Some(nested) => template_inner(registry, nested, visiting, depth + 1)?,
                    None => DecodedValue::message(None),
                },
                FieldType::Group => DecodedValue::message(None),
            }
        };
        message.fields.push((field.name.clone(), value));
    }

    visiting.remove(&descriptor.full_name);
    Ok(DecodedValue::Message(message))
}
