//! Built-in descriptors for the `google/protobuf/*.proto` well-known
//! types. Reflection servers routinely omit these files from their
//! responses, so the registry injects them whenever a registered file
//! imports one that is not already present.

use crate::descriptor::{
    EnumDescriptor, FieldDescriptor, FieldType, FileDescriptor, MessageDescriptor,
};

/// File names the registry knows how to inject.
pub const WELL_KNOWN_FILES: &[&str] = &[
    "google/protobuf/descriptor.proto",
    "google/protobuf/empty.proto",
    "google/protobuf/timestamp.proto",
    "google/protobuf/duration.proto",
    "google/protobuf/any.proto",
    "google/protobuf/struct.proto",
    "google/protobuf/wrappers.proto",
    "google/protobuf/field_mask.proto",
];

/// Build the descriptor for one well-known file, if it is one.
pub fn well_known_file(file_name: &str) -> Option<FileDescriptor> {
    match file_name {
        "google/protobuf/descriptor.proto" => Some(descriptor_proto()),
        "google/protobuf/empty.proto" => Some(empty_proto()),
        "google/protobuf/timestamp.proto" => Some(timestamp_proto()),
        "google/protobuf/duration.proto" => Some(duration_proto()),
        "google/protobuf/any.proto" => Some(any_proto()),
        "google/protobuf/struct.proto" => Some(struct_proto()),
        "google/protobuf/wrappers.proto" => Some(wrappers_proto()),
        "google/protobuf/field_mask.proto" => Some(field_mask_proto()),
        _ => None,
    }
}

fn message_field(name: &str, number: u32, type_name: &str) -> FieldDescriptor {
    FieldDescriptor::new(name, number, FieldType::Message).with_type_name(type_name)
}

fn file(name: &str) -> FileDescriptor {
    FileDescriptor::new(name, "google.protobuf")
}

fn timestamp_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/timestamp.proto");
    f.messages.push(
        MessageDescriptor::new("google.protobuf.Timestamp").with_fields(vec![
            FieldDescriptor::new("seconds", 1, FieldType::Int64),
            FieldDescriptor::new("nanos", 2, FieldType::Int32),
        ]),
    );
    f
}

fn duration_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/duration.proto");
    f.messages.push(
        MessageDescriptor::new("google.protobuf.Duration").with_fields(vec![
            FieldDescriptor::new("seconds", 1, FieldType::Int64),
            FieldDescriptor::new("nanos", 2, FieldType::Int32),
        ]),
    );
    f
}

fn empty_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/empty.proto");
    f.messages
        .push(MessageDescriptor::new("google.protobuf.Empty"));
    f
}

fn any_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/any.proto");
    f.messages.push(
        MessageDescriptor::new("google.protobuf.Any").with_fields(vec![
            FieldDescriptor::new("type_url", 1, FieldType::String),
            FieldDescriptor::new("value", 2, FieldType::Bytes),
        ]),
    );
    f
}

fn field_mask_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/field_mask.proto");
    f.messages.push(
        MessageDescriptor::new("google.protobuf.FieldMask").with_fields(vec![
            FieldDescriptor::new("paths", 1, FieldType::String).repeated(),
        ]),
    );
    f
}

fn wrappers_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/wrappers.proto");
    let wrappers: &[(&str, FieldType)] = &[
        ("google.protobuf.DoubleValue", FieldType::Double),
        ("google.protobuf.FloatValue", FieldType::Float),
        ("google.protobuf.Int64Value", FieldType::Int64),
        ("google.protobuf.UInt64Value", FieldType::Uint64),
        ("google.protobuf.Int32Value", FieldType::Int32),
        ("google.protobuf.UInt32Value", FieldType::Uint32),
        ("google.protobuf.BoolValue", FieldType::Bool),
        ("google.protobuf.StringValue", FieldType::String),
        ("google.protobuf.BytesValue", FieldType::Bytes),
    ];
    for (name, value_type) in wrappers {
        f.messages.push(
            MessageDescriptor::new(*name)
                .with_fields(vec![FieldDescriptor::new("value", 1, *value_type)]),
        );
    }
    f
}

fn struct_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/struct.proto");

    let mut fields_entry = MessageDescriptor::new("google.protobuf.Struct.FieldsEntry");
    fields_entry.fields = vec![
        FieldDescriptor::new("key", 1, FieldType::String),
        message_field("value", 2, "google.protobuf.Value"),
    ];
    let mut strukt = MessageDescriptor::new("google.protobuf.Struct").with_fields(vec![
        message_field("fields", 1, "google.protobuf.Struct.FieldsEntry")
            .repeated()
            .with_map_types(FieldType::String, FieldType::Message),
    ]);
    strukt.nested_messages.push(fields_entry);
    f.messages.push(strukt);

    f.messages.push(
        MessageDescriptor::new("google.protobuf.Value").with_fields(vec![
            FieldDescriptor::new("null_value", 1, FieldType::Enum)
                .with_type_name("google.protobuf.NullValue"),
            FieldDescriptor::new("number_value", 2, FieldType::Double),
            FieldDescriptor::new("string_value", 3, FieldType::String),
            FieldDescriptor::new("bool_value", 4, FieldType::Bool),
            message_field("struct_value", 5, "google.protobuf.Struct"),
            message_field("list_value", 6, "google.protobuf.ListValue"),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.ListValue").with_fields(vec![
            message_field("values", 1, "google.protobuf.Value").repeated(),
        ]),
    );
    f.enums.push(
        EnumDescriptor::new("google.protobuf.NullValue")
            .with_values([(0, "NULL_VALUE".to_string())]),
    );
    f
}

/// The subset of descriptor.proto that reflection payloads reference:
/// enough for name resolution, not the full options surface.
fn descriptor_proto() -> FileDescriptor {
    let mut f = file("google/protobuf/descriptor.proto");

    f.messages.push(
        MessageDescriptor::new("google.protobuf.FileDescriptorSet").with_fields(vec![
            message_field("file", 1, "google.protobuf.FileDescriptorProto").repeated(),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.FileDescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            FieldDescriptor::new("package", 2, FieldType::String),
            FieldDescriptor::new("dependency", 3, FieldType::String).repeated(),
            message_field("message_type", 4, "google.protobuf.DescriptorProto").repeated(),
            message_field("enum_type", 5, "google.protobuf.EnumDescriptorProto").repeated(),
            message_field("service", 6, "google.protobuf.ServiceDescriptorProto").repeated(),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.DescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            message_field("field", 2, "google.protobuf.FieldDescriptorProto").repeated(),
            message_field("nested_type", 3, "google.protobuf.DescriptorProto").repeated(),
            message_field("enum_type", 4, "google.protobuf.EnumDescriptorProto").repeated(),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.FieldDescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            FieldDescriptor::new("number", 3, FieldType::Int32),
            FieldDescriptor::new("label", 4, FieldType::Enum)
                .with_type_name("google.protobuf.FieldDescriptorProto.Label"),
            FieldDescriptor::new("type", 5, FieldType::Enum)
                .with_type_name("google.protobuf.FieldDescriptorProto.Type"),
            FieldDescriptor::new("type_name", 6, FieldType::String),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.EnumDescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            message_field("value", 2, "google.protobuf.EnumValueDescriptorProto").repeated(),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.EnumValueDescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            FieldDescriptor::new("number", 2, FieldType::Int32),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.ServiceDescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            message_field("method", 2, "google.protobuf.MethodDescriptorProto").repeated(),
        ]),
    );
    f.messages.push(
        MessageDescriptor::new("google.protobuf.MethodDescriptorProto").with_fields(vec![
            FieldDescriptor::new("name", 1, FieldType::String),
            FieldDescriptor::new("input_type", 2, FieldType::String),
            FieldDescriptor::new("output_type", 3, FieldType::String),
            FieldDescriptor::new("client_streaming", 5, FieldType::Bool),
            FieldDescriptor::new("server_streaming", 6, FieldType::Bool),
        ]),
    );
    f
}
