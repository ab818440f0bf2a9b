
use protolens::descriptor::parse::parse_file_descriptor;
use protolens::descriptor::{FieldLabel, FieldType};
use protolens::wire::WireWriter;
use test_helpers::{
    enum_bytes, field_bytes, file_bytes, message_bytes, method_bytes, service_bytes, FieldSpec,
    FileSpec,
};

#[test]
fn test_parse_simple_file() {
    let file = parse_file_descriptor(&test_helpers::simple_file_bytes()).unwrap();
    assert_eq!(file.file_name, "test/simple.proto");
    assert_eq!(file.package, "test");
    assert_eq!(file.messages.len(), 1);

    let simple = &file.messages[0];
    assert_eq!(simple.full_name, "test.Simple");
    assert_eq!(simple.simple_name, "Simple");
    assert_eq!(simple.fields.len(), 2);
    assert_eq!(simple.fields[0].name, "id");
    assert_eq!(simple.fields[0].number, 1);
    assert_eq!(simple.fields[0].field_type, FieldType::Int32);
    assert_eq!(simple.fields[1].name, "name");
    assert_eq!(simple.fields[1].field_type, FieldType::String);

    assert_eq!(file.services.len(), 1);
    let service = &file.services[0];
    assert_eq!(service.full_name, "test.Widgets");
    assert_eq!(service.methods.len(), 1);
    let method = &service.methods[0];
    assert_eq!(method.name, "Get");
    // The fully-qualified leading dot is stripped.
    assert_eq!(method.input_type, "test.Simple");
    assert_eq!(method.output_type, "test.Simple");
    assert!(!method.server_streaming);
}

#[test]
fn test_parse_dependencies() {
    let bytes = file_bytes(&FileSpec {
        name: "a.proto",
        package: "a",
        dependencies: &["google/protobuf/timestamp.proto", "b.proto"],
        messages: &[],
        enums: &[],
        services: &[],
    });
    let file = parse_file_descriptor(&bytes).unwrap();
    assert_eq!(
        file.dependencies,
        vec!["google/protobuf/timestamp.proto", "b.proto"]
    );
}

#[test]
fn test_parse_nested_message_full_names() {
    let inner = message_bytes("Inner", &[FieldSpec::scalar("x", 1, 5)]);
    let mut outer = WireWriter::new();
    outer.write_string_field(1, "Outer");
    outer.write_bytes_field(
        2,
        &field_bytes(
            &FieldSpec::scalar("inner", 1, 11).with_type_name(".pkg.Outer.Inner"),
        ),
    );
    outer.write_bytes_field(3, &inner);

    let bytes = file_bytes(&FileSpec {
        name: "nested.proto",
        package: "pkg",
        dependencies: &[],
        messages: &[outer.into_bytes()],
        enums: &[],
        services: &[],
    });
    let file = parse_file_descriptor(&bytes).unwrap();
    let outer = &file.messages[0];
    assert_eq!(outer.full_name, "pkg.Outer");
    assert_eq!(outer.nested_messages[0].full_name, "pkg.Outer.Inner");
    assert_eq!(
        outer.fields[0].type_name.as_deref(),
        Some("pkg.Outer.Inner")
    );
}

#[test]
fn test_parse_enum_values() {
    let bytes = file_bytes(&FileSpec {
        name: "enums.proto",
        package: "pkg",
        dependencies: &[],
        messages: &[],
        enums: &[enum_bytes("Color", &[("COLOR_UNSPECIFIED", 0), ("RED", 1), ("BLUE", 4)])],
        services: &[],
    });
    let file = parse_file_descriptor(&bytes).unwrap();
    let color = &file.enums[0];
    assert_eq!(color.full_name, "pkg.Color");
    assert_eq!(color.name_of(0), Some("COLOR_UNSPECIFIED"));
    assert_eq!(color.name_of(4), Some("BLUE"));
    assert_eq!(color.name_of(2), None);
    assert_eq!(color.number_of("RED"), Some(1));
}

#[test]
fn test_parse_repeated_label() {
    let message = message_bytes("List", &[FieldSpec::scalar("items", 1, 5).repeated()]);
    let bytes = file_bytes(&FileSpec {
        name: "list.proto",
        package: "pkg",
        dependencies: &[],
        messages: &[message],
        enums: &[],
        services: &[],
    });
    let file = parse_file_descriptor(&bytes).unwrap();
    assert_eq!(file.messages[0].fields[0].label, FieldLabel::Repeated);
    assert!(file.messages[0].fields[0].packed);
}

#[test]
fn test_parse_streaming_method() {
    let service = service_bytes(
        "Feed",
        &[method_bytes("Watch", ".pkg.Req", ".pkg.Event", true)],
    );
    let bytes = file_bytes(&FileSpec {
        name: "feed.proto",
        package: "pkg",
        dependencies: &[],
        messages: &[],
        enums: &[],
        services: &[service],
    });
    let file = parse_file_descriptor(&bytes).unwrap();
    assert!(file.services[0].methods[0].server_streaming);
    assert!(!file.services[0].methods[0].client_streaming);
}

#[test]
fn test_unknown_tags_are_skipped() {
    // A FileDescriptorProto with extra fields the parser does not model:
    // syntax=12 (string), options=8 (message), plus a varint field 99.
    let mut w = WireWriter::new();
    w.write_string_field(1, "extra.proto");
    w.write_string_field(12, "proto3");
    w.write_bytes_field(8, &[0x08, 0x01]);
    w.write_varint_field(99, 7);
    w.write_string_field(2, "pkg");

    let file = parse_file_descriptor(&w.into_bytes()).unwrap();
    assert_eq!(file.file_name, "extra.proto");
    assert_eq!(file.package, "pkg");
}

#[test]
fn test_truncated_descriptor_is_an_error() {
    let mut bytes = test_helpers::simple_file_bytes();
    bytes.truncate(bytes.len() - 3);
    assert!(parse_file_descriptor(&bytes).is_err());
}

#[test]
fn test_empty_descriptor_parses_to_empty_file() {
    let file = parse_file_descriptor(&[]).unwrap();
    assert!(file.file_name.is_empty());
    assert!(file.messages.is_empty());
}

#[test]
fn test_parse_file_descriptor_set() {
    let other = file_bytes(&FileSpec {
        name: "other.proto",
        package: "other",
        dependencies: &[],
        messages: &[message_bytes("O", &[FieldSpec::scalar("x", 1, 5)])],
        enums: &[],
        services: &[],
    });
    let set = test_helpers::file_descriptor_set_bytes(&[
        test_helpers::simple_file_bytes(),
        other,
    ]);
    let files = protolens::descriptor::parse::parse_file_descriptor_set(&set).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].file_name, "test/simple.proto");
    assert_eq!(files[1].file_name, "other.proto");
}
