
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use protolens::codec::CodecOptions;
use protolens::engine::{Inspector, InspectorSink, NullSink};
use protolens::framing::{write_frame, FramingOptions, RawBody, FLAG_TRAILERS};
use protolens::processor::{CaptureRecord, EnrichedRecord, RecordProcessor};
use protolens::reflection::ReflectionState;
use protolens::registry::SchemaRegistry;
use protolens::settings::AppConfig;
use protolens::value::DecodedValue;
use test_helpers::{
    file_bytes, headers, message_bytes, method_bytes, service_bytes, simple_registry, FieldSpec,
    FileSpec, MockReflectionServer,
};

fn processor() -> RecordProcessor {
    RecordProcessor::new(CodecOptions::default(), FramingOptions::default())
}

fn grpc_headers() -> HashMap<String, String> {
    headers(&[("content-type", "application/grpc-web+proto")])
}

/// A captured unary exchange against test.Widgets/Get.
fn simple_record(id: &str) -> CaptureRecord {
    // request: test.Simple { id: 7 }; response: { id: 42, name: "test" }
    let request = write_frame(&[0x08, 0x07], 0);
    let mut response = write_frame(&[0x08, 0x2A, 0x12, 0x04, b't', b'e', b's', b't'], 0);
    response.extend_from_slice(&write_frame(b"grpc-status: 0\r\n", FLAG_TRAILERS));
    CaptureRecord {
        id: id.to_string(),
        url: "https://api.example.test/test.Widgets/Get".to_string(),
        start_time_ms: 1_700_000_000_000,
        duration_ms: 12,
        http_status: 200,
        request_headers: grpc_headers(),
        response_headers: grpc_headers(),
        request_raw: RawBody::Bytes(request),
        request_base64_encoded: false,
        response_raw: RawBody::Bytes(response),
        response_base64_encoded: false,
    }
}

fn field_of<'a>(value: &'a DecodedValue, name: &str) -> &'a DecodedValue {
    value.as_message().unwrap().get(name).unwrap()
}

#[test]
fn test_process_resolved_unary_record() {
    let registry = simple_registry();
    let record = simple_record("r1");
    let enriched = processor().process(&registry, &record);

    assert_eq!(enriched.method_path.as_deref(), Some("/test.Widgets/Get"));
    assert_eq!(enriched.grpc_status, Some(0));

    let request = enriched.request_decoded.as_ref().unwrap();
    assert_eq!(field_of(request, "id"), &DecodedValue::Int(7));
    let response = enriched.response_decoded.as_ref().unwrap();
    assert_eq!(field_of(response, "id"), &DecodedValue::Int(42));
    assert_eq!(
        field_of(response, "name"),
        &DecodedValue::String("test".to_string())
    );
    assert!(enriched.error.is_none());
}

#[test]
fn test_url_without_method_path_sets_error() {
    let registry = simple_registry();
    let mut record = simple_record("r0");
    record.url = "https://api.example.test/healthz".to_string();
    let enriched = processor().process(&registry, &record);

    assert!(enriched.method_path.is_none());
    let error = enriched.error.as_deref().unwrap();
    assert!(error.contains("healthz"), "unexpected error: {}", error);
    // The body is still blind-decoded.
    assert!(enriched.request_decoded.is_some());
}

#[test]
fn test_raw_fields_preserved_byte_identical() {
    let registry = simple_registry();
    let record = simple_record("r2");
    let enriched = processor().process(&registry, &record);

    assert_eq!(enriched.request_raw, record.request_raw);
    assert_eq!(enriched.response_raw, record.response_raw);
    assert_eq!(enriched.id, record.id);
    assert_eq!(enriched.url, record.url);
}

#[test]
fn test_unresolved_method_blind_decodes() {
    let registry = SchemaRegistry::new();
    let record = simple_record("r3");
    let enriched = processor().process(&registry, &record);

    let request = enriched.request_decoded.as_ref().unwrap();
    assert_eq!(field_of(request, "field_1"), &DecodedValue::UInt(7));
    assert!(request.as_message().unwrap().type_name.is_none());
}

#[test]
fn test_server_streaming_yields_sequence() {
    let registry = simple_registry();
    let mut record = simple_record("r4");
    let mut body = write_frame(&[0x08, 0x01], 0);
    body.extend_from_slice(&write_frame(&[0x08, 0x02], 0));
    body.extend_from_slice(&write_frame(&[0x08, 0x03], 0));
    record.response_raw = RawBody::Bytes(body);

    let enriched = processor().process(&registry, &record);
    let response = enriched.response_decoded.as_ref().unwrap();
    let DecodedValue::Repeated(items) = response else {
        panic!("expected sequence, got {:?}", response);
    };
    assert_eq!(items.len(), 3);
    assert_eq!(field_of(&items[0], "id"), &DecodedValue::Int(1));
    assert_eq!(field_of(&items[2], "id"), &DecodedValue::Int(3));
}

#[test]
fn test_grpc_error_metadata_extracted_and_percent_decoded() {
    let registry = simple_registry();
    let mut record = simple_record("r5");
    let mut body = write_frame(&[], 0);
    body.extend_from_slice(&write_frame(
        b"grpc-status: 5\r\ngrpc-message: not%20found\r\n",
        FLAG_TRAILERS,
    ));
    record.response_raw = RawBody::Bytes(body);

    let enriched = processor().process(&registry, &record);
    assert_eq!(enriched.grpc_status, Some(5));
    assert_eq!(enriched.grpc_message.as_deref(), Some("not found"));
}

#[test]
fn test_trailers_only_response_reads_headers() {
    let registry = simple_registry();
    let mut record = simple_record("r6");
    record.response_raw = RawBody::Bytes(Vec::new());
    record
        .response_headers
        .insert("grpc-status".to_string(), "14".to_string());
    record
        .response_headers
        .insert("grpc-message".to_string(), "unavailable".to_string());

    let enriched = processor().process(&registry, &record);
    assert_eq!(enriched.grpc_status, Some(14));
    assert_eq!(enriched.grpc_message.as_deref(), Some("unavailable"));
    assert!(enriched.response_decoded.is_none());
}

#[test]
fn test_base64_text_bodies_decode() {
    let registry = simple_registry();
    let mut record = simple_record("r7");
    let framed = write_frame(&[0x08, 0x07], 0);
    record.request_raw = RawBody::Text(BASE64.encode(&framed));
    record.request_base64_encoded = true;

    let enriched = processor().process(&registry, &record);
    let request = enriched.request_decoded.as_ref().unwrap();
    assert_eq!(field_of(request, "id"), &DecodedValue::Int(7));
}

#[test]
fn test_reprocessing_is_idempotent() {
    let registry = simple_registry();
    let record = simple_record("r8");
    let p = processor();
    let first = p.process(&registry, &record);
    let second = p.process(&registry, &record);
    assert_eq!(first.request_decoded, second.request_decoded);
    assert_eq!(first.response_decoded, second.response_decoded);
    assert_eq!(first.grpc_status, second.grpc_status);
}

// ---------------------------------------------------------------------------
// Engine-level tests
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<EnrichedRecord>>,
    schema_updates: Mutex<Vec<String>>,
    statuses: Mutex<Vec<(String, ReflectionState)>>,
}

impl InspectorSink for RecordingSink {
    fn on_record(&self, record: &EnrichedRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
    fn on_schema_updated(&self, origin: &str, _registry: &Arc<SchemaRegistry>) {
        self.schema_updates.lock().unwrap().push(origin.to_string());
    }
    fn on_reflection_status(&self, origin: &str, state: &ReflectionState) {
        self.statuses
            .lock()
            .unwrap()
            .push((origin.to_string(), state.clone()));
    }
}

#[tokio::test]
async fn test_engine_fetches_schema_via_reflection() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server.clone(), sink.clone());

    let enriched = inspector.process(simple_record("e1")).await;

    // The schema arrived before decoding, so the record is typed.
    let request = enriched.request_decoded.as_ref().unwrap();
    assert_eq!(
        request.as_message().unwrap().type_name.as_deref(),
        Some("test.Simple")
    );
    assert_eq!(server.list_services_count(), 1);
    assert_eq!(
        *sink.schema_updates.lock().unwrap(),
        ["https://api.example.test"]
    );
}

#[tokio::test]
async fn test_engine_reflection_coalesces_across_records() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server.clone(), sink);

    inspector.process(simple_record("e2a")).await;
    inspector.process(simple_record("e2b")).await;
    assert_eq!(server.list_services_count(), 1);
}

#[tokio::test]
async fn test_engine_short_circuits_when_schema_registered_locally() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server.clone(), sink);

    inspector
        .register_descriptor_bytes(&[test_helpers::simple_file_bytes()])
        .unwrap();
    inspector.process(simple_record("e3")).await;

    // Locally-registered schemas take precedence: no reflection traffic.
    assert!(server.seen().is_empty());
}

#[tokio::test]
async fn test_engine_reflection_disabled() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let mut cfg = AppConfig::default();
    cfg.reflection.enabled = false;
    let inspector = Inspector::new(cfg, server.clone(), sink);

    let enriched = inspector.process(simple_record("e4")).await;
    assert!(server.seen().is_empty());
    // Blind decode without schemas.
    let request = enriched.request_decoded.as_ref().unwrap();
    assert!(request.as_message().unwrap().type_name.is_none());
}

#[tokio::test]
async fn test_engine_re_emits_prior_records_after_schemas_land() {
    let sink = Arc::new(RecordingSink::default());
    // First origin has no reflection; second serves the schema.
    let server = Arc::new(MockReflectionServer::simple());
    let mut cfg = AppConfig::default();
    cfg.reflection.enabled = false;
    let inspector = Inspector::new(cfg, server.clone(), sink.clone());

    // Record processed while the schema is unknown: blind decode.
    let first = inspector.process(simple_record("pre")).await;
    assert!(first
        .request_decoded
        .as_ref()
        .unwrap()
        .as_message()
        .unwrap()
        .type_name
        .is_none());

    // Schemas arrive via explicit registration; later records decode typed.
    inspector
        .register_descriptor_bytes(&[test_helpers::simple_file_bytes()])
        .unwrap();
    let re_decoded = inspector.process(simple_record("post")).await;
    assert_eq!(
        re_decoded
            .request_decoded
            .as_ref()
            .unwrap()
            .as_message()
            .unwrap()
            .type_name
            .as_deref(),
        Some("test.Simple")
    );
}

#[tokio::test]
async fn test_engine_re_emission_via_reflection() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, sink.clone());

    inspector.process(simple_record("x1")).await;
    inspector.process(simple_record("x2")).await;

    let emitted = sink.records.lock().unwrap();
    // x1 triggered reflection before decoding, so both records emit once
    // each and x1 is never stuck blind.
    assert_eq!(emitted.len(), 2);
    assert!(emitted.iter().all(|r| {
        r.request_decoded
            .as_ref()
            .unwrap()
            .as_message()
            .unwrap()
            .type_name
            .as_deref()
            == Some("test.Simple")
    }));

    let statuses = sink.statuses.lock().unwrap();
    assert_eq!(
        *statuses,
        [
            (
                "https://api.example.test".to_string(),
                ReflectionState::InFlight
            ),
            (
                "https://api.example.test".to_string(),
                ReflectionState::Ready
            ),
        ]
    );
}

#[tokio::test]
async fn test_engine_re_emits_blind_prior_record_once_schema_lands() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, sink.clone());

    // Captured without an absolute URL: no origin, so no reflection, and
    // the record decodes blind but is retained.
    let mut early = simple_record("early");
    early.url = "/test.Widgets/Get".to_string();
    let first = inspector.process(early).await;
    assert!(first
        .request_decoded
        .as_ref()
        .unwrap()
        .as_message()
        .unwrap()
        .type_name
        .is_none());

    // A later record with a proper origin brings the schema in; the
    // early record is re-decoded and re-emitted under the same id.
    inspector.process(simple_record("late")).await;

    let emitted = sink.records.lock().unwrap();
    let early_emissions: Vec<&EnrichedRecord> =
        emitted.iter().filter(|r| r.id == "early").collect();
    assert_eq!(early_emissions.len(), 2);
    assert_eq!(
        early_emissions[1]
            .request_decoded
            .as_ref()
            .unwrap()
            .as_message()
            .unwrap()
            .type_name
            .as_deref(),
        Some("test.Simple")
    );
}

#[tokio::test]
async fn test_unrelated_origin_reflection_does_not_re_emit() {
    let sink = Arc::new(RecordingSink::default());
    // The mock serves a service unrelated to test.Widgets.
    let other_file = file_bytes(&FileSpec {
        name: "other.proto",
        package: "other",
        dependencies: &[],
        messages: &[message_bytes("Params", &[FieldSpec::scalar("id", 1, 5)])],
        enums: &[],
        services: &[service_bytes(
            "Svc",
            &[method_bytes("Do", ".other.Params", ".other.Params", false)],
        )],
    });
    let mut files = HashMap::new();
    files.insert("other.Svc".to_string(), vec![other_file]);
    let server = Arc::new(MockReflectionServer::new(
        vec!["other.Svc".to_string()],
        files,
    ));
    let inspector = Inspector::new(AppConfig::default(), server, sink.clone());

    // recordA resolves through locally-registered schemas: emitted once,
    // no reflection.
    inspector
        .register_descriptor_bytes(&[test_helpers::simple_file_bytes()])
        .unwrap();
    inspector.process(simple_record("a")).await;

    // recordB's origin serves only other.Svc; installing it must not
    // re-emit recordA, whose schema did not change.
    let mut record_b = simple_record("b");
    record_b.url = "https://beta.example.test/other.Svc/Do".to_string();
    inspector.process(record_b).await;

    let emitted = sink.records.lock().unwrap();
    let ids: Vec<&str> = emitted.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
}

#[tokio::test]
async fn test_engine_failed_reflection_still_emits_blind_record() {
    let sink = Arc::new(RecordingSink::default());
    let mut server = MockReflectionServer::simple();
    server.transport_failure = true;
    let inspector = Inspector::new(AppConfig::default(), Arc::new(server), sink.clone());

    let enriched = inspector.process(simple_record("f1")).await;
    assert!(enriched.request_decoded.is_some());
    assert!(matches!(
        inspector.reflection_state("https://api.example.test"),
        ReflectionState::Failed(_)
    ));
}

#[tokio::test]
async fn test_engine_clear_schemas() {
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, sink);

    inspector
        .register_descriptor_bytes(&[test_helpers::simple_file_bytes()])
        .unwrap();
    assert!(inspector.registry().find_message("test.Simple").is_some());

    inspector.clear_schemas();
    assert!(inspector.registry().is_empty());
}

#[tokio::test]
async fn test_engine_process_with_null_sink_returns_enriched() {
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, Arc::new(NullSink));
    let enriched = inspector.process(simple_record("n1")).await;
    assert_eq!(enriched.grpc_status, Some(0));
}

#[tokio::test]
async fn test_engine_registers_descriptor_set() {
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, Arc::new(NullSink));
    let set = test_helpers::file_descriptor_set_bytes(&[test_helpers::simple_file_bytes()]);
    inspector.register_descriptor_set_bytes(&set).unwrap();
    assert!(inspector.registry().find_message("test.Simple").is_some());
}

#[tokio::test]
async fn test_engine_method_template_and_encode_request() {
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, Arc::new(NullSink));
    inspector
        .register_descriptor_bytes(&[test_helpers::simple_file_bytes()])
        .unwrap();

    let template = inspector.method_template("/test.Widgets/Get").unwrap();
    let message = template.as_message().unwrap();
    assert_eq!(message.get("id"), Some(&DecodedValue::Int(0)));
    assert_eq!(
        message.get("name"),
        Some(&DecodedValue::String(String::new()))
    );

    // Fill the template and frame it; default-valued fields are omitted
    // from the wire, so set both.
    let mut filled = message.clone();
    filled.set("id", DecodedValue::Int(42));
    filled.set("name", DecodedValue::String("test".to_string()));
    let framed = inspector
        .encode_request(
            "/test.Widgets/Get",
            &DecodedValue::Message(filled),
        )
        .unwrap();
    assert_eq!(
        framed,
        vec![0x00, 0x00, 0x00, 0x00, 0x08, 0x08, 0x2A, 0x12, 0x04, b't', b'e', b's', b't']
    );
}

#[tokio::test]
async fn test_engine_encode_request_without_schema_fails() {
    let server = Arc::new(MockReflectionServer::simple());
    let inspector = Inspector::new(AppConfig::default(), server, Arc::new(NullSink));
    assert!(inspector
        .method_template("/test.Widgets/Get")
        .is_err());
}
