//! The inspector engine: ties the registry, the reflection coordinator,
//! and the record processor together behind a single `process` entry
//! point with sink callbacks toward the UI collaborator.
//!
//! The registry is copy-on-write: readers clone an `Arc` snapshot and
//! never block on registration; the write path (registration) builds a
//! new registry and swaps the `Arc`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use crate::codec::{self, CodecError};
use crate::descriptor::parse::ParseError;
use crate::descriptor::FileDescriptor;
use crate::framing;
use crate::processor::{parse_method_path, CaptureRecord, EnrichedRecord, RecordProcessor};
use crate::value::DecodedValue;
use crate::reflection::{
    EnsureOutcome, ReflectionCoordinator, ReflectionState, ReflectionTransport,
};
use crate::registry::SchemaRegistry;
use crate::settings::AppConfig;

/// Callbacks from the core toward the UI collaborator.
pub trait InspectorSink: Send + Sync {
    fn on_record(&self, record: &EnrichedRecord);
    fn on_schema_updated(&self, origin: &str, registry: &Arc<SchemaRegistry>);
    fn on_reflection_status(&self, origin: &str, state: &ReflectionState);
}

/// A sink that drops everything; used by callers that only consume the
/// return value of `process`.
pub struct NullSink;

impl InspectorSink for NullSink {
    fn on_record(&self, _record: &EnrichedRecord) {}
    fn on_schema_updated(&self, _origin: &str, _registry: &Arc<SchemaRegistry>) {}
    fn on_reflection_status(&self, _origin: &str, _state: &ReflectionState) {}
}

pub struct Inspector {
    config: AppConfig,
    registry: RwLock<Arc<SchemaRegistry>>,
    coordinator: ReflectionCoordinator,
    processor: RecordProcessor,
    sink: Arc<dyn InspectorSink>,
    /// Raw captures retained for re-decoding once schemas land. Only the
    /// inputs are kept; emitted records stay with the UI collaborator.
    seen: Mutex<Vec<CaptureRecord>>,
}

impl Inspector {
    pub fn new(
        config: AppConfig,
        transport: Arc<dyn ReflectionTransport>,
        sink: Arc<dyn InspectorSink>,
    ) -> Self {
        let timeout = Duration::from_millis(u64::from(config.reflection.timeout_ms));
        let status_sink = sink.clone();
        let coordinator = ReflectionCoordinator::new(transport, timeout).with_status_callback(
            Arc::new(move |origin, state| status_sink.on_reflection_status(origin, state)),
        );
        let processor = RecordProcessor::new(
            config.codec.to_options(),
            config.framing.to_options(),
        );
        Self {
            config,
            registry: RwLock::new(Arc::new(SchemaRegistry::new())),
            coordinator,
            processor,
            sink,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Current registry snapshot. Decoding works against snapshots and
    /// never takes the write lock.
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        self.registry.read().expect("registry lock").clone()
    }

    /// Reflection state for an origin, for the UI.
    pub fn reflection_state(&self, origin: &str) -> ReflectionState {
        self.coordinator.state(origin)
    }

    /// Register explicit descriptors (UI collaborator contract).
    pub fn register_files(&self, files: Vec<FileDescriptor>) {
        self.mutate_registry(|registry| {
            registry.register_files(files);
            Ok(())
        })
        .expect("register_files is infallible");
        self.sink.on_schema_updated("local", &self.registry());
    }

    /// Register raw `FileDescriptorProto` payloads.
    pub fn register_descriptor_bytes(&self, payloads: &[Vec<u8>]) -> Result<(), ParseError> {
        self.mutate_registry(|registry| registry.register_file_descriptor_bytes(payloads))?;
        self.sink.on_schema_updated("local", &self.registry());
        Ok(())
    }

    /// Register a whole `FileDescriptorSet` payload.
    pub fn register_descriptor_set_bytes(&self, bytes: &[u8]) -> Result<(), ParseError> {
        self.mutate_registry(|registry| registry.register_file_descriptor_set(bytes))?;
        self.sink.on_schema_updated("local", &self.registry());
        Ok(())
    }

    /// Zeroed request tree for a method, to seed interactive editing.
    pub fn method_template(&self, method_path: &str) -> Result<DecodedValue, CodecError> {
        let registry = self.registry();
        let resolved = registry
            .find_method(method_path)
            .ok_or_else(|| CodecError::SchemaMissing(method_path.to_string()))?;
        codec::template(&registry, &resolved.entry.method.input_type)
    }

    /// Encode a request value tree for a method and wrap it in a single
    /// gRPC data frame, ready to send.
    pub fn encode_request(
        &self,
        method_path: &str,
        value: &DecodedValue,
    ) -> Result<Vec<u8>, CodecError> {
        let registry = self.registry();
        let resolved = registry
            .find_method(method_path)
            .ok_or_else(|| CodecError::SchemaMissing(method_path.to_string()))?;
        let payload = codec::encode(&registry, &resolved.entry.method.input_type, value)?;
        Ok(framing::write_frame(&payload, 0))
    }

    /// Drop all schemas; produces a fresh registry.
    pub fn clear_schemas(&self) {
        *self.registry.write().expect("registry lock") = Arc::new(SchemaRegistry::new());
        self.sink.on_schema_updated("local", &self.registry());
    }

    fn mutate_registry<F>(&self, mutate: F) -> Result<(), ParseError>
    where
        F: FnOnce(&mut SchemaRegistry) -> Result<(), ParseError>,
    {
        let mut guard = self.registry.write().expect("registry lock");
        let mut next = SchemaRegistry::clone(&guard);
        mutate(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Process one captured record: resolve its method, fetch schemas
    /// via reflection when needed, decode, emit, and retain the raw
    /// capture for later re-decoding.
    pub async fn process(&self, record: CaptureRecord) -> EnrichedRecord {
        let method_path = parse_method_path(&record.url);
        let origin = origin_of(&record.url);

        if self.config.reflection.enabled {
            let resolved = method_path
                .as_deref()
                .map(|path| self.registry().find_method(path).is_some())
                .unwrap_or(false);
            // Locally-registered schemas take precedence: a resolvable
            // method short-circuits reflection for this origin entirely.
            if !resolved {
                if let Some(origin) = &origin {
                    match self.coordinator.ensure_origin(origin).await {
                        EnsureOutcome::Fetched { descriptors } => {
                            self.install_fetched(origin, descriptors);
                        }
                        EnsureOutcome::Ready | EnsureOutcome::Failed(_) => {}
                    }
                }
            }
        }

        let enriched = self.processor.process(&self.registry(), &record);
        self.seen.lock().expect("seen lock").push(record);
        self.sink.on_record(&enriched);
        enriched
    }

    /// Register freshly fetched descriptors and re-emit prior records
    /// whose method matches an entry this fetch newly indexed. Records
    /// that already resolved through other schemas are left alone.
    fn install_fetched(&self, origin: &str, descriptors: Vec<FileDescriptor>) {
        if descriptors.is_empty() {
            warn!(origin = %origin, "reflection returned no descriptors");
            return;
        }
        let prior_paths: HashSet<String> = self
            .registry()
            .service_paths()
            .map(str::to_string)
            .collect();
        self.mutate_registry(|registry| {
            registry.register_files(descriptors);
            Ok(())
        })
        .expect("register_files is infallible");

        let registry = self.registry();
        self.sink.on_schema_updated(origin, &registry);

        let new_paths: HashSet<&str> = registry
            .service_paths()
            .filter(|path| !prior_paths.contains(*path))
            .collect();
        if new_paths.is_empty() {
            info!(origin = %origin, "schemas installed, no new method entries");
            return;
        }

        let seen = self.seen.lock().expect("seen lock");
        let mut re_emitted = 0usize;
        for prior in seen.iter() {
            let newly_resolves = parse_method_path(&prior.url)
                .as_deref()
                .and_then(|path| registry.find_method(path))
                .map(|resolved| new_paths.contains(resolved.entry.path().as_str()))
                .unwrap_or(false);
            if newly_resolves {
                let enriched = self.processor.process(&registry, prior);
                self.sink.on_record(&enriched);
                re_emitted += 1;
            }
        }
        info!(origin = %origin, re_emitted, "schemas installed, prior records re-decoded");
    }
}

/// Scheme + authority of a captured URL.
pub fn origin_of(raw_url: &str) -> Option<String> {
    let parsed = url::Url::parse(raw_url).ok()?;
    let host = parsed.host_str()?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Some(origin)
}
