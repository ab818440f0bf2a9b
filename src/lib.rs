//! protolens: protocol and schema engine for a gRPC-Web traffic
//! inspector. Captured HTTP exchanges go in; structured, schema-aware
//! records come out. Schemas arrive via explicit registration or gRPC
//! Server Reflection.

pub mod cli;
pub mod codec;
pub mod descriptor;
pub mod engine;
pub mod framing;
pub mod processor;
pub mod reflection;
pub mod registry;
pub mod settings;
pub mod trace;
pub mod value;
pub mod wire;
pub mod wkt;

pub use engine::{Inspector, InspectorSink, NullSink};
pub use processor::{CaptureRecord, EnrichedRecord};
pub use registry::SchemaRegistry;
pub use value::DecodedValue;
