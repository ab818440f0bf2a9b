use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use protolens::cli;
use protolens::engine::{Inspector, InspectorSink};
use protolens::processor::{CaptureRecord, EnrichedRecord};
use protolens::reflection::{HttpReflectionTransport, ReflectionState};
use protolens::registry::SchemaRegistry;
use protolens::{settings, trace};

#[derive(Parser, Debug)]
#[clap(version, about)]
/// Decode captured gRPC-Web exchanges into structured records
struct Args {
    /// path to a TOML config file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a capture stream (one JSON record per line) into
    /// enriched records, fetching schemas via reflection as needed
    Process {
        /// capture file (stdin when omitted)
        input: Option<PathBuf>,
    },
    /// Decode a single payload (hex or base64) and print the JSON tree
    Decode {
        payload: String,
        /// fully-qualified message type; blind decode when omitted
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,
        /// treat the payload as a framed gRPC body
        #[arg(long)]
        framed: bool,
        /// FileDescriptorSet file providing schemas
        #[arg(short = 'd', long = "descriptors")]
        descriptors: Option<PathBuf>,
    },
    /// Print a zeroed request template for a message type or method path
    Template {
        /// message full name or /pkg.Service/Method path
        target: String,
        #[arg(short = 'd', long = "descriptors")]
        descriptors: Option<PathBuf>,
    },
    /// List the files, services, and messages in a descriptor set
    Describe {
        #[arg(short = 'd', long = "descriptors")]
        descriptors: PathBuf,
    },
}

/// Prints every emitted record as a JSON line. Re-decoded records are
/// printed again under the same id once reflection lands schemas.
struct StdoutSink;

impl InspectorSink for StdoutSink {
    fn on_record(&self, record: &EnrichedRecord) {
        match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(err) => {
                tracing::error!(id = %record.id, error = %err, "record serialization failed")
            }
        }
    }

    fn on_schema_updated(&self, origin: &str, registry: &Arc<SchemaRegistry>) {
        tracing::info!(
            origin = %origin,
            files = registry.file_names().count(),
            "schemas updated"
        );
    }

    fn on_reflection_status(&self, origin: &str, state: &ReflectionState) {
        tracing::info!(origin = %origin, state = ?state, "reflection status");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = settings::AppConfig::load(args.config.as_deref())?;
    trace::init(cfg.log.format);

    match args.command.unwrap_or(Command::Process { input: None }) {
        Command::Process { input } => process_stream(cfg, input).await,
        Command::Decode {
            payload,
            type_name,
            framed,
            descriptors,
        } => {
            let registry = cli::load_registry(descriptors.as_deref())?;
            let bytes = cli::parse_payload(&payload)?;
            let json = cli::decode_command(&cfg, &registry, &bytes, type_name.as_deref(), framed);
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        Command::Template {
            target,
            descriptors,
        } => {
            let registry = cli::load_registry(descriptors.as_deref())?;
            let json = cli::template_command(&registry, &target)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
        Command::Describe { descriptors } => {
            let registry = cli::load_registry(Some(descriptors.as_path()))?;
            let json = cli::describe_command(&registry);
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(())
        }
    }
}

async fn process_stream(
    cfg: settings::AppConfig,
    input: Option<PathBuf>,
) -> anyhow::Result<()> {
    let inspector = Inspector::new(
        cfg,
        Arc::new(HttpReflectionTransport::new()),
        Arc::new(StdoutSink),
    );

    let mut lines: Box<dyn tokio::io::AsyncBufRead + Unpin> = match &input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut line = String::new();
    let mut processed = 0usize;
    loop {
        line.clear();
        if lines.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: CaptureRecord = match serde_json::from_str(trimmed) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed capture line");
                continue;
            }
        };
        inspector.process(record).await;
        processed += 1;
    }

    tracing::info!(processed, "capture stream drained");
    Ok(())
}
