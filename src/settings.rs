use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::codec::CodecOptions;
use crate::framing::FramingOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub reflection: ReflectionConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReflectionConfig {
    /// Whether to attempt reflection on new origins.
    #[serde(default = "default_reflection_enabled")]
    pub enabled: bool,
    /// Per-origin reflection deadline in milliseconds.
    #[serde(default = "default_reflection_timeout_ms")]
    pub timeout_ms: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_reflection_enabled(),
            timeout_ms: default_reflection_timeout_ms(),
        }
    }
}

fn default_reflection_enabled() -> bool {
    true
}

fn default_reflection_timeout_ms() -> u32 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodecConfig {
    /// If true, invalid UTF-8 in string fields yields an error leaf
    /// rather than falling back to raw bytes.
    #[serde(default)]
    pub strict_utf8: bool,
    /// Minimum fraction of bytes a candidate nested message must
    /// consume during blind decode to be accepted as a message.
    #[serde(default = "default_blind_decode_threshold")]
    pub blind_decode_threshold: f64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            strict_utf8: false,
            blind_decode_threshold: default_blind_decode_threshold(),
        }
    }
}

fn default_blind_decode_threshold() -> f64 {
    0.8
}

impl CodecConfig {
    pub fn to_options(&self) -> CodecOptions {
        CodecOptions {
            strict_utf8: self.strict_utf8,
            blind_decode_threshold: self.blind_decode_threshold.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FramingConfig {
    /// Bomb guard: maximum inflated size for any gzip buffer.
    #[serde(default = "default_gzip_max_output_bytes")]
    pub gzip_max_output_bytes: u64,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            gzip_max_output_bytes: default_gzip_max_output_bytes(),
        }
    }
}

fn default_gzip_max_output_bytes() -> u64 {
    64 * 1024 * 1024
}

impl FramingConfig {
    pub fn to_options(&self) -> FramingOptions {
        FramingOptions {
            gzip_max_output_bytes: self.gzip_max_output_bytes,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
