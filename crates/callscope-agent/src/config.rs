//! Configuration file loading
//!
//! Capture configuration is read from a YAML or TOML file. The format is
//! chosen from the file extension (`.toml` is TOML, anything else is YAML),
//! and the result is validated before it is handed out.
//!
//! ```yaml
//! capture_response_body: true
//! domains:
//!   allow:
//!     - .example.com
//!     - domain: api.partner.io
//!       paths: ["/v2/"]
//!       headers:
//!         deny: ["x-partner-token"]
//! export:
//!   mode:
//!     type: batched
//!     max_batch_size: 50
//!   sink:
//!     type: jsonl
//!     path: ~/.callscope/calls.jsonl
//! ```

use callscope_core::{CaptureConfig, Error, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Parse and validate configuration text
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<CaptureConfig> {
    let config: CaptureConfig = match format {
        ConfigFormat::Toml => toml::from_str(contents)
            .map_err(|e| Error::Config(format!("TOML parse error: {}", e)))?,
        ConfigFormat::Yaml => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {}", e)))?,
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<CaptureConfig> {
    let expanded_path = shellexpand::tilde(path);
    let path = PathBuf::from(expanded_path.as_ref());

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

    let config = parse_config(&contents, ConfigFormat::from_path(&path))?;
    tracing::debug!(path = %path.display(), "Loaded capture configuration");
    Ok(config)
}
