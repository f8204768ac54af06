//! Callscope CLI
//!
//! Operator tooling for outbound-call capture configurations

mod explain;
mod replay;

use anyhow::{Context, Result, bail};
use callscope_agent::{Instrumentor, load_config};
use callscope_core::{CaptureConfig, ExportMode, HeaderMap, RequestScope, SinkConfig};
use callscope_export::{MemorySink, sink_from_config};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "callscope")]
#[command(about = "Callscope - outbound call capture tooling", long_about = None)]
struct Cli {
    /// Capture configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "CALLSCOPE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print its effective settings
    CheckConfig,
    /// Show how a call to a URL would be captured
    Explain {
        url: String,

        /// Request header, as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Call-scoped request body override
        #[arg(long)]
        capture_request_body: Option<bool>,

        /// Call-scoped response body override
        #[arg(long)]
        capture_response_body: Option<bool>,
    },
    /// Replay a recorded event script and print the resulting payloads
    Replay {
        /// Script file (YAML, or JSON with a .json extension)
        script: String,

        /// Also deliver payloads to the sink named in the configuration
        #[arg(long, default_value = "false")]
        forward: bool,

        /// Pretty-print payloads instead of one JSON object per line
        #[arg(long, default_value = "false")]
        pretty: bool,
    },
}

fn load(path: Option<&str>) -> Result<CaptureConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("Invalid configuration {}", path))
        }
        None => Ok(CaptureConfig::default()),
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Header '{}' is not in 'Name: value' form", raw);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Header '{}' has an empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn check_config(config: &CaptureConfig) {
    println!("Configuration OK");
    println!("  enabled:           {}", config.enabled);
    println!(
        "  body capture:      request={:?} response={:?}",
        config.capture_request_body, config.capture_response_body
    );
    println!(
        "  body limits:       request={}B response={}B",
        config.body_limits.request_max_bytes, config.body_limits.response_max_bytes
    );
    println!(
        "  domain rules:      {} allow, {} deny",
        config.domains.allow.len(),
        config.domains.deny.len()
    );
    match config.export.mode {
        ExportMode::Batched {
            max_batch_size,
            batch_timeout_ms,
        } => println!(
            "  export mode:       batched ({} payloads / {}ms)",
            max_batch_size, batch_timeout_ms
        ),
        ExportMode::Immediate => println!("  export mode:       immediate"),
    }
    let sink = match &config.export.sink {
        SinkConfig::Discard => "discard".to_string(),
        SinkConfig::Jsonl { path } => format!("jsonl ({})", path),
        SinkConfig::Http { endpoint, .. } => format!("http ({})", endpoint),
    };
    println!("  sink:              {}", sink);
}

async fn run_replay(
    config: CaptureConfig,
    script: &str,
    forward: bool,
    pretty: bool,
) -> Result<()> {
    let script = replay::ReplayScript::load(script)?;

    let memory = Arc::new(MemorySink::new());
    let mut builder = Instrumentor::builder(config.clone()).add_sink(memory.clone());
    if forward {
        let sink = sink_from_config(&config.export.sink).context("Failed to create export sink")?;
        builder = builder.add_sink(sink);
    }
    let instrumentor = builder.build()?;

    let summary = replay::replay(&instrumentor, &script)?;
    instrumentor.force_flush().await;
    instrumentor.shutdown().await;

    for payload in memory.payloads() {
        let line = if pretty {
            serde_json::to_string_pretty(&payload)?
        } else {
            serde_json::to_string(&payload)?
        };
        println!("{}", line);
    }

    eprintln!(
        "Replayed {} calls: {} started, {} rejected, {} unfinished, {} exported",
        script.calls.len(),
        summary.started,
        summary.rejected,
        summary.unfinished,
        memory.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load(cli.config.as_deref())?;

    // Logs go to stderr; a second subscriber is not an error worth failing on
    let _ = callscope_observability::init_logging(&config.logging);

    match cli.command {
        Commands::CheckConfig => {
            if cli.config.is_none() {
                bail!("check-config needs --config <path>");
            }
            check_config(&config);
        }
        Commands::Explain {
            url,
            headers,
            capture_request_body,
            capture_response_body,
        } => {
            let mut header_map = HeaderMap::new();
            for raw in &headers {
                let (name, value) = parse_header(raw)?;
                header_map.append(name, value);
            }
            let scope = RequestScope {
                capture_request_body,
                capture_response_body,
                ..Default::default()
            };
            print!("{}", explain::explain(&config, &url, &header_map, &scope));
        }
        Commands::Replay {
            script,
            forward,
            pretty,
        } => run_replay(config, &script, forward, pretty).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Content-Type: application/json").unwrap(),
            ("Content-Type".to_string(), "application/json".to_string())
        );
        assert_eq!(
            parse_header("X-Empty:").unwrap(),
            ("X-Empty".to_string(), String::new())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "callscope",
            "--config",
            "capture.yaml",
            "explain",
            "https://api.example.com/v1",
            "-H",
            "Accept: */*",
            "--capture-request-body",
            "true",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("capture.yaml"));
        match cli.command {
            Commands::Explain {
                url,
                headers,
                capture_request_body,
                capture_response_body,
            } => {
                assert_eq!(url, "https://api.example.com/v1");
                assert_eq!(headers, vec!["Accept: */*".to_string()]);
                assert_eq!(capture_request_body, Some(true));
                assert_eq!(capture_response_body, None);
            }
            _ => panic!("Expected explain"),
        }
    }
}
