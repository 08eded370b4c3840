//! Command line front end for webbridge.
//!
//! Subcommands:
//! - `demo`: run a host and a guest in process and exchange a few messages
//! - `decode`: inspect a serialized batch
//! - `config`: print the effective configuration

mod demo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use webbridge_config::BridgeConfig;
use webbridge_core::{decode_batch, Message};

#[derive(Parser, Debug)]
#[command(name = "webbridge")]
#[command(about = "Asynchronous message bridge between a host and an embedded guest runtime")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file path (defaults to the user config dir, then env vars)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging, including message traffic
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a host and a guest in process and exchange messages (default)
    Demo {
        /// Value sent to the guest's echo handler
        #[arg(short, long, default_value_t = 1)]
        number: i64,
    },

    /// Decode a batch file and list its messages
    Decode {
        /// File containing one serialized batch (a JSON array)
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = BridgeConfig::load(cli.config.as_deref())
        .context("Failed to load webbridge configuration")?;
    if cli.verbose {
        config.log_traffic = true;
    }

    match cli.command.unwrap_or(Command::Demo { number: 1 }) {
        Command::Demo { number } => demo::run_demo(config, number).await,
        Command::Decode { file } => decode_file(&file),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "webbridge=debug,webbridge_cli=debug,webbridge_core=debug"
    } else {
        "webbridge=info,webbridge_cli=info,webbridge_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed (tests, embedding).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn decode_file(file: &std::path::Path) -> Result<()> {
    let batch = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    for line in describe_batch(&batch)? {
        println!("{}", line);
    }
    Ok(())
}

/// One human-readable line per message in `batch`.
pub fn describe_batch(batch: &str) -> Result<Vec<String>> {
    let messages = decode_batch(batch)?;
    Ok(messages
        .iter()
        .enumerate()
        .map(|(i, message)| match message {
            Message::Call {
                handler_name,
                data,
                callback_id,
            } => format!(
                "#{} {} -> {} data={}{}",
                i,
                message.kind(),
                handler_name.as_deref().unwrap_or("<default>"),
                data,
                callback_id
                    .as_ref()
                    .map(|id| format!(" callbackId={}", id))
                    .unwrap_or_default()
            ),
            Message::Reply {
                response_id,
                response_data,
            } => format!("#{} reply to {} data={}", i, response_id, response_data),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_describe_batch() {
        let lines = describe_batch(
            r#"[{"handlerName":"greet","data":{"msg":"hi"},"callbackId":"cb_1_JS_9"},
                {"data":3},
                {"responseId":"cb_7_Native_9","responseData":{"ok":true}}]"#,
        )
        .unwrap();
        assert_eq!(
            lines,
            vec![
                r#"#0 call -> greet data={"msg":"hi"} callbackId=cb_1_JS_9"#.to_string(),
                "#1 send -> <default> data=3".to_string(),
                r#"#2 reply to cb_7_Native_9 data={"ok":true}"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_decode_file_rejects_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"not\":\"a batch\"}}").unwrap();
        assert!(decode_file(file.path()).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["webbridge", "demo", "--number", "4"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Demo { number: 4 })));

        let cli = Cli::try_parse_from(["webbridge", "-v", "decode", "batch.json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Command::Decode { .. })));
    }
}
