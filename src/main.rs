//! Scratch Bridge CLI - runs the sample extension helper.
//!
//! This is the main binary entry point. See the `scratch_bridge` library
//! for the bridge itself.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use scratch_bridge::{Bridge, BridgeConfig, BridgeEvent, EventKind, Framing};
use serde_json::Value;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "scratch-bridge")]
#[command(version)]
#[command(about = "Local TCP bridge exposing host methods and variables to Scratch")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sample extension (method `write`, variables `PI` and `random`)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// Buffer frames until newline instead of one frame per read
        #[arg(long)]
        line_framing: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("SCRATCH_BRIDGE_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

/// Text printed by the sample `write` method: strings as-is, any other
/// value as JSON, nothing for a missing argument.
fn console_text(params: &[Value]) -> String {
    match params.first() {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Register the sample methods, variables and event handlers.
#[allow(clippy::approx_constant, reason = "the sample publishes PI to ten decimal places")]
fn install_sample(bridge: &Bridge) {
    bridge.register_method("write", |params| {
        println!("{}", console_text(params));
        Ok(())
    });

    bridge.push_variable("PI", 3.141_592_653_6);
    bridge.push_variable("random", rand::random::<f64>());

    bridge.on(EventKind::Connect, |event| {
        if let BridgeEvent::Connect { peer, .. } = event {
            println!("Scratch connected ({peer})");
        }
    });
    bridge.on(EventKind::Disconnect, |_| println!("Scratch disconnected"));

    // The refreshed value goes out with the next poll, not this one.
    let poller = bridge.clone();
    bridge.on(EventKind::Poll, move |_| {
        poller.push_variable("random", rand::random::<f64>());
    });
}

fn serve(config: BridgeConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start Tokio runtime")?;
    runtime.block_on(async move {
        let bridge = Bridge::with_config(config);
        install_sample(&bridge);

        let server = bridge.listen()?;
        println!(
            "Scratch bridge v{} listening on {}",
            env!("CARGO_PKG_VERSION"),
            server.local_addr()
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        println!("Shutting down...");
        server.shutdown();
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let mut config = BridgeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port, line_framing } => {
            if let Some(port) = port {
                config.port = port;
            }
            if line_framing {
                config.framing = Framing::Line;
            }
            serve(config)?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_flags_parse() {
        let cli =
            Cli::try_parse_from(["scratch-bridge", "serve", "--port", "17801", "--line-framing"])
                .unwrap();
        match cli.command {
            Commands::Serve { port, line_framing } => {
                assert_eq!(port, Some(17801));
                assert!(line_framing);
            }
            Commands::Config => panic!("Expected Serve"),
        }
    }

    #[test]
    fn test_sample_registers_write_and_variables() {
        let bridge = Bridge::new(0);
        install_sample(&bridge);
        assert_eq!(bridge.methods(), vec!["write"]);
        let snapshot = bridge.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["PI", "random"]);
        assert_eq!(snapshot[0].1, serde_json::json!(3.141_592_653_6));
    }

    #[test]
    fn test_console_text_prints_any_value() {
        use serde_json::json;

        assert_eq!(console_text(&[json!("hello world")]), "hello world");
        assert_eq!(console_text(&[json!(42)]), "42");
        assert_eq!(console_text(&[json!([1, "a"])]), "[1,\"a\"]");
        assert_eq!(console_text(&[]), "");
    }
}
