//! # dgm - Degraphmalizer
//!
//! The command line front end of the degraphmalizer engine.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a settings file and list its types
//! dgm --config dgm.toml check
//!
//! # Replay a fixture and verify the expected documents
//! dgm --config dgm.toml run --fixtures fixture.json
//!
//! # Machine-readable output and structured logs
//! DGM_LOG_FORMAT=json dgm --json run -f fixture.json
//! ```

use clap::Parser;
use dgm::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // DGM_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("DGM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "dgm=debug,dgm_core=debug"
    } else {
        "dgm=info,dgm_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
