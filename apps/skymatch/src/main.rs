//! # skymatch
//!
//! Cross-matches a primary source catalog against one or more secondary
//! catalogs and reports posterior association probabilities.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/skymatch (THE BINARY)            │
//! │                                                      │
//! │   ┌──────────────┐          ┌───────────────────┐    │
//! │   │     CLI      │          │   TOML configs    │    │
//! │   │   (clap)     │          │   JSON reports    │    │
//! │   └──────┬───────┘          └─────────┬─────────┘    │
//! │          └──────────────┬─────────────┘              │
//! │                         ▼                            │
//! │                 ┌───────────────┐                    │
//! │                 │ skymatch-core │                    │
//! │                 │  (THE ENGINE) │                    │
//! │                 └───────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! skymatch run -c fermi_icecube.toml -o report.json
//! skymatch validate -c fermi_icecube.toml
//! skymatch scramble -c null.toml -o scrambles.json
//! skymatch pixel --nside 64 --ra 83.63 --dec 22.01 --radius-arcsec 3600
//! ```

use clap::Parser;
use skymatch::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // SKYMATCH_LOG_FORMAT=json switches to machine-parseable logs.
    let log_format = std::env::var("SKYMATCH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "skymatch=info,skymatch_core=info".into());

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

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  skymatch v{}
  Bayesian cross-matching of sky catalogs
"#,
        env!("CARGO_PKG_VERSION")
    );
}
