//! # skymatch CLI Module
//!
//! ## Available Commands
//!
//! - `run` - Match catalogs and report posteriors
//! - `validate` - Check a configuration, its catalogs and prior consistency
//! - `scramble` - Compute the RA-scramble null distribution
//! - `pixel` - Look up HEALPix pixels for a position

mod commands;

use clap::{Parser, Subcommand};
use skymatch_core::MatchError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// skymatch - Bayesian cross-matching of astrophysical source catalogs
#[derive(Parser, Debug)]
#[command(name = "skymatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full cross-match
    Run {
        /// Path to the TOML run configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate configuration and catalogs without matching
    Validate {
        /// Path to the TOML run configuration
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Compute the RA-scramble null distribution
    Scramble {
        /// Path to the TOML run configuration (prior must be ra_scramble)
        #[arg(short, long)]
        config: PathBuf,

        /// Write the realizations here
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Look up the pixel of a position
    Pixel {
        /// HEALPix resolution parameter (power of two)
        #[arg(short, long)]
        nside: u32,

        /// Right ascension in degrees
        #[arg(long, allow_negative_numbers = true)]
        ra: f64,

        /// Declination in degrees
        #[arg(long, allow_negative_numbers = true)]
        dec: f64,

        /// Also list the pixels overlapping a disc of this radius
        #[arg(short, long)]
        radius_arcsec: Option<f64>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), MatchError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Run { config, output }) => {
            cmd_run(&config, output.as_deref(), json_mode, cli.verbose)
        }
        Some(Commands::Validate { config }) => cmd_validate(&config, json_mode),
        Some(Commands::Scramble { config, output }) => cmd_scramble(&config, &output, json_mode),
        Some(Commands::Pixel {
            nside,
            ra,
            dec,
            radius_arcsec,
        }) => cmd_pixel(nside, ra, dec, radius_arcsec, json_mode),
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}
