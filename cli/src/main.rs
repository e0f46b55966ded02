//! ubiattach CLI - drives the attach/scan core against a flash-image file
//!
//! # Usage
//! ```bash
//! ubiattach attach -i device.img           # run attach, print the volume map
//! ubiattach inspect -i device.img -p 42    # dump one PEB's headers
//! ubiattach selftest -i device.img         # attach + explicit self-check
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;
mod config_file;

/// ubiattach - attach/scan harness for a UBI-style flash layer
#[derive(Parser)]
#[command(name = "ubiattach")]
#[command(author = "OpenFlash Team")]
#[command(version = "0.1.0")]
#[command(about = "Attach and inspect UBI-style flash images")]
#[command(long_about = None)]
struct Cli {
    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text", global = true)]
    format: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a TOML geometry override file (defaults to
    /// `$XDG_CONFIG_HOME/ubiattach/geometry.toml` if present)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a flash-image file and print the reconstructed volume map
    Attach {
        /// Path to the flash image
        #[arg(short, long)]
        image: PathBuf,

        /// Skip the fastmap fast-attach path even if compiled in
        #[arg(long)]
        force_scan: bool,
    },

    /// Dump the decoded EC/VID headers of a single PEB
    Inspect {
        /// Path to the flash image
        #[arg(short, long)]
        image: PathBuf,

        /// Physical eraseblock number to inspect
        #[arg(short, long)]
        pnum: u32,
    },

    /// Attach, then explicitly re-run the post-attach self-check
    Selftest {
        /// Path to the flash image
        #[arg(short, long)]
        image: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Attach { image, force_scan } => commands::attach_cmd(&cli, image, *force_scan),
        Commands::Inspect { image, pnum } => commands::inspect_cmd(&cli, image, *pnum),
        Commands::Selftest { image } => commands::selftest_cmd(&cli, image),
    };

    if let Err(e) = result {
        if !cli.quiet {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        }
        std::process::exit(1);
    }
}
