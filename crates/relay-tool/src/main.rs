mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay-tool", about = "Inspect and optimize relay cost/route matrices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize a cost matrix file into a route matrix file.
    Optimize {
        /// Encoded cost matrix.
        #[arg(long)]
        input: PathBuf,
        /// Where to write the encoded route matrix.
        #[arg(long)]
        output: PathBuf,
        /// Minimum improvement (ms) over the direct path.
        #[arg(long, default_value = "1")]
        rtt_tolerance: u32,
        /// Optimizer segments (default: sized from relays and CPUs).
        #[arg(long)]
        segments: Option<usize>,
    },

    /// Print route statistics of a route matrix file.
    Analyze {
        #[arg(long)]
        input: PathBuf,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the routes between two relays, by name.
    Routes {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        src: String,
        #[arg(long)]
        dst: String,
    },

    /// Dump every routed pair of a route matrix file.
    Debug {
        #[arg(long)]
        input: PathBuf,
    },

    /// List the relays of a cost or route matrix file.
    Relays {
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut out = std::io::stdout().lock();

    match cli.command {
        Command::Optimize {
            input,
            output,
            rtt_tolerance,
            segments,
        } => {
            let summary = commands::optimize(&input, &output, rtt_tolerance, segments)?;
            eprintln!("{summary}");
        }
        Command::Analyze { input, json } => commands::analyze(&input, json, &mut out)?,
        Command::Routes { input, src, dst } => commands::routes(&input, &src, &dst, &mut out)?,
        Command::Debug { input } => commands::debug(&input, &mut out)?,
        Command::Relays { input } => commands::relays(&input, &mut out)?,
    }
    Ok(())
}
