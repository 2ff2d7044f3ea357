//! reltpl - compile a template into an SQL script
//!
//! Prints the side-table preamble followed by the generated script on stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reltpl::side_table;

#[derive(Parser, Debug)]
#[command(name = "reltpl")]
#[command(about = "Compile a template into an SQL script", long_about = None)]
struct Cli {
    /// Template to compile
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Print the source text unchanged instead of compiling it
    #[arg(long)]
    no_render: bool,

    /// Keep the side table in this database file, attached as `sys`
    #[arg(long, value_name = "PATH")]
    sys_db: Option<String>,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.quiet { "reltpl=error" } else { "reltpl=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("reltpl: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(&cli.source)
        .map_err(|e| format!("failed to read {}: {e}", cli.source.display()))?;
    if cli.no_render {
        return Ok(source);
    }

    tracing::debug!(path = %cli.source.display(), bytes = source.len(), "compiling");
    let script = reltpl::compile(&source)?;
    let mut lines = side_table::preamble(cli.sys_db.as_deref());
    lines.push(script);
    Ok(lines.join("\n"))
}
