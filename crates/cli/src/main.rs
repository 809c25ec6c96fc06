use clap::Parser;
use hookwright_cli::commands::{Cmd, Command};

/// Hookwright CLI
///
/// Hookwright splices cancellable event hooks into host method bodies. The CLI parses and
/// verifies host images, evaluates hook anchors, and installs hook manifests.
#[derive(Parser)]
#[command(name = "hookwright")]
#[command(about = "Hookwright: method instrumentation for host images")]
struct Cli {
    /// Log every splice and anchor decision.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

/// Runs the Hookwright CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    hookwright_cli::init_tracing(cli.verbose);
    cli.command.execute().await
}
