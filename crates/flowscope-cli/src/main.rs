mod commands;
mod output;

use clap::Parser;
use commands::Cli;

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "flowscope=debug" } else { "flowscope=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = commands::run(cli) {
        eprintln!("\x1b[1;31merror:\x1b[0m {e:#}");
        std::process::exit(1);
    }
}
