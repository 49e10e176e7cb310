mod args;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Commands};
use commands::convert::Input;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let filter = match cli.verbose {
        0 => "audiograb=info",
        1 => "audiograb=debug",
        2 => "audiograb=trace",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Some(Commands::Convert { url, file, options }) => {
            commands::convert::run(Input::from_args(url, file), &options, config).await
        }
        Some(Commands::Batch {
            input,
            parallel,
            fail_fast,
            options,
        }) => commands::batch::run(&input, parallel, fail_fast, &options, config).await,
        Some(Commands::Doctor) => commands::doctor::run(config).await,
        Some(Commands::Config) => commands::config::run(config).await,
        // Bare invocation converts too, prompting when no URL was given
        None => {
            let input = Input::from_args(cli.url, cli.file);
            commands::convert::run(input, &cli.options, config).await
        }
    }
}
