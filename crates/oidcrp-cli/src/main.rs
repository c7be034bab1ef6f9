mod cli;
mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use context::RpContext;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Discover(args) => commands::discover::discover(args, format).await?,
        Commands::Pkce(args) => commands::pkce::pkce(args, format)?,
        Commands::Check => {
            let ctx = RpContext::load(&cli.config)?;
            commands::check::check(&ctx, format)?;
        }
        Commands::AuthorizeUrl(args) => {
            let ctx = RpContext::load(&cli.config)?;
            commands::flow::authorize_url(&ctx, args, format).await?;
        }
        Commands::LogoutUrl(args) => {
            let ctx = RpContext::load(&cli.config)?;
            commands::flow::logout_url(&ctx, args, format).await?;
        }
        Commands::Refresh(args) => {
            let ctx = RpContext::load(&cli.config)?;
            commands::token::refresh(&ctx, args, format).await?;
        }
        Commands::ValidateToken(args) => {
            let ctx = RpContext::load(&cli.config)?;
            commands::token::validate_token(&ctx, args, format).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
