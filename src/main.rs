use anyhow::Result;
use clap::Parser;
use meetscribe::{
    app,
    cli::{Cli, CliCommand},
    global,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("Meetscribe {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Paths) => {
            println!("config: {:?}", global::config_file()?);
            println!("db:     {:?}", global::db_file()?);
            println!("media:  {:?}", global::media_dir()?);
            return Ok(());
        }
        None => {}
    }

    app::run_service(cli.config).await
}
