use clap::Parser;
use drive_youtube_uploader::{Config, Error, logging};
use std::path::PathBuf;

/// Upload new videos from a Google Drive folder to every configured YouTube channel.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Process only the first video found, to try the whole setup once.
    #[arg(long)]
    test_only: bool,

    /// Read environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(cli.env_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(None)?;
            let e = Error::Configuration(e);
            tracing::error!(error = %e, "cannot start");
            return Err(e.into());
        }
    };
    logging::init(Some(&config.log_file))?;

    match drive_youtube_uploader::run(&config, cli.test_only).await {
        Ok(summary) => {
            println!(
                "{} uploaded, {} failed, {} videos skipped",
                summary.uploads_succeeded(),
                summary.uploads_failed(),
                summary.skipped()
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "upload run failed");
            Err(e.into())
        }
    }
}
