use anyhow::Result;
use clap::Parser;
use scribed::cli::{Cli, Commands};
use scribed::codec::FfmpegDecoder;
use scribed::config::Config;
use scribed::server;
use scribed::stt::WhisperCliRecognizer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let config = load_config(&cli)?;
    config.validate()?;

    match cli.command {
        None | Some(Commands::Serve) => {
            let decoder = Arc::new(FfmpegDecoder::new(config.decoder.clone()));
            let recognizer = Arc::new(WhisperCliRecognizer::new(config.recognizer.clone()));
            server::serve(config, decoder, recognizer).await?;
        }
        Some(Commands::Check) => {
            run_check(&config).await?;
        }
    }

    Ok(())
}

/// Load config from --config, the default path, or built-in defaults, then
/// apply env and CLI overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };

    config = config.with_env_overrides();

    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(interval) = cli.tick_interval {
        config.session.tick_interval_ms = interval;
    }
    if let Some(model) = &cli.model {
        config.recognizer.model = model.clone();
    }
    if let Some(language) = &cli.language {
        config.recognizer.language = language.clone();
    }

    Ok(config)
}

/// Verify the external decoder and recognition engine are usable.
async fn run_check(config: &Config) -> Result<()> {
    let mut failed = false;

    let decoder = FfmpegDecoder::new(config.decoder.clone());
    match decoder.probe().await {
        Ok(version) => println!("decoder:    ok ({version})"),
        Err(e) => {
            println!("decoder:    FAILED ({e})");
            failed = true;
        }
    }

    let recognizer = WhisperCliRecognizer::new(config.recognizer.clone());
    match recognizer.probe().await {
        Ok(()) => println!("recognizer: ok"),
        Err(e) => {
            println!("recognizer: FAILED ({e})");
            failed = true;
        }
    }

    if failed {
        anyhow::bail!("dependency check failed");
    }
    Ok(())
}

fn init_logging(quiet: bool, verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "scribed=debug,info",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
