use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relaychat::app::App;
use relaychat::config::{Command, Config, MergeCli, Settings};
use relaychat_core::server::RelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug, cli.is_serve_mode());

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    match &cli.command {
        Command::Serve { .. } => serve(settings).await,
        Command::Connect { .. } => {
            let mut app = App::new(settings.client, cli.name().map(str::to_string));
            app.run().await
        }
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let server = RelayServer::start(&settings.server).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for interrupt")?;
            tracing::info!("interrupt received, shutting down");
        }
        _ = server.closed() => {}
    }
    server.shutdown();
    Ok(())
}

/// The interactive client only logs warnings unless `--debug` is given, so
/// log lines stay out of the chat.
fn setup_logging(debug: bool, serve: bool) {
    let filter = if debug {
        EnvFilter::new("relaychat=debug,relaychat_core=debug")
    } else if serve {
        EnvFilter::new("relaychat=info,relaychat_core=info")
    } else {
        EnvFilter::new("relaychat=warn,relaychat_core=warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
