use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use jarvisbot::bot::{Dispatcher, DispatcherConfig, Notifier, RtmRuntime, SideChannel, SlackClient};
use jarvisbot::config::Config;
use jarvisbot::error::BotError;
use jarvisbot::slack_log::SlackLogLayer;

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let slack = match SlackClient::new(&config.api_base, &config.token) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Failed to build Slack client: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = tracing_appender::rolling::daily(&log_dir, "jarvisbot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(ref channel) = config.log_channel {
        let slack_layer = SlackLogLayer::new(slack.clone(), channel.clone());
        registry.with(slack_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting {}...", config.name);
    if let Some(ref path) = config_path {
        info!("Loaded config from {}", path.display());
    }
    info!("Database: {}", config.db_path.display());
    if config.lenient_parsing {
        info!("Lenient intent parsing enabled");
    }

    let notifier = Notifier::new();
    let side_channel = SideChannel::new(
        notifier.clone(),
        slack.clone(),
        config.upload_channel.clone(),
        config.default_user.clone(),
        config.upload_dir(),
    );
    let notify_addr = config.notify_addr;
    tokio::spawn(async move {
        if let Err(e) = side_channel.serve(notify_addr).await {
            error!("Notification side-channel stopped: {e}");
        }
    });

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let rtm = RtmRuntime::new(slack.clone(), config.reconnect_delay);
    let rtm_task = tokio::spawn(rtm.run(tx));

    let dispatcher = Dispatcher::new(DispatcherConfig::from(&config), slack, notifier);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => {
                warn!("Cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    let outcome = dispatcher.run_until(rx, shutdown).await;

    // A runtime that already stopped keeps its result; one still running was interrupted
    rtm_task.abort();
    let outcome = outcome.and(match rtm_task.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(BotError::Transport(format!("RTM task failed: {e}"))),
    });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
