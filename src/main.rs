use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use container::{ContainerClient, DockerContainerClient, LABEL_ENABLE_KEY, LABEL_ENABLE_VALUE};
use logging::Logger;
use notify::{Notifier, TelegramClient};
use watcher::Watcher;

mod alerts;
mod cli;
mod config;
mod container;
mod logging;
mod logline;
mod notify;
mod signals;
mod watcher;

const SOCKET_PERMISSION_HINT: &str = "Permission denied accessing the Docker socket. \
    Mount it and add its group, e.g. docker run -v /var/run/docker.sock:/var/run/docker.sock \
    --group-add=$(stat -c '%g' /var/run/docker.sock) ...";
const LIST_PERMISSION_HINT: &str = "Permission denied when listing containers. \
    Check the Docker socket permissions. When running in a container, make sure it can \
    access the Docker socket.";

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn report_join(log: &Logger, task: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        log.error(format_args!("{task} task failed: {e}"));
    }
}

/// Lists containers once so access problems surface before the watcher
/// starts.
async fn check_docker_access(client: &dyn ContainerClient, log: &Logger) -> bool {
    match client.running_containers().await {
        Ok(containers) => {
            log.debug(format_args!(
                "Docker reachable, {} running container(s)",
                containers.len()
            ));
            true
        }
        Err(e) if e.is_permission_denied() => {
            log.error(format_args!("{LIST_PERMISSION_HINT}"));
            false
        }
        Err(e) => {
            log.error(format_args!("Failed to list containers: {e}"));
            false
        }
    }
}

async fn close_client(client: &dyn ContainerClient, log: &Logger) {
    if let Err(e) = client.close().await {
        log.warn(format_args!("Failed to close container client: {e}"));
    }
}

/// Runs the watcher and the alert dispatcher until `shutdown` resolves or
/// the poll loop gives up, then tears everything down in order.
///
/// Returns failure when the poll loop stopped on its own.
async fn supervise(
    mut watcher: Watcher,
    client: Arc<dyn ContainerClient>,
    notifier: Arc<dyn Notifier>,
    log: Logger,
    shutdown: impl Future<Output = ()>,
) -> ExitCode {
    let Some(events) = watcher.events() else {
        log.error(format_args!("Event channel already taken"));
        return ExitCode::FAILURE;
    };

    let cancel = CancellationToken::new();
    // Ends once the watcher closes the channel, after the loop has stopped.
    let dispatcher = tokio::spawn(alerts::run_dispatcher(
        CancellationToken::new(),
        events,
        notifier,
        log.scoped("docker_notifier::alerts"),
    ));
    let mut poll_loop = watcher.start(cancel.clone());

    let stopped_on_its_own = tokio::select! {
        () = shutdown => false,
        result = &mut poll_loop => {
            report_join(&log, "Poll loop", result);
            log.error(format_args!("Watcher stopped unexpectedly, shutting down"));
            true
        }
    };

    cancel.cancel();
    if !stopped_on_its_own {
        report_join(&log, "Poll loop", poll_loop.await);
    }
    watcher.cleanup();
    report_join(&log, "Dispatcher", dispatcher.await);

    close_client(client.as_ref(), &log).await;

    if stopped_on_its_own {
        ExitCode::FAILURE
    } else {
        log.info(format_args!("Shutdown complete"));
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();
    let config = match config::Config::try_init(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}\n\nFor more information, try '--help'.");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.debug);
    let log = Logger::global("docker_notifier");
    log.info(format_args!("🐳 Docker Notifier starting..."));

    let client: Arc<dyn ContainerClient> =
        match DockerContainerClient::connect(
            config.label_enable,
            log.scoped("docker_notifier::container"),
        ) {
            Ok(client) => Arc::new(client),
            Err(e) if e.is_permission_denied() => {
                log.error(format_args!("{SOCKET_PERMISSION_HINT}"));
                return ExitCode::FAILURE;
            }
            Err(e) => {
                log.error(format_args!("Failed to initialize Docker client: {e}"));
                return ExitCode::FAILURE;
            }
        };

    if !check_docker_access(client.as_ref(), &log).await {
        close_client(client.as_ref(), &log).await;
        return ExitCode::FAILURE;
    }

    let notifier = match TelegramClient::new(
        &config.telegram_token,
        &config.telegram_chat_id,
        log.scoped("docker_notifier::telegram"),
    ) {
        Ok(notifier) => notifier.with_api_base(&config.telegram_api_url),
        Err(e) => {
            log.error(format_args!("Failed to initialize Telegram client: {e}"));
            return ExitCode::FAILURE;
        }
    };

    let watcher = match Watcher::new(
        Arc::clone(&client),
        config.watcher_options(),
        log.scoped("docker_notifier::watcher"),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            log.error(format_args!("Failed to initialize watcher: {e}"));
            return ExitCode::FAILURE;
        }
    };

    log.info(format_args!(
        "Watcher started, polling logs every {}s",
        config.interval.as_secs()
    ));
    if config.label_enable {
        log.info(format_args!(
            "Only containers with label {LABEL_ENABLE_KEY}={LABEL_ENABLE_VALUE} will be monitored"
        ));
    }

    let shutdown = {
        let log = log.clone();
        async move {
            match signals::shutdown_signal().await {
                Ok(sig) => log.info(format_args!("Received {sig}, shutting down...")),
                Err(e) => log.error(format_args!(
                    "Unable to listen for signals, shutting down: {e}"
                )),
            }
        }
    };

    supervise(watcher, client, Arc::new(notifier), log, shutdown).await
}
