use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    parley_auto_reply::{Collaborators, DispatchCoordinator, EchoBackend},
    parley_channels::{ConsoleOutbound, MessageNormalizer, StdinLineNormalizer},
    parley_common::SystemClock,
    parley_config::ParleyConfig,
    parley_greeting::FileWhitelistSource,
    tokio::io::{AsyncBufReadExt, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

/// Extra time allowed for in-flight reply cycles once stdin closes.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(config: ParleyConfig) -> Result<()> {
    let coordinator = DispatchCoordinator::new(&config, Collaborators {
        backend: Arc::new(EchoBackend),
        outbound: Arc::new(ConsoleOutbound::stdout()),
        whitelist: Arc::new(FileWhitelistSource::new(&config.greeting.whitelist_path)),
        clock: Arc::new(SystemClock),
    })?;
    let normalizer = StdinLineNormalizer::new(config.channels.identify_by)
        .with_image_prefix(config.reply.image_create_prefix.clone());

    let cancel = CancellationToken::new();
    let reaper = Arc::clone(coordinator.reaper()).spawn(cancel.clone());

    info!(
        quiet_period_secs = config.debounce.quiet_period_secs,
        greeting = config.greeting.enabled,
        "reading messages from stdin (session|user|text)"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let interrupted = loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match normalizer.normalize(line) {
                    Some(msg) => coordinator.on_message(msg).await,
                    None => debug!("ignoring empty line"),
                },
                None => {
                    info!("stdin closed");
                    break false;
                },
            },
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                break true;
            },
        }
    };

    if !interrupted {
        tokio::select! {
            () = drain(&coordinator, drain_limit(&config)) => {},
            _ = &mut shutdown => info!("interrupted while draining"),
        }
    }

    coordinator.shutdown();
    cancel.cancel();
    if let Err(e) = reaper.await {
        warn!(error = %e, "reaper task failed");
    }
    Ok(())
}

/// Long enough for the last pending query to flush and use its whole retry
/// budget.
fn drain_limit(config: &ParleyConfig) -> Duration {
    let attempts = config.reply.retry_attempts.max(1);
    let per_attempt = config.reply.request_timeout() + config.reply.retry_backoff();
    config.debounce.quiet_period() + per_attempt * attempts + DRAIN_GRACE
}

/// Wait for buffered queries to flush and their reply cycles to finish.
async fn drain(coordinator: &DispatchCoordinator, limit: Duration) {
    let debouncer = coordinator.debouncer();
    if !debouncer.wait_idle(limit).await {
        warn!(
            pending = debouncer.pending_count(),
            flushing = debouncer.flushing_count(),
            "giving up on unfinished queries"
        );
    }
}
