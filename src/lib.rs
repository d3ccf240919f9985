//! # release-dl
//!
//! Idempotent acquisition pipeline for music releases hosted on third-party file hosts.
//!
//! Given a list of release records, each with one or more candidate download links,
//! release-dl classifies every link by backend, resolves it to a fetchable URL,
//! downloads the payload, detects its real type from magic bytes, extracts archives,
//! and moves the resulting audio into one canonically named folder per release.
//!
//! ## Properties
//!
//! - **Idempotent** - completed releases are never fetched twice
//! - **Resumable** - Mega links hit by a transfer quota are parked and retried after a cooldown
//! - **Event-driven** - consumers subscribe to progress events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use release_dl::{Config, ReleaseProcessor, load_releases, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let releases = load_releases(&config.paths.input)?;
//!     let mut processor = ReleaseProcessor::new(config)?;
//!
//!     let mut events = processor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let stats = run_with_shutdown(&mut processor, &releases, None).await?;
//!     println!("{} new releases", stats.succeeded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Link classification by host
pub mod classify;
/// Configuration types
pub mod config;
/// Mega cooldown and clocks
pub mod cooldown;
/// HTTP download engine
pub mod download;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Magic-byte file type detection
pub mod inspect;
/// Completion and failure ledgers, pending queue
pub mod ledger;
/// Release folder naming and placement
pub mod organize;
/// Release processor (pipeline orchestration)
pub mod processor;
/// Per-backend link resolvers
pub mod resolver;
/// Retry logic for interrupted transfers
pub mod retry;
/// External archivers and the Mega tool
pub mod tools;
/// Core types and events
pub mod types;
/// Scoped per-attempt working directories
pub mod workspace;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use classify::classify;
pub use config::{Config, DownloadConfig, MegaConfig, PathsConfig, ToolsConfig};
pub use cooldown::{Clock, Cooldown, ManualClock, SystemClock};
pub use download::{Fetcher, HttpFetcher};
pub use error::{DownloadError, Error, PostProcessError, ResolveError, Result};
pub use ledger::{LedgerStats, Ledgers};
pub use processor::{Components, ReleaseProcessor, load_releases};
pub use resolver::{Resolution, Resolver, ResolverSet};
pub use tools::{CliTools, ExternalTools};
pub use types::{
    BackendKind, Disposition, Event, Link, Release, RunStats, Signal, SkipReason,
};

use std::future::Future;
use std::sync::atomic::Ordering;

/// Run the processor over `releases`, stopping cleanly on a termination signal.
///
/// The first signal does not interrupt the release in flight: it finishes and is
/// recorded, then the loop stops before the next one and the pending queue is flushed.
/// A second signal abandons the release in flight; see [`run_until_interrupted`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(
    processor: &mut ReleaseProcessor,
    releases: &[Release],
    limit: Option<usize>,
) -> Result<RunStats> {
    run_until_interrupted(processor, releases, limit, wait_for_signal).await
}

/// Run the processor until it finishes or `interrupt` resolves twice.
///
/// Each call of `interrupt` waits for one termination request. The first request sets
/// the shutdown flag. The second drops the run: the release in flight is abandoned
/// without a ledger entry (its workspace and child processes go with it), the pending
/// queue and cooldown are flushed, and [`Error::Interrupted`] is returned.
pub async fn run_until_interrupted<F, Fut>(
    processor: &mut ReleaseProcessor,
    releases: &[Release],
    limit: Option<usize>,
    mut interrupt: F,
) -> Result<RunStats>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let shutdown = processor.shutdown_handle();
    {
        let run = processor.run(releases, limit);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => return result,
            _ = interrupt() => {}
        }
        tracing::warn!("finishing current release before stopping, signal again to abort it");
        shutdown.store(true, Ordering::SeqCst);

        tokio::select! {
            result = &mut run => return result,
            _ = interrupt() => {}
        }
    }

    let post_id = processor.in_flight().unwrap_or_default().to_string();
    tracing::warn!(post_id = %post_id, "aborting release in flight");
    processor.flush()?;
    Err(Error::Interrupted { post_id })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Never report a shutdown that was not requested
            std::future::pending::<()>().await;
        }
    }
}
