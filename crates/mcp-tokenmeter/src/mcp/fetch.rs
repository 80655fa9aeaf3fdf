//! One complete fetch: open a session, enumerate, always close.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::enumerator::collect_definitions;
use super::session::{Session, SessionOptions};
use super::types::{FetchResult, LaunchSpec};
use crate::error::FetchError;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub session: SessionOptions,
    /// Budget for the whole run, handshake included.
    pub overall_timeout: Option<Duration>,
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Launch `spec`, enumerate everything it advertises and shut it down.
///
/// Cancellation and the overall timeout abort the run; the server is
/// terminated and nothing collected so far is returned.
pub async fn fetch_definitions(
    spec: &LaunchSpec,
    options: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<FetchResult, FetchError> {
    let started = Instant::now();
    let until = options.overall_timeout.map(|t| started + t);
    let timed_out = || FetchError::TimedOut(options.overall_timeout.unwrap_or_default());

    // Dropping an in-flight open kills the child via kill_on_drop.
    let mut session = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        _ = deadline(until) => return Err(timed_out()),
        opened = Session::open(spec, &options.session) => opened?,
    };

    let capabilities = session.capabilities();
    let server = session.server_info().clone();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        _ = deadline(until) => Err(timed_out()),
        collected = collect_definitions(&mut session, capabilities, server) => {
            collected.map_err(FetchError::from)
        }
    };
    session.close().await;

    match &outcome {
        Ok(result) => tracing::info!(
            "fetched {} definition(s) with {} warning(s) in {}ms",
            result.len(),
            result.warnings.len(),
            started.elapsed().as_millis()
        ),
        Err(e) => tracing::warn!("fetch from `{}` failed: {}", spec.display(), e),
    }
    outcome
}
