//! Rate-limit handling for part fetches
//!
//! A rate-limited fetch sleeps until the resume time the server indicated (or a fixed
//! fallback) and is retried exactly once. Being rate limited again right after that is
//! fatal for the fetch.
//!
//! # Example
//!
//! ```no_run
//! use content_dl::fetch::{FetchRequest, HttpFetcher};
//! use content_dl::retry::fetch_with_rate_limit;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> content_dl::Result<()> {
//! let fetcher = HttpFetcher::new()?;
//! let request = FetchRequest::new("https://example.com/page1.jpg");
//! let bytes = fetch_with_rate_limit(
//!     &fetcher,
//!     &request,
//!     Duration::from_secs(60),
//!     &CancellationToken::new(),
//! )
//! .await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

use crate::error::FetchError;
use crate::fetch::{FetchRequest, PartFetcher};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Values above this are unix timestamps rather than delays in seconds
const UNIX_TIMESTAMP_THRESHOLD: i64 = 1_000_000_000;

/// Work out how long to wait before resuming a rate-limited request
///
/// Accepts a delay in seconds, a unix timestamp, or an HTTP date. Anything else, or a
/// missing value, yields `fallback`. Resume times in the past yield zero.
pub fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>, fallback: Duration) -> Duration {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return fallback;
    };

    if let Ok(number) = value.parse::<i64>() {
        if number < 0 {
            return fallback;
        }
        if number < UNIX_TIMESTAMP_THRESHOLD {
            return Duration::from_secs(number as u64);
        }
        return until(DateTime::from_timestamp(number, 0), now, fallback);
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => until(Some(at.with_timezone(&Utc)), now, fallback),
        Err(_) => fallback,
    }
}

fn until(at: Option<DateTime<Utc>>, now: DateTime<Utc>, fallback: Duration) -> Duration {
    match at {
        Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO),
        None => fallback,
    }
}

/// Run a single fetch, aborting when `cancel` fires
pub async fn fetch_cancellable<F>(
    fetcher: &F,
    request: &FetchRequest,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError>
where
    F: PartFetcher + ?Sized,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = fetcher.fetch(request) => result,
    }
}

/// Fetch with one sleep-and-resume on rate limiting
///
/// Returns [`FetchError::RateLimitExceeded`] when the resumed request is rate limited
/// too, and [`FetchError::Cancelled`] when `cancel` fires during the fetch or the sleep.
pub async fn fetch_with_rate_limit<F>(
    fetcher: &F,
    request: &FetchRequest,
    fallback: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError>
where
    F: PartFetcher + ?Sized,
{
    let retry_after = match fetch_cancellable(fetcher, request, cancel).await {
        Err(FetchError::RateLimited { retry_after }) => retry_after,
        other => return other,
    };

    let wait = parse_retry_after(retry_after.as_deref(), Utc::now(), fallback);
    tracing::warn!(
        url = %request.url,
        wait_ms = wait.as_millis() as u64,
        "Hit rate limit, sleeping before resuming request"
    );

    tokio::select! {
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        _ = tokio::time::sleep(wait) => {}
    }

    match fetch_cancellable(fetcher, request, cancel).await {
        Err(FetchError::RateLimited { .. }) => {
            tracing::error!(url = %request.url, "Rate limited again after waiting");
            Err(FetchError::RateLimitExceeded {
                url: request.url.clone(),
            })
        }
        other => other,
    }
}
