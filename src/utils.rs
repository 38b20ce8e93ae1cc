use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

/// Retries an operation up to `attempts` times, sleeping `delay` between
/// failed attempts. The closure receives the 1-based attempt and the total.
///
/// # Errors
/// Returns the final error if all attempts fail.
pub async fn retry_with_backoff<F, Fut, T>(
    attempts: u32,
    delay: Duration,
    mut operation: F,
) -> anyhow::Result<T>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation(attempt, attempts).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts {
                    return Err(err);
                }
                warn!("Attempt {attempt}/{attempts} failed: {err:#}");
                info!("Retrying in {} ...", humantime::format_duration(delay));
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Seconds since the Unix epoch, used to suffix backups and temp dirs.
#[must_use]
pub fn unix_timestamp() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Formats a timestamp as `YYYYmmdd-HHMMSS` for file names.
#[must_use]
pub fn file_stamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year][month][day]-[hour][minute][second]"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Formats a timestamp as `YYYY-mm-dd HH:MM:SS` for humans.
#[must_use]
pub fn human_stamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| at.to_string())
}
