#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Call `f` until it succeeds or `deadline` comes into view. The last error
/// is returned once the next sleep would cross `deadline`.
pub async fn retry_until<F, Fut, T, E>(
    deadline: Instant,
    mut f: F,
    mut next_delay: impl FnMut(u32) -> Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                let delay = next_delay(attempt);
                if Instant::now() + delay >= deadline {
                    return Err(e);
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff capped at `max_ms`, with the upper half jittered.
pub fn exponential_with_jitter(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let pow = 1u64 << attempt.min(16);
    let raw = base_ms.saturating_mul(pow);
    let capped = raw.min(max_ms);
    let jitter = fastrand::u64(0..(capped / 2).max(1));
    Duration::from_millis(capped / 2 + jitter)
}
