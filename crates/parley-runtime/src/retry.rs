use std::future::Future;
use std::time::Duration;

use parley_contract::TransportError;
use sha2::{Digest, Sha256};

use crate::config::RetryConfig;

/// Exponential delay for `attempt` (1-based) plus jitter derived from `seed`,
/// so replays of the same failure wait the same amount.
pub(crate) fn retry_delay_ms(base_delay_ms: u64, jitter_ms: u64, attempt: usize, seed: &str) -> u64 {
    if base_delay_ms == 0 {
        return 0;
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let delay = base_delay_ms.saturating_mul(1_u64 << exponent);
    if jitter_ms == 0 {
        return delay;
    }
    let digest = Sha256::new()
        .chain_update(seed.as_bytes())
        .chain_update(attempt.to_le_bytes())
        .finalize();
    let mut seed_bytes = [0_u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    delay.saturating_add(u64::from_le_bytes(seed_bytes) % jitter_ms.saturating_add(1))
}

/// Runs `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent. Only `TransportError::Transient` is retried.
pub(crate) async fn with_transport_retry<T, F, Fut>(
    policy: &RetryConfig,
    seed: &str,
    mut operation: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1_usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay_ms =
                    retry_delay_ms(policy.base_delay_ms, policy.jitter_ms, attempt, seed);
                tracing::debug!(seed, attempt, delay_ms, %error, "retrying transport call");
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}
