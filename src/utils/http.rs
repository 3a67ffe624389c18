// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use rand::seq::IndexedRandom;

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Fallback identity when the configured pool is empty.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; jobwatch/0.1)";

/// Create a configured asynchronous HTTP client.
///
/// The User-Agent is set per request, see [`pick_user_agent`].
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Pick a client identity at random from the pool.
pub fn pick_user_agent(pool: &[String]) -> &str {
    pool.choose(&mut rand::rng())
        .map(String::as_str)
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// Base delay plus a uniformly random jitter in `[0, jitter_ms]`.
pub fn jittered_delay(base: Duration, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return base;
    }
    let jitter = rand::random_range(0..=jitter_ms);
    base + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_from_pool() {
        let pool = vec!["a".to_string(), "b".to_string()];
        for _ in 0..20 {
            assert!(["a", "b"].contains(&pick_user_agent(&pool)));
        }
        assert_eq!(pick_user_agent(&[]), DEFAULT_USER_AGENT);
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let delay = jittered_delay(base, 1000);
            assert!(delay >= base && delay <= Duration::from_millis(2000));
        }
        assert_eq!(jittered_delay(base, 0), base);
    }
}
