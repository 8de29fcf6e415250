//! Retry backoff policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff policy for retry attempts
///
/// The default is quadratic: the delay before retry `n` is `n²` seconds,
/// capped at `max_interval`. Optional jitter spreads retries to avoid
/// thundering herds; it defaults to 0 so delays are deterministic.
///
/// # Example
///
/// ```
/// use conveyor::reliability::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::quadratic();
/// assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
/// assert_eq!(policy.delay_for_retry(3), Duration::from_secs(9));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Fixed delay overriding the quadratic curve, when set
    #[serde(default, with = "option_duration_millis")]
    pub fixed_interval: Option<Duration>,

    /// Cap on the computed delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Jitter factor (0.0-1.0); 0.1 means ±10% randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::quadratic()
    }
}

impl RetryPolicy {
    /// Quadratic backoff: `retry_count²` seconds, capped at 60 s, no jitter.
    pub fn quadratic() -> Self {
        Self {
            fixed_interval: None,
            max_interval: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    /// Fixed delay between attempts (useful in tests)
    pub fn fixed(interval: Duration) -> Self {
        Self {
            fixed_interval: Some(interval),
            max_interval: interval,
            jitter: 0.0,
        }
    }

    /// Set the delay cap
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the given retry (1-based: the first retry is 1).
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let base = match self.fixed_interval {
            Some(interval) => interval,
            None => Duration::from_secs(u64::from(retry_count).pow(2)),
        };
        let capped = base.min(self.max_interval);

        if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let range = capped.as_secs_f64() * self.jitter;
            let offset = rng.gen_range(-range..=range);
            Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
        } else {
            capped
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
