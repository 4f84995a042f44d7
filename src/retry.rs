//! Retry policy for transport failures while polling

use std::time::Duration;
use log::debug;

/// Backoff never grows past this
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry policy for failed status queries
#[derive(Debug, Clone)]
pub struct RetryPolicy
{   pub max_retries: usize
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      max_retries: usize
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_retries
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    pub fn from_config(config: &crate::config::RetryConfig) -> Self
    {   RetryPolicy::new(
          config.max_retries
        , config.backoff_multiplier
        , config.initial_backoff_ms
        )
    }

    /// Policy that surfaces the first failure
    pub fn none() -> Self
    {   RetryPolicy::new(0, 1.0, 0)
    }

    /// Whether `error` on retry number `attempt` (zero-based)
    /// deserves another try
    pub fn should_retry(
      &self
    , attempt: usize
    , error: &crate::error::Error
    ) -> bool
    {   error.is_transient() && attempt < self.max_retries
    }

    /// Calculate backoff duration for attempt number
    pub fn backoff_for_attempt(
      &self
    , attempt: usize
    ) -> Duration
    {   let multiplier
          = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let millis
          = self.initial_backoff.as_millis() as f32 * multiplier;
        let backoff = if millis.is_finite()
          && millis < MAX_BACKOFF.as_millis() as f32
        {   Duration::from_millis(millis as u64)
        } else
        {   MAX_BACKOFF
        };
        debug!("Backoff for attempt {}: {:?}", attempt, backoff);
        backoff
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::from_config(
          &crate::config::RetryConfig::default()
        )
    }
}
