//! Sliding-window admission control for outbound requests

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{RateLimitConfig, RateLimitScope};

const GLOBAL_KEY: &str = "*";

/// Caps requests per trailing time window.
///
/// With [`RateLimitScope::Global`] every model draws from one budget;
/// with [`RateLimitScope::PerModel`] each model id gets its own window.
#[derive(Debug)]
pub struct RateLimiter
{   max_requests: usize
  , window: Duration
  , scope: RateLimitScope
  , windows: Mutex<HashMap<String, VecDeque<Instant>>>
}

impl RateLimiter
{   /// Create a global limiter
    pub fn new(max_requests: usize, window: Duration) -> Self
    {   RateLimiter
        {   max_requests
          , window
          , scope: RateLimitScope::Global
          , windows: Mutex::new(HashMap::new())
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self
    {   RateLimiter
        {   scope: config.scope
          , ..RateLimiter::new(
              config.max_requests,
              Duration::from_secs(config.window_secs)
            )
        }
    }

    fn key<'a>(&self, model_id: &'a str) -> &'a str
    {   match self.scope
        {   RateLimitScope::Global => GLOBAL_KEY
          , RateLimitScope::PerModel => model_id
        }
    }

    fn prune(window: &mut VecDeque<Instant>, span: Duration, now: Instant)
    {   while let Some(&oldest) = window.front()
        {   if now.duration_since(oldest) >= span
            {   window.pop_front();
            } else
            {   break;
            }
        }
    }

    /// Admit one attempt or fail without recording it
    pub fn check_and_record(&self, model_id: &str) -> crate::Result<()>
    {   let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows
          .entry(self.key(model_id).to_string())
          .or_default();
        Self::prune(window, self.window, now);

        if window.len() >= self.max_requests
        {   let retry_after = window.front()
              .map(|&oldest| {
                self.window.saturating_sub(now.duration_since(oldest))
              })
              .unwrap_or(self.window);
            warn!(
              "Rate limit hit for {} ({} in {:?}), retry after {:?}",
              self.key(model_id), window.len(), self.window, retry_after
            );
            return Err(crate::Error::RateLimitExceeded { retry_after });
        }

        window.push_back(now);
        debug!(
          "Admitted request for {} ({}/{})",
          model_id, window.len(), self.max_requests
        );
        Ok(())
    }

    /// Admissions left in the current window
    pub fn remaining(&self, model_id: &str) -> usize
    {   let now = Instant::now();
        let mut windows = self.windows.lock();
        match windows.get_mut(self.key(model_id))
        {   Some(window) => {
              Self::prune(window, self.window, now);
              self.max_requests.saturating_sub(window.len())
            }
          , None => self.max_requests
        }
    }

    pub fn scope(&self) -> RateLimitScope
    {   self.scope
    }

    pub fn reset(&self)
    {   self.windows.lock().clear();
    }
}

impl Default for RateLimiter
{   fn default() -> Self
    {   RateLimiter::from_config(&RateLimitConfig::default())
    }
}
