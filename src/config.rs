//! Configuration for the provider, failover, rate limiting and batching

use serde::{Deserialize, Serialize};
use std::path::Path;
use log::{debug, error};

/// Default OpenRouter-compatible API base
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig
{   /// Provider name, used as the registry key
    pub name: String
  , /// API base URL
    pub api_base: String
  , /// Environment variable holding the API key
    pub api_key_env: String
  , /// Prefix every valid key starts with
    pub api_key_prefix: String
  , /// Request timeout in seconds
    pub timeout_secs: u64
  , /// Sent as HTTP-Referer for attribution
    pub referer: Option<String>
  , /// Sent as X-Title for attribution
    pub app_title: Option<String>
}

impl Default for ProviderConfig
{   fn default() -> Self
    {   ProviderConfig
        {   name: "openrouter".to_string()
          , api_base: DEFAULT_API_BASE.to_string()
          , api_key_env: "OPENROUTER_API_KEY".to_string()
          , api_key_prefix: "sk-or-".to_string()
          , timeout_secs: 60
          , referer: None
          , app_title: Some("allm-router".to_string())
        }
    }
}

impl ProviderConfig
{   /// Read the API key from the environment and check its shape.
    /// Fails before any network call is attempted.
    pub fn resolve_api_key(&self) -> crate::Result<String>
    {   let key = std::env::var(&self.api_key_env)
          .map_err(|_| {
            error!("{} is not set", self.api_key_env);
            crate::Error::MissingApiKey(self.api_key_env.clone())
          })?;
        self.validate_api_key(key.trim())?;
        Ok(key.trim().to_string())
    }

    /// Check a key against the configured prefix
    pub fn validate_api_key(&self, key: &str) -> crate::Result<()>
    {   if key.is_empty()
        {   return Err(crate::Error::MissingApiKey(
              self.api_key_env.clone()
            ));
        }
        if !key.starts_with(&self.api_key_prefix)
        {   error!("API key does not start with {}", self.api_key_prefix);
            return Err(crate::Error::InvalidConfiguration(format!(
              "API key in {} must start with '{}'",
              self.api_key_env, self.api_key_prefix
            )));
        }
        Ok(())
    }
}

/// Failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig
{   /// Enable automatic failover
    pub enabled: bool
  , /// How the next candidate is chosen
    pub strategy: StrategyKind
  , /// Models tried when the request names none, or after it fails
    pub fallback_models: Vec<String>
  , /// Backoff multiplier between attempts
    pub backoff_multiplier: f32
  , /// Initial backoff between attempts in milliseconds, 0 disables
    pub initial_backoff_ms: u64
}

impl Default for FailoverConfig
{   fn default() -> Self
    {   FailoverConfig
        {   enabled: true
          , strategy: StrategyKind::RoundRobin
          , fallback_models: vec![]
          , backoff_multiplier: 2.0
          , initial_backoff_ms: 0
        }
    }
}

/// Serializable subset of failover strategies.
/// Custom selectors are installed in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind
{   RoundRobin
  , LeastLatency
  , MostReliable
  , CostOptimized
}

/// Which requests share a rate limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope
{   /// One budget for every model
    Global
  , /// One budget per model id
    PerModel
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig
{   /// Requests admitted per window
    pub max_requests: usize
  , /// Window width in seconds
    pub window_secs: u64
  , pub scope: RateLimitScope
}

impl Default for RateLimitConfig
{   fn default() -> Self
    {   RateLimitConfig
        {   max_requests: 100
          , window_secs: 60
          , scope: RateLimitScope::Global
        }
    }
}

/// Batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig
{   /// Requests in flight at once
    pub max_concurrency: usize
}

impl Default for BatchConfig
{   fn default() -> Self
    {   BatchConfig
        {   max_concurrency: 3
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig
{   /// Provider configuration
    pub provider: ProviderConfig
  , /// Failover configuration
    pub failover: FailoverConfig
  , /// Rate limit configuration
    pub rate_limit: RateLimitConfig
  , /// Batch configuration
    pub batch: BatchConfig
}

impl RouterConfig
{   /// Parse a JSON config, missing sections take defaults
    pub fn from_json_str(json: &str) -> crate::Result<Self>
    {   let config: RouterConfig = serde_json::from_str(json)
          .map_err(|e| {
            crate::Error::InvalidConfiguration(e.to_string())
          })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self>
    {   let path = path.as_ref();
        debug!("Loading router config from {}", path.display());
        let json = std::fs::read_to_string(path)
          .map_err(|e| {
            crate::Error::InvalidConfiguration(format!(
              "{}: {}", path.display(), e
            ))
          })?;
        Self::from_json_str(&json)
    }

    /// Reject values the router cannot run with
    pub fn validate(&self) -> crate::Result<()>
    {   if self.rate_limit.max_requests == 0
        {   return Err(crate::Error::InvalidConfiguration(
              "rate_limit.max_requests must be > 0".to_string()
            ));
        }
        if self.rate_limit.window_secs == 0
        {   return Err(crate::Error::InvalidConfiguration(
              "rate_limit.window_secs must be > 0".to_string()
            ));
        }
        if self.batch.max_concurrency == 0
        {   return Err(crate::Error::InvalidConfiguration(
              "batch.max_concurrency must be > 0".to_string()
            ));
        }
        if self.provider.api_base.is_empty()
        {   return Err(crate::Error::InvalidConfiguration(
              "provider.api_base is empty".to_string()
            ));
        }
        Ok(())
    }
}
