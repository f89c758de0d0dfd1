//! Failover across candidate models and retry backoff

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::config::{FailoverConfig, StrategyKind};
use crate::cost::CostTracker;
use crate::dispatcher::RequestDispatcher;
use crate::performance::{PerformanceMonitor, DEFAULT_WINDOW};
use crate::request::{LlmRequest, LlmResponse};

/// Retry policy for failed requests
#[derive(Debug, Clone)]
pub struct RetryPolicy
{   pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    pub fn from_config(config: &FailoverConfig) -> Self
    {   RetryPolicy::new(
          config.backoff_multiplier,
          config.initial_backoff_ms
        )
    }

    /// Calculate backoff duration for attempt number
    pub fn backoff_for_attempt(
      &self
    , attempt: usize
    ) -> Duration
    {   debug!("Calculating backoff for attempt {}", attempt);
        let multiplier
          = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(
          (self.initial_backoff.as_millis() as f32
            * multiplier) as u64
        )
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(2.0, 100)
    }
}

/// Caller-supplied selection over the remaining candidates
pub type CustomSelector
  = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

/// How the next candidate model is picked
#[derive(Clone)]
pub enum FailoverStrategy
{   /// Cycle through candidates across calls
    RoundRobin
  , /// Lowest recent mean latency first
    LeastLatency
  , /// Highest recent success rate first
    MostReliable
  , /// Cheapest per 1000 tokens first
    CostOptimized
  , Custom(CustomSelector)
}

impl std::fmt::Debug for FailoverStrategy
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   match self
        {   FailoverStrategy::RoundRobin => write!(f, "RoundRobin")
          , FailoverStrategy::LeastLatency => write!(f, "LeastLatency")
          , FailoverStrategy::MostReliable => write!(f, "MostReliable")
          , FailoverStrategy::CostOptimized => write!(f, "CostOptimized")
          , FailoverStrategy::Custom(_) => write!(f, "Custom(..)")
        }
    }
}

impl From<StrategyKind> for FailoverStrategy
{   fn from(kind: StrategyKind) -> Self
    {   match kind
        {   StrategyKind::RoundRobin => FailoverStrategy::RoundRobin
          , StrategyKind::LeastLatency => FailoverStrategy::LeastLatency
          , StrategyKind::MostReliable => FailoverStrategy::MostReliable
          , StrategyKind::CostOptimized => FailoverStrategy::CostOptimized
        }
    }
}

/// Picks models from a candidate list and walks the list on failure
pub struct FailoverManager
{   strategy: FailoverStrategy
  , cursor: AtomicUsize
  , performance: Arc<PerformanceMonitor>
  , cost: Arc<CostTracker>
  , catalog: Arc<ModelCatalog>
  , retry_policy: RetryPolicy
}

impl FailoverManager
{   /// Create a manager with no backoff between attempts
    pub fn new(
      strategy: FailoverStrategy
    , performance: Arc<PerformanceMonitor>
    , cost: Arc<CostTracker>
    , catalog: Arc<ModelCatalog>
    ) -> Self
    {   debug!("Creating FailoverManager with {:?}", strategy);
        FailoverManager
        {   strategy
          , cursor: AtomicUsize::new(0)
          , performance
          , cost
          , catalog
          , retry_policy: RetryPolicy::new(1.0, 0)
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self
    {   self.retry_policy = retry_policy;
        self
    }

    pub fn strategy(&self) -> &FailoverStrategy
    {   &self.strategy
    }

    fn advance_cursor(&self, len: usize) -> usize
    {   self.cursor.fetch_add(1, Ordering::SeqCst) % len
    }

    /// Observed cost per 1000 tokens, catalog price before any usage
    fn unit_cost(&self, model_id: &str) -> Option<f64>
    {   self.cost.cost_per_1k_tokens(model_id)
          .or_else(|| {
            self.catalog.find(model_id).map(|m| m.pricing.blended_per_1k())
          })
    }

    /// Candidates sorted by a metric, unknown values last.
    /// Stable, so ties keep the caller's order.
    fn sorted_by<F>(&self, candidates: &[String], metric: F) -> Vec<String>
    where
      F: Fn(&str) -> Option<f64>
    {   let mut keyed: Vec<(Option<f64>, &String)> = candidates.iter()
          .map(|m| (metric(m.as_str()), m))
          .collect();
        keyed.sort_by(|(a, _), (b, _)| match (a, b)
        {   (Some(a), Some(b)) => a.total_cmp(b)
          , (Some(_), None) => std::cmp::Ordering::Less
          , (None, Some(_)) => std::cmp::Ordering::Greater
          , (None, None) => std::cmp::Ordering::Equal
        });
        keyed.into_iter().map(|(_, m)| m.clone()).collect()
    }

    /// Full ordering under the current strategy and statistics.
    /// Does not move the round-robin cursor.
    pub fn ordered(&self, candidates: &[String]) -> Vec<String>
    {   if candidates.is_empty()
        {   return vec![];
        }
        match &self.strategy
        {   FailoverStrategy::RoundRobin => {
              let mut rotated = candidates.to_vec();
              let start = self.cursor.load(Ordering::SeqCst)
                % candidates.len();
              rotated.rotate_left(start);
              rotated
            }
          , FailoverStrategy::LeastLatency => {
              self.sorted_by(candidates, |m| {
                let stats = self.performance
                  .average_performance(m, DEFAULT_WINDOW);
                (stats.sample_count > 0)
                  .then(|| stats.average_duration.as_secs_f64())
              })
            }
          , FailoverStrategy::MostReliable => {
              self.sorted_by(candidates, |m| {
                let stats = self.performance
                  .average_performance(m, DEFAULT_WINDOW);
                (stats.sample_count > 0).then(|| -stats.success_rate)
              })
            }
          , FailoverStrategy::CostOptimized => {
              self.sorted_by(candidates, |m| self.unit_cost(m))
            }
          , FailoverStrategy::Custom(select) => {
              let mut remaining = candidates.to_vec();
              let mut order = Vec::with_capacity(remaining.len());
              while !remaining.is_empty()
              {   let pick = select(&remaining)
                    .and_then(|p| remaining.iter().position(|m| *m == p))
                    .unwrap_or(0);
                  order.push(remaining.remove(pick));
              }
              order
            }
        }
    }

    /// Pick one model from `candidates`
    pub fn select_next(&self, candidates: &[String]) -> Option<String>
    {   if candidates.is_empty()
        {   return None;
        }
        let chosen = match &self.strategy
        {   FailoverStrategy::RoundRobin => {
              candidates[self.advance_cursor(candidates.len())].clone()
            }
          , FailoverStrategy::Custom(select) => {
              match select(candidates)
              {   Some(pick) if candidates.contains(&pick) => pick
                , other => {
                    warn!(
                      "Custom selector returned {:?}, using first candidate",
                      other
                    );
                    candidates[0].clone()
                  }
              }
            }
          , _ => self.ordered(candidates).swap_remove(0)
        };
        debug!("Selected {} from {} candidates", chosen, candidates.len());
        Some(chosen)
    }

    /// Try candidates one at a time until one succeeds.
    ///
    /// Each attempt goes through the dispatcher, so it is rate limited
    /// and accounted on its own. Performance-based strategies re-rank
    /// the remaining candidates after every failure.
    pub async fn send_with_failover(
      &self
    , dispatcher: &RequestDispatcher
    , request: &LlmRequest
    , candidates: &[String]
    ) -> crate::Result<LlmResponse>
    {   let mut remaining: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates
        {   if !remaining.contains(candidate)
            {   remaining.push(candidate.clone());
            }
        }
        if remaining.is_empty()
        {   return Err(crate::Error::NoModelSelected);
        }

        if let FailoverStrategy::RoundRobin = self.strategy
        {   let start = self.advance_cursor(remaining.len());
            remaining.rotate_left(start);
        }

        let mut attempts = 0usize;
        let mut last_error = None;

        while !remaining.is_empty()
        {   let model = match &self.strategy
            {   FailoverStrategy::RoundRobin => remaining.remove(0)
              , _ => {
                  let pick = self.select_next(&remaining)
                    .and_then(|p| remaining.iter().position(|m| *m == p))
                    .unwrap_or(0);
                  remaining.remove(pick)
                }
            };

            if attempts > 0
            {   let backoff = self.retry_policy
                  .backoff_for_attempt(attempts - 1);
                if !backoff.is_zero()
                {   tokio::time::sleep(backoff).await;
                }
            }
            attempts += 1;

            match dispatcher.send_to(request, &model).await
            {   Ok(response) => {
                  if attempts > 1
                  {   info!("Failover succeeded on {} after {} attempts",
                        model, attempts);
                  }
                  return Ok(response);
                }
              , Err(e) if !e.is_retriable() => {
                  warn!("{} failed with non-retriable error: {}", model, e);
                  return Err(e);
                }
              , Err(e) => {
                  warn!(
                    "{} failed ({}), {} candidates left",
                    model, e, remaining.len()
                  );
                  last_error = Some(e);
                }
            }
        }

        let last_error = last_error.unwrap_or(crate::Error::NoModelSelected);
        Err(crate::Error::AllCandidatesFailed
        {   attempts
          , last_error: Box::new(last_error)
        })
    }
}
