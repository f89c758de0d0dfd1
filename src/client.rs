use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use log::{debug, error, info, warn};

use crate::batch::{BatchCoordinator, BatchReport};
use crate::catalog::ModelCatalog;
use crate::config::RouterConfig;
use crate::cost::{CostStats, CostTracker, UsagePeriod};
use crate::dispatcher::RequestDispatcher;
use crate::failover::{FailoverManager, FailoverStrategy, RetryPolicy};
use crate::load_balancer::LoadBalancer;
use crate::performance::{AveragePerformance, PerformanceMonitor, DEFAULT_WINDOW};
use crate::providers::{OpenRouterTransport, ProviderRegistry};
use crate::rate_limit::RateLimiter;
use crate::request::{LlmRequest, LlmResponse};
use crate::{ModelDescriptor, TaskType};

/// Per-model usage and performance summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelAnalytics
{   pub cost: CostStats
  , pub performance: AveragePerformance
}

/// Entry point for callers: owns one instance of every component
/// and wires them together.
pub struct LlmRouter
{   config: RouterConfig
  , catalog: Arc<ModelCatalog>
  , cost: Arc<CostTracker>
  , performance: Arc<PerformanceMonitor>
  , rate_limiter: Arc<RateLimiter>
  , load_balancer: Arc<LoadBalancer>
  , dispatcher: Arc<RequestDispatcher>
  , failover: Arc<FailoverManager>
  , batch: BatchCoordinator
}

impl LlmRouter
{   /// Build a router talking to the configured OpenRouter endpoint.
    /// Fails before any network call if the API key is missing or
    /// malformed.
    pub fn new(config: RouterConfig) -> crate::Result<Self>
    {   config.validate()?;
        let transport = OpenRouterTransport::from_env(&config.provider)?;
        Self::with_registry(
          config,
          ProviderRegistry::with_default(Arc::new(transport))
        )
    }

    /// Build a router over caller-supplied transports
    pub fn with_registry(
      config: RouterConfig
    , registry: ProviderRegistry
    ) -> crate::Result<Self>
    {   config.validate()?;
        debug!("Initializing LlmRouter");

        let catalog = Arc::new(ModelCatalog::new());
        let cost = Arc::new(CostTracker::new());
        let performance = Arc::new(PerformanceMonitor::new());
        let rate_limiter = Arc::new(
          RateLimiter::from_config(&config.rate_limit)
        );
        let dispatcher = Arc::new(RequestDispatcher::new(
          registry,
          Arc::clone(&catalog),
          Arc::clone(&cost),
          Arc::clone(&performance),
          Arc::clone(&rate_limiter)
        ));
        let failover = Arc::new(
          FailoverManager::new(
            config.failover.strategy.into(),
            Arc::clone(&performance),
            Arc::clone(&cost),
            Arc::clone(&catalog)
          )
          .with_retry_policy(RetryPolicy::from_config(&config.failover))
        );
        let batch = BatchCoordinator::new(config.batch.max_concurrency);

        Ok(LlmRouter
        {   config
          , catalog
          , cost
          , performance
          , rate_limiter
          , load_balancer: Arc::new(LoadBalancer::new())
          , dispatcher
          , failover
          , batch
        })
    }

    /// Swap the failover strategy, e.g. for a custom selector
    pub fn with_failover_strategy(mut self, strategy: FailoverStrategy)
      -> Self
    {   self.failover = Arc::new(
          FailoverManager::new(
            strategy,
            Arc::clone(&self.performance),
            Arc::clone(&self.cost),
            Arc::clone(&self.catalog)
          )
          .with_retry_policy(RetryPolicy::from_config(&self.config.failover))
        );
        self
    }

    pub fn config(&self) -> &RouterConfig { &self.config }

    pub fn catalog(&self) -> &Arc<ModelCatalog> { &self.catalog }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> { &self.cost }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> { &self.performance }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> { &self.rate_limiter }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> { &self.load_balancer }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> { &self.dispatcher }

    pub fn failover(&self) -> &Arc<FailoverManager> { &self.failover }

    /// True while any request is waiting on a provider
    pub fn is_processing(&self) -> bool
    {   self.dispatcher.is_processing()
    }

    /// Reload the model catalog from the default transport
    pub async fn refresh_models(&self) -> crate::Result<usize>
    {   let transport = self.dispatcher.registry()
          .default_transport()
          .ok_or_else(|| {
            error!("No default transport to list models from");
            crate::Error::ProviderNotImplemented("default".to_string())
          })?;
        self.catalog.refresh(transport.as_ref()).await
    }

    /// Models a request without an explicit model may be routed to
    fn candidates_for(&self, request: &LlmRequest) -> Vec<String>
    {   let fallbacks = &self.config.failover.fallback_models;
        if fallbacks.is_empty()
        {   return self.catalog
              .filter_by_capabilities(&request.required_capabilities)
              .into_iter()
              .map(|m| m.id)
              .collect();
        }
        fallbacks.iter()
          .filter(|id| {
            // uncatalogued fallbacks are trusted as configured
            self.catalog.find(id)
              .map(|m| {
                request.required_capabilities.iter()
                  .all(|c| m.has_capability(*c))
              })
              .unwrap_or(true)
          })
          .cloned()
          .collect()
    }

    /// Answer one request.
    ///
    /// A named model is tried first; if it fails with a retriable error
    /// and failover is on, the configured fallbacks are tried in turn.
    /// Without a named model the router picks among the candidates,
    /// through the failover chain when enabled, otherwise by load.
    pub async fn generate_response(&self, request: LlmRequest)
      -> crate::Result<LlmResponse>
    {   let failover = &self.config.failover;

        if let Some(model) = request.model.clone()
        {   let first_error = match self.dispatcher
              .send_to(&request, &model)
              .await
            {   Ok(response) => return Ok(response)
              , Err(e) => e
            };
            if !failover.enabled || !first_error.is_retriable()
            {   return Err(first_error);
            }

            let fallbacks: Vec<String> = failover.fallback_models.iter()
              .filter(|m| **m != model)
              .cloned()
              .collect();
            if fallbacks.is_empty()
            {   return Err(first_error);
            }
            warn!(
              "{} failed ({}), failing over to {} models",
              model, first_error, fallbacks.len()
            );
            return match self.failover
              .send_with_failover(&self.dispatcher, &request, &fallbacks)
              .await
            {   Err(crate::Error::AllCandidatesFailed {
                  attempts, last_error
                }) => Err(crate::Error::AllCandidatesFailed
                {   attempts: attempts + 1
                  , last_error
                })
              , other => other
            };
        }

        let candidates = self.candidates_for(&request);
        if candidates.is_empty()
        {   error!("No candidate model for request");
            return Err(crate::Error::NoModelSelected);
        }

        if failover.enabled
        {   self.failover
              .send_with_failover(&self.dispatcher, &request, &candidates)
              .await
        } else
        {   let model = self.load_balancer.select(&candidates)
              .ok_or(crate::Error::NoModelSelected)?;
            self.dispatcher.send_to(&request, &model).await
        }
    }

    /// Answer many requests with bounded concurrency
    pub async fn process_batch(&self, requests: Vec<LlmRequest>)
      -> BatchReport
    {   self.batch
          .run(requests, |request| self.generate_response(request))
          .await
    }

    /// Best catalogued model for a task
    pub fn select_optimal_model(
      &self
    , task: TaskType
    , preferred_provider: Option<&str>
    ) -> Option<ModelDescriptor>
    {   self.catalog.select_optimal(
          task,
          preferred_provider,
          &self.performance
        )
    }

    /// Recent performance of one model
    pub fn model_performance(&self, model_id: &str) -> AveragePerformance
    {   self.performance.average_performance(model_id, DEFAULT_WINDOW)
    }

    /// Cost and performance per model, all time when `period` is None
    pub fn usage_analytics(&self, period: Option<UsagePeriod>)
      -> BTreeMap<String, ModelAnalytics>
    {   let mut out: BTreeMap<String, ModelAnalytics> = self.cost
          .analytics(period)
          .into_iter()
          .map(|(model, cost)| {
            let analytics = ModelAnalytics
            {   cost
              , performance: self.model_performance(&model)
            };
            (model, analytics)
          })
          .collect();
        // models that only ever failed have no ledger rows
        let failed_only = if period.is_none()
        {   self.performance.models()
        } else
        {   vec![]
        };
        for model in failed_only
        {   if !out.contains_key(&model)
            {   let performance = self.model_performance(&model);
                out.insert(model, ModelAnalytics
                {   cost: CostStats::default()
                  , performance
                });
            }
        }
        info!("Usage analytics for {} models", out.len());
        out
    }
}
