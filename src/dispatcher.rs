use chrono::Utc;
use log::{debug, error, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::ModelCatalog;
use crate::cost::CostTracker;
use crate::performance::{quality_score, PerformanceMonitor, PerformanceSample};
use crate::providers::{ChatCompletionRequest, ChatCompletionResponse, ProviderRegistry};
use crate::rate_limit::RateLimiter;
use crate::request::{LlmRequest, LlmResponse, Usage};
use crate::ModelDescriptor;

/// Decrements the in-flight counter when an attempt ends
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a>
{   fn enter(counter: &'a AtomicUsize) -> Self
    {   counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_>
{   fn drop(&mut self)
    {   self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs one attempt of one request against one model.
///
/// Stateless per call: every counter it touches belongs to the
/// trackers handed in at construction.
pub struct RequestDispatcher
{   registry: ProviderRegistry
  , catalog: Arc<ModelCatalog>
  , cost: Arc<CostTracker>
  , performance: Arc<PerformanceMonitor>
  , rate_limiter: Arc<RateLimiter>
  , in_flight: AtomicUsize
}

impl RequestDispatcher
{   pub fn new(
      registry: ProviderRegistry
    , catalog: Arc<ModelCatalog>
    , cost: Arc<CostTracker>
    , performance: Arc<PerformanceMonitor>
    , rate_limiter: Arc<RateLimiter>
    ) -> Self
    {   debug!("Creating RequestDispatcher with {:?}", registry);
        RequestDispatcher
        {   registry
          , catalog
          , cost
          , performance
          , rate_limiter
          , in_flight: AtomicUsize::new(0)
        }
    }

    pub fn registry(&self) -> &ProviderRegistry { &self.registry }

    pub fn catalog(&self) -> &Arc<ModelCatalog> { &self.catalog }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> { &self.cost }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> { &self.performance }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> { &self.rate_limiter }

    /// True while any transport call is outstanding
    pub fn is_processing(&self) -> bool
    {   self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Send to the model named in the request
    pub async fn send(&self, request: &LlmRequest)
      -> crate::Result<LlmResponse>
    {   let model = request.model.as_deref()
          .ok_or_else(|| {
            error!("Request has no model and none was chosen");
            crate::Error::NoModelSelected
          })?;
        self.send_to(request, model).await
    }

    /// Send to an explicitly chosen model
    pub async fn send_to(
      &self
    , request: &LlmRequest
    , model_id: &str
    ) -> crate::Result<LlmResponse>
    {   request.params.validate()?;
        if request.prompt.trim().is_empty()
        {   return Err(crate::Error::InvalidRequest(
              "prompt is empty".to_string()
            ));
        }

        let descriptor = self.catalog.find(model_id);
        if let Some(d) = &descriptor
        {   let requested = request.estimated_tokens();
            if requested > d.context_length
            {   return Err(crate::Error::ContextWindowExceeded
                {   requested
                  , limit: d.context_length
                });
            }
        }

        let transport = self.registry.resolve(model_id)?;
        self.rate_limiter.check_and_record(model_id)?;

        let payload = ChatCompletionRequest::from_request(request, model_id);
        debug!("Dispatching to {} via {}", model_id, transport.provider_id());

        let _in_flight = InFlight::enter(&self.in_flight);
        let started = Instant::now();
        let result = transport.chat_completion(&payload).await;
        let duration = started.elapsed();

        match result
        {   Ok(response) => {
              self.complete(request, model_id, descriptor, response, duration)
            }
          , Err(e) => {
              error!("{} failed after {:?}: {}", model_id, duration, e);
              self.performance.record(
                model_id,
                duration,
                false,
                Some(e.to_string())
              );
              Err(e)
            }
        }
    }

    fn complete(
      &self
    , request: &LlmRequest
    , model_id: &str
    , descriptor: Option<ModelDescriptor>
    , response: ChatCompletionResponse
    , duration: Duration
    ) -> crate::Result<LlmResponse>
    {   let ChatCompletionResponse { id, model, choices, usage } = response;
        let Some(choice) = choices.into_iter().next()
        else
        {   let e = crate::Error::NoChoicesInResponse;
            self.performance.record(
              model_id,
              duration,
              false,
              Some(e.to_string())
            );
            return Err(e);
        };

        let wire = usage.unwrap_or_default();
        let now = Utc::now();
        let priced = match &descriptor
        {   Some(d) => self.cost.record(
              model_id,
              &d.pricing,
              wire.prompt_tokens,
              wire.completion_tokens,
              now
            )
          , None => {
              // not catalogued: trust the provider-reported cost
              Usage::new(
                wire.prompt_tokens,
                wire.completion_tokens,
                wire.cost.unwrap_or(0.0),
                now
              )
              .map(|usage| {
                self.cost.record_usage(model_id, &usage);
                usage
              })
            }
        };
        let usage = match priced
        {   Ok(usage) => usage
          , Err(e) => {
              error!("{} returned unusable usage: {}", model_id, e);
              self.performance.record(
                model_id,
                duration,
                false,
                Some(e.to_string())
              );
              return Err(e);
            }
        };

        let text = choice.message.content;
        let secs = duration.as_secs_f64();
        let tokens_per_second = if secs > 0.0 && usage.completion_tokens() > 0
        {   usage.completion_tokens() as f64 / secs
        } else
        {   0.0
        };
        let quality = quality_score(
          duration,
          text.chars().count(),
          usage.total_tokens()
        );

        let mut sample = PerformanceSample::new(model_id, duration, true, None);
        sample.tokens_per_second = tokens_per_second;
        sample.quality_score = Some(quality);
        self.performance.record_sample(sample);

        info!(
          "{} answered in {:?}: {} tokens, ${:.6}, quality {:.2}",
          model_id, duration, usage.total_tokens(), usage.cost(), quality
        );

        Ok(LlmResponse
        {   text
          , model: model.unwrap_or_else(|| model_id.to_string())
          , usage
          , duration
          , quality_score: quality
          , tokens_per_second
          , success: true
          , error: None
          , finish_reason: choice.finish_reason
          , request_id: id
          , metadata: request.metadata.clone()
        })
    }
}
