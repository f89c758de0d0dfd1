pub mod error;
pub mod config;
pub mod providers;
pub mod request;
pub mod catalog;
pub mod cost;
pub mod performance;
pub mod rate_limit;
pub mod failover;
pub mod load_balancer;
pub mod dispatcher;
pub mod batch;
pub mod client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/*

allm-router keeps one request syntax for every model reachable through
an OpenAI-compatible gateway, and decides per call which model to use.

Call path:

  LlmRouter::generate_response
    -> FailoverManager / LoadBalancer     (pick a model)
    -> RequestDispatcher::send_to         (one attempt)
         -> RateLimiter::check_and_record
         -> Transport::chat_completion    (providers/)
         -> CostTracker::record
         -> PerformanceMonitor::record_sample

  LlmRouter::process_batch
    -> BatchCoordinator::run              (bounded fan-out of the above)

Every tracker is an owned service object shared through Arc; nothing
in here is a process-wide singleton.

*/

pub use batch::{BatchCoordinator, BatchFailure, BatchReport};
pub use catalog::ModelCatalog;
pub use client::LlmRouter;
pub use config::RouterConfig;
pub use cost::{CostStats, CostTracker, UsagePeriod};
pub use dispatcher::RequestDispatcher;
pub use error::{Error, ErrorKind, Result};
pub use failover::{FailoverManager, FailoverStrategy, RetryPolicy};
pub use load_balancer::LoadBalancer;
pub use performance::{AveragePerformance, PerformanceMonitor, PerformanceSample};
pub use providers::{ProviderRegistry, Transport};
pub use rate_limit::RateLimiter;
pub use request::{LlmRequest, LlmResponse, SamplingParams, Usage};

/// ALLM STRUCTURES:

/// Something a model is able to do.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash
, Deserialize, Serialize
)]
#[serde(rename_all = "snake_case")]
pub enum Capability
{   /// Plain chat / completion
    TextGeneration
  , /// Writing and explaining code
    CodeGeneration
  , /// Multi-step reasoning models
    Reasoning
  , /// Accepts images alongside text
    Multimodal
  , /// Tool / function calling
    FunctionCalling
}

/// Kind of work a caller wants a model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType
{   General
  , Code
  , Reasoning
  , Creative
  , Analysis
  , Vision
}

impl TaskType
{   /// Capability a model needs to serve this task
    pub fn required_capability(&self) -> Capability
    {   match self
        {   TaskType::General
          | TaskType::Creative => Capability::TextGeneration
          , TaskType::Code => Capability::CodeGeneration
          , TaskType::Reasoning
          | TaskType::Analysis => Capability::Reasoning
          , TaskType::Vision => Capability::Multimodal
        }
    }
}

/// Price of a model in USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct ModelPricing
{   /// Cost per 1000 prompt tokens
    pub prompt_per_1k: f64
  , /// Cost per 1000 completion tokens
    pub completion_per_1k: f64
}

impl ModelPricing
{   pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self
    {   ModelPricing
        {   prompt_per_1k
          , completion_per_1k
        }
    }

    /// Cost of a call with the given token counts
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64
    {   (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
          + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }

    /// Mean of prompt and completion price, used for ranking
    pub fn blended_per_1k(&self) -> f64
    {   (self.prompt_per_1k + self.completion_per_1k) / 2.0
    }
}

/// Static metadata about one callable model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelDescriptor
{   /// Globally unique "provider/model-name"
    pub id: String
  , /// Human-readable name
    pub name: String
  , /// Maximum context window (in tokens)
    pub context_length: u64
  , /// Token prices
    pub pricing: ModelPricing
  , /// What the model can do
    pub capabilities: BTreeSet<Capability>
  , /// Whether the model supports streaming responses
    pub supports_streaming: bool
  , /// Whether the model supports function/tool calling
    pub supports_function_calling: bool
}

impl ModelDescriptor
{   /// Text-only descriptor with the given prices
    pub fn new(
      id: impl Into<String>
    , context_length: u64
    , pricing: ModelPricing
    ) -> Self
    {   let id = id.into();
        ModelDescriptor
        {   name: id.clone()
          , id
          , context_length
          , pricing
          , capabilities: BTreeSet::from([Capability::TextGeneration])
          , supports_streaming: true
          , supports_function_calling: false
        }
    }

    /// Add a capability
    pub fn with_capability(mut self, capability: Capability) -> Self
    {   if capability == Capability::FunctionCalling
        {   self.supports_function_calling = true;
        }
        self.capabilities.insert(capability);
        self
    }

    /// Provider part of the id ("openai" for "openai/gpt-4o")
    pub fn provider(&self) -> &str
    {   provider_of(&self.id)
    }

    pub fn has_capability(&self, capability: Capability) -> bool
    {   self.capabilities.contains(&capability)
    }
}

/// Provider prefix of a model id, or the whole id when unprefixed
pub fn provider_of(model_id: &str) -> &str
{   model_id.split_once('/')
      .map(|(provider, _)| provider)
      .unwrap_or(model_id)
}

/// Install env_logger as the log backend.
/// Honors RUST_LOG, defaults to `info`. Safe to call more than once.
pub fn init_logging()
{   let _ = env_logger::Builder::from_env(
      env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
