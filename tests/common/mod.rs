#![allow(dead_code)]

use allm_router::providers::{
  ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, Transport
, WireUsage
};
use allm_router::{
  CostTracker, Error, ModelCatalog, ModelDescriptor, ModelPricing
, PerformanceMonitor, ProviderRegistry, RateLimiter, RequestDispatcher
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted model does when called
#[derive(Debug, Clone)]
pub enum Behavior
{   Reply
    {   text: String
      , prompt_tokens: u64
      , completion_tokens: u64
      , cost: Option<f64>
    }
  , Fail(Error)
}

impl Behavior
{   pub fn reply(text: &str) -> Self
    {   Behavior::Reply
        {   text: text.to_string()
          , prompt_tokens: 1000
          , completion_tokens: 500
          , cost: None
        }
    }
}

/// In-memory transport with per-model scripted outcomes
pub struct ScriptedTransport
{   behaviors: Mutex<HashMap<String, Behavior>>
  , fail_prompts: Mutex<Vec<String>>
  , models: Mutex<Option<Vec<ModelDescriptor>>>
  , calls: Mutex<Vec<String>>
  , delay: Duration
  , in_flight: AtomicUsize
  , max_in_flight: AtomicUsize
}

impl ScriptedTransport
{   pub fn new() -> Self
    {   ScriptedTransport
        {   behaviors: Mutex::new(HashMap::new())
          , fail_prompts: Mutex::new(vec![])
          , models: Mutex::new(None)
          , calls: Mutex::new(vec![])
          , delay: Duration::ZERO
          , in_flight: AtomicUsize::new(0)
          , max_in_flight: AtomicUsize::new(0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self
    {   self.delay = delay;
        self
    }

    pub fn on(self, model: &str, behavior: Behavior) -> Self
    {   self.behaviors.lock().insert(model.to_string(), behavior);
        self
    }

    /// Fail any request whose prompt equals `prompt`
    pub fn fail_prompt(self, prompt: &str) -> Self
    {   self.fail_prompts.lock().push(prompt.to_string());
        self
    }

    pub fn listing(self, models: Vec<ModelDescriptor>) -> Self
    {   *self.models.lock() = Some(models);
        self
    }

    pub fn calls(&self) -> Vec<String>
    {   self.calls.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize
    {   self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self>
    {   Arc::new(self)
    }
}

#[async_trait]
impl Transport for ScriptedTransport
{   fn provider_id(&self) -> &str
    {   "scripted"
    }

    async fn chat_completion(
      &self
    , request: &ChatCompletionRequest
    ) -> allm_router::Result<ChatCompletionResponse>
    {   self.calls.lock().push(request.model.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero()
        {   tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let prompt = request.messages.last()
          .map(|m| m.content.clone())
          .unwrap_or_default();
        if self.fail_prompts.lock().contains(&prompt)
        {   return Err(Error::HttpError(format!("scripted failure: {}", prompt)));
        }

        let behavior = self.behaviors.lock()
          .get(&request.model)
          .cloned()
          .unwrap_or_else(|| Behavior::reply("default scripted reply"));
        match behavior
        {   Behavior::Fail(e) => Err(e)
          , Behavior::Reply { text, prompt_tokens, completion_tokens, cost } => {
              Ok(ChatCompletionResponse
              {   id: Some("gen-1".to_string())
                , model: Some(request.model.clone())
                , choices: vec![Choice
                  {   message: ChatMessage
                      {   role: "assistant".to_string()
                        , content: text
                      }
                    , finish_reason: Some("stop".to_string())
                  }]
                , usage: Some(WireUsage
                  {   prompt_tokens
                    , completion_tokens
                    , total_tokens: prompt_tokens + completion_tokens
                    , cost
                  })
              })
            }
        }
    }

    async fn list_models(&self)
      -> allm_router::Result<Vec<ModelDescriptor>>
    {   self.models.lock()
          .clone()
          .ok_or_else(|| Error::HttpError("connection refused".to_string()))
    }
}

/// Descriptor priced like the reference scenario
pub fn model(id: &str) -> ModelDescriptor
{   ModelDescriptor::new(id, 8192, ModelPricing::new(0.0005, 0.0015))
}

pub fn init()
{   allm_router::init_logging();
}

/// Dispatcher over one scripted transport with a generous rate limit
pub fn dispatcher(
  transport: Arc<ScriptedTransport>
, models: Vec<ModelDescriptor>
) -> RequestDispatcher
{   dispatcher_with_limit(transport, models, RateLimiter::new(10_000, Duration::from_secs(60)))
}

pub fn dispatcher_with_limit(
  transport: Arc<ScriptedTransport>
, models: Vec<ModelDescriptor>
, limiter: RateLimiter
) -> RequestDispatcher
{   RequestDispatcher::new(
      ProviderRegistry::with_default(transport),
      Arc::new(ModelCatalog::with_models(models)),
      Arc::new(CostTracker::new()),
      Arc::new(PerformanceMonitor::new()),
      Arc::new(limiter)
    )
}

pub fn ids(models: &[&str]) -> Vec<String>
{   models.iter().map(|m| m.to_string()).collect()
}
