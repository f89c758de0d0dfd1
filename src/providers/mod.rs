//! LLM provider transports
//!
//! A [`Transport`] speaks one provider family's HTTP dialect. The
//! [`ProviderRegistry`] maps a model id's provider prefix to the
//! transport serving it; adding a provider means registering another
//! implementation, not editing the dispatcher.

pub mod openrouter;

use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub use openrouter::OpenRouterTransport;

// ===== Wire Types =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , /// Gateways send `null` when a completion stops before any text
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>
{   Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage
{   pub fn system(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: "system".to_string()
          , content: content.into()
        }
    }

    pub fn user(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: "user".to_string()
          , content: content.into()
        }
    }
}

/// Body of `POST {base}/chat/completions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub temperature: f32
  , pub max_tokens: u32
  , pub top_p: f32
  , pub frequency_penalty: f32
  , pub presence_penalty: f32
}

impl ChatCompletionRequest
{   /// Build the payload for one attempt against `model`
    pub fn from_request(
      request: &crate::LlmRequest
    , model: &str
    ) -> Self
    {   let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt
        {   messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(request.prompt.clone()));

        ChatCompletionRequest
        {   model: model.to_string()
          , messages
          , temperature: request.params.temperature
          , max_tokens: request.params.max_tokens
          , top_p: request.params.top_p
          , frequency_penalty: request.params.frequency_penalty
          , presence_penalty: request.params.presence_penalty
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse
{   #[serde(default)]
    pub id: Option<String>
  , #[serde(default)]
    pub model: Option<String>
  , pub choices: Vec<Choice>
  , #[serde(default)]
    pub usage: Option<WireUsage>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice
{   pub message: ChatMessage
  , #[serde(default)]
    pub finish_reason: Option<String>
}

/// Token counts as reported by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireUsage
{   #[serde(default)]
    pub prompt_tokens: u64
  , #[serde(default)]
    pub completion_tokens: u64
  , #[serde(default)]
    pub total_tokens: u64
  , #[serde(default)]
    pub cost: Option<f64>
}

// ===== Transport =====

/// One provider family's HTTP client
#[async_trait]
pub trait Transport: Send + Sync
{   /// Registry key, e.g. "openrouter"
    fn provider_id(&self) -> &str;

    /// Send one chat completion
    async fn chat_completion(
      &self
    , request: &ChatCompletionRequest
    ) -> crate::Result<ChatCompletionResponse>;

    /// Fetch the provider's model listing
    async fn list_models(&self)
      -> crate::Result<Vec<crate::ModelDescriptor>>;
}

/// Maps provider prefixes to transports
#[derive(Clone, Default)]
pub struct ProviderRegistry
{   default: Option<Arc<dyn Transport>>
  , by_provider: HashMap<String, Arc<dyn Transport>>
}

impl ProviderRegistry
{   /// Empty registry; every lookup fails until something is registered
    pub fn new() -> Self
    {   ProviderRegistry::default()
    }

    /// Registry whose default transport serves every model
    pub fn with_default(transport: Arc<dyn Transport>) -> Self
    {   debug!("Default transport: {}", transport.provider_id());
        ProviderRegistry
        {   default: Some(transport)
          , by_provider: HashMap::new()
        }
    }

    /// Route models with this provider prefix to `transport`
    pub fn register(
      &mut self
    , provider: impl Into<String>
    , transport: Arc<dyn Transport>
    )
    {   let provider = provider.into();
        debug!(
          "Registering transport {} for provider {}",
          transport.provider_id(), provider
        );
        self.by_provider.insert(provider, transport);
    }

    /// Transport serving `model_id`
    pub fn resolve(&self, model_id: &str)
      -> crate::Result<Arc<dyn Transport>>
    {   let provider = crate::provider_of(model_id);
        if let Some(transport) = self.by_provider.get(provider)
        {   return Ok(Arc::clone(transport));
        }
        self.default.clone()
          .ok_or_else(|| {
            error!("No transport for provider: {}", provider);
            crate::Error::ProviderNotImplemented(provider.to_string())
          })
    }

    /// Transport used for catalog refreshes
    pub fn default_transport(&self) -> Option<Arc<dyn Transport>>
    {   self.default.clone()
    }
}

impl std::fmt::Debug for ProviderRegistry
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   f.debug_struct("ProviderRegistry")
          .field(
            "default",
            &self.default.as_ref().map(|t| t.provider_id().to_string())
          )
          .field(
            "providers",
            &self.by_provider.keys().collect::<Vec<_>>()
          )
          .finish()
    }
}
