use async_trait::async_trait;
use log::{debug, trace, error, warn};
use serde::Deserialize;
use std::time::Duration;

use super::{ChatCompletionRequest, ChatCompletionResponse, Transport};
use crate::{Capability, ModelDescriptor, ModelPricing};

// Substrings of model ids that imply a capability the listing
// does not state explicitly.
const CODE_HINTS: &[&str] = &[
  "code", "coder", "codestral", "gpt-4", "claude", "gemini", "deepseek"
, "qwen"
];
const REASONING_HINTS: &[&str] = &[
  "o1", "o3", "o4", "r1", "reason", "think", "claude", "gpt-4", "gemini"
];

// ===== Listing Types =====

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse
{   pub data: Vec<WireModel>
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireModel
{   pub id: String
  , #[serde(default)]
    pub name: Option<String>
  , #[serde(default)]
    pub context_length: Option<u64>
  , #[serde(default)]
    pub pricing: Option<WirePricing>
  , #[serde(default)]
    pub architecture: Option<WireArchitecture>
  , #[serde(default)]
    pub supported_parameters: Vec<String>
}

/// Per-token prices; the listing sends them as decimal strings
#[derive(Debug, Clone, Deserialize)]
pub struct WirePricing
{   #[serde(default)]
    pub prompt: Option<PriceValue>
  , #[serde(default)]
    pub completion: Option<PriceValue>
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PriceValue
{   Number(f64)
  , Text(String)
}

impl PriceValue
{   fn per_token(&self) -> f64
    {   let price = match self
        {   PriceValue::Number(n) => *n
          , PriceValue::Text(s) => s.trim().parse().unwrap_or(0.0)
        };
        price.max(0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireArchitecture
{   #[serde(default)]
    pub modality: Option<String>
  , #[serde(default)]
    pub input_modalities: Vec<String>
}

impl WireModel
{   /// Convert a listing entry, None when it is unusable
    pub fn into_descriptor(self) -> Option<ModelDescriptor>
    {   let context_length = self.context_length.unwrap_or(0);
        if self.id.is_empty() || context_length == 0
        {   warn!("Skipping model listing entry {:?}", self.id);
            return None;
        }

        let pricing = self.pricing.as_ref()
          .map(|p| ModelPricing::new(
            p.prompt.as_ref().map(PriceValue::per_token).unwrap_or(0.0)
              * 1000.0,
            p.completion.as_ref().map(PriceValue::per_token).unwrap_or(0.0)
              * 1000.0
          ))
          .unwrap_or_default();

        let lower_id = self.id.to_lowercase();
        let mut descriptor = ModelDescriptor::new(
          self.id.clone(),
          context_length,
          pricing
        );
        if let Some(name) = self.name
        {   descriptor.name = name;
        }

        if CODE_HINTS.iter().any(|h| lower_id.contains(h))
        {   descriptor = descriptor.with_capability(
              Capability::CodeGeneration
            );
        }
        if self.supported_parameters.iter().any(|p| p == "reasoning")
          || REASONING_HINTS.iter().any(|h| lower_id.contains(h))
        {   descriptor = descriptor.with_capability(Capability::Reasoning);
        }
        if self.supported_parameters.iter().any(|p| p == "tools")
        {   descriptor = descriptor.with_capability(
              Capability::FunctionCalling
            );
        }
        let image_input = self.architecture.as_ref()
          .map(|a| {
            a.input_modalities.iter().any(|m| m == "image")
              || a.modality.as_deref()
                   .map(|m| m.split("->").next().unwrap_or("")
                          .contains("image"))
                   .unwrap_or(false)
          })
          .unwrap_or(false);
        if image_input
        {   descriptor = descriptor.with_capability(Capability::Multimodal);
        }

        Some(descriptor)
    }
}

// ===== OpenRouter Transport =====

/// Client for OpenRouter and other OpenAI-compatible gateways
pub struct OpenRouterTransport
{   provider_id: String
  , api_base: String
  , api_key: String
  , referer: Option<String>
  , app_title: Option<String>
  , http_client: reqwest::Client
}

impl OpenRouterTransport
{   /// Create a transport from provider config and a validated key
    pub fn new(
      config: &crate::config::ProviderConfig
    , api_key: String
    ) -> crate::Result<Self>
    {   debug!("Creating OpenRouterTransport for {}", config.api_base);
        let http_client = reqwest::Client::builder()
          .timeout(Duration::from_secs(config.timeout_secs))
          .build()
          .map_err(|e| {
            crate::Error::InvalidConfiguration(e.to_string())
          })?;

        Ok(OpenRouterTransport
        {   provider_id: config.name.clone()
          , api_base: config.api_base.trim_end_matches('/').to_string()
          , api_key
          , referer: config.referer.clone()
          , app_title: config.app_title.clone()
          , http_client
        })
    }

    /// Create a transport reading the key from the environment
    pub fn from_env(
      config: &crate::config::ProviderConfig
    ) -> crate::Result<Self>
    {   let api_key = config.resolve_api_key()?;
        Self::new(config, api_key)
    }

    fn authorized(
      &self
    , builder: reqwest::RequestBuilder
    ) -> reqwest::RequestBuilder
    {   let mut builder = builder
          .header("Authorization", format!("Bearer {}", self.api_key))
          .header("Content-Type", "application/json");
        if let Some(referer) = &self.referer
        {   builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title
        {   builder = builder.header("X-Title", title);
        }
        builder
    }

    async fn error_from(response: reqwest::Response) -> crate::Error
    {   let status = response.status().as_u16();
        let error_text = response.text().await
          .unwrap_or_else(|_|
            "Unknown error".to_string()
          );
        error!("Provider error {}: {}", status, error_text);
        crate::Error::from_status(status, error_text)
    }
}

#[async_trait]
impl Transport for OpenRouterTransport
{   fn provider_id(&self) -> &str
    {   &self.provider_id
    }

    async fn chat_completion(
      &self
    , request: &ChatCompletionRequest
    ) -> crate::Result<ChatCompletionResponse>
    {   debug!("POST chat/completions for: {}", request.model);
        trace!("Chat request: {:?}", request);

        let response = self
          .authorized(
            self.http_client
              .post(format!("{}/chat/completions", self.api_base))
          )
          .json(request)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            crate::Error::from(e)
          })?;

        let status = response.status();
        trace!("Chat response status: {}", status);

        if !status.is_success()
        {   return Err(Self::error_from(response).await);
        }

        let body = response.text().await
          .map_err(crate::Error::from)?;
        let chat_response: ChatCompletionResponse
          = serde_json::from_str(&body).map_err(|e| {
            error!("Parse error: {}", e);
            crate::Error::ParseError(e.to_string())
          })?;

        if chat_response.choices.is_empty()
        {   error!("No choices in response");
            return Err(crate::Error::NoChoicesInResponse);
        }
        Ok(chat_response)
    }

    async fn list_models(&self)
      -> crate::Result<Vec<ModelDescriptor>>
    {   debug!("GET models");

        let response = self
          .authorized(
            self.http_client.get(format!("{}/models", self.api_base))
          )
          .send()
          .await
          .map_err(|e| {
            error!("Failed to fetch models: {}", e);
            crate::Error::from(e)
          })?;

        let status = response.status();
        trace!("Models response status: {}", status);

        if !status.is_success()
        {   return Err(Self::error_from(response).await);
        }

        let body = response.text().await
          .map_err(crate::Error::from)?;
        let models_response: ModelsResponse
          = serde_json::from_str(&body).map_err(|e| {
            error!("Parse error: {}", e);
            crate::Error::ParseError(e.to_string())
          })?;

        let descriptors: Vec<ModelDescriptor>
          = models_response.data
            .into_iter()
            .filter_map(WireModel::into_descriptor)
            .collect();

        debug!("Retrieved {} models", descriptors.len());
        Ok(descriptors)
    }
}
