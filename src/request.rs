//! Unified request and response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Sampling parameters sent with every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams
{   /// Max tokens to generate, > 0
    pub max_tokens: u32
  , /// Temperature in [0, 2]
    pub temperature: f32
  , /// Nucleus sampling in (0, 1]
    pub top_p: f32
  , /// In [-2, 2]
    pub frequency_penalty: f32
  , /// In [-2, 2]
    pub presence_penalty: f32
}

impl Default for SamplingParams
{   fn default() -> Self
    {   SamplingParams
        {   max_tokens: 1024
          , temperature: 0.7
          , top_p: 1.0
          , frequency_penalty: 0.0
          , presence_penalty: 0.0
        }
    }
}

impl SamplingParams
{   /// Check every parameter is inside its valid range
    pub fn validate(&self) -> crate::Result<()>
    {   if self.max_tokens == 0
        {   return Err(crate::Error::InvalidRequest(
              "max_tokens must be > 0".to_string()
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature)
        {   return Err(crate::Error::InvalidRequest(format!(
              "temperature {} outside [0, 2]", self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0)
        {   return Err(crate::Error::InvalidRequest(format!(
              "top_p {} outside (0, 1]", self.top_p
            )));
        }
        for (name, value) in [
          ("frequency_penalty", self.frequency_penalty)
        , ("presence_penalty", self.presence_penalty)
        ]
        {   if !(-2.0..=2.0).contains(&value)
            {   return Err(crate::Error::InvalidRequest(format!(
                  "{} {} outside [-2, 2]", name, value
                )));
            }
        }
        Ok(())
    }
}

/// Unified prompt request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest
{   /// The prompt text
    pub prompt: String
  , /// Optional system message
    pub system_prompt: Option<String>
  , pub params: SamplingParams
  , /// Model id; None lets the router choose
    pub model: Option<String>
  , /// Capabilities the serving model must have
    pub required_capabilities: BTreeSet<crate::Capability>
  , /// Free-form tags, carried through untouched
    pub metadata: HashMap<String, String>
}

impl LlmRequest
{   /// Create a request with default sampling
    pub fn new(prompt: impl Into<String>) -> Self
    {   LlmRequest
        {   prompt: prompt.into()
          , ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self
    {   self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self
    {   self.system_prompt = Some(system.into());
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self
    {   self.params = params;
        self
    }

    pub fn with_capability(mut self, capability: crate::Capability) -> Self
    {   self.required_capabilities.insert(capability);
        self
    }

    pub fn with_metadata(
      mut self
    , key: impl Into<String>
    , value: impl Into<String>
    ) -> Self
    {   self.metadata.insert(key.into(), value.into());
        self
    }

    /// Rough prompt + completion size, 4 chars per token
    pub fn estimated_tokens(&self) -> u64
    {   let chars = self.prompt.chars().count()
          + self.system_prompt.as_ref()
              .map(|s| s.chars().count())
              .unwrap_or(0);
        (chars as u64).div_ceil(4) + u64::from(self.params.max_tokens)
    }
}

/// Token usage of one completed call. Built only through
/// [`Usage::new`] so the total always matches its parts; deserializing
/// goes through the same check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UsageRecord")]
pub struct Usage
{   prompt_tokens: u64
  , completion_tokens: u64
  , total_tokens: u64
  , cost: f64
  , timestamp: DateTime<Utc>
}

/// Serialized shape of [`Usage`]; any stored total is recomputed
#[derive(Deserialize)]
struct UsageRecord
{   prompt_tokens: u64
  , completion_tokens: u64
  , cost: f64
  , timestamp: DateTime<Utc>
}

impl TryFrom<UsageRecord> for Usage
{   type Error = crate::Error;

    fn try_from(record: UsageRecord) -> crate::Result<Self>
    {   Usage::new(
          record.prompt_tokens,
          record.completion_tokens,
          record.cost,
          record.timestamp
        )
    }
}

impl Usage
{   /// Fails with a decoding error when the token counts cannot be
    /// summed. Negative or NaN costs are clamped to zero.
    pub fn new(
      prompt_tokens: u64
    , completion_tokens: u64
    , cost: f64
    , timestamp: DateTime<Utc>
    ) -> crate::Result<Self>
    {   let total_tokens = prompt_tokens.checked_add(completion_tokens)
          .ok_or_else(|| {
            crate::Error::ParseError(format!(
              "token counts overflow: {} + {}",
              prompt_tokens, completion_tokens
            ))
          })?;
        Ok(Usage
        {   prompt_tokens
          , completion_tokens
          , total_tokens
          , cost: cost.max(0.0)
          , timestamp
        })
    }

    pub fn prompt_tokens(&self) -> u64 { self.prompt_tokens }

    pub fn completion_tokens(&self) -> u64 { self.completion_tokens }

    pub fn total_tokens(&self) -> u64 { self.total_tokens }

    /// Cost in USD
    pub fn cost(&self) -> f64 { self.cost }

    pub fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
}

/// Unified prompt response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse
{   /// Generated text
    pub text: String
  , /// Model that generated it
    pub model: String
  , pub usage: Usage
  , /// Wall time of the transport call
    pub duration: Duration
  , /// 0..1 heuristic, see `performance::quality_score`
    pub quality_score: f64
  , pub tokens_per_second: f64
  , pub success: bool
  , pub error: Option<String>
  , pub finish_reason: Option<String>
  , /// Provider-side request id
    pub request_id: Option<String>
  , /// Metadata copied from the request
    pub metadata: HashMap<String, String>
}
