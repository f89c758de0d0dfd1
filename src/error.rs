use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the router
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for routing operations
/// Implements Clone so failures can be stored in samples
/// and handed across tasks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error
{   /// API key is missing from the environment
    #[error("Missing API key: {0}")]
    MissingApiKey(String)
  , /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String)
  , /// Neither the request nor the router picked a model
    #[error("No model selected for request")]
    NoModelSelected
  , /// Local admission denied, no network call was made
    #[error("Rate limit exceeded, retry after {}ms", .retry_after.as_millis())]
    RateLimitExceeded
    {   retry_after: Duration
    }
  , /// Network level failure
    #[error("HTTP error: {0}")]
    HttpError(String)
  , /// Provider answered with a non-2xx status
    #[error("API error ({status}): {message}")]
    ApiError
    {   status: u16
      , message: String
    }
  , /// Transport timeout
    #[error("Request timed out")]
    Timeout
  , /// Failed to parse the provider response
    #[error("Parse error: {0}")]
    ParseError(String)
  , /// No choices in provider response
    #[error("API response contained no choices")]
    NoChoicesInResponse
  , /// No transport registered for the model's provider
    #[error("Provider not yet implemented: {0}")]
    ProviderNotImplemented(String)
  , /// Every failover candidate failed
    #[error("All {attempts} candidate models failed, last error: {last_error}")]
    AllCandidatesFailed
    {   attempts: usize
      , last_error: Box<Error>
    }
  , /// Provider reported a billing problem
    #[error("Insufficient credits: {0}")]
    InsufficientCredits(String)
  , /// Request parameters out of range
    #[error("Invalid request: {0}")]
    InvalidRequest(String)
  , /// Request exceeds model context window
    #[error("Request needs ~{requested} tokens, model context is {limit}")]
    ContextWindowExceeded
    {   requested: u64
      , limit: u64
    }
  , /// Model id not present in the catalog
    #[error("Model not found: {0}")]
    ModelNotFound(String)
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind
{   Configuration
  , RateLimitExceeded
  , Transport
  , Decoding
  , ProviderUnsupported
  , AllCandidatesFailed
  , InsufficientCredits
  , InvalidRequest
}

impl Error
{   /// Classify this error
    pub fn kind(&self) -> ErrorKind
    {   match self
        {   Error::MissingApiKey(_)
          | Error::InvalidConfiguration(_)
          | Error::NoModelSelected => ErrorKind::Configuration
          , Error::RateLimitExceeded { .. } => {
              ErrorKind::RateLimitExceeded
            }
          , Error::HttpError(_)
          | Error::ApiError { .. }
          | Error::Timeout => ErrorKind::Transport
          , Error::ParseError(_)
          | Error::NoChoicesInResponse => ErrorKind::Decoding
          , Error::ProviderNotImplemented(_) => {
              ErrorKind::ProviderUnsupported
            }
          , Error::AllCandidatesFailed { .. } => {
              ErrorKind::AllCandidatesFailed
            }
          , Error::InsufficientCredits(_) => {
              ErrorKind::InsufficientCredits
            }
          , Error::InvalidRequest(_)
          | Error::ContextWindowExceeded { .. }
          | Error::ModelNotFound(_) => ErrorKind::InvalidRequest
        }
    }

    /// Whether trying another model could succeed
    pub fn is_retriable(&self) -> bool
    {   if let Error::ContextWindowExceeded { .. } = self
        {   // a larger model may still fit the request
            return true;
        }
        !matches!(
          self.kind(),
          ErrorKind::Configuration | ErrorKind::InvalidRequest
        )
    }

    /// Build an error from a non-2xx status and body
    pub fn from_status(status: u16, body: String) -> Self
    {   match status
        {   402 => Error::InsufficientCredits(body)
          , 408 | 504 => Error::Timeout
          , _ => Error::ApiError
            {   status
              , message: body
            }
        }
    }
}

impl From<reqwest::Error> for Error
{   fn from(err: reqwest::Error) -> Self
    {   if err.is_timeout()
        {   Error::Timeout
        } else if err.is_decode()
        {   Error::ParseError(err.to_string())
        } else
        {   Error::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error
{   fn from(err: serde_json::Error) -> Self
    {   Error::ParseError(err.to_string())
    }
}
