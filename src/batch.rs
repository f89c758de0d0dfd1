//! Bounded-concurrency fan-out of many requests

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::dispatcher::RequestDispatcher;
use crate::request::{LlmRequest, LlmResponse};

/// Metadata key tagging each request with its input position
pub const BATCH_INDEX_KEY: &str = "batch_index";

/// Metadata key a caller may set to name its own requests
pub const REQUEST_ID_KEY: &str = "request_id";

/// One request of a batch that did not produce a response
#[derive(Debug, Clone)]
pub struct BatchFailure
{   /// Position in the input list
    pub index: usize
  , /// The request's own `request_id` tag, if it carried one
    pub request_id: Option<String>
  , pub error: crate::Error
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Default)]
pub struct BatchReport
{   /// Successful responses in completion order
    pub responses: Vec<LlmResponse>
  , pub failures: Vec<BatchFailure>
  , pub elapsed: Duration
}

impl BatchReport
{   pub fn succeeded(&self) -> usize
    {   self.responses.len()
    }

    pub fn failed(&self) -> usize
    {   self.failures.len()
    }
}

/// Runs requests with at most `max_concurrency` in flight.
/// One request failing never stops the others.
#[derive(Debug, Clone)]
pub struct BatchCoordinator
{   max_concurrency: usize
}

impl Default for BatchCoordinator
{   fn default() -> Self
    {   BatchCoordinator::new(3)
    }
}

impl BatchCoordinator
{   pub fn new(max_concurrency: usize) -> Self
    {   BatchCoordinator
        {   max_concurrency: max_concurrency.max(1)
        }
    }

    pub fn max_concurrency(&self) -> usize
    {   self.max_concurrency
    }

    /// Issue every request through `send`.
    ///
    /// Each request is tagged with [`BATCH_INDEX_KEY`] before sending,
    /// so responses can be matched back even though they arrive in
    /// completion order.
    pub async fn run<F, Fut>(
      &self
    , requests: Vec<LlmRequest>
    , send: F
    ) -> BatchReport
    where
      F: Fn(LlmRequest) -> Fut
    , Fut: Future<Output = crate::Result<LlmResponse>>
    {   let total = requests.len();
        debug!(
          "Running batch of {} with concurrency {}",
          total, self.max_concurrency
        );
        let started = Instant::now();

        let outcomes: Vec<(usize, Option<String>, crate::Result<LlmResponse>)>
          = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| {
              let request_id = request.metadata.get(REQUEST_ID_KEY).cloned();
              let request = request
                .with_metadata(BATCH_INDEX_KEY, index.to_string());
              let pending = send(request);
              async move { (index, request_id, pending.await) }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (index, request_id, outcome) in outcomes
        {   match outcome
            {   Ok(response) => report.responses.push(response)
              , Err(error) => {
                  warn!("Batch item {} failed: {}", index, error);
                  report.failures.push(BatchFailure
                  {   index
                    , request_id
                    , error
                  });
                }
            }
        }
        report.elapsed = started.elapsed();

        info!(
          "Batch finished in {:?}: {}/{} succeeded",
          report.elapsed, report.succeeded(), total
        );
        report
    }

    /// Send every request straight through the dispatcher
    pub async fn dispatch(
      &self
    , dispatcher: &RequestDispatcher
    , requests: Vec<LlmRequest>
    ) -> BatchReport
    {   self.run(requests, |request| async move {
          dispatcher.send(&request).await
        }).await
    }
}
