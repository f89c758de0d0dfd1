//! Rolling latency and success statistics per model

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per model
pub const SAMPLE_CAPACITY: usize = 1000;

/// Default number of recent samples averaged
pub const DEFAULT_WINDOW: usize = 100;

/// Latency at which the response-time component reaches zero
const SLOW_RESPONSE: Duration = Duration::from_secs(5);

/// Output length at which the content component saturates
const FULL_CONTENT_CHARS: f64 = 100.0;

/// Outcome of one attempt against one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample
{   pub model_id: String
  , pub timestamp: DateTime<Utc>
  , pub duration: Duration
  , pub success: bool
  , pub error: Option<String>
  , /// 0 when unknown or failed
    pub tokens_per_second: f64
  , pub quality_score: Option<f64>
}

impl PerformanceSample
{   pub fn new(
      model_id: impl Into<String>
    , duration: Duration
    , success: bool
    , error: Option<String>
    ) -> Self
    {   PerformanceSample
        {   model_id: model_id.into()
          , timestamp: Utc::now()
          , duration
          , success
          , error
          , tokens_per_second: 0.0
          , quality_score: None
        }
    }
}

/// Averages over the most recent samples of one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AveragePerformance
{   pub sample_count: usize
  , pub average_duration: Duration
  , /// successes / total, 0 without samples
    pub success_rate: f64
  , /// Mean over samples with positive throughput
    pub tokens_per_second: f64
  , /// Mean over samples carrying a score
    pub quality_score: Option<f64>
}

/// Heuristic 0..1 score of a response.
/// Mean of a latency term, an output length term and a token term.
pub fn quality_score(
  duration: Duration
, output_chars: usize
, total_tokens: u64
) -> f64
{   let response_time = (1.0
      - duration.as_secs_f64() / SLOW_RESPONSE.as_secs_f64()).max(0.0);
    let content_length = (output_chars as f64 / FULL_CONTENT_CHARS).min(1.0);
    let efficiency = if total_tokens > 0 { 1.0 } else { 0.5 };
    (response_time + content_length + efficiency) / 3.0
}

/// Bounded per-model ring buffers of [`PerformanceSample`].
/// Each model's buffer is locked independently.
#[derive(Debug, Default)]
pub struct PerformanceMonitor
{   samples: DashMap<String, VecDeque<PerformanceSample>>
}

impl PerformanceMonitor
{   pub fn new() -> Self
    {   PerformanceMonitor::default()
    }

    /// Record the outcome of one attempt
    pub fn record(
      &self
    , model_id: &str
    , duration: Duration
    , success: bool
    , error: Option<String>
    )
    {   self.record_sample(PerformanceSample::new(
          model_id,
          duration,
          success,
          error
        ));
    }

    /// Record a fully populated sample
    pub fn record_sample(&self, sample: PerformanceSample)
    {   trace!(
          "{}: {:?} success={}",
          sample.model_id, sample.duration, sample.success
        );
        let mut buffer = self.samples
          .entry(sample.model_id.clone())
          .or_insert_with(|| VecDeque::with_capacity(64));
        while buffer.len() >= SAMPLE_CAPACITY
        {   buffer.pop_front();
        }
        buffer.push_back(sample);
    }

    /// Averages over the last `last_n` samples. Uses whatever is
    /// available when fewer exist.
    pub fn average_performance(
      &self
    , model_id: &str
    , last_n: usize
    ) -> AveragePerformance
    {   let Some(buffer) = self.samples.get(model_id)
        else
        {   return AveragePerformance::default();
        };
        let take = last_n.min(buffer.len());
        if take == 0
        {   return AveragePerformance::default();
        }

        let recent = buffer.iter().skip(buffer.len() - take);
        let mut total_duration = Duration::ZERO;
        let mut successes = 0usize;
        let mut throughput_sum = 0.0;
        let mut throughput_count = 0usize;
        let mut quality_sum = 0.0;
        let mut quality_count = 0usize;

        for sample in recent
        {   total_duration += sample.duration;
            if sample.success
            {   successes += 1;
            }
            if sample.tokens_per_second > 0.0
            {   throughput_sum += sample.tokens_per_second;
                throughput_count += 1;
            }
            if let Some(q) = sample.quality_score
            {   quality_sum += q;
                quality_count += 1;
            }
        }

        AveragePerformance
        {   sample_count: take
          , average_duration: total_duration / take as u32
          , success_rate: successes as f64 / take as f64
          , tokens_per_second: if throughput_count > 0
            {   throughput_sum / throughput_count as f64
            } else
            {   0.0
            }
          , quality_score: (quality_count > 0)
              .then(|| quality_sum / quality_count as f64)
        }
    }

    /// Samples currently held for a model
    pub fn sample_count(&self, model_id: &str) -> usize
    {   self.samples.get(model_id).map(|b| b.len()).unwrap_or(0)
    }

    /// Failed samples currently held for a model
    pub fn failure_count(&self, model_id: &str) -> usize
    {   self.samples.get(model_id)
          .map(|b| b.iter().filter(|s| !s.success).count())
          .unwrap_or(0)
    }

    /// Models with at least one sample
    pub fn models(&self) -> Vec<String>
    {   let mut models: Vec<String> = self.samples
          .iter()
          .map(|e| e.key().clone())
          .collect();
        models.sort();
        models
    }

    pub fn reset(&self)
    {   debug!("Clearing performance samples");
        self.samples.clear();
    }
}
