//! Per-model, per-day token and cost accounting

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::request::Usage;
use crate::ModelPricing;

/// Date range used to filter the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsagePeriod
{   /// Current UTC day
    Today
  , /// Today and the n-1 days before it
    LastDays(u32)
  , /// Inclusive day range
    Between
    {   from: NaiveDate
      , to: NaiveDate
    }
}

impl UsagePeriod
{   fn contains(&self, day: NaiveDate, today: NaiveDate) -> bool
    {   match *self
        {   UsagePeriod::Today => day == today
          , UsagePeriod::LastDays(n) => {
              let span = i64::from(n.max(1)) - 1;
              day <= today && day >= today - ChronoDuration::days(span)
            }
          , UsagePeriod::Between { from, to } => day >= from && day <= to
        }
    }
}

/// One ledger row: usage of one model on one day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry
{   pub prompt_tokens: u64
  , pub completion_tokens: u64
  , pub total_tokens: u64
  , pub cost: f64
  , pub request_count: u64
}

impl CostLedgerEntry
{   fn add(&mut self, usage: &Usage)
    {   self.prompt_tokens
          = self.prompt_tokens.saturating_add(usage.prompt_tokens());
        self.completion_tokens
          = self.completion_tokens.saturating_add(usage.completion_tokens());
        self.total_tokens
          = self.total_tokens.saturating_add(usage.total_tokens());
        self.cost += usage.cost();
        self.request_count += 1;
    }
}

/// Aggregate over any number of ledger rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostStats
{   pub cost: f64
  , pub prompt_tokens: u64
  , pub completion_tokens: u64
  , pub total_tokens: u64
  , pub request_count: u64
}

impl CostStats
{   fn absorb(&mut self, entry: &CostLedgerEntry)
    {   self.cost += entry.cost;
        self.prompt_tokens
          = self.prompt_tokens.saturating_add(entry.prompt_tokens);
        self.completion_tokens
          = self.completion_tokens.saturating_add(entry.completion_tokens);
        self.total_tokens
          = self.total_tokens.saturating_add(entry.total_tokens);
        self.request_count += entry.request_count;
    }

    /// Observed USD per 1000 tokens, None before any tokens
    pub fn cost_per_1k_tokens(&self) -> Option<f64>
    {   if self.total_tokens == 0
        {   return None;
        }
        Some(self.cost / self.total_tokens as f64 * 1000.0)
    }
}

/// Accumulates usage per (model, day).
/// All writes go through one mutex owned by the tracker.
#[derive(Debug, Default)]
pub struct CostTracker
{   ledger: Mutex<HashMap<(String, NaiveDate), CostLedgerEntry>>
}

impl CostTracker
{   pub fn new() -> Self
    {   CostTracker::default()
    }

    /// Price a completed call and add it to the ledger
    pub fn record(
      &self
    , model_id: &str
    , pricing: &ModelPricing
    , prompt_tokens: u64
    , completion_tokens: u64
    , timestamp: DateTime<Utc>
    ) -> crate::Result<Usage>
    {   let cost = pricing.cost(prompt_tokens, completion_tokens);
        let usage = Usage::new(
          prompt_tokens,
          completion_tokens,
          cost,
          timestamp
        )?;
        self.record_usage(model_id, &usage);
        Ok(usage)
    }

    /// Add an already-priced usage to the ledger
    pub fn record_usage(&self, model_id: &str, usage: &Usage)
    {   if !usage.cost().is_finite() || usage.cost() < 0.0
        {   warn!("Ignoring cost {} for {}", usage.cost(), model_id);
            return;
        }
        let day = usage.timestamp().date_naive();
        let mut ledger = self.ledger.lock();
        let entry = ledger
          .entry((model_id.to_string(), day))
          .or_default();
        entry.add(usage);
        trace!(
          "{} on {}: +${:.6} (day total ${:.6})",
          model_id, day, usage.cost(), entry.cost
        );
    }

    /// Total cost of a model, all time when `period` is None
    pub fn total_cost(
      &self
    , model_id: &str
    , period: Option<UsagePeriod>
    ) -> f64
    {   self.stats(model_id, period).cost
    }

    /// Cost, tokens and request count of a model
    pub fn stats(
      &self
    , model_id: &str
    , period: Option<UsagePeriod>
    ) -> CostStats
    {   let today = Utc::now().date_naive();
        let ledger = self.ledger.lock();
        let mut stats = CostStats::default();
        for ((model, day), entry) in ledger.iter()
        {   if model == model_id
              && period.map(|p| p.contains(*day, today)).unwrap_or(true)
            {   stats.absorb(entry);
            }
        }
        stats
    }

    /// Per-model aggregates
    pub fn analytics(&self, period: Option<UsagePeriod>)
      -> BTreeMap<String, CostStats>
    {   let today = Utc::now().date_naive();
        let ledger = self.ledger.lock();
        let mut out: BTreeMap<String, CostStats> = BTreeMap::new();
        for ((model, day), entry) in ledger.iter()
        {   if period.map(|p| p.contains(*day, today)).unwrap_or(true)
            {   out.entry(model.clone()).or_default().absorb(entry);
            }
        }
        debug!("Usage analytics over {} models", out.len());
        out
    }

    /// Observed USD per 1000 tokens across all time
    pub fn cost_per_1k_tokens(&self, model_id: &str) -> Option<f64>
    {   self.stats(model_id, None).cost_per_1k_tokens()
    }

    /// Sum over every model
    pub fn grand_total(&self, period: Option<UsagePeriod>) -> f64
    {   self.analytics(period).values().map(|s| s.cost).sum()
    }

    pub fn reset(&self)
    {   debug!("Clearing cost ledger");
        self.ledger.lock().clear();
    }
}
