use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Least-loaded selection by issued request count.
/// Knows nothing about per-model throughput limits.
#[derive(Debug, Default)]
pub struct LoadBalancer
{   counts: Mutex<HashMap<String, u64>>
}

impl LoadBalancer
{   pub fn new() -> Self
    {   LoadBalancer::default()
    }

    /// Pick the model with the fewest requests so far and count one
    /// more against it. Ties go to the earliest model in `models`.
    pub fn select(&self, models: &[String]) -> Option<String>
    {   let mut counts = self.counts.lock();
        let chosen = models.iter()
          .enumerate()
          .min_by_key(|(index, model)| {
            (counts.get(model.as_str()).copied().unwrap_or(0), *index)
          })
          .map(|(_, model)| model.clone())?;
        let count = counts.entry(chosen.clone()).or_insert(0);
        *count += 1;
        trace!("Load balancer picked {} (now {})", chosen, count);
        Some(chosen)
    }

    /// Requests issued to a model since the last reset
    pub fn count(&self, model_id: &str) -> u64
    {   self.counts.lock().get(model_id).copied().unwrap_or(0)
    }

    pub fn reset(&self)
    {   debug!("Resetting load balancer counters");
        self.counts.lock().clear();
    }
}
