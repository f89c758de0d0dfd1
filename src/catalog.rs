//! Known models and their metadata

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::performance::PerformanceMonitor;
use crate::providers::Transport;
use crate::{Capability, ModelDescriptor, TaskType};

/// Snapshot-swapping store of model descriptors.
///
/// Readers clone an `Arc` of the current snapshot, so a refresh never
/// exposes a half-built list.
#[derive(Debug, Default)]
pub struct ModelCatalog
{   models: RwLock<Arc<Vec<ModelDescriptor>>>
}

impl ModelCatalog
{   /// Create an empty catalog
    pub fn new() -> Self
    {   ModelCatalog::default()
    }

    /// Create a catalog seeded with descriptors
    pub fn with_models(models: Vec<ModelDescriptor>) -> Self
    {   ModelCatalog
        {   models: RwLock::new(Arc::new(models))
        }
    }

    /// Fetch the listing and swap it in. On error the previous
    /// snapshot stays in place.
    pub async fn refresh(&self, transport: &dyn Transport)
      -> crate::Result<usize>
    {   debug!("Refreshing catalog from {}", transport.provider_id());
        match transport.list_models().await
        {   Ok(models) => {
              let count = models.len();
              self.replace(models);
              info!("Catalog refreshed with {} models", count);
              Ok(count)
            }
          , Err(e) => {
              warn!(
                "Catalog refresh failed, keeping {} models: {}",
                self.len(), e
              );
              Err(e)
            }
        }
    }

    /// Replace the whole set
    pub fn replace(&self, models: Vec<ModelDescriptor>)
    {   *self.models.write() = Arc::new(models);
    }

    /// Current snapshot
    pub fn models(&self) -> Arc<Vec<ModelDescriptor>>
    {   self.models.read().clone()
    }

    pub fn len(&self) -> usize
    {   self.models.read().len()
    }

    pub fn is_empty(&self) -> bool
    {   self.models.read().is_empty()
    }

    /// Look up a model by id
    pub fn find(&self, id: &str) -> Option<ModelDescriptor>
    {   self.models.read()
          .iter()
          .find(|m| m.id == id)
          .cloned()
    }

    /// Like [`find`](Self::find), but an unknown id is an error
    pub fn get(&self, id: &str) -> crate::Result<ModelDescriptor>
    {   self.find(id)
          .ok_or_else(|| crate::Error::ModelNotFound(id.to_string()))
    }

    pub fn filter_by_capability(&self, capability: Capability)
      -> Vec<ModelDescriptor>
    {   self.models.read()
          .iter()
          .filter(|m| m.has_capability(capability))
          .cloned()
          .collect()
    }

    /// Models whose id starts with `provider/`
    pub fn filter_by_provider(&self, provider: &str)
      -> Vec<ModelDescriptor>
    {   self.models.read()
          .iter()
          .filter(|m| m.provider() == provider)
          .cloned()
          .collect()
    }

    /// Models carrying every capability in `required`
    pub fn filter_by_capabilities(
      &self
    , required: &BTreeSet<Capability>
    ) -> Vec<ModelDescriptor>
    {   self.models.read()
          .iter()
          .filter(|m| required.iter().all(|c| m.has_capability(*c)))
          .cloned()
          .collect()
    }

    /// Best model for a task.
    ///
    /// Candidates need the task's capability. A preferred provider
    /// narrows the set unless it has no match at all. Ranking is by
    /// observed quality score (unmeasured models last), then by price.
    pub fn select_optimal(
      &self
    , task: TaskType
    , preferred_provider: Option<&str>
    , performance: &PerformanceMonitor
    ) -> Option<ModelDescriptor>
    {   let capable = self.filter_by_capability(task.required_capability());
        let mut candidates: Vec<ModelDescriptor> = match preferred_provider
        {   Some(provider) => {
              let preferred: Vec<ModelDescriptor> = capable.iter()
                .filter(|m| m.provider() == provider)
                .cloned()
                .collect();
              if preferred.is_empty()
              {   debug!("No {:?} model from {}, widening", task, provider);
                  capable
              } else
              {   preferred
              }
            }
          , None => capable
        };

        candidates.sort_by(|a, b| {
          let qa = performance
            .average_performance(&a.id, crate::performance::DEFAULT_WINDOW)
            .quality_score;
          let qb = performance
            .average_performance(&b.id, crate::performance::DEFAULT_WINDOW)
            .quality_score;
          let by_quality = match (qa, qb)
          {   (Some(qa), Some(qb)) => qb.total_cmp(&qa)
            , (Some(_), None) => std::cmp::Ordering::Less
            , (None, Some(_)) => std::cmp::Ordering::Greater
            , (None, None) => std::cmp::Ordering::Equal
          };
          by_quality.then_with(|| {
            a.pricing.blended_per_1k().total_cmp(&b.pricing.blended_per_1k())
          })
        });

        let chosen = candidates.into_iter().next();
        debug!(
          "Optimal model for {:?}: {:?}",
          task, chosen.as_ref().map(|m| &m.id)
        );
        chosen
    }
}
