//! Runs models and hooks over partitions

use crate::error::{Result, SmoothingError};
use crate::hooks::PartitionHook;
use crate::kalman::SmoothingEngine;
use crate::model::SharedModel;
use crate::partition::Partition;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives a [`SmoothingEngine`] over partitions with start/end hooks
#[derive(Debug, Clone)]
pub struct Runner {
    engine: Arc<dyn SmoothingEngine>,
    models: Vec<SharedModel>,
    hooks: Vec<Arc<dyn PartitionHook>>,
}

impl Runner {
    /// Create a runner with no models or hooks.
    pub fn new(engine: Arc<dyn SmoothingEngine>) -> Self {
        Self {
            engine,
            models: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Add a model.
    pub fn with_model(mut self, model: SharedModel) -> Self {
        self.models.push(model);
        self
    }

    /// Add several models.
    pub fn with_models<I>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = SharedModel>,
    {
        self.models.extend(models);
        self
    }

    /// Add a hook. Hooks run in insertion order at both start and end.
    pub fn with_hook(mut self, hook: Arc<dyn PartitionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Configured models
    pub fn models(&self) -> &[SharedModel] {
        &self.models
    }

    /// Run start hooks, every model, then end hooks on one partition.
    ///
    /// On failure every hook that started the partition and has not ended it
    /// gets [`PartitionHook::on_partition_error`] before the error is returned.
    pub fn run_partition(&self, partition: &mut Partition) -> Result<()> {
        for (started, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_partition_start(&self.models, partition) {
                return Err(self.abort(&self.hooks[..started], partition, e));
            }
        }
        for model in &self.models {
            if let Err(e) = self.engine.smooth(model.as_ref(), partition) {
                return Err(self.abort(&self.hooks, partition, e));
            }
        }
        for (ended, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_partition_end(&self.models, partition) {
                return Err(self.abort(&self.hooks[ended..], partition, e));
            }
        }
        Ok(())
    }

    fn abort(
        &self,
        hooks: &[Arc<dyn PartitionHook>],
        partition: &Partition,
        error: SmoothingError,
    ) -> SmoothingError {
        warn!(partition = %partition.key(), %error, "partition failed");
        for hook in hooks {
            hook.on_partition_error(&self.models, partition);
        }
        error
    }

    /// Run every partition in order, stopping at the first error.
    pub fn run(&self, partitions: &mut [Partition]) -> Result<()> {
        for partition in partitions.iter_mut() {
            debug!(partition = %partition.key(), "running partition");
            self.run_partition(partition)?;
        }
        info!(
            partitions = partitions.len(),
            models = self.models.len(),
            "smoothing pass complete"
        );
        Ok(())
    }
}
