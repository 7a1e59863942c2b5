//! Hooks run around the smoothing engine for each partition

use crate::error::Result;
use crate::model::SharedModel;
use crate::partition::Partition;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Callback invoked before and after the engine processes a partition.
///
/// Hooks may rewrite the partition in place. Implementations must tolerate being
/// called for different partitions from different threads.
pub trait PartitionHook: fmt::Debug + Send + Sync {
    /// Called before any model runs on `partition`.
    fn on_partition_start(&self, models: &[SharedModel], partition: &mut Partition) -> Result<()> {
        let _ = (models, partition);
        Ok(())
    }

    /// Called after every model has run on `partition`.
    fn on_partition_end(&self, models: &[SharedModel], partition: &mut Partition) -> Result<()> {
        let _ = (models, partition);
        Ok(())
    }

    /// Called instead of [`on_partition_end`](Self::on_partition_end) when a
    /// model or a later hook fails after this hook started `partition`.
    ///
    /// Release any per-partition state here; the partition is abandoned.
    fn on_partition_error(&self, models: &[SharedModel], partition: &Partition) {
        let _ = (models, partition);
    }
}

type ProgressReporter = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Counts completed partitions and logs percentage progress
pub struct ProgressHook {
    total: usize,
    completed: AtomicUsize,
    reporter: Option<ProgressReporter>,
}

impl ProgressHook {
    /// Track progress over `total` partitions.
    pub const fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            reporter: None,
        }
    }

    /// Also call `reporter(completed, total)` after every partition.
    pub fn with_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.reporter = Some(Box::new(reporter));
        self
    }

    /// Partitions completed so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Expected number of partitions
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Completion percentage
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed() as f64 / self.total as f64 * 100.0
        }
    }
}

impl fmt::Debug for ProgressHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressHook")
            .field("total", &self.total)
            .field("completed", &self.completed())
            .finish_non_exhaustive()
    }
}

impl PartitionHook for ProgressHook {
    fn on_partition_end(&self, _models: &[SharedModel], partition: &mut Partition) -> Result<()> {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            partition = %partition.key(),
            "Progress: {:.2}%",
            self.percent()
        );
        if let Some(reporter) = &self.reporter {
            reporter(completed, self.total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionKey;
    use std::sync::Arc;
    use strata_panel::CutId;

    fn partition() -> Partition {
        Partition::new(
            PartitionKey {
                cut: CutId::NATIONAL,
                dimensions: vec!["BM".to_string()],
            },
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_progress_counts_partitions() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_reporter = Arc::clone(&seen);
        let hook = ProgressHook::new(4).with_reporter(move |done, total| {
            assert_eq!(total, 4);
            seen_by_reporter.store(done, Ordering::Relaxed);
        });

        let mut p = partition();
        hook.on_partition_start(&[], &mut p).unwrap();
        assert_eq!(hook.completed(), 0);
        hook.on_partition_end(&[], &mut p).unwrap();
        hook.on_partition_end(&[], &mut p).unwrap();

        assert_eq!(hook.completed(), 2);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
        assert!((hook.percent() - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_run_is_complete() {
        assert_eq!(ProgressHook::new(0).percent(), 100.0);
    }
}
