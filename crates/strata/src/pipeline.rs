//! Configured end-to-end runs over a long-form input table.

use crate::config::PipelineConfig;
use crate::error::Result;
use polars::prelude::DataFrame;
use std::sync::Arc;
use strata_covariance::{CorrelationMatrix, CorrelationMatrixBuilder};
use strata_panel::ObservationPanel;
use strata_reconcile::{DeltaReconciler, MetricConfig, ReconciledTable};
use strata_smoothing::{KalmanSmoother, PartitionHook, PartitionScaler, SmoothingEngine};
use tracing::info;

/// Validated configuration plus the smoothing engine to run it with
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    engine: Arc<dyn SmoothingEngine>,
}

impl Pipeline {
    /// Validate `config` and use the reference Kalman engine.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine: Arc::new(KalmanSmoother::new()),
        })
    }

    /// Replace the smoothing engine.
    pub fn with_engine(mut self, engine: Arc<dyn SmoothingEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Configuration in use
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read the panel for `metric`, completed when configured.
    pub fn load_panel(&self, frame: &DataFrame, metric: &str) -> Result<ObservationPanel> {
        let panel = self.config.columns.panel_from_dataframe(frame, metric)?;
        Ok(match &self.config.completion {
            Some(completion) => panel.complete(completion),
            None => panel,
        })
    }

    /// Build the repaired correlation matrix from the national rows of `metric`.
    pub fn build_correlation(&self, frame: &DataFrame, metric: &str) -> Result<CorrelationMatrix> {
        let panel = self.config.columns.panel_from_dataframe(frame, metric)?;
        let builder = CorrelationMatrixBuilder::new(self.config.correlation.clone())?;
        Ok(builder.build(&panel)?)
    }

    /// Partitions a full run over `frame` will process, for progress reporting.
    pub fn planned_partitions(&self, frame: &DataFrame) -> Result<usize> {
        self.config.metrics.iter().try_fold(0, |total, metric| {
            let panel = self.load_panel(frame, &metric.metric)?;
            Ok(total + self.planned_for(&panel)?)
        })
    }

    fn planned_for(&self, panel: &ObservationPanel) -> Result<usize> {
        match &self.config.stratify_by {
            Some(dimension) => Ok(panel
                .stratify(dimension)?
                .values()
                .map(DeltaReconciler::planned_partitions)
                .sum()),
            None => Ok(DeltaReconciler::planned_partitions(panel)),
        }
    }

    fn reconciler(
        &self,
        correlation: &Arc<CorrelationMatrix>,
        hooks: &[Arc<dyn PartitionHook>],
    ) -> DeltaReconciler {
        let mut reconciler = DeltaReconciler::new(Arc::clone(&self.engine), Arc::clone(correlation))
            .with_layout(self.config.layout.clone());
        if let Some(scaler) = self.config.scaler {
            reconciler =
                reconciler.with_hook(Arc::new(PartitionScaler::new(scaler.kind, scaler.scope)));
        }
        hooks
            .iter()
            .fold(reconciler, |r, hook| r.with_hook(Arc::clone(hook)))
    }

    /// Reconcile one configured metric.
    pub fn run_metric(
        &self,
        frame: &DataFrame,
        metric: &MetricConfig,
        correlation: &Arc<CorrelationMatrix>,
        hooks: &[Arc<dyn PartitionHook>],
    ) -> Result<ReconciledTable> {
        let panel = self.load_panel(frame, &metric.metric)?;
        let reconciler = self.reconciler(correlation, hooks);
        let table = match &self.config.stratify_by {
            Some(dimension) => reconciler.reconcile_stratified(&panel, metric, dimension)?,
            None => reconciler.reconcile(&panel, metric)?,
        };
        Ok(table)
    }

    /// Reconcile every configured metric, in configuration order.
    pub fn run(
        &self,
        frame: &DataFrame,
        correlation: Arc<CorrelationMatrix>,
        hooks: &[Arc<dyn PartitionHook>],
    ) -> Result<Vec<ReconciledTable>> {
        let tables = self
            .config
            .metrics
            .iter()
            .map(|metric| self.run_metric(frame, metric, &correlation, hooks))
            .collect::<Result<Vec<_>>>()?;

        info!(
            metrics = tables.len(),
            rows = tables.iter().map(ReconciledTable::len).sum::<usize>(),
            "pipeline finished"
        );
        Ok(tables)
    }
}
