//! Delta reconciliation of finer cuts against the national series
//!
//! 1. National pass: the national cut, transformed, is smoothed once.
//! 2. Each finer-cut row is joined to the raw national row with the same
//!    dimensions, category and month; `delta = national_raw - cut_raw`.
//!    Rows without a national counterpart are dropped.
//! 3. The deltas are smoothed with the same models.
//! 4. `cut = national_smoothed - delta_smoothed`, per variant and estimate kind.
//! 5. Raw and smoothed values are mapped back to the natural domain and the
//!    smoothed values clipped when configured.
//!
//! [`DeltaReconciler::reconcile_anchored`] skips step 1 and takes the national
//! raw and smoothed values from a [`NationalAnchor`] instead.

use crate::anchor::{AnchorRow, NationalAnchor};
use crate::config::MetricConfig;
use crate::error::{ReconcileError, Result};
use crate::output::{Estimate, ReconciledTable, SmoothedRecord, VariantEstimates};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use strata_covariance::{CorrelationMatrix, CorrelationMode, CovarianceModel};
use strata_panel::{CrossCutKey, Observation, ObservationPanel};
use strata_smoothing::{
    KfModel, OutputKind, Partition, PartitionHook, PartitionKey, PartitionLayout, Runner,
    SharedModel, SmoothingEngine, output_column, variant_prefix,
};
use tracing::{debug, info, warn};

/// Runs the national and delta passes for one metric at a time
#[derive(Debug, Clone)]
pub struct DeltaReconciler {
    engine: Arc<dyn SmoothingEngine>,
    correlation: Arc<CorrelationMatrix>,
    layout: PartitionLayout,
    hooks: Vec<Arc<dyn PartitionHook>>,
}

impl DeltaReconciler {
    /// Create a reconciler sharing `correlation` across every correlated model.
    pub fn new(engine: Arc<dyn SmoothingEngine>, correlation: Arc<CorrelationMatrix>) -> Self {
        Self {
            engine,
            correlation,
            layout: PartitionLayout::default(),
            hooks: Vec::new(),
        }
    }

    /// Use different auxiliary column names inside partitions.
    pub fn with_layout(mut self, layout: PartitionLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Add a hook run around every partition of both passes.
    pub fn with_hook(mut self, hook: Arc<dyn PartitionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Correlation matrix in use
    pub fn correlation(&self) -> &CorrelationMatrix {
        &self.correlation
    }

    /// Partitions a run over `panel` will process, at most: one per (cut, dimensions).
    pub fn planned_partitions(panel: &ObservationPanel) -> usize {
        panel
            .observations()
            .iter()
            .map(|o| (o.cut, &o.dimensions))
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn models(&self, config: &MetricConfig) -> Result<Vec<SharedModel>> {
        config
            .variants
            .iter()
            .map(|&mode| {
                let covariance =
                    CovarianceModel::for_mode(mode, &self.correlation, config.process_std)?;
                let model: SharedModel = Arc::new(KfModel::new(
                    config.metric.as_str(),
                    self.layout.sample_count_col.as_str(),
                    covariance,
                ));
                Ok(model)
            })
            .collect()
    }

    fn runner(&self, models: &[SharedModel]) -> Runner {
        let runner = Runner::new(Arc::clone(&self.engine)).with_models(models.iter().cloned());
        self.hooks
            .iter()
            .fold(runner, |runner, hook| runner.with_hook(Arc::clone(hook)))
    }

    /// Smooth `panel` and return estimates for every observation, in the
    /// smoothing domain, keyed by cross-cut key.
    fn smooth_pass(
        &self,
        runner: &Runner,
        panel: &ObservationPanel,
        config: &MetricConfig,
    ) -> Result<HashMap<(PartitionKey, CrossCutKey), VariantEstimates>> {
        let mut partitions = Partition::split_panel(panel, &self.layout);
        runner.run(&mut partitions)?;

        let by_key: HashMap<&PartitionKey, &Partition> =
            partitions.iter().map(|p| (p.key(), p)).collect();
        let columns: Vec<(CorrelationMode, String, String)> = config
            .variants
            .iter()
            .map(|&mode| {
                let prefix = variant_prefix(&config.metric, mode);
                (
                    mode,
                    output_column(&prefix, OutputKind::Filtered),
                    output_column(&prefix, OutputKind::Smoothed),
                )
            })
            .collect();

        let mut estimates = HashMap::with_capacity(panel.len());
        for obs in panel.observations() {
            let key = partition_key(obs);
            let Some(partition) = by_key.get(&key) else {
                continue;
            };

            let mut variants = VariantEstimates::default();
            for (mode, filtered_col, smoothed_col) in &columns {
                let smoothed = partition.value(smoothed_col, obs.month, obs.category);
                let filtered = partition.value(filtered_col, obs.month, obs.category);
                if let Some(smoothed) = smoothed {
                    variants.set(
                        *mode,
                        Estimate {
                            filtered: filtered.filter(|_| config.retain_filtered),
                            smoothed,
                        },
                    );
                }
            }
            estimates.insert((key, obs.cross_cut_key()), variants);
        }

        Ok(estimates)
    }

    fn check_metric(panel: &ObservationPanel, config: &MetricConfig) -> Result<()> {
        config.validate()?;
        if panel.metric() != config.metric {
            return Err(ReconcileError::MetricMismatch {
                expected: config.metric.clone(),
                actual: panel.metric().to_string(),
            });
        }
        Ok(())
    }

    /// Smooth the transformed `cuts` as deviations from `national` and recombine.
    ///
    /// Returns natural-domain records for the joined cut rows and the number of
    /// cut rows dropped for lack of a national counterpart.
    fn delta_pass(
        &self,
        runner: &Runner,
        cuts: &ObservationPanel,
        national: &HashMap<CrossCutKey, AnchorRow>,
        config: &MetricConfig,
    ) -> Result<(Vec<SmoothedRecord>, usize)> {
        let joined: Vec<(&Observation, &AnchorRow)> = cuts
            .observations()
            .iter()
            .filter_map(|obs| national.get(&obs.cross_cut_key()).map(|nat| (obs, nat)))
            .collect();
        let dropped = cuts.len() - joined.len();
        if dropped > 0 {
            warn!(
                metric = %config.metric,
                dropped,
                "dropped cut rows without a national counterpart"
            );
        }

        let deltas = joined
            .iter()
            .map(|(obs, nat)| Observation {
                value: nat.raw - obs.value,
                ..(*obs).clone()
            })
            .collect();
        let delta_panel = ObservationPanel::new(
            config.metric.as_str(),
            cuts.dimension_names().to_vec(),
            deltas,
        )?;
        let delta_estimates = self.smooth_pass(runner, &delta_panel, config)?;

        // recombination
        let records = joined
            .iter()
            .map(|(obs, nat)| {
                let delta = delta_estimates
                    .get(&(partition_key(obs), obs.cross_cut_key()))
                    .copied()
                    .unwrap_or_default();

                let mut estimates = VariantEstimates::default();
                for &mode in &config.variants {
                    if let (Some(n), Some(d)) = (nat.estimates.get(mode), delta.get(mode)) {
                        estimates.set(
                            mode,
                            Estimate {
                                filtered: n.filtered.zip(d.filtered).map(|(n, d)| n - d),
                                smoothed: n.smoothed - d.smoothed,
                            },
                        );
                    }
                }
                record(
                    obs,
                    config.transform.inverse(obs.value),
                    estimates.map(|v| restore(config, v)),
                )
            })
            .collect();

        Ok((records, dropped))
    }

    /// Reconcile one metric over a panel containing the national cut and finer cuts.
    pub fn reconcile(
        &self,
        panel: &ObservationPanel,
        config: &MetricConfig,
    ) -> Result<ReconciledTable> {
        Self::check_metric(panel, config)?;

        let transform = config.transform;
        let transformed = panel.map_values(|v| transform.forward(v));
        let national = transformed.national();
        let finer = transformed.finer_cuts();
        if national.is_empty() {
            warn!(metric = %config.metric, "panel has no national rows, every cut row will be dropped");
        }

        let models = self.models(config)?;
        let runner = self.runner(&models);

        // national pass
        let national_estimates = self.smooth_pass(&runner, &national, config)?;
        let national_rows: HashMap<CrossCutKey, AnchorRow> = national
            .observations()
            .iter()
            .map(|obs| {
                let key = obs.cross_cut_key();
                let estimates = national_estimates
                    .get(&(partition_key(obs), key.clone()))
                    .copied()
                    .unwrap_or_default();
                (
                    key,
                    AnchorRow {
                        raw: obs.value,
                        estimates,
                    },
                )
            })
            .collect();

        let mut records: Vec<SmoothedRecord> = national
            .observations()
            .iter()
            .filter_map(|obs| {
                national_rows.get(&obs.cross_cut_key()).map(|nat| {
                    record(
                        obs,
                        transform.inverse(obs.value),
                        nat.estimates.map(|v| restore(config, v)),
                    )
                })
            })
            .collect();

        let (cut_records, dropped) = self.delta_pass(&runner, &finer, &national_rows, config)?;
        info!(
            metric = %config.metric,
            national = records.len(),
            cuts = cut_records.len(),
            dropped,
            "reconciled metric"
        );
        records.extend(cut_records);

        Ok(ReconciledTable::new(
            config.metric.as_str(),
            panel.dimension_names().to_vec(),
            config.variants.clone(),
            config.retain_filtered,
            records,
        ))
    }

    /// Reconcile every row of `panel` against an external national anchor.
    ///
    /// No national pass is run: each row is joined to the anchor on dimensions,
    /// category and month, its deviation from the anchor's raw value is
    /// smoothed, and the result is subtracted from the anchor's estimate of the
    /// same variant. Only the rows of `panel` are returned. Rows without an
    /// anchor are dropped with a warning.
    ///
    /// Chaining levels: reconcile the national rows against a parent series
    /// with [`NationalAnchor::from_series`], then the finer cuts against
    /// [`NationalAnchor::from_table`] of that result.
    pub fn reconcile_anchored(
        &self,
        panel: &ObservationPanel,
        config: &MetricConfig,
        anchor: &NationalAnchor,
    ) -> Result<ReconciledTable> {
        Self::check_metric(panel, config)?;
        if anchor.metric() != config.metric {
            return Err(ReconcileError::MetricMismatch {
                expected: config.metric.clone(),
                actual: anchor.metric().to_string(),
            });
        }
        if anchor.is_empty() {
            warn!(metric = %config.metric, "anchor is empty, every row will be dropped");
        }

        let transform = config.transform;
        let cuts = panel.map_values(|v| transform.forward(v));
        let national = anchor.forward(transform);

        let models = self.models(config)?;
        let runner = self.runner(&models);
        let (records, dropped) = self.delta_pass(&runner, &cuts, &national, config)?;
        info!(
            metric = %config.metric,
            anchored = national.len(),
            cuts = records.len(),
            dropped,
            "reconciled metric against anchor"
        );

        Ok(ReconciledTable::new(
            config.metric.as_str(),
            panel.dimension_names().to_vec(),
            config.variants.clone(),
            config.retain_filtered,
            records,
        ))
    }

    /// Split `panel` on `dimension`, reconcile each stratum and concatenate.
    pub fn reconcile_stratified(
        &self,
        panel: &ObservationPanel,
        config: &MetricConfig,
        dimension: &str,
    ) -> Result<ReconciledTable> {
        let strata = panel.stratify(dimension)?;
        debug!(dimension, strata = strata.len(), "reconciling strata");

        let tables = strata
            .values()
            .map(|stratum| self.reconcile(stratum, config))
            .collect::<Result<Vec<_>>>()?;

        if tables.is_empty() {
            return Ok(ReconciledTable::new(
                config.metric.as_str(),
                panel.dimension_names().to_vec(),
                config.variants.clone(),
                config.retain_filtered,
                Vec::new(),
            ));
        }
        ReconciledTable::concat(tables)
    }
}

fn partition_key(obs: &Observation) -> PartitionKey {
    PartitionKey {
        cut: obs.cut,
        dimensions: obs.dimensions.clone(),
    }
}

/// Back to the natural domain, clipped when configured.
fn restore(config: &MetricConfig, v: f64) -> f64 {
    let natural = config.transform.inverse(v);
    config.clip.map_or(natural, |clip| clip.apply(natural))
}

fn record(obs: &Observation, raw: f64, estimates: VariantEstimates) -> SmoothedRecord {
    SmoothedRecord {
        cut: obs.cut,
        dimensions: obs.dimensions.clone(),
        category: obs.category,
        month: obs.month,
        sample_count: obs.sample_count,
        sample_weight: obs.sample_weight,
        raw,
        estimates,
    }
}
