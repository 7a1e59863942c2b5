#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/strata/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod panel;
pub mod types;

pub use error::{PanelError, Result};
pub use frame::{ColumnMapping, parse_month};
pub use panel::{CompletionConfig, ObservationPanel};
pub use types::{CategoryCode, CrossCutKey, CutId, Observation, SeriesKey};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
