//! Per-domain scan work: DNS lookups, record grading and snapshot persistence.

pub mod classify;
pub mod metrics;
pub mod probe;
pub mod process;
pub mod resolver;

pub use classify::{Classification, RecordClassifier, StandardClassifier};
pub use metrics::{LookupMetrics, LookupMetricsSnapshot};
pub use probe::{ProbeResult, ProbeTask, SecurityTxtProbe};
pub use process::ProcessTask;
pub use resolver::{DnsLookup, HickoryLookup, LookupError, RecordKind};
