use crate::scan::metrics::{LookupMetrics, LookupMetricsSnapshot};
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::{ResolveError, Resolver};
use std::fmt;
use std::time::{Duration, Instant};

type TokioResolver = Resolver<TokioConnectionProvider>;

/// Record families collected by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Mx,
    Txt,
    Caa,
    Ds,
    Dnskey,
    Ns,
    Soa,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Mx => "MX",
            RecordKind::Txt => "TXT",
            RecordKind::Caa => "CAA",
            RecordKind::Ds => "DS",
            RecordKind::Dnskey => "DNSKEY",
            RecordKind::Ns => "NS",
            RecordKind::Soa => "SOA",
        }
    }

    fn record_type(&self) -> RecordType {
        match self {
            RecordKind::Mx => RecordType::MX,
            RecordKind::Txt => RecordType::TXT,
            RecordKind::Caa => RecordType::CAA,
            RecordKind::Ds => RecordType::DS,
            RecordKind::Dnskey => RecordType::DNSKEY,
            RecordKind::Ns => RecordType::NS,
            RecordKind::Soa => RecordType::SOA,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("{kind} lookup for {name} timed out after {timeout:?}")]
    Timeout {
        name: String,
        kind: RecordKind,
        timeout: Duration,
    },

    #[error("{kind} lookup for {name} failed: {message}")]
    Transport {
        name: String,
        kind: RecordKind,
        message: String,
    },
}

/// Record lookup seam. "No such records" is an empty answer, not an error.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<String>, LookupError>;
}

/// [`DnsLookup`] backed by hickory's tokio resolver.
pub struct HickoryLookup {
    resolver: TokioResolver,
    timeout: Duration,
    metrics: LookupMetrics,
}

impl HickoryLookup {
    /// Uses the system resolver configuration, falling back to hickory's defaults
    /// when none can be read.
    pub fn new(timeout: Duration) -> Self {
        let mut builder = match TokioResolver::builder_tokio() {
            Ok(builder) => builder,
            Err(err) => {
                tracing::warn!(error = %err, "system resolver config unavailable; using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
            }
        };
        let options = builder.options_mut();
        options.timeout = timeout;
        options.attempts = 2;

        Self {
            resolver: builder.build(),
            timeout,
            metrics: LookupMetrics::default(),
        }
    }

    pub fn metrics(&self) -> LookupMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<String>, LookupError> {
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.timeout, self.resolver.lookup(name, kind.record_type())).await;

        match outcome {
            Ok(Ok(answer)) => {
                let records: Vec<String> = answer.iter().map(render_rdata).collect();
                self.metrics.record_answer(started.elapsed(), records.len());
                Ok(records)
            }
            Ok(Err(err)) if is_empty_answer(&err) => {
                self.metrics.record_answer(started.elapsed(), 0);
                Ok(Vec::new())
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(started.elapsed());
                Err(LookupError::Transport {
                    name: name.to_string(),
                    kind,
                    message: err.to_string(),
                })
            }
            Err(_) => {
                self.metrics.record_timeout(started.elapsed());
                Err(LookupError::Timeout {
                    name: name.to_string(),
                    kind,
                    timeout: self.timeout,
                })
            }
        }
    }
}

fn is_empty_answer(err: &ResolveError) -> bool {
    err.is_no_records_found() || err.is_nx_domain()
}

/// TXT strings are concatenated into one value; every other type uses its
/// presentation format with trailing root dots stripped from names.
fn render_rdata(rdata: &RData) -> String {
    match rdata {
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk))
            .collect::<Vec<_>>()
            .join(""),
        RData::MX(mx) => format!(
            "{} {}",
            mx.preference(),
            mx.exchange().to_string().trim_end_matches('.')
        ),
        RData::NS(ns) => ns.to_string().trim_end_matches('.').to_string(),
        other => other.to_string(),
    }
}
