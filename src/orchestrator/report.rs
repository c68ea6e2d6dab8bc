use crate::catalog::{PolicyTable, RunId, SiteRun, Storage, StorageError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const SUMMARY_FILE: &str = "summary.json";

/// Publishes the results of one run and returns references to what it produced.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, run_id: RunId) -> Result<Vec<String>>;
}

/// Aggregate posture counts over every snapshot of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub start_time: String,
    pub start_rank: u32,
    pub end_rank: u32,
    pub sites: usize,
    pub with_spf: usize,
    pub with_dmarc: usize,
    pub with_dmarc_aggregate_reporting: usize,
    pub with_caa: usize,
    pub with_caa_reporting: usize,
    pub with_dnssec: usize,
    pub with_securitytxt: usize,
    pub with_msdcs: usize,
    pub spf_policies: BTreeMap<String, usize>,
    pub dmarc_policies: BTreeMap<String, usize>,
    pub email_providers: BTreeMap<String, usize>,
    pub dns_providers: BTreeMap<String, usize>,
    pub soa_grades: BTreeMap<u8, usize>,
}

impl RunReport {
    fn tally(&mut self, snapshot: &SiteRun, dmarc: &PolicyTable, spf: &PolicyTable) {
        self.sites += 1;
        self.with_spf += usize::from(snapshot.has_spf);
        self.with_dmarc += usize::from(snapshot.has_dmarc);
        self.with_dmarc_aggregate_reporting += usize::from(snapshot.has_dmarc_aggregate_reporting);
        self.with_caa += usize::from(snapshot.has_caa);
        self.with_caa_reporting += usize::from(snapshot.has_caa_reporting);
        self.with_dnssec += usize::from(snapshot.dnssec_ds_algorithm.is_some());
        self.with_securitytxt += usize::from(snapshot.has_securitytxt);
        self.with_msdcs += usize::from(snapshot.has_msdcs);

        bump(&mut self.spf_policies, policy_name(spf, snapshot.spf_policy_id));
        bump(&mut self.dmarc_policies, policy_name(dmarc, snapshot.dmarc_policy_id));
        if let Some(provider) = &snapshot.email_provider {
            bump(&mut self.email_providers, provider.clone());
        }
        if let Some(provider) = &snapshot.dns_provider {
            bump(&mut self.dns_providers, provider.clone());
        }
        if let Some(grade) = snapshot.soa_grade {
            *self.soa_grades.entry(grade).or_default() += 1;
        }
    }
}

fn bump(counts: &mut BTreeMap<String, usize>, key: String) {
    *counts.entry(key).or_default() += 1;
}

fn policy_name(table: &PolicyTable, id: u32) -> String {
    table
        .policy_for(id)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("#{id}"))
}

/// Writes `<report_dir>/<YYYY-MM-DD>/summary.json`, dated by the run's start time.
pub struct JsonSummaryRenderer {
    store: Arc<dyn Storage>,
    report_dir: PathBuf,
}

impl JsonSummaryRenderer {
    pub fn new(store: Arc<dyn Storage>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            report_dir: report_dir.into(),
        }
    }

    pub async fn summarize(&self, run_id: RunId) -> Result<RunReport> {
        let run = self
            .store
            .run(run_id)
            .await?
            .ok_or(StorageError::RunNotFound { run_id })?;
        let snapshots = self
            .store
            .site_runs(run_id)
            .await
            .with_context(|| format!("failed to load snapshots for run {run_id}"))?;
        let dmarc = self.store.dmarc_policies().await?;
        let spf = self.store.spf_policies().await?;

        let mut report = RunReport {
            run_id,
            start_time: run.start_time.to_rfc3339(),
            start_rank: run.start_rank,
            end_rank: run.end_rank,
            ..RunReport::default()
        };
        for snapshot in &snapshots {
            report.tally(snapshot, &dmarc, &spf);
        }
        Ok(report)
    }
}

#[async_trait]
impl ReportRenderer for JsonSummaryRenderer {
    #[tracing::instrument(skip(self))]
    async fn render(&self, run_id: RunId) -> Result<Vec<String>> {
        let report = self.summarize(run_id).await?;
        let date = report
            .start_time
            .get(..10)
            .context("run start time is not an RFC 3339 timestamp")?;
        let dir = self.report_dir.join(date);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create report directory {}", dir.display()))?;

        let path = dir.join(SUMMARY_FILE);
        let body = serde_json::to_vec_pretty(&report).context("failed to encode run summary")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::info!(run_id, sites = report.sites, path = %path.display(), "run summary written");
        Ok(vec![path.display().to_string()])
    }
}
