use crate::catalog::{PolicyTable, SiteRun, SnapshotInsert, Storage, StorageError};
use crate::executor::{TaskKind, TaskPolicy, TaskUnit};
use crate::runtime::telemetry::Telemetry;
use crate::scan::classify::RecordClassifier;
use crate::scan::probe::ProbeResult;
use anyhow::{Context, Result};
use futures::FutureExt;
use std::sync::Arc;

/// Classifies a probe result and persists it as the site's snapshot for the run.
#[derive(Clone)]
pub struct ProcessTask {
    store: Arc<dyn Storage>,
    classifier: Arc<dyn RecordClassifier>,
    dmarc_policies: Arc<PolicyTable>,
    spf_policies: Arc<PolicyTable>,
    telemetry: Arc<Telemetry>,
}

impl ProcessTask {
    pub fn new(
        store: Arc<dyn Storage>,
        classifier: Arc<dyn RecordClassifier>,
        dmarc_policies: PolicyTable,
        spf_policies: PolicyTable,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            store,
            classifier,
            dmarc_policies: Arc::new(dmarc_policies),
            spf_policies: Arc::new(spf_policies),
            telemetry,
        }
    }

    /// Reads the policy tables once so every task of a run resolves against the same rows.
    pub async fn load(
        store: Arc<dyn Storage>,
        classifier: Arc<dyn RecordClassifier>,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let dmarc = store
            .dmarc_policies()
            .await
            .context("failed to load dmarc policy table")?;
        let spf = store
            .spf_policies()
            .await
            .context("failed to load spf policy table")?;
        Ok(Self::new(store, classifier, dmarc, spf, telemetry))
    }

    pub fn unit(&self, result: ProbeResult, policy: TaskPolicy) -> TaskUnit<SnapshotInsert> {
        let task = self.clone();
        let label = format!("process {}", result.domain);
        let result = Arc::new(result);
        TaskUnit::new(TaskKind::Process, policy, label, move |_| {
            let task = task.clone();
            let result = Arc::clone(&result);
            async move { task.process(&result).await }.boxed()
        })
        .retry_when(is_storage_failure)
    }

    /// Builds the snapshot row without touching storage.
    pub fn snapshot(&self, result: &ProbeResult) -> SiteRun {
        let classification = self.classifier.classify(result);
        SiteRun {
            site_id: result.site_id,
            run_id: result.run_id,
            run_rank: result.rank,

            caa_records: result.caa.clone(),
            dmarc_records: result.dmarc.clone(),
            txt_records: result.txt.clone(),
            mx_records: result.mx.clone(),
            ns_records: result.ns.clone(),
            ds_records: result.ds.clone(),
            dnskey_records: result.dnskey.clone(),
            soa_records: result.soa.clone(),

            has_caa: classification.caa.exists,
            has_caa_reporting: classification.caa.reporting,
            caa_issue_count: classification.caa.issue_count,
            caa_wildcard_count: classification.caa.wildcard_count,
            has_dmarc: classification.dmarc.exists,
            dmarc_policy_id: self.dmarc_policies.resolve(&classification.dmarc.policy),
            dmarc_sub_policy_id: self
                .dmarc_policies
                .resolve(&classification.dmarc.sub_policy),
            has_dmarc_aggregate_reporting: classification.dmarc.aggregate_reporting,
            has_dmarc_forensic_reporting: classification.dmarc.forensic_reporting,
            has_spf: classification.spf.exists,
            spf_policy_id: self.spf_policies.resolve(&classification.spf.policy),
            email_provider: classification.email_provider,
            dns_provider: classification.dns_provider,
            dnssec_ds_algorithm: classification.ds.algorithm,
            dnssec_digest_type: classification.ds.digest_type,
            dnssec_dnskey_algorithm: classification.dnskey_algorithm,
            has_securitytxt: result.has_securitytxt,
            has_msdcs: result.has_msdcs,
            soa_grade: classification.soa_grade,
        }
    }

    /// Persists the snapshot. A second delivery for the same (site, run) is a no-op.
    pub async fn process(&self, result: &ProbeResult) -> Result<SnapshotInsert> {
        let snapshot = self.snapshot(result);
        let outcome = self
            .store
            .insert_site_run(snapshot)
            .await
            .with_context(|| format!("failed to store snapshot for {}", result.domain))?;

        match outcome {
            SnapshotInsert::Inserted => self.telemetry.record_snapshot_written(),
            SnapshotInsert::AlreadyPresent => {
                self.telemetry.record_duplicate_snapshot();
                tracing::debug!(
                    domain = %result.domain,
                    run_id = result.run_id,
                    "snapshot already stored; skipping"
                );
            }
        }
        Ok(outcome)
    }
}

/// Backend faults may clear up; a missing site or run will not.
fn is_storage_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::Poisoned | StorageError::Backend(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryStorage, NewRun, RankWindow, RunStore, SnapshotStore};
    use crate::scan::classify::StandardClassifier;
    use chrono::Utc;

    fn result() -> ProbeResult {
        ProbeResult {
            site_id: 1,
            domain: "example.com".into(),
            rank: 12,
            run_id: 1,
            txt: vec!["v=spf1 include:_spf.google.com ~all".into()],
            dmarc: vec!["v=DMARC1; p=bogus; sp=reject".into()],
            mx: vec!["1 aspmx.l.google.com".into()],
            ..ProbeResult::default()
        }
    }

    async fn task(store: &InMemoryStorage) -> (ProcessTask, Arc<Telemetry>) {
        let telemetry = Arc::new(Telemetry::default());
        let task = ProcessTask::load(
            Arc::new(store.clone()),
            Arc::new(StandardClassifier::default()),
            Arc::clone(&telemetry),
        )
        .await
        .unwrap();
        (task, telemetry)
    }

    #[tokio::test]
    async fn snapshot_resolves_policies_with_sentinel_fallback() {
        let store = InMemoryStorage::new();
        let (task, _) = task(&store).await;
        let snapshot = task.snapshot(&result());

        let dmarc = PolicyTable::dmarc_defaults();
        let spf = PolicyTable::spf_defaults();
        assert_eq!(snapshot.dmarc_policy_id, dmarc.sentinel());
        assert_eq!(snapshot.dmarc_sub_policy_id, dmarc.resolve("reject"));
        assert_eq!(snapshot.spf_policy_id, spf.resolve("~all"));
        assert_eq!(snapshot.email_provider.as_deref(), Some("Google"));
        assert_eq!(snapshot.run_rank, 12);
        assert!(snapshot.has_spf);
        assert!(!snapshot.has_caa);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_noop() {
        let store = InMemoryStorage::new();
        store.seed_sites([("example.com", 12)]).unwrap();
        store
            .create_run(NewRun {
                start_time: Utc::now(),
                window: RankWindow::new(1, 150).unwrap(),
            })
            .await
            .unwrap();
        let (task, telemetry) = task(&store).await;

        assert_eq!(task.process(&result()).await.unwrap(), SnapshotInsert::Inserted);
        assert_eq!(
            task.process(&result()).await.unwrap(),
            SnapshotInsert::AlreadyPresent
        );
        assert_eq!(store.count_site_runs(1).await.unwrap(), 1);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.snapshots_written, 1);
        assert_eq!(snapshot.duplicate_snapshots, 1);
    }

    #[test]
    fn only_storage_failures_are_retried() {
        let storage = anyhow::Error::new(StorageError::Poisoned).context("failed to store snapshot");
        assert!(is_storage_failure(&storage));
        assert!(!is_storage_failure(&anyhow::anyhow!("classifier bug")));
        assert!(!is_storage_failure(&anyhow::Error::new(StorageError::RunNotFound { run_id: 9 })));
    }
}
