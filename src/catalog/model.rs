use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SiteId = u64;
pub type RunId = u64;
pub type PolicyId = u32;

/// Rank value stored for domains that are known but absent from the latest feed.
pub const UNRANKED: u32 = 0;

/// A domain tracked by the catalog together with its most recent feed rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub domain: String,
    pub current_rank: u32,
}

impl Site {
    pub fn is_ranked(&self) -> bool {
        self.current_rank != UNRANKED
    }
}

/// Inclusive `[start, end]` rank range scanned by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankWindow {
    start: u32,
    end: u32,
}

impl RankWindow {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start == UNRANKED {
            bail!("rank window must start at 1 or above; rank 0 marks unranked sites");
        }
        if end < start {
            bail!("rank window end ({end}) must not be below its start ({start})");
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, rank: u32) -> bool {
        rank >= self.start && rank <= self.end
    }
}

/// One execution cycle of the scan pipeline. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub start_time: DateTime<Utc>,
    pub start_rank: u32,
    pub end_rank: u32,
}

impl Run {
    pub fn window(&self) -> Result<RankWindow> {
        RankWindow::new(self.start_rank, self.end_rank)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub start_time: DateTime<Utc>,
    pub window: RankWindow,
}

/// Snapshot of one site's DNS posture captured during one run.
///
/// Raw record columns keep the lookup output verbatim so the grade fields can be
/// recomputed offline; the remaining columns are derived by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiteRun {
    pub site_id: SiteId,
    pub run_id: RunId,
    pub run_rank: u32,

    pub caa_records: Vec<String>,
    pub dmarc_records: Vec<String>,
    pub txt_records: Vec<String>,
    pub mx_records: Vec<String>,
    pub ns_records: Vec<String>,
    pub ds_records: Vec<String>,
    pub dnskey_records: Vec<String>,
    pub soa_records: Vec<String>,

    pub has_caa: bool,
    pub has_caa_reporting: bool,
    pub caa_issue_count: u32,
    pub caa_wildcard_count: u32,
    pub has_dmarc: bool,
    pub dmarc_policy_id: PolicyId,
    pub dmarc_sub_policy_id: PolicyId,
    pub has_dmarc_aggregate_reporting: bool,
    pub has_dmarc_forensic_reporting: bool,
    pub has_spf: bool,
    pub spf_policy_id: PolicyId,
    pub email_provider: Option<String>,
    pub dns_provider: Option<String>,
    pub dnssec_ds_algorithm: Option<u8>,
    pub dnssec_digest_type: Option<u8>,
    pub dnssec_dnskey_algorithm: Option<u8>,
    pub has_securitytxt: bool,
    pub has_msdcs: bool,
    pub soa_grade: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_inclusive() {
        let window = RankWindow::new(1, 150).unwrap();
        assert!(window.contains(1));
        assert!(window.contains(150));
        assert!(!window.contains(151));
        assert!(!window.contains(UNRANKED));
    }

    #[test]
    fn window_rejects_unranked_start_and_inverted_bounds() {
        let err = RankWindow::new(0, 10).unwrap_err();
        assert!(format!("{err}").contains("rank 0"));

        let err = RankWindow::new(10, 5).unwrap_err();
        assert!(format!("{err}").contains("must not be below"));
    }

    #[test]
    fn single_rank_window_is_valid() {
        let window = RankWindow::new(7, 7).unwrap();
        assert!(window.contains(7));
        assert!(!window.contains(6));
    }
}
