use crate::catalog::{RunId, Site, SiteId};
use crate::executor::{TaskContext, TaskKind, TaskPolicy, TaskUnit};
use crate::runtime::telemetry::Telemetry;
use crate::scan::resolver::{DnsLookup, LookupError, RecordKind};
use anyhow::{bail, Context, Result};
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const SECURITY_TXT_PATH: &str = "/.well-known/security.txt";

/// Raw lookup output for one site in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub site_id: SiteId,
    pub domain: String,
    pub rank: u32,
    pub run_id: RunId,
    pub mx: Vec<String>,
    pub txt: Vec<String>,
    pub caa: Vec<String>,
    pub ds: Vec<String>,
    pub dnskey: Vec<String>,
    pub ns: Vec<String>,
    pub soa: Vec<String>,
    pub dmarc: Vec<String>,
    pub has_securitytxt: bool,
    pub has_msdcs: bool,
    /// Lookups that failed and were recorded as empty.
    pub lookup_failures: u32,
}

/// Fetches `https://<domain>/.well-known/security.txt` and reports whether it answered 200.
#[derive(Debug, Clone)]
pub struct SecurityTxtProbe {
    client: reqwest::Client,
}

impl SecurityTxtProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .context("failed to build security.txt http client")?;
        Ok(Self { client })
    }

    pub async fn check(&self, domain: &str) -> bool {
        let url = format!("https://{domain}{SECURITY_TXT_PATH}");
        match self.client.get(&url).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(err) => {
                tracing::trace!(domain, error = %err, "security.txt fetch failed");
                false
            }
        }
    }
}

/// Collects the raw record sets for one domain.
#[derive(Clone)]
pub struct ProbeTask {
    lookup: Arc<dyn DnsLookup>,
    security_txt: Option<SecurityTxtProbe>,
    telemetry: Arc<Telemetry>,
}

impl ProbeTask {
    pub fn new(
        lookup: Arc<dyn DnsLookup>,
        security_txt: Option<SecurityTxtProbe>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            lookup,
            security_txt,
            telemetry,
        }
    }

    /// Wraps [`ProbeTask::probe`] in a unit governed by `policy`.
    pub fn unit(&self, site: Site, run_id: RunId, policy: TaskPolicy) -> TaskUnit<ProbeResult> {
        let task = self.clone();
        let label = format!("probe {}", site.domain);
        let site = Arc::new(site);
        TaskUnit::new(TaskKind::Probe, policy, label, move |ctx| {
            let task = task.clone();
            let site = Arc::clone(&site);
            async move { task.probe(&site, run_id, &ctx).await }.boxed()
        })
    }

    /// Runs every lookup in turn. A failed lookup is an empty answer; only
    /// cancellation of the attempt ends the probe early.
    pub async fn probe(&self, site: &Site, run_id: RunId, ctx: &TaskContext) -> Result<ProbeResult> {
        let domain = site.domain.as_str();
        let mut result = ProbeResult {
            site_id: site.id,
            domain: site.domain.clone(),
            rank: site.current_rank,
            run_id,
            ..ProbeResult::default()
        };

        let dmarc_name = format!("_dmarc.{domain}");
        let msdcs_name = format!("_msdcs.{domain}");
        let queries: [(&str, RecordKind); 9] = [
            (domain, RecordKind::Mx),
            (domain, RecordKind::Txt),
            (domain, RecordKind::Caa),
            (domain, RecordKind::Ds),
            (domain, RecordKind::Dnskey),
            (domain, RecordKind::Ns),
            (domain, RecordKind::Soa),
            (&dmarc_name, RecordKind::Txt),
            (&msdcs_name, RecordKind::Ns),
        ];

        let mut answers = Vec::with_capacity(queries.len());
        for (name, kind) in queries {
            let records = tokio::select! {
                biased;
                _ = ctx.cancelled() => bail!("probe of {domain} cancelled"),
                outcome = self.lookup.lookup(name, kind) => outcome,
            };
            answers.push(self.recover(records, &mut result.lookup_failures));
        }

        let mut answers = answers.into_iter();
        let mut next = || answers.next().unwrap_or_default();
        result.mx = next();
        result.txt = next();
        result.caa = next();
        result.ds = next();
        result.dnskey = next();
        result.ns = next();
        result.soa = next();
        result.dmarc = next();
        result.has_msdcs = !next().is_empty();

        if let Some(security_txt) = &self.security_txt {
            result.has_securitytxt = tokio::select! {
                biased;
                _ = ctx.cancelled() => bail!("probe of {domain} cancelled"),
                found = security_txt.check(domain) => found,
            };
        }

        if result.lookup_failures > 0 {
            self.telemetry
                .record_lookup_failures(u64::from(result.lookup_failures));
        }
        tracing::debug!(
            domain,
            run_id,
            failures = result.lookup_failures,
            "probe complete"
        );
        Ok(result)
    }

    fn recover(&self, outcome: Result<Vec<String>, LookupError>, failures: &mut u32) -> Vec<String> {
        match outcome {
            Ok(records) => records,
            Err(err) => {
                *failures += 1;
                tracing::debug!(error = %err, "lookup failed; recording empty answer");
                Vec::new()
            }
        }
    }
}
