use crate::executor::TaskPolicy;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_FEED_URL: &str = "https://tranco-list.eu/top-1m.csv.zip";
pub const DEFAULT_FEED_MEMBER: &str = "top-1m.csv";
pub const DEFAULT_RECONCILE_BATCH_SIZE: usize = 100;
pub const DEFAULT_FANOUT_GROUP_SIZE: usize = 10_000;
const DEVELOPMENT_RANK_CEILING: u32 = 150;
const PRODUCTION_RANK_CEILING: u32 = 1_000_000;
const DEFAULT_WORKER_COUNT: usize = 64;
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REPORT_DIR: &str = "reports";
const DEFAULT_MAIL_FROM: &str = "scans@dnsposture.local";

const ENV_PREFIX: &str = "DNSPOSTURE_";

/// Deployment flavour; picks the default scan window and the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn default_rank_ceiling(&self) -> u32 {
        match self {
            Environment::Development => DEVELOPMENT_RANK_CEILING,
            Environment::Production => PRODUCTION_RANK_CEILING,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!("unknown environment '{other}' (expected development or production)"),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Daily UTC fire times for the scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub import_at: NaiveTime,
    pub run_at: NaiveTime,
    pub finalize_at: NaiveTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            import_at: hm(0, 58),
            run_at: hm(8, 0),
            finalize_at: hm(13, 0),
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Outbound mail settings. Without an API key notifications are only logged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailSettings {
    pub api_key: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

/// Runtime configuration for the reconcile and scan pipeline.
///
/// All instances must be constructed via [`ScanConfig::builder`] or [`ScanConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    environment: Environment,
    feed_url: String,
    feed_member: String,
    run_rank_ceiling: u32,
    reconcile_batch_size: usize,
    fanout_group_size: usize,
    worker_count: usize,
    probe_policy: TaskPolicy,
    process_policy: TaskPolicy,
    apply_policy: TaskPolicy,
    lookup_timeout: Duration,
    metrics_interval: Duration,
    schedule: Schedule,
    report_dir: PathBuf,
    check_security_txt: bool,
    mail: MailSettings,
}

pub struct ScanConfigParams {
    pub environment: Environment,
    pub feed_url: String,
    pub feed_member: String,
    pub run_rank_ceiling: u32,
    pub reconcile_batch_size: usize,
    pub fanout_group_size: usize,
    pub worker_count: usize,
    pub probe_policy: TaskPolicy,
    pub process_policy: TaskPolicy,
    pub apply_policy: TaskPolicy,
    pub lookup_timeout: Duration,
    pub metrics_interval: Duration,
    pub schedule: Schedule,
    pub report_dir: PathBuf,
    pub check_security_txt: bool,
    pub mail: MailSettings,
}

impl ScanConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: ScanConfigParams) -> Result<Self> {
        let ScanConfigParams {
            environment,
            feed_url,
            feed_member,
            run_rank_ceiling,
            reconcile_batch_size,
            fanout_group_size,
            worker_count,
            probe_policy,
            process_policy,
            apply_policy,
            lookup_timeout,
            metrics_interval,
            schedule,
            report_dir,
            check_security_txt,
            mail,
        } = params;

        let config = Self {
            environment,
            feed_url: trimmed_string(feed_url),
            feed_member: trimmed_string(feed_member),
            run_rank_ceiling,
            reconcile_batch_size,
            fanout_group_size,
            worker_count,
            probe_policy,
            process_policy,
            apply_policy,
            lookup_timeout,
            metrics_interval,
            schedule,
            report_dir,
            check_security_txt,
            mail: MailSettings {
                api_key: mail.api_key.map(trimmed_string).filter(|key| !key.is_empty()),
                from: trimmed_string(mail.from),
                to: mail
                    .to
                    .into_iter()
                    .map(trimmed_string)
                    .filter(|address| !address.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `DNSPOSTURE_*` variables from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ScanConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
        };

        let mut builder = ScanConfig::builder();
        if let Some(value) = var("ENV") {
            builder = builder.environment(value.parse()?);
        }
        if let Some(value) = var("FEED_URL") {
            builder = builder.feed_url(value);
        }
        if let Some(value) = var("FEED_MEMBER") {
            builder = builder.feed_member(value);
        }
        if let Some(value) = var("RANK_CEILING") {
            builder = builder.run_rank_ceiling(parse_var("RANK_CEILING", &value)?);
        }
        if let Some(value) = var("BATCH_SIZE") {
            builder = builder.reconcile_batch_size(parse_var("BATCH_SIZE", &value)?);
        }
        if let Some(value) = var("GROUP_SIZE") {
            builder = builder.fanout_group_size(parse_var("GROUP_SIZE", &value)?);
        }
        if let Some(value) = var("WORKERS") {
            builder = builder.worker_count(parse_var("WORKERS", &value)?);
        }
        if let Some(value) = var("LOOKUP_TIMEOUT_SECS") {
            builder = builder.lookup_timeout(Duration::from_secs(parse_var(
                "LOOKUP_TIMEOUT_SECS",
                &value,
            )?));
        }
        if let Some(value) = var("METRICS_INTERVAL_SECS") {
            builder = builder.metrics_interval(Duration::from_secs(parse_var(
                "METRICS_INTERVAL_SECS",
                &value,
            )?));
        }

        let mut schedule = Schedule::default();
        if let Some(value) = var("IMPORT_AT") {
            schedule.import_at = parse_time("IMPORT_AT", &value)?;
        }
        if let Some(value) = var("RUN_AT") {
            schedule.run_at = parse_time("RUN_AT", &value)?;
        }
        if let Some(value) = var("FINALIZE_AT") {
            schedule.finalize_at = parse_time("FINALIZE_AT", &value)?;
        }
        builder = builder.schedule(schedule);

        if let Some(value) = var("REPORT_DIR") {
            builder = builder.report_dir(value);
        }
        if let Some(value) = var("SECURITY_TXT") {
            builder = builder.check_security_txt(parse_var("SECURITY_TXT", &value)?);
        }

        let mail = MailSettings {
            api_key: var("SENDGRID_API_KEY"),
            from: var("MAIL_FROM").unwrap_or_else(|| DEFAULT_MAIL_FROM.to_string()),
            to: var("MAIL_TO")
                .map(|value| value.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        };

        builder.mail(mail).build()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// URL of the zip-compressed ranked feed.
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    /// Name of the CSV member inside the feed archive.
    pub fn feed_member(&self) -> &str {
        &self.feed_member
    }

    /// Highest rank included in a scan run's window.
    pub fn run_rank_ceiling(&self) -> u32 {
        self.run_rank_ceiling
    }

    /// Maximum entries per new/changed reconcile batch.
    pub fn reconcile_batch_size(&self) -> usize {
        self.reconcile_batch_size
    }

    /// Maximum probe/process chains per fan-out group.
    pub fn fanout_group_size(&self) -> usize {
        self.fanout_group_size
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn probe_policy(&self) -> TaskPolicy {
        self.probe_policy
    }

    pub fn process_policy(&self) -> TaskPolicy {
        self.process_policy
    }

    /// Policy shared by new/update batches and unrank tasks.
    pub fn apply_policy(&self) -> TaskPolicy {
        self.apply_policy
    }

    /// Per-query timeout handed to the DNS resolver.
    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn check_security_txt(&self) -> bool {
        self.check_security_txt
    }

    pub fn mail(&self) -> &MailSettings {
        &self.mail
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.feed_url)?;
        ensure_not_empty(&self.feed_member, "feed_member")?;

        if self.run_rank_ceiling == 0 {
            bail!("run_rank_ceiling must be greater than 0");
        }

        if self.reconcile_batch_size == 0 {
            bail!("reconcile_batch_size must be greater than 0");
        }

        if self.fanout_group_size == 0 {
            bail!("fanout_group_size must be greater than 0");
        }

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.lookup_timeout.is_zero() {
            bail!("lookup_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        self.probe_policy.validate("probe")?;
        self.process_policy.validate("process")?;
        self.apply_policy.validate("apply")?;

        if self.mail.api_key.is_some() {
            ensure_not_empty(&self.mail.from, "mail.from")?;
            if self.mail.to.is_empty() {
                bail!("mail.to must list at least one recipient when an API key is set");
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScanConfigBuilder {
    environment: Option<Environment>,
    feed_url: Option<String>,
    feed_member: Option<String>,
    run_rank_ceiling: Option<u32>,
    reconcile_batch_size: Option<usize>,
    fanout_group_size: Option<usize>,
    worker_count: Option<usize>,
    probe_policy: Option<TaskPolicy>,
    process_policy: Option<TaskPolicy>,
    apply_policy: Option<TaskPolicy>,
    lookup_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    schedule: Option<Schedule>,
    report_dir: Option<PathBuf>,
    check_security_txt: Option<bool>,
    mail: Option<MailSettings>,
}

impl ScanConfigBuilder {
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    pub fn feed_member(mut self, member: impl Into<String>) -> Self {
        self.feed_member = Some(member.into());
        self
    }

    pub fn run_rank_ceiling(mut self, ceiling: u32) -> Self {
        self.run_rank_ceiling = Some(ceiling);
        self
    }

    pub fn reconcile_batch_size(mut self, size: usize) -> Self {
        self.reconcile_batch_size = Some(size);
        self
    }

    pub fn fanout_group_size(mut self, size: usize) -> Self {
        self.fanout_group_size = Some(size);
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn probe_policy(mut self, policy: TaskPolicy) -> Self {
        self.probe_policy = Some(policy);
        self
    }

    pub fn process_policy(mut self, policy: TaskPolicy) -> Self {
        self.process_policy = Some(policy);
        self
    }

    pub fn apply_policy(mut self, policy: TaskPolicy) -> Self {
        self.apply_policy = Some(policy);
        self
    }

    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn check_security_txt(mut self, enabled: bool) -> Self {
        self.check_security_txt = Some(enabled);
        self
    }

    pub fn mail(mut self, mail: MailSettings) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn build(self) -> Result<ScanConfig> {
        let environment = self.environment.unwrap_or_default();
        let params = ScanConfigParams {
            environment,
            feed_url: self.feed_url.unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            feed_member: self
                .feed_member
                .unwrap_or_else(|| DEFAULT_FEED_MEMBER.to_string()),
            run_rank_ceiling: self
                .run_rank_ceiling
                .unwrap_or_else(|| environment.default_rank_ceiling()),
            reconcile_batch_size: self
                .reconcile_batch_size
                .unwrap_or(DEFAULT_RECONCILE_BATCH_SIZE),
            fanout_group_size: self.fanout_group_size.unwrap_or(DEFAULT_FANOUT_GROUP_SIZE),
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            probe_policy: self.probe_policy.unwrap_or_else(TaskPolicy::probe_default),
            process_policy: self
                .process_policy
                .unwrap_or_else(TaskPolicy::process_default),
            apply_policy: self.apply_policy.unwrap_or_else(TaskPolicy::apply_default),
            lookup_timeout: self
                .lookup_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            schedule: self.schedule.unwrap_or_default(),
            report_dir: self
                .report_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
            check_security_txt: self.check_security_txt.unwrap_or(true),
            mail: self.mail.unwrap_or_else(|| MailSettings {
                api_key: None,
                from: DEFAULT_MAIL_FROM.to_string(),
                to: Vec::new(),
            }),
        };

        ScanConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("feed_url must start with http:// or https://");
    }
    Ok(())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("failed to parse {ENV_PREFIX}{name}='{value}'"))
}

fn parse_time(name: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("failed to parse {ENV_PREFIX}{name}='{value}' as HH:MM"))
}
