//! Ranked domain feed: CSV parsing and the zip-over-HTTP source.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Read, Seek};
use std::time::Duration;

const FEED_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub domain: String,
    pub rank: u32,
}

impl FeedEntry {
    pub fn new(domain: impl Into<String>, rank: u32) -> Self {
        Self {
            domain: domain.into(),
            rank,
        }
    }
}

/// Produces the current ranked list. A failure aborts the reconcile cycle before any mutation.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FeedEntry>>;
}

/// Parses `rank,domain` rows in file order.
///
/// A domain listed twice keeps its first position and takes the later rank.
/// Blank lines are skipped; any other malformed row is an error.
pub fn parse_feed<R: BufRead>(reader: R) -> Result<Vec<FeedEntry>> {
    let mut entries: Vec<FeedEntry> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("failed to read feed line {line_no}"))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((rank, domain)) = line.split_once(',') else {
            bail!("feed line {line_no} is not a rank,domain pair: '{line}'");
        };
        let rank: u32 = rank
            .trim()
            .parse()
            .with_context(|| format!("feed line {line_no} has an invalid rank '{rank}'"))?;
        if rank == 0 {
            bail!("feed line {line_no} has rank 0; ranks start at 1");
        }
        let domain = domain.trim();
        if domain.is_empty() || domain.contains(',') {
            bail!("feed line {line_no} has an invalid domain '{domain}'");
        }

        match positions.get(domain) {
            Some(&position) => entries[position].rank = rank,
            None => {
                positions.insert(domain.to_string(), entries.len());
                entries.push(FeedEntry::new(domain, rank));
            }
        }
    }

    Ok(entries)
}

/// Opens `member` inside a zip archive and parses it as a feed.
pub fn extract_feed<R: Read + Seek>(archive: R, member: &str) -> Result<Vec<FeedEntry>> {
    let mut archive = zip::ZipArchive::new(archive).context("feed is not a valid zip archive")?;
    let file = archive
        .by_name(member)
        .with_context(|| format!("feed archive has no member named {member}"))?;
    parse_feed(BufReader::new(file))
}

/// Downloads the zip-compressed feed over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    member: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, member: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .context("failed to build feed HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            member: member.into(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<FeedEntry>> {
        tracing::info!("downloading ranked feed");
        let bytes = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to download feed from {}", self.url))?
            .bytes()
            .await
            .context("failed to read feed body")?;

        let member = self.member.clone();
        let entries = tokio::task::spawn_blocking(move || extract_feed(Cursor::new(bytes), &member))
            .await
            .context("feed parser task failed")??;

        tracing::info!(entries = entries.len(), "ranked feed parsed");
        Ok(entries)
    }
}
