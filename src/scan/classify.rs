//! Pure grading of raw record sets.
//!
//! Every function here is total: malformed input degrades to "invalid" or
//! `None`, never to an error.

use crate::catalog::{INVALID_POLICY, NO_POLICY};
use crate::scan::probe::ProbeResult;

const SPF_PREFIX: &str = "v=spf1";
const DMARC_PREFIX: &str = "v=dmarc1";
const SELF_HOSTED: &str = "Self-hosted";
const OTHER_PROVIDER: &str = "Other";

/// Derived posture fields for one probe result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub spf: SpfStats,
    pub dmarc: DmarcStats,
    pub caa: CaaStats,
    pub ds: DsStats,
    pub dnskey_algorithm: Option<u8>,
    pub email_provider: Option<String>,
    pub dns_provider: Option<String>,
    pub soa_grade: Option<u8>,
}

pub trait RecordClassifier: Send + Sync {
    fn classify(&self, result: &ProbeResult) -> Classification;
}

/// Default classifier with built-in provider suffix tables.
#[derive(Debug, Clone)]
pub struct StandardClassifier {
    mail_providers: Vec<(&'static str, &'static str)>,
    dns_providers: Vec<(&'static str, &'static str)>,
}

impl Default for StandardClassifier {
    fn default() -> Self {
        Self {
            mail_providers: vec![
                ("google.com", "Google"),
                ("googlemail.com", "Google"),
                ("outlook.com", "Microsoft"),
                ("pphosted.com", "Proofpoint"),
                ("ppe-hosted.com", "Proofpoint"),
                ("mimecast.com", "Mimecast"),
                ("zoho.com", "Zoho"),
                ("yahoodns.net", "Yahoo"),
                ("messagingengine.com", "Fastmail"),
                ("amazonaws.com", "Amazon SES"),
                ("iphmx.com", "Cisco"),
                ("barracudanetworks.com", "Barracuda"),
            ],
            dns_providers: vec![
                ("cloudflare.com", "Cloudflare"),
                ("awsdns-", "Amazon Route 53"),
                ("domaincontrol.com", "GoDaddy"),
                ("googledomains.com", "Google"),
                ("google.com", "Google"),
                ("azure-dns.", "Microsoft Azure"),
                ("akam.net", "Akamai"),
                ("dynect.net", "Oracle Dyn"),
                ("nsone.net", "NS1"),
                ("ultradns.", "UltraDNS"),
                ("digitalocean.com", "DigitalOcean"),
                ("registrar-servers.com", "Namecheap"),
            ],
        }
    }
}

impl RecordClassifier for StandardClassifier {
    fn classify(&self, result: &ProbeResult) -> Classification {
        Classification {
            spf: spf_stats(&result.txt),
            dmarc: dmarc_stats(&result.dmarc),
            caa: caa_stats(&result.caa),
            ds: ds_stats(&result.ds),
            dnskey_algorithm: dnskey_algorithm(&result.dnskey),
            email_provider: provider_from_records(
                &result.mx,
                &result.domain,
                &self.mail_providers,
            ),
            dns_provider: provider_from_records(&result.ns, &result.domain, &self.dns_providers),
            soa_grade: soa_grade(&result.soa),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfStats {
    pub exists: bool,
    /// `+all`, `?all`, `~all`, `-all`, `no_policy` or `invalid`.
    pub policy: String,
}

impl Default for SpfStats {
    fn default() -> Self {
        Self {
            exists: false,
            policy: NO_POLICY.to_string(),
        }
    }
}

pub fn spf_stats(txt: &[String]) -> SpfStats {
    let records: Vec<&String> = txt
        .iter()
        .filter(|record| starts_with_ignore_case(record, SPF_PREFIX))
        .collect();

    match records.as_slice() {
        [] => SpfStats::default(),
        [record] => SpfStats {
            exists: true,
            policy: spf_all_qualifier(record),
        },
        // More than one SPF record is a permanent error for receivers.
        _ => SpfStats {
            exists: true,
            policy: INVALID_POLICY.to_string(),
        },
    }
}

fn spf_all_qualifier(record: &str) -> String {
    for term in record.split_whitespace().skip(1) {
        let term = term.to_ascii_lowercase();
        match term.as_str() {
            "all" | "+all" => return "+all".to_string(),
            "-all" | "~all" | "?all" => return term,
            _ => {}
        }
    }
    NO_POLICY.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmarcStats {
    pub exists: bool,
    pub policy: String,
    pub sub_policy: String,
    pub aggregate_reporting: bool,
    pub forensic_reporting: bool,
}

impl Default for DmarcStats {
    fn default() -> Self {
        Self {
            exists: false,
            policy: NO_POLICY.to_string(),
            sub_policy: NO_POLICY.to_string(),
            aggregate_reporting: false,
            forensic_reporting: false,
        }
    }
}

/// Parses the TXT answers for `_dmarc.<domain>`. Policy strings are passed
/// through lower-cased; unknown values are mapped to the sentinel at lookup time.
pub fn dmarc_stats(records: &[String]) -> DmarcStats {
    let candidates: Vec<&String> = records
        .iter()
        .filter(|record| starts_with_ignore_case(record, DMARC_PREFIX))
        .collect();

    let record = match candidates.as_slice() {
        [] => return DmarcStats::default(),
        [record] => record,
        _ => {
            return DmarcStats {
                exists: true,
                policy: INVALID_POLICY.to_string(),
                sub_policy: INVALID_POLICY.to_string(),
                ..DmarcStats::default()
            }
        }
    };

    let mut stats = DmarcStats {
        exists: true,
        policy: INVALID_POLICY.to_string(),
        ..DmarcStats::default()
    };
    for tag in record.split(';').skip(1) {
        let Some((key, value)) = tag.split_once('=') else {
            continue;
        };
        let value = value.trim().to_ascii_lowercase();
        match key.trim().to_ascii_lowercase().as_str() {
            "p" => stats.policy = value,
            "sp" => stats.sub_policy = value,
            "rua" => stats.aggregate_reporting = !value.is_empty(),
            "ruf" => stats.forensic_reporting = !value.is_empty(),
            _ => {}
        }
    }
    stats
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaaStats {
    pub exists: bool,
    pub reporting: bool,
    pub issue_count: u32,
    pub wildcard_count: u32,
}

/// Counts `issue`, `issuewild` and `iodef` properties in `flags tag value` records.
pub fn caa_stats(records: &[String]) -> CaaStats {
    let mut stats = CaaStats {
        exists: !records.is_empty(),
        ..CaaStats::default()
    };
    for record in records {
        let Some(tag) = record.split_whitespace().nth(1) else {
            continue;
        };
        match tag.to_ascii_lowercase().as_str() {
            "issue" => stats.issue_count += 1,
            "issuewild" => stats.wildcard_count += 1,
            "iodef" => stats.reporting = true,
            _ => {}
        }
    }
    stats
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DsStats {
    pub algorithm: Option<u8>,
    pub digest_type: Option<u8>,
}

/// Reads `key_tag algorithm digest_type digest` from the first DS record.
pub fn ds_stats(records: &[String]) -> DsStats {
    let Some(record) = records.first() else {
        return DsStats::default();
    };
    let fields: Vec<&str> = record.split_whitespace().collect();
    DsStats {
        algorithm: fields.get(1).and_then(|token| parse_algorithm(token)),
        digest_type: fields.get(2).and_then(|token| parse_digest_type(token)),
    }
}

/// Algorithm of the key-signing key (flags 257) when present, else of the first key.
pub fn dnskey_algorithm(records: &[String]) -> Option<u8> {
    let parsed: Vec<Vec<&str>> = records
        .iter()
        .map(|record| record.split_whitespace().collect())
        .collect();
    let chosen = parsed
        .iter()
        .find(|fields| fields.first() == Some(&"257"))
        .or_else(|| parsed.first())?;
    chosen.get(2).and_then(|token| parse_algorithm(token))
}

/// Accepts either the numeric code or the mnemonic from the IANA registry.
fn parse_algorithm(token: &str) -> Option<u8> {
    if let Ok(code) = token.parse::<u8>() {
        return Some(code);
    }
    let code = match token.to_ascii_uppercase().as_str() {
        "RSAMD5" => 1,
        "DH" => 2,
        "DSA" => 3,
        "RSASHA1" => 5,
        "DSA-NSEC3-SHA1" => 6,
        "RSASHA1-NSEC3-SHA1" => 7,
        "RSASHA256" => 8,
        "RSASHA512" => 10,
        "ECC-GOST" => 12,
        "ECDSAP256SHA256" => 13,
        "ECDSAP384SHA384" => 14,
        "ED25519" => 15,
        "ED448" => 16,
        _ => return None,
    };
    Some(code)
}

fn parse_digest_type(token: &str) -> Option<u8> {
    if let Ok(code) = token.parse::<u8>() {
        return Some(code);
    }
    let code = match token.to_ascii_uppercase().replace('-', "").as_str() {
        "SHA1" => 1,
        "SHA256" => 2,
        "GOST" | "GOSTR341194" => 3,
        "SHA384" => 4,
        _ => return None,
    };
    Some(code)
}

/// Maps the last label-bearing token of each record to a provider by suffix.
/// Records under the scanned domain itself count as self-hosted.
pub fn provider_from_records(
    records: &[String],
    domain: &str,
    table: &[(&'static str, &'static str)],
) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();

    for record in records {
        let Some(host) = record.split_whitespace().last() else {
            continue;
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if let Some((_, provider)) = table.iter().find(|(suffix, _)| host.contains(suffix)) {
            return Some((*provider).to_string());
        }
        if host == domain || host.ends_with(&format!(".{domain}")) {
            return Some(SELF_HOSTED.to_string());
        }
    }
    Some(OTHER_PROVIDER.to_string())
}

/// Scores SOA timers against the RFC 1912 recommendations: one point each for
/// refresh, retry, expire and minimum TTL inside the recommended range.
pub fn soa_grade(records: &[String]) -> Option<u8> {
    let record = records.first()?;
    let timers: Vec<u32> = record
        .split_whitespace()
        .skip(3)
        .take(4)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    let [refresh, retry, expire, minimum] = timers.as_slice() else {
        return None;
    };

    let checks = [
        (1_200..=43_200).contains(refresh),
        (120..=7_200).contains(retry) && retry < refresh,
        (1_209_600..=2_419_200).contains(expire),
        (300..=86_400).contains(minimum),
    ];
    Some(checks.iter().filter(|passed| **passed).count() as u8)
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .trim_start_matches('"')
        .get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}
