use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dnsposture::{DnsLookup, LookupError, RecordKind};

/// In-process resolver answering from a table. Unknown names get empty answers.
#[derive(Default)]
pub struct ScriptedLookup {
    answers: Mutex<HashMap<(String, RecordKind), Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    queries: AtomicUsize,
}

impl ScriptedLookup {
    pub fn answer(self, name: &str, kind: RecordKind, records: &[&str]) -> Self {
        self.answers.lock().unwrap().insert(
            (name.to_string(), kind),
            records.iter().map(|record| record.to_string()).collect(),
        );
        self
    }

    /// Every lookup under `domain` fails with a transport error.
    pub fn fail(self, domain: &str) -> Self {
        self.failing.lock().unwrap().insert(domain.to_string());
        self
    }

    /// Every lookup under `domain` never answers.
    pub fn stall(self, domain: &str) -> Self {
        self.stalled.lock().unwrap().insert(domain.to_string());
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn matches(set: &Mutex<HashSet<String>>, name: &str) -> bool {
        set.lock()
            .unwrap()
            .iter()
            .any(|domain| name == domain || name.ends_with(&format!(".{domain}")))
    }
}

#[async_trait]
impl DnsLookup for ScriptedLookup {
    async fn lookup(&self, name: &str, kind: RecordKind) -> Result<Vec<String>, LookupError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if Self::matches(&self.stalled, name) {
            futures::future::pending::<()>().await;
        }
        if Self::matches(&self.failing, name) {
            return Err(LookupError::Transport {
                name: name.to_string(),
                kind,
                message: "SERVFAIL".into(),
            });
        }
        Ok(self
            .answers
            .lock()
            .unwrap()
            .get(&(name.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }
}
