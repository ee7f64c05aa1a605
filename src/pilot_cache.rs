use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scores::{DEFAULT_HANDICAP, PilotInfo};

/// A competitor as listed by the contest office
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotRecord {
    pub class: String,
    pub compno: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_handicap")]
    pub handicap: f64,
}

fn default_handicap() -> f64 {
    DEFAULT_HANDICAP
}

impl From<PilotRecord> for PilotInfo {
    fn from(record: PilotRecord) -> Self {
        Self {
            compno: record.compno,
            name: record.name,
            handicap: record.handicap,
        }
    }
}

/// Where pilot details come from
pub trait PilotDirectory: Send + Sync {
    fn lookup(&self, class: &str, compno: &str) -> Result<Option<PilotRecord>>;
}

/// Pilot list loaded from a TOML file with one `[[pilot]]` table per entry
#[derive(Debug, Clone, Default)]
pub struct PilotRoster {
    pilots: HashMap<(String, String), PilotRecord>,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    pilot: Vec<PilotRecord>,
}

impl PilotRoster {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let file: RosterFile =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Self::from_records(file.pilot))
    }

    pub fn from_records(records: Vec<PilotRecord>) -> Self {
        let pilots = records
            .into_iter()
            .map(|record| ((record.class.clone(), record.compno.clone()), record))
            .collect();
        Self { pilots }
    }

    pub fn len(&self) -> usize {
        self.pilots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pilots.is_empty()
    }
}

impl PilotDirectory for PilotRoster {
    fn lookup(&self, class: &str, compno: &str) -> Result<Option<PilotRecord>> {
        Ok(self
            .pilots
            .get(&(class.to_string(), compno.to_string()))
            .cloned())
    }
}

/// TTL cache in front of a `PilotDirectory`
pub struct PilotCache {
    directory: Box<dyn PilotDirectory>,
    cache: Cache<(String, String), PilotInfo>,
}

impl PilotCache {
    pub fn new(directory: Box<dyn PilotDirectory>, ttl: Duration, capacity: u64) -> Self {
        Self {
            directory,
            cache: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
        }
    }

    /// Pilot details for scoring. Unknown pilots and lookup failures score
    /// with the default handicap; failures are not cached.
    pub fn pilot(&self, class: &str, compno: &str) -> PilotInfo {
        let key = (class.to_string(), compno.to_string());
        if let Some(cached) = self.cache.get(&key) {
            metrics::counter!("scoring.pilot_cache.hit").increment(1);
            return cached;
        }
        metrics::counter!("scoring.pilot_cache.miss").increment(1);

        match self.directory.lookup(class, compno) {
            Ok(record) => {
                let info = record
                    .map(PilotInfo::from)
                    .unwrap_or_else(|| PilotInfo::unknown(compno));
                self.cache.insert(key, info.clone());
                info
            }
            Err(e) => {
                warn!(class, compno, error = %e, "Pilot lookup failed, using default handicap");
                PilotInfo::unknown(compno)
            }
        }
    }

    /// Forget a pilot, e.g. after a handicap correction
    pub fn invalidate(&self, class: &str, compno: &str) {
        self.cache.invalidate(&(class.to_string(), compno.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDirectory {
        calls: Arc<AtomicUsize>,
        roster: PilotRoster,
    }

    impl PilotDirectory for CountingDirectory {
        fn lookup(&self, class: &str, compno: &str) -> Result<Option<PilotRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.roster.lookup(class, compno)
        }
    }

    struct FailingDirectory;

    impl PilotDirectory for FailingDirectory {
        fn lookup(&self, _class: &str, _compno: &str) -> Result<Option<PilotRecord>> {
            anyhow::bail!("directory unavailable")
        }
    }

    fn record(compno: &str, handicap: f64) -> PilotRecord {
        PilotRecord {
            class: "club".to_string(),
            compno: compno.to_string(),
            name: Some(format!("Pilot {compno}")),
            handicap,
        }
    }

    #[test]
    fn test_cache_hits_skip_directory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = PilotCache::new(
            Box::new(CountingDirectory {
                calls: calls.clone(),
                roster: PilotRoster::from_records(vec![record("A1", 108.0)]),
            }),
            Duration::from_secs(300),
            100,
        );
        assert_eq!(cache.pilot("club", "A1").handicap, 108.0);
        assert_eq!(cache.pilot("club", "A1").handicap, 108.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate("club", "A1");
        cache.pilot("club", "A1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_and_failed_lookups_use_default() {
        let cache = PilotCache::new(Box::new(PilotRoster::default()), Duration::from_secs(300), 100);
        let unknown = cache.pilot("club", "ZZ");
        assert_eq!(unknown.handicap, DEFAULT_HANDICAP);
        assert_eq!(unknown.name, None);

        let cache = PilotCache::new(Box::new(FailingDirectory), Duration::from_secs(300), 100);
        assert_eq!(cache.pilot("club", "A1").handicap, DEFAULT_HANDICAP);
    }

    #[test]
    fn test_roster_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pilots.toml");
        std::fs::write(
            &path,
            r#"
                [[pilot]]
                class = "club"
                compno = "A1"
                name = "Ann"
                handicap = 108.0

                [[pilot]]
                class = "club"
                compno = "B2"
            "#,
        )
        .unwrap();
        let roster = PilotRoster::load(&path).unwrap();
        assert_eq!(roster.len(), 2);
        let b2 = roster.lookup("club", "B2").unwrap().unwrap();
        assert_eq!(b2.handicap, DEFAULT_HANDICAP);
        assert!(roster.lookup("standard", "A1").unwrap().is_none());
    }
}
