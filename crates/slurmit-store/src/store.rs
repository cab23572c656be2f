use crate::types::{JobRecord, StatusUpdate};
use base64::prelude::*;
use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use std::fs;
use std::time::SystemTime;
use thiserror::Error;

/// Shortest accepted name prefix.
pub const MIN_PREFIX_LEN: usize = 2;

/// How many recent records the secondary-id lookups scan.
const SCAN_WINDOW: usize = 100;

const RECORD_EXT: &str = "json";

#[derive(Error, Debug, Diagnostic)]
pub enum StoreError {
    #[error("Failed to access {path}")]
    #[diagnostic(code(slurmit::store::io))]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed job record {path}")]
    #[diagnostic(code(slurmit::store::json))]
    Json {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No job matching '{0}'")]
    #[diagnostic(
        code(slurmit::store::not_found),
        help("Run `slurmit list` to see known jobs.")
    )]
    NotFound(String),

    #[error("'{prefix}' matches {} jobs: {}", .matches.len(), .matches.join(", "))]
    #[diagnostic(
        code(slurmit::store::ambiguous),
        help("Use a longer prefix or the full job name.")
    )]
    Ambiguous {
        prefix: String,
        matches: Vec<String>,
    },

    #[error("Job name prefix '{0}' is too short")]
    #[diagnostic(
        code(slurmit::store::prefix_too_short),
        help("Prefixes must be at least 2 characters.")
    )]
    PrefixTooShort(String),

    #[error("A job named '{0}' already exists")]
    #[diagnostic(code(slurmit::store::exists))]
    AlreadyExists(String),
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Persistent storage for job records.
///
/// One JSON file per job, named by the URL-safe base64 encoding of the job
/// name so any name maps to a valid filename. Writes go to a temporary
/// file that is renamed into place, so readers never see a partial record.
///
/// Two processes updating the same job race; the last write wins.
pub struct JobStore {
    dir: Utf8PathBuf,
}

impl JobStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$HOME/.slurmit/jobs`, or None if the home directory is unknown.
    pub fn default_location() -> Option<Utf8PathBuf> {
        let home = std::env::var("HOME").ok()?;
        Some(Utf8PathBuf::from(home).join(".slurmit").join("jobs"))
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> Utf8PathBuf {
        self.dir
            .join(format!("{}.{}", BASE64_URL_SAFE_NO_PAD.encode(name), RECORD_EXT))
    }

    /// Decode a record filename back to its job name.
    fn decode_name(path: &Utf8Path) -> Option<String> {
        if path.extension() != Some(RECORD_EXT) {
            return None;
        }
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(path.file_stem()?).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn read(path: &Utf8Path) -> Result<JobRecord, StoreError> {
        let content = fs::read_to_string(path).map_err(io_error(path))?;
        serde_json::from_str(&content).map_err(|source| StoreError::Json {
            path: path.to_owned(),
            source,
        })
    }

    fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let path = self.record_path(&record.name);
        let tmp = path.with_extension(format!("{}.tmp{}", RECORD_EXT, std::process::id()));
        let content = serde_json::to_string_pretty(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, content).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))
    }

    /// Store a new record, refusing to replace an existing job.
    pub fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        if self.record_path(&record.name).exists() {
            return Err(StoreError::AlreadyExists(record.name.clone()));
        }
        self.write(record)
    }

    /// Store a record, replacing any existing one with the same name.
    pub fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.write(record)
    }

    /// Load a record by exact name.
    pub fn get(&self, name: &str) -> Result<Option<JobRecord>, StoreError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    /// Apply a status transition to a stored record and persist it.
    pub fn update_status(
        &self,
        name: &str,
        update: StatusUpdate,
    ) -> Result<JobRecord, StoreError> {
        let mut record = self
            .get(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.apply(update);
        self.write(&record)?;
        Ok(record)
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Record files with their job names, most recently modified first.
    fn entries(&self) -> Result<Vec<(String, Utf8PathBuf)>, StoreError> {
        let dir = match self.dir.read_dir_utf8() {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut entries: Vec<(SystemTime, String, Utf8PathBuf)> = dir
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path().to_owned();
                let name = Self::decode_name(&path)?;
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, name, path))
            })
            .collect();

        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(entries
            .into_iter()
            .map(|(_, name, path)| (name, path))
            .collect())
    }

    /// List up to `limit` records, most recently modified first.
    ///
    /// Unreadable or malformed records are skipped.
    pub fn list(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = Vec::new();
        for (_, path) in self.entries()? {
            if records.len() >= limit {
                break;
            }
            match Self::read(&path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping job record: {}", e),
            }
        }
        Ok(records)
    }

    /// Find the single job whose name starts with `prefix`.
    ///
    /// Zero matches is `Ok(None)`; several matches is [`StoreError::Ambiguous`].
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Option<JobRecord>, StoreError> {
        if prefix.chars().count() < MIN_PREFIX_LEN {
            return Err(StoreError::PrefixTooShort(prefix.to_string()));
        }

        let mut matches: Vec<(String, Utf8PathBuf)> = self
            .entries()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => {
                let (_, path) = matches.remove(0);
                Self::read(&path).map(Some)
            }
            _ => {
                let mut names: Vec<String> = matches.into_iter().map(|(name, _)| name).collect();
                names.sort();
                Err(StoreError::Ambiguous {
                    prefix: prefix.to_string(),
                    matches: names,
                })
            }
        }
    }

    /// Find a recent job by its scheduler-assigned id.
    pub fn find_by_slurm_id(&self, slurm_job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .list(SCAN_WINDOW)?
            .into_iter()
            .find(|r| r.slurm_job_id.as_deref() == Some(slurm_job_id)))
    }

    /// Find a recent job by run id (`<name>_<timestamp>`).
    pub fn find_by_run_id(&self, run_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .list(SCAN_WINDOW)?
            .into_iter()
            .find(|r| r.run_id.as_deref() == Some(run_id)))
    }

    /// Resolve user input to a job: exact name, then name prefix, then
    /// scheduler id, then run id.
    ///
    /// An ambiguous prefix stops the search. Input too short to be a prefix
    /// skips that step.
    pub fn resolve(&self, query: &str) -> Result<JobRecord, StoreError> {
        if let Some(record) = self.get(query)? {
            return Ok(record);
        }
        if query.chars().count() >= MIN_PREFIX_LEN {
            if let Some(record) = self.find_by_prefix(query)? {
                return Ok(record);
            }
        }
        if let Some(record) = self.find_by_slurm_id(query)? {
            return Ok(record);
        }
        if let Some(record) = self.find_by_run_id(query)? {
            return Ok(record);
        }
        Err(StoreError::NotFound(query.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordStatus;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> JobStore {
        JobStore::new(Utf8Path::from_path(temp.path()).unwrap().join("jobs"))
    }

    fn record(name: &str) -> JobRecord {
        JobRecord::new(name, format!("~/slurmit/queue/{name}"), "python train.py")
    }

    fn touch(store: &JobStore, name: &str, age_secs: u64) {
        let file = fs::File::options()
            .write(true)
            .open(store.record_path(name))
            .unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn test_empty_store() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        assert!(store.list(10).unwrap().is_empty());
        assert!(store.get("train").unwrap().is_none());
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut job = record("train/resnet 50");
        job.host = Some("login.hpc.example.org".to_string());
        job.config_hash = Some("blake3:0123456789abcdef".to_string());
        job.submitted_at = Some(Utc::now());
        store.create(&job).unwrap();

        assert_eq!(store.get("train/resnet 50").unwrap().unwrap(), job);
    }

    #[test]
    fn test_create_refuses_overwrite_save_upserts() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let mut job = record("train");
        store.create(&job).unwrap();
        assert!(matches!(
            store.create(&job),
            Err(StoreError::AlreadyExists(name)) if name == "train"
        ));

        job.command = "python train.py --epochs 5".to_string();
        store.save(&job).unwrap();
        assert_eq!(store.get("train").unwrap().unwrap().command, job.command);
    }

    #[test]
    fn test_update_status() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create(&record("train")).unwrap();

        let updated = store
            .update_status(
                "train",
                StatusUpdate {
                    slurm_job_id: Some("88421".to_string()),
                    ..StatusUpdate::new(RecordStatus::Submitted)
                },
            )
            .unwrap();
        assert_eq!(store.get("train").unwrap().unwrap(), updated);
        assert_eq!(updated.status, RecordStatus::Submitted);

        assert!(matches!(
            store.update_status("missing", StatusUpdate::new(RecordStatus::Running)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_sorted_by_mtime_and_limited() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for (name, age) in [("old", 300), ("newest", 0), ("middle", 100)] {
            store.create(&record(name)).unwrap();
            touch(&store, name, age);
        }

        let names: Vec<_> = store.list(10).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["newest", "middle", "old"]);
        assert_eq!(store.list(2).unwrap().len(), 2);
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create(&record("good")).unwrap();
        fs::write(store.record_path("bad"), "{\"name\": \"bad\", ").unwrap();
        fs::write(store.dir().join("notes.txt"), "not a record").unwrap();

        let records = store.list(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "good");
    }

    #[test]
    fn test_find_by_prefix() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for name in ["train-a", "train-b", "eval"] {
            store.create(&record(name)).unwrap();
        }

        assert_eq!(store.find_by_prefix("ev").unwrap().unwrap().name, "eval");
        // Repeated lookups against an unchanged store agree.
        assert_eq!(
            store.find_by_prefix("ev").unwrap(),
            store.find_by_prefix("ev").unwrap()
        );
        assert!(store.find_by_prefix("zz").unwrap().is_none());

        match store.find_by_prefix("train") {
            Err(StoreError::Ambiguous { prefix, matches }) => {
                assert_eq!(prefix, "train");
                assert_eq!(matches, vec!["train-a", "train-b"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        assert!(matches!(
            store.find_by_prefix("t"),
            Err(StoreError::PrefixTooShort(_))
        ));
    }

    #[test]
    fn test_secondary_lookups() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let mut job = record("train");
        job.slurm_job_id = Some("88421".to_string());
        job.run_id = Some("train_20240301_091500".to_string());
        store.create(&job).unwrap();
        store.create(&record("eval")).unwrap();

        assert_eq!(store.find_by_slurm_id("88421").unwrap().unwrap().name, "train");
        assert!(store.find_by_slurm_id("1").unwrap().is_none());
        assert_eq!(
            store.find_by_run_id("train_20240301_091500").unwrap().unwrap().name,
            "train"
        );
    }

    #[test]
    fn test_resolve_chain() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let mut job = record("train-a");
        job.slurm_job_id = Some("7".to_string());
        job.run_id = Some("train-a_20240301_091500".to_string());
        store.create(&job).unwrap();
        store.create(&record("train-b")).unwrap();

        assert_eq!(store.resolve("train-a").unwrap().name, "train-a");
        assert_eq!(store.resolve("7").unwrap().name, "train-a");
        assert_eq!(store.resolve("train-a_20240301_091500").unwrap().name, "train-a");
        assert!(matches!(store.resolve("tra"), Err(StoreError::Ambiguous { .. })));
        assert!(matches!(store.resolve("nothing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_delete() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create(&record("train")).unwrap();
        assert!(store.delete("train").unwrap());
        assert!(!store.delete("train").unwrap());
        assert!(store.get("train").unwrap().is_none());
    }
}
