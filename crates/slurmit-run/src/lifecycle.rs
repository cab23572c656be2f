use crate::config::{CONFIG_FILE, JobConfig, SECRET_FILE, SecretConfig, config_hash};
use crate::error::RunError;
use crate::layout::{WorkspaceLayout, is_valid_job_name, job_name_of, run_id};
use crate::script::{expand_log_pattern, render_env_script, render_sbatch_script};
use chrono::{Local, Utc};
use slurmit_parsers::{data_lines, split_delimited};
use slurmit_remote::{Session, quote_path};
use slurmit_slurm::{query_status, sbatch};
use slurmit_store::{JobRecord, JobStore, RecordStatus, StatusUpdate, StoreError};
use std::collections::BTreeMap;

/// Where a queued job came from, recorded for reproducibility.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    /// Local path of the config file
    pub config_file: Option<String>,
    pub git_commit: Option<String>,
    pub git_branch: Option<String>,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub record: JobRecord,
    pub job_id: String,
    pub script_path: String,
    /// Where the job's stdout will be written
    pub stdout_log: String,
}

/// A directory in the queue area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub name: String,
    pub has_config: bool,
    pub has_code: bool,
}

impl QueuedJob {
    pub fn is_ready(&self) -> bool {
        self.has_config
    }
}

/// A directory in the runs area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub job_name: String,
}

/// Drives jobs through queue, submission and completion.
///
/// Borrows the session and the store; neither is closed or locked here.
pub struct Runner<'a, S: Session> {
    session: &'a S,
    store: &'a JobStore,
    layout: WorkspaceLayout,
    host: Option<String>,
    user: Option<String>,
}

impl<'a, S: Session> Runner<'a, S> {
    pub fn new(session: &'a S, store: &'a JobStore) -> Self {
        Self {
            session,
            store,
            layout: WorkspaceLayout::default(),
            host: None,
            user: None,
        }
    }

    pub fn with_layout(mut self, layout: WorkspaceLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Host and user recorded on new job records.
    pub fn with_endpoint(mut self, host: Option<String>, user: Option<String>) -> Self {
        self.host = host;
        self.user = user;
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    async fn absolute_layout(&self) -> Result<WorkspaceLayout, RunError> {
        if !self.layout.base().starts_with('~') {
            return Ok(self.layout.clone());
        }
        let home = self.session.home_directory().await?;
        Ok(self.layout.with_home(&home))
    }

    fn new_record(&self, name: &str, queue_dir: &str, config: &JobConfig, config_text: &str) -> JobRecord {
        let mut record = JobRecord::new(name, queue_dir, config.execution.command.clone());
        record.host = self.host.clone();
        record.user = self.user.clone();
        record.config_hash = Some(config_hash(config_text.as_bytes()));
        record
    }

    /// Upload a job's configuration to the queue and record it as QUEUED.
    ///
    /// Replaces an earlier record of the same name unless that job is
    /// still live on the scheduler.
    pub async fn enqueue(
        &self,
        config_text: &str,
        secret_text: Option<&str>,
        provenance: Provenance,
    ) -> Result<JobRecord, RunError> {
        let config = JobConfig::from_yaml(config_text).map_err(|source| RunError::Config {
            path: provenance
                .config_file
                .clone()
                .unwrap_or_else(|| CONFIG_FILE.to_string()),
            source,
        })?;
        let name = config.name.as_str();
        if !is_valid_job_name(name) {
            return Err(RunError::InvalidName(name.to_string()));
        }

        if let Some(existing) = self.store.get(name)? {
            if existing.status.is_submitted() && !existing.status.is_terminal() {
                return Err(StoreError::AlreadyExists(name.to_string()).into());
            }
        }

        let queue_dir = self.layout.queue_dir(name);
        self.session.ensure_directory(&queue_dir).await?;
        self.session
            .write_file(&format!("{queue_dir}/{CONFIG_FILE}"), config_text)
            .await?;
        if let Some(secret) = secret_text {
            self.session
                .write_file(&format!("{queue_dir}/{SECRET_FILE}"), secret)
                .await?;
        }

        let mut record = self.new_record(name, &queue_dir, &config, config_text);
        record.config_file = provenance.config_file;
        record.git_commit = provenance.git_commit;
        record.git_branch = provenance.git_branch;
        self.store.save(&record)?;
        tracing::info!("Queued {} in {}", name, queue_dir);
        Ok(record)
    }

    /// Secrets are optional: any failure to read them is only a warning.
    async fn load_secrets(&self, queue_dir: &str) -> BTreeMap<String, String> {
        let path = format!("{queue_dir}/{SECRET_FILE}");
        match self.session.file_exists(&path).await {
            Ok(true) => {}
            Ok(false) => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Cannot check {}: {}", path, e);
                return BTreeMap::new();
            }
        }
        let text = match self.session.read_file(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path, e);
                return BTreeMap::new();
            }
        };
        match SecretConfig::from_yaml(&text) {
            Ok(secret) => secret.env_vars,
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", path, e);
                BTreeMap::new()
            }
        }
    }

    /// Point `active/<name>` at `run_dir` by renaming a fresh symlink over
    /// the old one, so the pointer is never missing.
    async fn repoint_active(&self, layout: &WorkspaceLayout, name: &str, run_dir: &str) -> Result<(), RunError> {
        let active_root = layout.active_root();
        self.session.ensure_directory(&active_root).await?;
        let link = quote_path(&layout.active_link(name));
        let tmp = quote_path(&format!("{active_root}/.{name}.tmp"));
        self.session
            .run(
                &format!("ln -sfn {} {tmp} && mv -Tf {tmp} {link}", quote_path(run_dir)),
                false,
            )
            .await?;
        Ok(())
    }

    /// Submit a queued job (QUEUED -> SUBMITTED).
    ///
    /// The store is written only after sbatch has returned a job id, so a
    /// failed submission leaves any existing record as it was.
    pub async fn submit_queued(&self, name: &str) -> Result<Submission, RunError> {
        if !is_valid_job_name(name) {
            return Err(RunError::InvalidName(name.to_string()));
        }
        let layout = self.absolute_layout().await?;
        let queue_dir = layout.queue_dir(name);
        if !self.session.directory_exists(&queue_dir).await? {
            return Err(RunError::NotQueued {
                name: name.to_string(),
                queue_dir,
            });
        }

        let config_path = format!("{queue_dir}/{CONFIG_FILE}");
        let config_text = self.session.read_file(&config_path).await?;
        let config = JobConfig::from_yaml(&config_text).map_err(|source| RunError::Config {
            path: config_path.clone(),
            source,
        })?;
        let secrets = self.load_secrets(&queue_dir).await;

        let run_id = run_id(name, &Local::now());
        let run_dir = layout.run_dir(&run_id);
        self.session.ensure_directory(&layout.runs_root()).await?;
        self.session
            .run(
                &format!("cp -R {} {}", quote_path(&queue_dir), quote_path(&run_dir)),
                false,
            )
            .await?;
        self.repoint_active(&layout, name, &run_dir).await?;

        let log_dir = format!("{run_dir}/{}", config.output.log_dir);
        self.session.ensure_directory(&log_dir).await?;
        let code_dir = format!("{run_dir}/code");
        let work_dir = if self.session.directory_exists(&code_dir).await? {
            code_dir
        } else {
            run_dir.clone()
        };

        let script_path = format!("{run_dir}/job.sbatch");
        self.session
            .write_file(&script_path, &render_sbatch_script(&config, &run_dir, &work_dir))
            .await?;
        self.session
            .write_file(&format!("{run_dir}/env.sh"), &render_env_script(&config, &secrets))
            .await?;

        let job_id = sbatch::submit(self.session, &script_path).await?;

        let update = StatusUpdate {
            slurm_job_id: Some(job_id.clone()),
            run_id: Some(run_id.clone()),
            run_dir: Some(run_dir),
            log_dir: Some(log_dir.clone()),
            submitted_at: Some(Utc::now()),
            ..StatusUpdate::new(RecordStatus::Submitted)
        };
        let mut record = match self.store.get(name)? {
            Some(record) => record,
            None => self.new_record(name, &queue_dir, &config, &config_text),
        };
        // A resubmission starts a new run; timings of the previous one go.
        record.started_at = None;
        record.completed_at = None;
        record.apply(update);
        self.store.save(&record)?;

        tracing::info!("{} submitted as job {} ({})", name, job_id, run_id);
        let stdout_log = format!(
            "{}/{}",
            log_dir,
            expand_log_pattern(&config.output.stdout, &job_id, &config.name)
        );
        Ok(Submission {
            record,
            job_id,
            script_path,
            stdout_log,
        })
    }

    /// Refresh a job's persisted status from the scheduler.
    ///
    /// When the scheduler has nothing to say the record is returned
    /// unchanged; an unknown state never overwrites a known one.
    pub async fn refresh_status(&self, name: &str) -> Result<JobRecord, RunError> {
        let record = self
            .store
            .get(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let Some(job_id) = record.slurm_job_id.as_deref() else {
            return Ok(record);
        };

        let Some(status) = query_status(self.session, job_id).await? else {
            tracing::debug!("No scheduler status for job {}", job_id);
            return Ok(record);
        };
        let new_status = RecordStatus::from(status.state);
        if new_status == RecordStatus::Unknown {
            return Ok(record);
        }

        let mut update = StatusUpdate::new(new_status);
        if record.started_at.is_none() {
            update.started_at = status.start_time.or_else(|| {
                matches!(new_status, RecordStatus::Running).then(Utc::now)
            });
        }
        if new_status.is_terminal() && record.completed_at.is_none() {
            update.completed_at = Some(status.end_time.unwrap_or_else(Utc::now));
        }
        Ok(self.store.update_status(name, update)?)
    }

    /// Cancel a submitted job. Returns whether scancel accepted it.
    pub async fn cancel(&self, name: &str) -> Result<bool, RunError> {
        let record = self
            .store
            .get(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let job_id = record
            .slurm_job_id
            .as_deref()
            .ok_or_else(|| RunError::NotSubmitted(name.to_string()))?;

        let cancelled = sbatch::cancel(self.session, job_id).await?;
        if cancelled {
            self.store.update_status(
                name,
                StatusUpdate {
                    completed_at: Some(Utc::now()),
                    ..StatusUpdate::new(RecordStatus::Cancelled)
                },
            )?;
        }
        Ok(cancelled)
    }

    /// Jobs waiting in the queue area, sorted by name.
    pub async fn list_queue(&self) -> Result<Vec<QueuedJob>, RunError> {
        let cmd = format!(
            "cd {} 2>/dev/null && for d in */; do [ -d \"$d\" ] || continue; n=\"${{d%/}}\"; \
             c=0; k=0; [ -f \"$n/{CONFIG_FILE}\" ] && c=1; [ -d \"$n/code\" ] && k=1; \
             echo \"$n|$c|$k\"; done",
            quote_path(&self.layout.queue_root())
        );
        let result = self.session.run(&cmd, true).await?;
        if !result.ok {
            return Ok(vec![]);
        }

        let mut jobs: Vec<QueuedJob> = data_lines(&result.stdout)
            .filter_map(|line| split_delimited(line, 3).ok())
            .map(|fields| QueuedJob {
                name: fields[0].to_string(),
                has_config: fields[1] == "1",
                has_code: fields[2] == "1",
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    /// Most recent run directories, newest first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>, RunError> {
        let cmd = format!(
            "ls -1t {} 2>/dev/null | head -n {}",
            quote_path(&self.layout.runs_root()),
            limit
        );
        let result = self.session.run(&cmd, true).await?;
        Ok(data_lines(&result.stdout)
            .map(|line| {
                let run_id = line.trim();
                RunSummary {
                    run_id: run_id.to_string(),
                    job_name: job_name_of(run_id).to_string(),
                }
            })
            .collect())
    }
}
