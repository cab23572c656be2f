//! Subcommand handlers.

use camino::Utf8Path;
use chrono::{DateTime, Local, Utc};
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use slurmit_cli::Command;
use slurmit_logs::{LogStream, LogTailer, TailOutcome};
use slurmit_parsers::format_duration;
use slurmit_remote::{Executor, LocalSession, Session, shell_quote};
use slurmit_run::{Provenance, Runner, WaitEvent, WaitOptions, WorkspaceLayout, wait_for_completion};
use slurmit_slurm::{
    ClusterSummary, JobFilter, NodeInfo, NodeRequirement, available_nodes, list_jobs, query_nodes,
    scheduler_version,
};
use slurmit_store::{JobRecord, JobStore};
use std::io::Write;
use std::time::Duration;

/// Everything a connected command needs.
pub struct Context<'a> {
    pub session: &'a Executor,
    pub store: &'a JobStore,
    pub layout: WorkspaceLayout,
    pub host: Option<String>,
    pub user: Option<String>,
}

impl<'a> Context<'a> {
    fn runner(&self) -> Runner<'a, Executor> {
        Runner::new(self.session, self.store)
            .with_layout(self.layout.clone())
            .with_endpoint(self.host.clone(), self.user.clone())
    }

    fn current_user(&self) -> Option<String> {
        self.user.clone().or_else(|| std::env::var("USER").ok())
    }
}

pub async fn dispatch(ctx: &Context<'_>, command: &Command) -> Result<()> {
    match command {
        Command::Nodes {
            partition,
            available,
            min_gpus,
            gpu_type,
            summary,
        } => {
            let requirement = NodeRequirement {
                min_gpus: *min_gpus,
                gpu_type: gpu_type.clone(),
            };
            let filter = *available || *min_gpus > 0 || gpu_type.is_some();
            nodes(ctx, partition.as_deref(), filter.then_some(requirement), *summary).await
        }
        Command::Jobs {
            all,
            partition,
            node,
        } => {
            let filter = JobFilter {
                user: if *all { None } else { ctx.current_user() },
                partition: partition.clone(),
                node: node.clone(),
            };
            jobs(ctx, &filter).await
        }
        Command::Enqueue { config, secret } => enqueue(ctx, config, secret.as_deref()).await,
        Command::Run {
            name,
            wait,
            follow,
            poll_interval,
        } => run(ctx, name, *wait || *follow, *follow, *poll_interval).await,
        Command::Status { job, no_refresh } => status(ctx, job, !no_refresh).await,
        Command::Logs {
            job,
            lines,
            follow,
            stderr,
        } => {
            let stream = if *stderr {
                LogStream::Stderr
            } else {
                LogStream::Stdout
            };
            logs(ctx, job, stream, *follow, *lines).await
        }
        Command::Cancel { job } => cancel(ctx, job).await,
        Command::Queue => queue(ctx).await,
        Command::Runs { limit } => runs(ctx, *limit).await,
        Command::List { limit } => list(ctx.store, *limit),
        Command::Delete { name } => delete(ctx.store, name),
    }
}

async fn nodes(
    ctx: &Context<'_>,
    partition: Option<&str>,
    requirement: Option<NodeRequirement>,
    summary: bool,
) -> Result<()> {
    let all = query_nodes(ctx.session, partition).await?;

    if summary {
        match scheduler_version(ctx.session).await {
            Ok(version) => println!("{} on {}", version, ctx.session.endpoint()),
            Err(e) => tracing::warn!("Cannot read SLURM version: {}", e),
        }
        print_summary(&ClusterSummary::from_nodes(&all));
        return Ok(());
    }

    let shown: Vec<&NodeInfo> = match &requirement {
        Some(req) => available_nodes(&all, req),
        None => all.iter().collect(),
    };
    if shown.is_empty() {
        println!("No matching nodes.");
        return Ok(());
    }

    println!(
        "{:<16} {:<12} {:<10} {:>9} {:>8} {}",
        "NODE", "PARTITION", "STATE", "CPUS", "MEMORY", "GPUS"
    );
    for node in shown {
        println!(
            "{:<16} {:<12} {:<10} {:>9} {:>8} {}",
            node.name,
            node.partition,
            node.state,
            format!("{}/{}", node.cpus_used, node.cpus_total),
            node.memory_total,
            gpu_column(node)
        );
    }
    Ok(())
}

fn gpu_column(node: &NodeInfo) -> String {
    match &node.gpu {
        Some(gpu) => format!("{}:{}/{} free", gpu.gpu_type, gpu.free(), gpu.total),
        None => "-".to_string(),
    }
}

fn print_summary(summary: &ClusterSummary) {
    println!("Nodes: {}", summary.total_nodes);
    for (state, count) in &summary.nodes_by_state {
        println!("  {:<12} {}", state, count);
    }
    println!("GPUs: {} free of {}", summary.free_gpus, summary.total_gpus);
    for (gpu_type, tally) in &summary.gpus_by_type {
        println!("  {:<12} {}/{}", gpu_type, tally.free, tally.total);
    }
}

async fn jobs(ctx: &Context<'_>, filter: &JobFilter) -> Result<()> {
    let listing = list_jobs(ctx.session, filter).await?;
    if listing.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!(
        "{:<10} {:<10} {:<20} {:<11} {:<10} {:<12} {:>10} {:>10}",
        "JOBID", "USER", "NAME", "STATE", "PARTITION", "NODES", "ELAPSED", "LIMIT"
    );
    for job in listing {
        println!(
            "{:<10} {:<10} {:<20} {:<11} {:<10} {:<12} {:>10} {:>10}",
            job.job_id,
            job.user,
            job.name,
            job.state.as_str(),
            job.partition.as_deref().unwrap_or("-"),
            job.nodes.as_deref().unwrap_or("-"),
            job.elapsed.map(format_duration).unwrap_or_else(|| "-".into()),
            job.time_limit.map(format_duration).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

/// Commit and branch of the repository holding the config, if any.
async fn git_provenance(config: &Utf8Path) -> (Option<String>, Option<String>) {
    let dir = match config.parent() {
        Some(p) if !p.as_str().is_empty() => p.as_str(),
        _ => ".",
    };
    let local = LocalSession::new();
    let mut answers = Vec::with_capacity(2);
    for rev in ["HEAD", "--abbrev-ref HEAD"] {
        let cmd = format!("git -C {} rev-parse {}", shell_quote(dir), rev);
        let answer = match local.run(&cmd, true).await {
            Ok(result) if result.ok => Some(result.stdout.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("git provenance unavailable: {}", e);
                None
            }
        };
        answers.push(answer.filter(|s| !s.is_empty()));
    }
    let branch = answers.pop().flatten();
    let commit = answers.pop().flatten();
    (commit, branch)
}

async fn enqueue(ctx: &Context<'_>, config: &Utf8Path, secret: Option<&Utf8Path>) -> Result<()> {
    let config_text = std::fs::read_to_string(config)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {config}"))?;

    let secret_text = match secret {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("Ignoring secrets in {}: {}", path, e);
                None
            }
        },
        None => None,
    };

    let (git_commit, git_branch) = git_provenance(config).await;
    let provenance = Provenance {
        config_file: Some(config.to_string()),
        git_commit,
        git_branch,
    };

    let record = ctx
        .runner()
        .enqueue(&config_text, secret_text.as_deref(), provenance)
        .await?;
    println!("Queued {} in {}", record.name, record.queue_dir);
    Ok(())
}

/// Log chunks rarely end on a line boundary, so flush each one.
fn print_chunk(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

async fn run(
    ctx: &Context<'_>,
    name: &str,
    wait: bool,
    follow: bool,
    poll_interval: u64,
) -> Result<()> {
    let runner = ctx.runner();
    let submission = runner.submit_queued(name).await?;
    println!("Submitted {} as job {}", name, submission.job_id);
    if let Some(run_dir) = &submission.record.run_dir {
        println!("Run directory: {}", run_dir);
    }
    if !wait {
        return Ok(());
    }

    let options = WaitOptions {
        poll_interval: Duration::from_secs(poll_interval.max(1)),
        follow_log: follow.then(|| submission.stdout_log.clone()),
    };
    let waiting = wait_for_completion(ctx.session, &submission.job_id, &options, |event| {
        match event {
            WaitEvent::State(state) => eprintln!("[{}] {}", submission.job_id, state.as_str()),
            WaitEvent::Log(text) => print_chunk(&text),
            WaitEvent::QueryFailed(message) => eprintln!("status check failed: {}", message),
        }
    });

    tokio::select! {
        state = waiting => {
            println!("Job {} finished: {}", submission.job_id, state.as_str());
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Stopped waiting; job {} keeps running.", submission.job_id);
            return Ok(());
        }
    }

    runner.refresh_status(name).await?;
    Ok(())
}

async fn status(ctx: &Context<'_>, query: &str, refresh: bool) -> Result<()> {
    let mut record = ctx.store.resolve(query)?;
    if refresh && record.slurm_job_id.is_some() {
        match ctx.runner().refresh_status(&record.name).await {
            Ok(updated) => record = updated,
            Err(e) => tracing::warn!("Showing stored status for {}: {}", record.name, e),
        }
    }
    print_record(&record);
    Ok(())
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_record(record: &JobRecord) {
    println!("Name:        {}", record.name);
    println!("Status:      {}", record.status);
    let optional = [
        ("SLURM job:", record.slurm_job_id.as_deref()),
        ("Run id:", record.run_id.as_deref()),
        ("Host:", record.host.as_deref()),
        ("Run dir:", record.run_dir.as_deref()),
        ("Logs:", record.log_dir.as_deref()),
        ("Config:", record.config_file.as_deref()),
        ("Git:", record.git_commit.as_deref()),
        ("Branch:", record.git_branch.as_deref()),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            println!("{:<12} {}", label, value);
        }
    }
    println!("Command:     {}", record.command);
    println!("Created:     {}", local_time(&record.created_at));
    let times = [
        ("Submitted:", record.submitted_at),
        ("Started:", record.started_at),
        ("Completed:", record.completed_at),
    ];
    for (label, at) in times {
        if let Some(at) = at {
            println!("{:<12} {}", label, local_time(&at));
        }
    }
}

async fn logs(
    ctx: &Context<'_>,
    query: &str,
    stream: LogStream,
    follow: bool,
    lines: usize,
) -> Result<()> {
    let record = ctx.store.resolve(query)?;
    if record.log_dir.is_none() {
        return Err(miette!("Job {} has not been submitted yet", record.name));
    }

    let tailer = LogTailer::new(ctx.session);
    let mut tail = match tailer.tail(&record, stream, follow, lines).await? {
        TailOutcome::Streaming(tail) => tail,
        TailOutcome::NoLogFile => {
            println!("No {} log for {} yet.", stream, record.name);
            return Ok(());
        }
    };
    tracing::debug!("Reading {}", tail.path());

    loop {
        tokio::select! {
            chunk = tail.next_chunk() => match chunk? {
                Some(text) => print_chunk(&text),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn cancel(ctx: &Context<'_>, query: &str) -> Result<()> {
    let record = ctx.store.resolve(query)?;
    if ctx.runner().cancel(&record.name).await? {
        println!("Cancelled {}", record.name);
        Ok(())
    } else {
        Err(miette!("scancel did not accept job {}", record.name))
    }
}

async fn queue(ctx: &Context<'_>) -> Result<()> {
    let queued = ctx.runner().list_queue().await?;
    if queued.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for job in queued {
        let mut notes = Vec::new();
        if !job.is_ready() {
            notes.push("missing config");
        }
        if job.has_code {
            notes.push("code");
        }
        println!("{:<24} {}", job.name, notes.join(", "));
    }
    Ok(())
}

async fn runs(ctx: &Context<'_>, limit: usize) -> Result<()> {
    for run in ctx.runner().list_runs(limit).await? {
        println!("{:<40} {}", run.run_id, run.job_name);
    }
    Ok(())
}

pub fn list(store: &JobStore, limit: usize) -> Result<()> {
    let records = store.list(limit)?;
    if records.is_empty() {
        println!("No jobs recorded.");
        return Ok(());
    }
    println!(
        "{:<24} {:<12} {:<10} {}",
        "NAME", "STATUS", "JOBID", "CREATED"
    );
    for record in records {
        println!(
            "{:<24} {:<12} {:<10} {}",
            record.name,
            record.status,
            record.slurm_job_id.as_deref().unwrap_or("-"),
            local_time(&record.created_at)
        );
    }
    Ok(())
}

pub fn delete(store: &JobStore, name: &str) -> Result<()> {
    if store.delete(name)? {
        println!("Deleted {}", name);
        Ok(())
    } else {
        Err(miette!("No job named '{}'", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slurmit_slurm::GpuInfo;

    fn node(gpu: Option<GpuInfo>) -> NodeInfo {
        NodeInfo {
            name: "gpu01".to_string(),
            state: "mixed".to_string(),
            partition: "gpu".to_string(),
            cpus_used: 8,
            cpus_total: 64,
            memory_total: "256G".to_string(),
            gpu,
        }
    }

    #[test]
    fn test_gpu_column() {
        assert_eq!(gpu_column(&node(GpuInfo::new("a100", 4, 1))), "a100:3/4 free");
        assert_eq!(gpu_column(&node(None)), "-");
    }

    #[tokio::test]
    async fn test_git_provenance_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let config = camino::Utf8PathBuf::from_path_buf(dir.path().join("slurmit.yaml")).unwrap();
        let (commit, branch) = git_provenance(&config).await;
        assert!(commit.is_none());
        assert!(branch.is_none());
    }
}
