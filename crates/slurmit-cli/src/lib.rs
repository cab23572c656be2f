//! CLI argument parsing for slurmit.

use camino::Utf8PathBuf;
use clap::{Args as ClapArgs, Parser, Subcommand};
use miette::Diagnostic;
use slurmit_remote::{ConnectionTarget, RetryPolicy};
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "slurmit")]
#[command(about = "Submit and track SLURM jobs on a remote cluster")]
#[command(version)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Directory holding local job records [default: ~/.slurmit/jobs]
    #[arg(long, global = true, env = "SLURMIT_STORE")]
    pub store_dir: Option<Utf8PathBuf>,

    /// slurmit workspace on the execution host
    #[arg(long, global = true, default_value = "~/slurmit")]
    pub workspace: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ConnectionArgs {
    /// Cluster login host (omit to run scheduler commands locally)
    #[arg(long, global = true, env = "SLURMIT_HOST")]
    pub host: Option<String>,

    /// SSH user [default: $USER]
    #[arg(long, global = true, env = "SLURMIT_USER")]
    pub user: Option<String>,

    /// SSH port
    #[arg(long, global = true, default_value = "22")]
    pub port: u16,

    /// SSH private key
    #[arg(long, global = true)]
    pub key_file: Option<Utf8PathBuf>,

    /// Run scheduler commands on this machine even if a host is set
    #[arg(long, global = true)]
    pub local: bool,

    /// Connection attempts before giving up
    #[arg(long, global = true, default_value = "3")]
    pub retries: u32,

    /// Seconds to wait for each connection attempt
    #[arg(long, global = true, default_value = "10")]
    pub connect_timeout: u64,
}

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("No SSH user for {0}")]
    #[diagnostic(
        code(slurmit::cli::user),
        help("Pass --user or set SLURMIT_USER.")
    )]
    MissingUser(String),
}

impl ConnectionArgs {
    /// The SSH target, or None when commands should run locally.
    pub fn target(&self) -> Result<Option<ConnectionTarget>, CliError> {
        let Some(host) = self.host.as_deref().filter(|_| !self.local) else {
            return Ok(None);
        };
        let user = self
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| CliError::MissingUser(host.to_string()))?;

        let mut target = ConnectionTarget::new(host, user).with_port(self.port);
        if let Some(key) = &self.key_file {
            target = target.with_key_file(key.clone());
        }
        Ok(Some(target))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries.max(1),
            timeout: Duration::from_secs(self.connect_timeout),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show cluster nodes with CPU, memory and GPU usage
    Nodes {
        /// Only nodes in this partition
        #[arg(short, long)]
        partition: Option<String>,

        /// Only nodes that can take new work
        #[arg(long)]
        available: bool,

        /// Minimum free GPUs (implies --available)
        #[arg(long, default_value = "0")]
        min_gpus: u32,

        /// Required GPU type (implies --available)
        #[arg(long)]
        gpu_type: Option<String>,

        /// Print totals instead of one line per node
        #[arg(long)]
        summary: bool,
    },

    /// Show the live SLURM queue
    Jobs {
        /// Jobs of all users, not just yours
        #[arg(short, long)]
        all: bool,

        #[arg(short, long)]
        partition: Option<String>,

        /// Only jobs on this node
        #[arg(short = 'w', long)]
        node: Option<String>,
    },

    /// Upload a job configuration to the queue
    Enqueue {
        /// Job configuration file
        #[arg(default_value = "slurmit.yaml")]
        config: Utf8PathBuf,

        /// Secret environment variables
        #[arg(long)]
        secret: Option<Utf8PathBuf>,
    },

    /// Submit a queued job to SLURM
    Run {
        /// Job name in the queue
        name: String,

        /// Wait until the job finishes
        #[arg(short, long)]
        wait: bool,

        /// Stream the job's output while waiting (implies --wait)
        #[arg(short, long)]
        follow: bool,

        /// Seconds between status checks while waiting
        #[arg(long, default_value = "10")]
        poll_interval: u64,
    },

    /// Show a job's status
    Status {
        /// Job name, name prefix, SLURM job id or run id
        job: String,

        /// Print the stored record without asking SLURM
        #[arg(long)]
        no_refresh: bool,
    },

    /// Show a job's output
    Logs {
        /// Job name, name prefix, SLURM job id or run id
        job: String,

        /// Lines to show from the end
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,

        /// Keep printing new output
        #[arg(short, long)]
        follow: bool,

        /// Show stderr instead of stdout
        #[arg(long)]
        stderr: bool,
    },

    /// Cancel a submitted job
    Cancel {
        /// Job name, name prefix, SLURM job id or run id
        job: String,
    },

    /// List known jobs
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Forget a job (the cluster is not touched)
    Delete {
        /// Exact job name
        name: String,
    },

    /// List jobs waiting in the queue area
    Queue,

    /// List recent runs on the execution host
    Runs {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}
