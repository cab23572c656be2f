//! SLURM integration for slurmit.
//!
//! Each module owns one scheduler tool: it knows the output format it asks
//! for, parses that text into typed records, and issues the command through
//! a [`slurmit_remote::Session`]. Parsing functions are pure so they can be
//! tested against captured output.

pub mod error;
pub mod sacct;
pub mod sbatch;
pub mod scontrol;
pub mod sinfo;
pub mod squeue;
pub mod status;
pub mod summary;
pub mod types;

pub use error::SlurmError;
pub use sbatch::{SUBMIT_SENTINEL, cancel, parse_submission, submit};
pub use scontrol::{parse_gres, query_node_gpus};
pub use sinfo::{list_partitions, parse_cpu_state, parse_sinfo_output, query_nodes, scheduler_version};
pub use squeue::{JobFilter, list_jobs, parse_squeue_listing, parse_squeue_status};
pub use status::query_status;
pub use summary::{ClusterSummary, GpuTally, NodeRequirement, available_nodes};
pub use types::{GpuInfo, JobListing, JobState, JobStatus, NodeInfo};
