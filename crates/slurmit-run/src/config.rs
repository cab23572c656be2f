//! Per-job configuration read from `slurmit.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the job configuration file inside a queue or run directory.
pub const CONFIG_FILE: &str = "slurmit.yaml";

/// Optional file with secret environment variables, next to the config.
pub const SECRET_FILE: &str = "secret.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub slurm: SlurmOptions,
    #[serde(default)]
    pub resources: Resources,
    pub execution: Execution,
    #[serde(default)]
    pub output: OutputOptions,
}

fn default_name() -> String {
    "slurmit".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlurmOptions {
    pub partition: String,
    pub account: Option<String>,
    pub qos: Option<String>,
    /// Rendered verbatim as `#SBATCH --<key>=<value>`
    pub extra_options: BTreeMap<String, String>,
}

impl Default for SlurmOptions {
    fn default() -> Self {
        Self {
            partition: "default".to_string(),
            account: None,
            qos: None,
            extra_options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Resources {
    pub nodes: u32,
    pub ntasks: u32,
    pub cpus_per_task: u32,
    pub gpus: u32,
    pub gpu_type: Option<String>,
    pub memory: String,
    pub time: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            nodes: 1,
            ntasks: 1,
            cpus_per_task: 1,
            gpus: 0,
            gpu_type: None,
            memory: "4G".to_string(),
            time: "1:00:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub command: String,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub setup_commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputOptions {
    /// File name pattern; `%j` is the job id, `%x` the job name
    pub stdout: String,
    pub stderr: String,
    /// Relative to the run directory
    pub log_dir: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            stdout: "job_%j.out".to_string(),
            stderr: "job_%j.err".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

impl JobConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

/// Secrets kept out of `slurmit.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecretConfig {
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

impl SecretConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

/// Content digest recorded with a job: `blake3:` and 16 hex digits.
pub fn config_hash(content: &[u8]) -> String {
    let hex = blake3::hash(content).to_hex();
    format!("blake3:{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name: train-resnet
connection:
  host: login.hpc.example.org
  user: alice
slurm:
  partition: gpu
  account: lab
  extra_options:
    mail-type: END
resources:
  cpus_per_task: 8
  gpus: 2
  gpu_type: a100
  memory: 64G
  time: "12:00:00"
execution:
  command: python train.py --epochs 90
  env_vars:
    WANDB_PROJECT: resnet
  modules: [cuda/12.1]
output:
  log_dir: logs
"#;

    #[test]
    fn test_full_config() {
        let config = JobConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.name, "train-resnet");
        assert_eq!(config.slurm.partition, "gpu");
        assert_eq!(config.slurm.extra_options["mail-type"], "END");
        assert_eq!(config.resources.gpus, 2);
        assert_eq!(config.resources.nodes, 1);
        assert_eq!(config.execution.modules, vec!["cuda/12.1"]);
        assert_eq!(config.output.stdout, "job_%j.out");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = JobConfig::from_yaml("execution:\n  command: ./run.sh\n").unwrap();
        assert_eq!(config.name, "slurmit");
        assert_eq!(config.slurm.partition, "default");
        assert_eq!(config.resources.memory, "4G");
        assert_eq!(config.output, OutputOptions::default());
    }

    #[test]
    fn test_missing_command_is_error() {
        assert!(JobConfig::from_yaml("name: x\n").is_err());
    }

    #[test]
    fn test_secret_config() {
        let secret = SecretConfig::from_yaml("env_vars:\n  HF_TOKEN: abc\n").unwrap();
        assert_eq!(secret.env_vars["HF_TOKEN"], "abc");
    }

    #[test]
    fn test_config_hash() {
        let hash = config_hash(b"execution:\n  command: ./run.sh\n");
        assert!(hash.starts_with("blake3:"));
        assert_eq!(hash.len(), "blake3:".len() + 16);
        assert_eq!(hash, config_hash(b"execution:\n  command: ./run.sh\n"));
        assert_ne!(hash, config_hash(b"execution:\n  command: ./other.sh\n"));
    }
}
