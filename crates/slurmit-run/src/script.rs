//! Batch script and environment file rendering.

use crate::config::JobConfig;
use slurmit_remote::shell_quote;
use std::collections::BTreeMap;

/// Expand the SLURM filename patterns slurmit relies on (`%j`, `%x`).
pub fn expand_log_pattern(pattern: &str, job_id: &str, job_name: &str) -> String {
    pattern.replace("%j", job_id).replace("%x", job_name)
}

/// Render `job.sbatch`.
///
/// Logs go to `<run_dir>/<log_dir>`; the job runs in `work_dir` after
/// sourcing `<run_dir>/env.sh`.
pub fn render_sbatch_script(config: &JobConfig, run_dir: &str, work_dir: &str) -> String {
    let log_dir = format!("{}/{}", run_dir, config.output.log_dir);
    let resources = &config.resources;
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --job-name={}", config.name),
        format!("#SBATCH --output={}/{}", log_dir, config.output.stdout),
        format!("#SBATCH --error={}/{}", log_dir, config.output.stderr),
        format!("#SBATCH --partition={}", config.slurm.partition),
    ];
    if let Some(account) = &config.slurm.account {
        lines.push(format!("#SBATCH --account={account}"));
    }
    if let Some(qos) = &config.slurm.qos {
        lines.push(format!("#SBATCH --qos={qos}"));
    }
    lines.push(format!("#SBATCH --nodes={}", resources.nodes));
    lines.push(format!("#SBATCH --ntasks={}", resources.ntasks));
    lines.push(format!("#SBATCH --cpus-per-task={}", resources.cpus_per_task));
    lines.push(format!("#SBATCH --mem={}", resources.memory));
    lines.push(format!("#SBATCH --time={}", resources.time));
    if resources.gpus > 0 {
        match &resources.gpu_type {
            Some(gpu_type) => lines.push(format!("#SBATCH --gres=gpu:{}:{}", gpu_type, resources.gpus)),
            None => lines.push(format!("#SBATCH --gres=gpu:{}", resources.gpus)),
        }
    }
    for (key, value) in &config.slurm.extra_options {
        lines.push(format!("#SBATCH --{key}={value}"));
    }

    lines.push(String::new());
    lines.push("echo \"Job ID: $SLURM_JOB_ID\"".to_string());
    lines.push("echo \"Node: $SLURM_NODELIST\"".to_string());
    lines.push("echo \"Start time: $(date)\"".to_string());
    lines.push(String::new());

    let env_file = shell_quote(&format!("{run_dir}/env.sh"));
    lines.push(format!("if [ -f {env_file} ]; then"));
    lines.push(format!("    source {env_file}"));
    lines.push("fi".to_string());
    lines.push(format!("cd {}", shell_quote(work_dir)));
    lines.push(String::new());

    if !config.execution.modules.is_empty() {
        for module in &config.execution.modules {
            lines.push(format!("module load {module}"));
        }
        lines.push(String::new());
    }
    if !config.execution.setup_commands.is_empty() {
        lines.extend(config.execution.setup_commands.iter().cloned());
        lines.push(String::new());
    }

    lines.push(config.execution.command.clone());
    lines.push(String::new());
    lines.push("echo \"End time: $(date)\"".to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Render `env.sh` from the config's variables followed by secrets.
pub fn render_env_script(config: &JobConfig, secrets: &BTreeMap<String, String>) -> String {
    let mut lines = vec!["#!/bin/bash".to_string()];
    for (key, value) in &config.execution.env_vars {
        lines.push(format!("export {}={}", key, shell_quote(value)));
    }
    if !secrets.is_empty() {
        lines.push("# secrets".to_string());
        for (key, value) in secrets {
            lines.push(format!("export {}={}", key, shell_quote(value)));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JobConfig {
        JobConfig::from_yaml(
            r#"
name: train
slurm:
  partition: gpu
  qos: high
resources:
  gpus: 2
  gpu_type: a100
  memory: 64G
execution:
  command: python train.py
  env_vars:
    MESSAGE: hello world
  modules: [cuda/12.1]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_sbatch_directives() {
        let script = render_sbatch_script(&config(), "/home/alice/slurmit/runs/train_1", "/home/alice/slurmit/runs/train_1/code");
        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=train\n"));
        assert!(script.contains("#SBATCH --output=/home/alice/slurmit/runs/train_1/logs/job_%j.out\n"));
        assert!(script.contains("#SBATCH --qos=high\n"));
        assert!(!script.contains("--account"));
        assert!(script.contains("#SBATCH --gres=gpu:a100:2\n"));
        assert!(script.contains("source /home/alice/slurmit/runs/train_1/env.sh\n"));
        assert!(script.contains("cd /home/alice/slurmit/runs/train_1/code\n"));
        assert!(script.contains("module load cuda/12.1\n"));
        let command_at = script.find("python train.py").unwrap();
        assert!(script.find("module load").unwrap() < command_at);
    }

    #[test]
    fn test_untyped_gpu_request() {
        let mut config = config();
        config.resources.gpu_type = None;
        let script = render_sbatch_script(&config, "/r", "/r");
        assert!(script.contains("#SBATCH --gres=gpu:2\n"));
    }

    #[test]
    fn test_env_script_quotes_values() {
        let secrets = BTreeMap::from([("TOKEN".to_string(), "it's secret".to_string())]);
        let env = render_env_script(&config(), &secrets);
        assert!(env.contains("export MESSAGE='hello world'\n"));
        assert!(env.contains(r"export TOKEN='it'\''s secret'"));
    }

    #[test]
    fn test_expand_log_pattern() {
        assert_eq!(expand_log_pattern("job_%j.out", "88421", "train"), "job_88421.out");
        assert_eq!(expand_log_pattern("%x-%j.err", "7", "train"), "train-7.err");
    }
}
