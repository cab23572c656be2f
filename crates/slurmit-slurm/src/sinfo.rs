//! Node inventory via sinfo.

use crate::error::SlurmError;
use crate::scontrol::query_node_gpus;
use crate::types::NodeInfo;
use slurmit_parsers::{data_lines, format_memory_mb, split_delimited};
use slurmit_remote::{Session, shell_quote};
use std::collections::HashSet;

/// sinfo output format, one line per node-partition pair:
/// %N - Node name
/// %P - Partition (default partition carries a trailing '*')
/// %T - State (extended)
/// %C - CPUs as allocated/idle/other/total
/// %m - Memory in MB
const SINFO_FORMAT: &str = "%N|%P|%T|%C|%m";

/// Parse a CPU state column into (used, total).
///
/// Long form "A/I/O/T" yields (A, T); short form "U/T" yields (U, T);
/// anything else yields (0, 0).
pub fn parse_cpu_state(s: &str) -> (u32, u32) {
    let parts: Vec<&str> = s.trim().split('/').collect();
    let pick = |used: &str, total: &str| -> Option<(u32, u32)> {
        Some((used.trim().parse().ok()?, total.trim().parse().ok()?))
    };
    let parsed = match parts.as_slice() {
        [allocated, _idle, _other, total] => pick(allocated, total),
        [used, total] => pick(used, total),
        _ => None,
    };
    parsed.unwrap_or((0, 0))
}

/// Parse sinfo node output.
///
/// Nodes that appear in several partitions are reported once, with the
/// first partition seen. GPU data is not part of sinfo output and is left
/// unset.
pub fn parse_sinfo_output(output: &str) -> Vec<NodeInfo> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();

    for line in data_lines(output) {
        let fields = match split_delimited(line, 5) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!("Skipping sinfo line: {}", e);
                continue;
            }
        };

        let name = fields[0];
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }

        let (cpus_used, cpus_total) = parse_cpu_state(fields[3]);
        nodes.push(NodeInfo {
            name: name.to_string(),
            state: fields[2].to_string(),
            partition: fields[1].trim_end_matches('*').to_string(),
            cpus_used,
            cpus_total,
            memory_total: format_memory_mb(fields[4]),
            gpu: None,
        });
    }

    nodes
}

/// Query cluster nodes, with GPU inventory from scontrol for each node.
pub async fn query_nodes<S: Session>(
    session: &S,
    partition: Option<&str>,
) -> Result<Vec<NodeInfo>, SlurmError> {
    let mut cmd = format!("sinfo -N -h -o {}", shell_quote(SINFO_FORMAT));
    if let Some(partition) = partition {
        cmd.push_str(&format!(" -p {}", shell_quote(partition)));
    }

    let result = session.run(&cmd, true).await?;
    if !result.ok {
        return Err(SlurmError::Scheduler {
            command: "sinfo".to_string(),
            stderr: result.stderr.trim().to_string(),
        });
    }

    let mut nodes = parse_sinfo_output(&result.stdout);
    for node in &mut nodes {
        node.gpu = query_node_gpus(session, &node.name).await?;
    }
    Ok(nodes)
}

/// List partition names, without the default-partition marker.
pub async fn list_partitions<S: Session>(session: &S) -> Result<Vec<String>, SlurmError> {
    let result = session.run("sinfo -h -o '%P'", true).await?;
    if !result.ok {
        return Ok(vec![]);
    }
    Ok(data_lines(&result.stdout)
        .map(|line| line.trim().trim_end_matches('*').to_string())
        .collect())
}

/// Report the SLURM version, failing if SLURM is not installed.
pub async fn scheduler_version<S: Session>(session: &S) -> Result<String, SlurmError> {
    let result = session.run("sinfo --version", true).await?;
    if !result.ok {
        return Err(SlurmError::Scheduler {
            command: "sinfo --version".to_string(),
            stderr: "SLURM is not available on the remote system".to_string(),
        });
    }
    Ok(result.stdout.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slurmit_remote::fake::FakeSession;

    #[test]
    fn test_parse_cpu_state() {
        assert_eq!(parse_cpu_state("24/40/0/64"), (24, 64));
        assert_eq!(parse_cpu_state("3/16"), (3, 16));
        assert_eq!(parse_cpu_state("1/2/3"), (0, 0));
        assert_eq!(parse_cpu_state("x/16"), (0, 0));
        assert_eq!(parse_cpu_state(""), (0, 0));
    }

    #[test]
    fn test_parse_gpu_node_line() {
        let nodes = parse_sinfo_output("gpu01|gpu|idle|4/8/0/8|32000\n");
        assert_eq!(nodes.len(), 1);
        let node = &nodes[0];
        assert_eq!(node.name, "gpu01");
        assert_eq!(node.cpus_used, 4);
        assert_eq!(node.cpus_total, 8);
        assert_eq!(node.memory_total, "31G");
        assert!(node.gpu.is_none());
    }

    #[test]
    fn test_parse_sinfo_dedupes_and_strips_default_marker() {
        let output = "\
node01|batch*|mixed|8/8/0/16|64000
node01|long|mixed|8/8/0/16|64000

node02|batch*|down|0/0/16/16|512
broken|line
";
        let nodes = parse_sinfo_output(output);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].partition, "batch");
        assert_eq!(nodes[1].name, "node02");
        assert_eq!(nodes[1].memory_total, "512M");
    }

    #[tokio::test]
    async fn test_query_nodes_attaches_gpus() {
        let session = FakeSession::new();
        session.respond("sinfo -N", "gpu01|gpu*|mixed|4/4/0/8|128000\ncpu01|batch|idle|0/16/0/16|64000\n");
        session.respond(
            "scontrol show node gpu01",
            "NodeName=gpu01 Arch=x86_64\n   Gres=gpu:a100:4(S:0-1)\n   GresUsed=gpu:a100:1(IDX:0)\n",
        );
        session.respond("scontrol show node cpu01", "NodeName=cpu01\n   Gres=(null)\n");

        let nodes = query_nodes(&session, Some("gpu")).await.unwrap();
        assert_eq!(nodes.len(), 2);
        let gpu = nodes[0].gpu.as_ref().unwrap();
        assert_eq!(gpu.gpu_type, "a100");
        assert_eq!(gpu.free(), 3);
        assert!(nodes[1].gpu.is_none());
        assert!(session.commands()[0].ends_with("-p gpu"));
    }

    #[tokio::test]
    async fn test_query_nodes_reports_sinfo_failure() {
        let session = FakeSession::new();
        session.fail("sinfo", 1, "sinfo: error: Invalid partition name specified");
        let err = query_nodes(&session, Some("nope")).await.unwrap_err();
        assert!(matches!(err, SlurmError::Scheduler { .. }));
    }

    #[tokio::test]
    async fn test_list_partitions() {
        let session = FakeSession::new();
        session.respond("sinfo -h -o '%P'", "batch*\ngpu\n\n");
        assert_eq!(list_partitions(&session).await.unwrap(), vec!["batch", "gpu"]);
    }

    #[tokio::test]
    async fn test_scheduler_version() {
        let session = FakeSession::new();
        session.respond("sinfo --version", "slurm 23.02.7\n");
        assert_eq!(scheduler_version(&session).await.unwrap(), "slurm 23.02.7");

        let missing = FakeSession::new();
        missing.fail("sinfo --version", 127, "sinfo: command not found");
        assert!(matches!(
            scheduler_version(&missing).await,
            Err(SlurmError::Scheduler { .. })
        ));
    }
}
