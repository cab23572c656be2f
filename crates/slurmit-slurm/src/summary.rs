//! Cluster-wide aggregates over a node inventory.

use crate::types::NodeInfo;
use std::collections::BTreeMap;

/// GPU counts for one GPU type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuTally {
    pub total: u32,
    pub free: u32,
}

/// Node and GPU totals for a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub nodes_by_state: BTreeMap<String, usize>,
    pub gpus_by_type: BTreeMap<String, GpuTally>,
    pub total_gpus: u32,
    pub free_gpus: u32,
}

impl ClusterSummary {
    /// Nodes with unknown GPU inventory contribute to node counts only.
    pub fn from_nodes(nodes: &[NodeInfo]) -> Self {
        let mut summary = Self {
            total_nodes: nodes.len(),
            ..Self::default()
        };

        for node in nodes {
            *summary
                .nodes_by_state
                .entry(node.state.clone())
                .or_default() += 1;

            if let Some(gpu) = &node.gpu {
                let tally = summary
                    .gpus_by_type
                    .entry(gpu.gpu_type.clone())
                    .or_default();
                tally.total += gpu.total;
                tally.free += gpu.free();
                summary.total_gpus += gpu.total;
                summary.free_gpus += gpu.free();
            }
        }

        summary
    }
}

/// Resources a job needs from a single node.
#[derive(Debug, Clone, Default)]
pub struct NodeRequirement {
    pub min_gpus: u32,
    /// Matched case-insensitively
    pub gpu_type: Option<String>,
}

/// Nodes that can accept a job with the given requirement.
///
/// Down and drained nodes are never offered. When GPUs are required, nodes
/// with unknown GPU inventory are excluded.
pub fn available_nodes<'a>(nodes: &'a [NodeInfo], req: &NodeRequirement) -> Vec<&'a NodeInfo> {
    nodes
        .iter()
        .filter(|node| !node.is_unavailable())
        .filter(|node| {
            if req.min_gpus == 0 && req.gpu_type.is_none() {
                return true;
            }
            let Some(gpu) = &node.gpu else {
                return false;
            };
            gpu.free() >= req.min_gpus
                && req
                    .gpu_type
                    .as_ref()
                    .is_none_or(|wanted| gpu.gpu_type.eq_ignore_ascii_case(wanted))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpuInfo;

    fn node(name: &str, state: &str, gpu: Option<(&str, u32, u32)>) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            state: state.to_string(),
            partition: "gpu".to_string(),
            cpus_used: 0,
            cpus_total: 32,
            memory_total: "256G".to_string(),
            gpu: gpu.and_then(|(t, total, used)| GpuInfo::new(t, total, used)),
        }
    }

    fn cluster() -> Vec<NodeInfo> {
        vec![
            node("gpu01", "mixed", Some(("a100", 4, 3))),
            node("gpu02", "idle", Some(("a100", 4, 0))),
            node("gpu03", "idle", Some(("v100", 8, 2))),
            node("gpu04", "drained", Some(("a100", 4, 0))),
            node("cpu01", "idle", None),
        ]
    }

    #[test]
    fn test_summary_totals() {
        let summary = ClusterSummary::from_nodes(&cluster());
        assert_eq!(summary.total_nodes, 5);
        assert_eq!(summary.nodes_by_state["idle"], 3);
        assert_eq!(summary.gpus_by_type["a100"], GpuTally { total: 12, free: 9 });
        assert_eq!(summary.gpus_by_type["v100"], GpuTally { total: 8, free: 6 });
        assert_eq!(summary.total_gpus, 20);
        assert_eq!(summary.free_gpus, 15);
    }

    #[test]
    fn test_available_without_requirement_skips_down_nodes() {
        let nodes = cluster();
        let names: Vec<_> = available_nodes(&nodes, &NodeRequirement::default())
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["gpu01", "gpu02", "gpu03", "cpu01"]);
    }

    #[test]
    fn test_available_by_gpu_count_and_type() {
        let nodes = cluster();
        let req = NodeRequirement {
            min_gpus: 2,
            gpu_type: Some("A100".to_string()),
        };
        let names: Vec<_> = available_nodes(&nodes, &req)
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["gpu02"]);
    }
}
