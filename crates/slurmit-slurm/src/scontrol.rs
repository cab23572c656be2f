//! Per-node GPU inventory via `scontrol show node`.

use crate::error::SlurmError;
use crate::types::GpuInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use slurmit_remote::{Session, shell_quote};

/// `Gres=` / `GresUsed=` GPU tokens: `gpu:<type>:<count>` or `gpu:<count>`.
static GPU_GRES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(Gres|GresUsed)=gpu(?::([^:\s,()]+))?:(\d+)")
        .expect("GRES pattern is valid")
});

/// Untyped GPU GRES entries are reported under this type.
const DEFAULT_GPU_TYPE: &str = "gpu";

/// Parse GPU inventory from a `scontrol show node` blob.
///
/// Returns None when no GPU is declared: that means "unknown", which is
/// not the same as a node confirmed to have zero GPUs. A usage count above
/// the declared total means the format is not what we expect; it is logged
/// and also treated as unknown.
pub fn parse_gres(detail: &str) -> Option<GpuInfo> {
    let mut declared: Option<(String, u32)> = None;
    let mut used: Option<u32> = None;

    for caps in GPU_GRES.captures_iter(detail) {
        let gpu_type = caps
            .get(2)
            .map_or(DEFAULT_GPU_TYPE, |m| m.as_str())
            .to_string();
        let Ok(count) = caps[3].parse::<u32>() else {
            continue;
        };
        match &caps[1] {
            "Gres" if declared.is_none() => declared = Some((gpu_type, count)),
            "GresUsed" if used.is_none() => used = Some(count),
            _ => {}
        }
    }

    let (gpu_type, total) = declared?;
    let used = used.unwrap_or(0);
    let gpu = GpuInfo::new(gpu_type, total, used);
    if gpu.is_none() {
        tracing::warn!(
            "GresUsed ({}) exceeds declared GPUs ({}); ignoring GPU data",
            used,
            total
        );
    }
    gpu
}

/// Query GPU inventory for one node.
///
/// A failing scontrol call yields None (unknown) rather than an error.
pub async fn query_node_gpus<S: Session>(
    session: &S,
    node: &str,
) -> Result<Option<GpuInfo>, SlurmError> {
    let result = session
        .run(&format!("scontrol show node {}", shell_quote(node)), true)
        .await?;
    if !result.ok || result.stdout.trim().is_empty() {
        return Ok(None);
    }
    Ok(parse_gres(&result.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_gres() {
        let detail = "NodeName=gpu01\n   Gres=gpu:a100:4(S:0-1)\n   GresUsed=gpu:a100:2(IDX:0-1)\n";
        let gpu = parse_gres(detail).unwrap();
        assert_eq!(gpu.gpu_type, "a100");
        assert_eq!(gpu.total, 4);
        assert_eq!(gpu.used, 2);
        assert_eq!(gpu.free(), 2);
    }

    #[test]
    fn test_untyped_gres_defaults_to_gpu() {
        let gpu = parse_gres("Gres=gpu:4 GresUsed=gpu:1").unwrap();
        assert_eq!(gpu.gpu_type, "gpu");
        assert_eq!(gpu.total, 4);
        assert_eq!(gpu.free(), 3);
    }

    #[test]
    fn test_missing_usage_means_idle() {
        let gpu = parse_gres("Gres=gpu:v100:8").unwrap();
        assert_eq!(gpu.used, 0);
        assert_eq!(gpu.free(), 8);
    }

    #[test]
    fn test_no_gpu_is_unknown() {
        assert!(parse_gres("NodeName=cpu01 Gres=(null)").is_none());
        assert!(parse_gres("").is_none());
    }

    #[test]
    fn test_overused_gpus_are_unknown() {
        assert!(parse_gres("Gres=gpu:a100:2 GresUsed=gpu:a100:3").is_none());
    }

    #[test]
    fn test_other_gres_keys_are_ignored() {
        let detail = "CfgTRES=cpu=64,gres/gpu=4 Gres=gpu:rtx_3090:4 GresUsed=gpu:rtx_3090:4";
        let gpu = parse_gres(detail).unwrap();
        assert_eq!(gpu.gpu_type, "rtx_3090");
        assert_eq!(gpu.free(), 0);
    }
}
