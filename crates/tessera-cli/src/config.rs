//! TOML configuration deserialisation for workload jobs.

use anyhow::{bail, Context};
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which backend executes the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Serial,
    Mpi,
    Scheduler,
}

/// Backend selection and sizing.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_kind")]
    pub kind: BackendKind,
    /// Total ranks of the message-passing world.
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    /// Message-passing: nodes the ranks are spread over.
    /// Scheduler: worker nodes of the local cluster.
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// CPUs per node (scheduler) or reported core count (serial).
    pub num_cpus: Option<usize>,
    /// Scheduler only: place blocks on the head node as well.
    #[serde(default)]
    pub use_head: bool,
    /// Scheduler only: address of the head node.
    pub head_address: Option<String>,
    /// Scheduler only: warmup task size, 0 to skip.
    #[serde(default)]
    pub warmup: usize,
    /// Scheduler only: never inject placement tags.
    #[serde(default)]
    pub stock: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            ranks: default_ranks(),
            nodes: default_nodes(),
            num_cpus: None,
            use_head: false,
            head_address: None,
            warmup: 0,
            stock: false,
        }
    }
}

fn default_kind() -> BackendKind {
    BackendKind::Serial
}
fn default_ranks() -> usize {
    4
}
fn default_nodes() -> usize {
    2
}

/// The block workload to run.
#[derive(Debug, Deserialize)]
pub struct WorkloadConfig {
    pub shape: Vec<usize>,
    pub block_shape: Vec<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Sampling distribution name, e.g. "random", "normal", "uniform".
    #[serde(default = "default_distribution")]
    pub distribution: String,
    #[serde(default)]
    pub distribution_args: Vec<f64>,
    /// Percentiles in [0, 100] estimated from per-block digests.
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
}

fn default_seed() -> u64 {
    1337
}
fn default_distribution() -> String {
    "random".into()
}
fn default_percentiles() -> Vec<f64> {
    vec![5.0, 50.0, 95.0]
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save the workload summary as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_summary: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_summary: true,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Check constraints serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        let w = &self.workload;
        if w.shape.len() != w.block_shape.len() {
            bail!(
                "workload.shape {:?} and workload.block_shape {:?} differ in rank",
                w.shape,
                w.block_shape
            );
        }
        if w.shape.iter().any(|&s| s == 0) {
            bail!("workload.shape {:?} has an empty axis", w.shape);
        }
        if w.block_shape.iter().any(|&b| b == 0) {
            bail!("workload.block_shape {:?} has a zero-sized axis", w.block_shape);
        }
        if let Some(p) = w.percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            bail!("workload.percentiles: {} is outside [0, 100]", p);
        }

        let b = &self.backend;
        match b.kind {
            BackendKind::Serial => {}
            BackendKind::Mpi => {
                if b.nodes == 0 || b.ranks == 0 {
                    bail!("backend.ranks and backend.nodes must be positive");
                }
                if b.ranks % b.nodes != 0 {
                    bail!(
                        "backend.ranks ({}) must divide evenly over backend.nodes ({})",
                        b.ranks,
                        b.nodes
                    );
                }
            }
            BackendKind::Scheduler => {
                if b.nodes == 0 && !b.use_head {
                    bail!("scheduler needs worker nodes or use_head = true");
                }
                if b.num_cpus == Some(0) {
                    bail!("backend.num_cpus must be positive");
                }
            }
        }
        if b.kind != BackendKind::Scheduler && (b.warmup > 0 || b.stock || b.use_head) {
            log::warn!(
                "warmup, stock and use_head only apply to the scheduler backend; ignored for {:?}",
                b.kind
            );
        }
        Ok(())
    }
}

/// Parse a job configuration from TOML text.
pub fn parse_config(content: &str) -> anyhow::Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_config(&content).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let job = parse_config(
            r#"
            [workload]
            shape = [10, 4]
            block_shape = [3, 4]
            "#,
        )
        .unwrap();
        assert_eq!(job.backend.kind, BackendKind::Serial);
        assert_eq!(job.workload.seed, 1337);
        assert_eq!(job.workload.distribution, "random");
        assert!(job.output.save_summary);
    }

    #[test]
    fn test_scheduler_section() {
        let job = parse_config(
            r#"
            [backend]
            kind = "scheduler"
            nodes = 3
            num_cpus = 2
            use_head = true
            warmup = 100

            [workload]
            shape = [8]
            block_shape = [2]
            "#,
        )
        .unwrap();
        assert_eq!(job.backend.kind, BackendKind::Scheduler);
        assert_eq!(job.backend.nodes, 3);
        assert_eq!(job.backend.num_cpus, Some(2));
        assert!(job.backend.use_head);
        assert_eq!(job.backend.warmup, 100);
    }

    #[test]
    fn test_rejects_mismatched_rank() {
        let err = parse_config(
            r#"
            [workload]
            shape = [8, 8]
            block_shape = [2]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("differ in rank"));
    }

    #[test]
    fn test_rejects_uneven_ranks() {
        let result = parse_config(
            r#"
            [backend]
            kind = "mpi"
            ranks = 5
            nodes = 2

            [workload]
            shape = [8]
            block_shape = [2]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let result = parse_config(
            r#"
            [backend]
            kind = "gpu"

            [workload]
            shape = [8]
            block_shape = [2]
            "#,
        );
        assert!(result.is_err());
    }
}
