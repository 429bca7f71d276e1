//! Workload execution: build the configured backend, sample a block array
//! across its devices and reduce it back to a summary.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tessera_compute::{
    register_kernel, BackendType, CallOptions, ComputeBackend, DeviceInfo, LocalCluster, LocalClusterConfig,
    LocalWorld, MpiBackend, SchedulerBackend, SchedulerConfig, SerialBackend,
};
use tessera_core::{BlockRngState, DType, DeviceId, GridMeta, Kwargs, NdArray, Value};

use crate::config::{BackendConfig, BackendKind, JobConfig, WorkloadConfig};

/// Location and value of an extremum of the sampled array.
#[derive(Debug, Clone, PartialEq)]
pub struct Extremum {
    pub coords: Vec<usize>,
    pub value: f64,
}

/// Result of one workload run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSummary {
    pub backend: BackendType,
    pub devices: usize,
    pub num_cores: usize,
    pub blocks: usize,
    pub size: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: Extremum,
    pub max: Extremum,
    /// `(percentile, estimate)` pairs.
    pub percentiles: Vec<(f64, f64)>,
}

/// One sampled block and where it lives.
struct PlacedBlock<H> {
    handle: H,
    device: DeviceId,
    slice: Vec<(usize, usize)>,
    offset: usize,
}

impl<H> PlacedBlock<H> {
    fn shape(&self) -> Vec<usize> {
        self.slice.iter().map(|(start, stop)| stop - start).collect()
    }

    fn size(&self) -> usize {
        self.slice.iter().map(|(start, stop)| stop - start).product()
    }

    /// Global coordinates of the element at block-major index `index`.
    fn coords_of(&self, index: usize) -> Vec<usize> {
        let shape = self.shape();
        let mut rem = index - self.offset;
        let mut local = vec![0; shape.len()];
        for axis in (0..shape.len()).rev() {
            local[axis] = rem % shape[axis];
            rem /= shape[axis];
        }
        local.iter().zip(&self.slice).map(|(l, (start, _))| start + l).collect()
    }
}

fn handles<B: ComputeBackend>(values: Vec<Value>) -> Vec<B::Handle> {
    values.into_iter().map(B::Handle::from).collect()
}

/// Sample the configured array block by block, then reduce it.
///
/// Blocks are assigned to devices cyclically in row-major grid order. Every
/// reduction runs on the device owning its input, so only scalars, digests
/// and argmin/argmax pairs travel back to the driver.
pub fn run_workload<B: ComputeBackend>(backend: &B, workload: &WorkloadConfig) -> Result<WorkloadSummary> {
    let devices = backend.devices().to_vec();
    if devices.is_empty() {
        bail!("backend has no devices; was it initialised?");
    }
    let grid = GridMeta::new(workload.shape.clone(), workload.block_shape.clone(), DType::Float64)?;
    let rng = BlockRngState::new(u128::from(workload.seed));
    let dist_args = Value::List(workload.distribution_args.iter().map(|&a| Value::Float(a)).collect());

    let mut blocks = Vec::new();
    let mut offset = 0;
    for (i, entry) in grid.grid_entries().iter().enumerate() {
        let device = devices[i % devices.len()].clone();
        let slice = grid.block_slice_for(entry)?;
        let shape = grid.block_shape_for(entry)?;
        let args = vec![
            Value::from(rng.new_block_rng_params()),
            Value::from(workload.distribution.as_str()),
            dist_args.clone(),
            Value::from(shape),
            Value::from(DType::Float64.name()),
        ];
        let handle = backend
            .call("random_block", handles::<B>(args), Kwargs::new(), Some(&device), CallOptions::default())
            .with_context(|| format!("sampling block {:?}", entry))?;
        let block = PlacedBlock {
            handle,
            device,
            slice,
            offset,
        };
        offset += block.size();
        blocks.push(block);
    }
    info!("Sampled {} blocks over {} devices", blocks.len(), devices.len());

    // Per-block sums on the owning device.
    let mut partials = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let mut args = handles::<B>(vec![Value::from("sum")]);
        args.push(block.handle.clone());
        args.extend(handles::<B>(vec![Value::None, Value::Bool(false), Value::Bool(false)]));
        partials.push(backend.call("reduce_axis", args, Kwargs::new(), Some(&block.device), CallOptions::default())?);
    }
    let sum = backend
        .get(&partials)?
        .iter()
        .map(Value::as_f64)
        .sum::<tessera_core::Result<f64>>()?;

    let min = fold_arg_op(backend, &blocks, "argmin")?;
    let max = fold_arg_op(backend, &blocks, "argmax")?;
    let percentiles = estimate_percentiles(backend, &blocks, &workload.percentiles, &devices[0])?;

    Ok(WorkloadSummary {
        backend: backend.backend_type(),
        devices: devices.len(),
        num_cores: backend.num_cores_total(),
        blocks: blocks.len(),
        size: offset,
        sum,
        mean: sum / offset as f64,
        min,
        max,
        percentiles,
    })
}

/// Carry an argmin/argmax through the blocks in grid order.
fn fold_arg_op<B: ComputeBackend>(backend: &B, blocks: &[PlacedBlock<B::Handle>], op: &str) -> Result<Extremum> {
    let mut carried: Option<(i64, Value)> = None;
    for block in blocks {
        let mut args = handles::<B>(vec![Value::from(op)]);
        args.push(block.handle.clone());
        let mut rest = vec![Value::from(block.offset)];
        if let Some((index, value)) = &carried {
            rest.push(Value::Int(*index));
            rest.push(value.clone());
        }
        args.extend(handles::<B>(rest));
        let best = backend.call("arg_op", args, Kwargs::new(), Some(&block.device), CallOptions::default())?;
        let out = backend.get(&[best])?;
        match out.first().map(Value::as_list).transpose()? {
            Some([index, value]) => carried = Some((index.as_i64()?, value.clone())),
            _ => bail!("{} returned an unexpected value", op),
        }
    }
    let (index, value) = carried.context("workload has no blocks")?;
    let index = usize::try_from(index)?;
    let owner = blocks
        .iter()
        .find(|b| index >= b.offset && index < b.offset + b.size())
        .with_context(|| format!("{} index {} is outside the array", op, index))?;
    Ok(Extremum {
        coords: owner.coords_of(index),
        value: value.as_f64()?,
    })
}

/// Merge per-block digests on `merge_on` and read off the percentiles.
fn estimate_percentiles<B: ComputeBackend>(
    backend: &B,
    blocks: &[PlacedBlock<B::Handle>],
    percentiles: &[f64],
    merge_on: &DeviceId,
) -> Result<Vec<(f64, f64)>> {
    if percentiles.is_empty() {
        return Ok(Vec::new());
    }
    let mut digests = Vec::with_capacity(blocks.len());
    for block in blocks {
        digests.push(backend.call(
            "tdigest_chunk",
            vec![block.handle.clone()],
            Kwargs::new(),
            Some(&block.device),
            CallOptions::default(),
        )?);
    }
    let fractions: Vec<f64> = percentiles.iter().map(|p| p / 100.0).collect();
    let q = NdArray::from_vec(&[fractions.len()], fractions)?;
    let mut args = handles::<B>(vec![Value::from(q)]);
    args.extend(digests);
    let estimate = backend.call("percentiles_from_tdigest", args, Kwargs::new(), Some(merge_on), CallOptions::default())?;
    let values = backend.get(&[estimate])?;
    let values = values
        .into_iter()
        .next()
        .context("no percentile result")?
        .into_array()?
        .to_f64();
    Ok(percentiles.iter().copied().zip(values.iter().copied()).collect())
}

// ─────────────────────────────────────────────────────────────
// Backend construction
// ─────────────────────────────────────────────────────────────

fn serial_backend(config: &BackendConfig) -> SerialBackend {
    match config.num_cpus {
        Some(cpus) => SerialBackend::with_cpus(cpus),
        None => SerialBackend::new(),
    }
}

fn local_cluster(config: &BackendConfig) -> Arc<LocalCluster> {
    let mut cluster = LocalClusterConfig::with_workers(config.nodes, config.num_cpus.unwrap_or(2));
    if let Some(head) = &config.head_address {
        cluster.head_address = head.clone();
    }
    Arc::new(LocalCluster::new(cluster))
}

fn scheduler_backend(config: &BackendConfig) -> SchedulerBackend<LocalCluster> {
    let scheduler = SchedulerConfig {
        use_head: config.use_head,
        num_nodes: None,
        num_cpus: config.num_cpus,
        head_address: config.head_address.clone(),
    };
    if config.stock {
        SchedulerBackend::stock(local_cluster(config), scheduler)
    } else {
        SchedulerBackend::new(local_cluster(config), scheduler)
    }
}

fn mpi_world(config: &BackendConfig) -> LocalWorld {
    LocalWorld::uniform(config.nodes, config.ranks / config.nodes)
}

/// Initialise `backend`, run `f` on it and shut it down again, even when
/// `f` fails.
fn with_backend<B, T>(mut backend: B, f: impl FnOnce(&B) -> Result<T>) -> Result<T>
where
    B: ComputeBackend,
{
    backend.init().context("initialising backend")?;
    register_kernel(&backend);
    let out = f(&backend);
    backend.shutdown().context("shutting down backend")?;
    out
}

/// Run `f` on every rank of the configured message-passing world and keep
/// the coordinator's result. Every rank computes the same value.
fn on_every_rank<T, F>(config: &BackendConfig, f: F) -> Result<T>
where
    T: Send,
    F: Fn(&MpiBackend<tessera_compute::mpi::LocalComm>) -> Result<T> + Sync,
{
    let world = mpi_world(config);
    let results = world.run(|comm| with_backend(MpiBackend::new(comm), &f))?;
    results
        .into_iter()
        .next()
        .context("message-passing world has no ranks")?
}

/// Run the configured workload on the configured backend.
pub fn run_job(job: &JobConfig) -> Result<WorkloadSummary> {
    let config = &job.backend;
    match config.kind {
        BackendKind::Serial => with_backend(serial_backend(config), |b| run_workload(b, &job.workload)),
        BackendKind::Mpi => on_every_rank(config, |b| run_workload(b, &job.workload)),
        BackendKind::Scheduler => with_backend(scheduler_backend(config), |b| {
            if config.warmup > 0 {
                println!("Warming up with {} calls...", config.warmup);
                b.warmup(config.warmup)?;
            }
            run_workload(b, &job.workload)
        }),
    }
}

/// Devices the configured backend would place blocks on.
pub fn describe_devices(config: &BackendConfig) -> Result<Vec<DeviceInfo>> {
    match config.kind {
        BackendKind::Serial => with_backend(serial_backend(config), |b| Ok(b.describe())),
        BackendKind::Mpi => on_every_rank(config, |b| Ok(b.describe())),
        BackendKind::Scheduler => with_backend(scheduler_backend(config), |b| Ok(b.describe())),
    }
}

/// Rerun the workload on the serial backend and compare.
///
/// Block streams depend only on the seed and grid order, so every backend
/// must reproduce the serial result exactly.
pub fn cross_check(job: &JobConfig, summary: &WorkloadSummary) -> Result<()> {
    let reference = with_backend(SerialBackend::new(), |b| run_workload(b, &job.workload))?;
    if reference.sum != summary.sum || reference.min != summary.min || reference.max != summary.max {
        bail!(
            "{} result differs from serial: sum {} vs {}, min {:?} vs {:?}, max {:?} vs {:?}",
            summary.backend,
            summary.sum,
            reference.sum,
            summary.min,
            reference.min,
            summary.max,
            reference.max
        );
    }
    Ok(())
}

/// Write the summary as `key,value` CSV rows.
pub fn write_summary_csv(summary: &WorkloadSummary, path: &Path, job: &JobConfig) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)?;

    writeln!(file, "# Tessera workload summary")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# backend: {}", summary.backend)?;
    writeln!(
        file,
        "# shape: {:?}, block_shape: {:?}, seed: {}, distribution: {}",
        job.workload.shape, job.workload.block_shape, job.workload.seed, job.workload.distribution
    )?;
    writeln!(file, "#")?;
    writeln!(file, "key,value")?;
    writeln!(file, "devices,{}", summary.devices)?;
    writeln!(file, "num_cores,{}", summary.num_cores)?;
    writeln!(file, "blocks,{}", summary.blocks)?;
    writeln!(file, "size,{}", summary.size)?;
    writeln!(file, "sum,{:.12e}", summary.sum)?;
    writeln!(file, "mean,{:.12e}", summary.mean)?;
    writeln!(file, "min,{:.12e}", summary.min.value)?;
    writeln!(file, "max,{:.12e}", summary.max.value)?;
    for (p, v) in &summary.percentiles {
        writeln!(file, "p{},{:.12e}", p, v)?;
    }

    println!("Summary written to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use approx::assert_relative_eq;

    fn job(backend: &str) -> JobConfig {
        parse_config(&format!(
            r#"
            {}

            [workload]
            shape = [7, 5]
            block_shape = [3, 2]
            seed = 42
            "#,
            backend
        ))
        .unwrap()
    }

    #[test]
    fn test_serial_summary_is_consistent() {
        let job = job("");
        let summary = run_job(&job).unwrap();
        assert_eq!(summary.backend, BackendType::Serial);
        assert_eq!(summary.blocks, 9);
        assert_eq!(summary.size, 35);
        assert_relative_eq!(summary.mean, summary.sum / 35.0);
        assert!(summary.min.value <= summary.max.value);
        assert!(summary.min.coords[0] < 7 && summary.min.coords[1] < 5);
        assert!((0.0..1.0).contains(&summary.min.value));
        assert_eq!(summary.percentiles.len(), 3);
    }

    #[test]
    fn test_backends_match_serial() {
        for backend in [
            "[backend]\nkind = \"mpi\"\nranks = 4\nnodes = 2",
            "[backend]\nkind = \"scheduler\"\nnodes = 3\nnum_cpus = 1\nwarmup = 4",
        ] {
            let job = job(backend);
            let summary = run_job(&job).unwrap();
            cross_check(&job, &summary).unwrap();
        }
    }

    #[test]
    fn test_coords_of_edge_block() {
        let block = PlacedBlock {
            handle: (),
            device: DeviceId::new(0, "localhost", "cpu", 0),
            slice: vec![(6, 7), (4, 5)],
            offset: 34,
        };
        assert_eq!(block.coords_of(34), vec![6, 4]);
    }

    #[test]
    fn test_describe_scheduler_devices() {
        let job = job("[backend]\nkind = \"scheduler\"\nnodes = 2\nnum_cpus = 3\nuse_head = true");
        let devices = describe_devices(&job.backend).unwrap();
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|d| d.compute_units == Some(3)));
    }
}
