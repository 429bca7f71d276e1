//! An in-process cluster for the scheduler backend.
//!
//! Each simulated node owns a `rayon` thread pool sized to its CPU count
//! and advertises `CPU` plus its unique `node:<address>` resource. Tasks
//! launch when their last pending argument resolves; actors run on a
//! dedicated thread fed by a `flume` mailbox.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tessera_core::{Kwargs, Value};

use super::{node_resource, ActorId, ActorSpec, ClusterScheduler, NodeInfo, ObjectRef, SchedulerHandle, TaskSpec};
use crate::backend::{Actor, CallOptions};
use crate::error::{ComputeError, Result};

thread_local! {
    static CURRENT_NODE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Address of the simulated node running the current thread, if any.
pub fn current_node() -> Option<String> {
    CURRENT_NODE.with(|node| node.borrow().clone())
}

fn enter_node(address: &str) {
    CURRENT_NODE.with(|node| *node.borrow_mut() = Some(address.to_string()));
}

/// Shape of a [`LocalCluster`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalClusterConfig {
    pub head_address: String,
    pub head_cpus: usize,
    pub worker_addresses: Vec<String>,
    pub worker_cpus: usize,
}

impl LocalClusterConfig {
    /// A head node and `workers` worker nodes with `cpus` CPUs each.
    pub fn with_workers(workers: usize, cpus: usize) -> Self {
        Self {
            head_address: "10.0.0.1".to_string(),
            head_cpus: cpus,
            worker_addresses: (0..workers).map(|i| format!("10.0.0.{}", i + 2)).collect(),
            worker_cpus: cpus,
        }
    }
}

impl Default for LocalClusterConfig {
    fn default() -> Self {
        Self::with_workers(2, 2)
    }
}

struct Node {
    info: NodeInfo,
    pool: Arc<ThreadPool>,
}

struct ActorMessage {
    method: String,
    args: Vec<SchedulerHandle>,
    kwargs: Kwargs,
    output: ObjectRef,
}

struct Running {
    nodes: Vec<Node>,
    mailboxes: Mutex<HashMap<ActorId, flume::Sender<ActorMessage>>>,
}

/// A cluster of simulated nodes inside the current process.
pub struct LocalCluster {
    config: LocalClusterConfig,
    running: RwLock<Option<Running>>,
    next_object: AtomicU64,
    next_actor: AtomicU64,
    next_node: AtomicUsize,
}

impl LocalCluster {
    pub fn new(config: LocalClusterConfig) -> Self {
        Self {
            config,
            running: RwLock::new(None),
            next_object: AtomicU64::new(0),
            next_actor: AtomicU64::new(0),
            next_node: AtomicUsize::new(0),
        }
    }

    fn object(&self) -> ObjectRef {
        ObjectRef::new(self.next_object.fetch_add(1, Ordering::Relaxed))
    }

    /// Index of a node able to run work with `options`, rotating among
    /// the candidates.
    fn place(&self, nodes: &[Node], options: &CallOptions) -> Result<usize> {
        let feasible: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.info.satisfies(options))
            .map(|(i, _)| i)
            .collect();
        if feasible.is_empty() {
            return Err(ComputeError::Unschedulable(format!(
                "no node offers {:?} CPUs and {:?}",
                options.num_cpus.unwrap_or(1.0),
                options.resources
            )));
        }
        Ok(feasible[self.next_node.fetch_add(1, Ordering::Relaxed) % feasible.len()])
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new(LocalClusterConfig::default())
    }
}

fn build_node(address: &str, cpus: usize) -> Result<Node> {
    let resources = BTreeMap::from([("CPU".to_string(), cpus as f64), (node_resource(address), 1.0)]);
    let tag = address.to_string();
    let name = address.to_string();
    let pool = ThreadPoolBuilder::new()
        .num_threads(cpus.max(1))
        .thread_name(move |i| format!("{}-worker-{}", name, i))
        .start_handler(move |_| enter_node(&tag))
        .build()
        .map_err(|e| ComputeError::Unschedulable(format!("cannot start node {}: {}", address, e)))?;
    Ok(Node {
        info: NodeInfo {
            address: address.to_string(),
            alive: true,
            resources,
        },
        pool: Arc::new(pool),
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `f`, turning a panic into an error.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ComputeError::TaskPanicked(panic_message(payload))))
}

/// Values of resolved arguments; the first failed dependency's error
/// otherwise.
fn collect_args(args: Vec<SchedulerHandle>) -> Result<Vec<Value>> {
    args.into_iter()
        .map(|arg| match arg {
            SchedulerHandle::Ready(value) => Ok(value),
            SchedulerHandle::Pending(r) => r.wait(),
        })
        .collect()
}

/// Call `launch` once every reference in `deps` has resolved.
fn when_all(deps: Vec<ObjectRef>, launch: impl FnOnce() + Send + 'static) {
    if deps.is_empty() {
        launch();
        return;
    }
    let remaining = Arc::new(AtomicUsize::new(deps.len()));
    let launch = Arc::new(Mutex::new(Some(launch)));
    for dep in deps {
        let remaining = remaining.clone();
        let launch = launch.clone();
        dep.on_resolved(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(launch) = launch.lock().take() {
                    launch();
                }
            }
        });
    }
}

fn actor_loop(spec: ActorSpec, mailbox: flume::Receiver<ActorMessage>) {
    let ActorSpec {
        name, factory, args, kwargs, ..
    } = spec;
    let mut actor: Result<Box<dyn Actor>> =
        guarded(|| factory(args, kwargs)).map_err(|e| ComputeError::remote(name.as_str(), e));
    for message in mailbox.iter() {
        let outcome = match &mut actor {
            Err(e) => Err(e.clone()),
            Ok(actor) => collect_args(message.args).and_then(|values| {
                guarded(|| actor.call(&message.method, values, message.kwargs))
                    .map_err(|e| ComputeError::remote(message.method.as_str(), e))
            }),
        };
        message.output.resolve(outcome);
    }
    debug!("actor '{}' stopped", name);
}

impl ClusterScheduler for LocalCluster {
    fn is_initialized(&self) -> bool {
        self.running.read().is_some()
    }

    fn start(&self, num_cpus: Option<usize>) -> Result<()> {
        let mut running = self.running.write();
        if running.is_some() {
            return Ok(());
        }
        let mut nodes = vec![build_node(
            &self.config.head_address,
            num_cpus.unwrap_or(self.config.head_cpus),
        )?];
        for address in &self.config.worker_addresses {
            nodes.push(build_node(address, num_cpus.unwrap_or(self.config.worker_cpus))?);
        }
        info!("Local cluster started with {} nodes", nodes.len());
        *running = Some(Running {
            nodes,
            mailboxes: Mutex::new(HashMap::new()),
        });
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        // Dropping the mailboxes ends each actor loop; pools finish queued
        // tasks before their threads exit.
        if self.running.write().take().is_some() {
            info!("Local cluster stopped");
        }
        Ok(())
    }

    fn driver_address(&self) -> Result<String> {
        Ok(self.config.head_address.clone())
    }

    fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let running = self.running.read();
        let running = running.as_ref().ok_or(ComputeError::NotInitialized)?;
        Ok(running.nodes.iter().map(|n| n.info.clone()).collect())
    }

    fn submit(&self, task: TaskSpec) -> Result<ObjectRef> {
        let running = self.running.read();
        let running = running.as_ref().ok_or(ComputeError::NotInitialized)?;
        let node = &running.nodes[self.place(&running.nodes, &task.options)?];
        let output = self.object();
        debug!("task '{}' -> {} as {:?}", task.name, node.info.address, output);

        let deps: Vec<ObjectRef> = task.args.iter().filter_map(SchedulerHandle::object_ref).cloned().collect();
        let pool = node.pool.clone();
        let result = output.clone();
        when_all(deps, move || {
            pool.spawn(move || {
                let TaskSpec {
                    name, func, args, kwargs, ..
                } = task;
                let outcome = collect_args(args).and_then(|values| {
                    guarded(|| func.invoke(values, kwargs)).map_err(|e| ComputeError::remote(name.as_str(), e))
                });
                result.resolve(outcome);
            })
        });
        Ok(output)
    }

    fn spawn_actor(&self, spec: ActorSpec) -> Result<ActorId> {
        let running = self.running.read();
        let running = running.as_ref().ok_or(ComputeError::NotInitialized)?;
        let address = running.nodes[self.place(&running.nodes, &spec.options)?].info.address.clone();
        let id = ActorId(self.next_actor.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = flume::unbounded();
        let thread_address = address.clone();
        std::thread::Builder::new()
            .name(format!("{}-actor-{}", address, id.0))
            .spawn(move || {
                enter_node(&thread_address);
                actor_loop(spec, rx);
            })
            .map_err(|e| ComputeError::Unschedulable(format!("cannot start actor on {}: {}", address, e)))?;
        running.mailboxes.lock().insert(id, tx);
        debug!("actor {:?} placed on {}", id, address);
        Ok(id)
    }

    fn submit_actor_method(
        &self,
        actor: ActorId,
        method: &str,
        args: Vec<SchedulerHandle>,
        kwargs: Kwargs,
    ) -> Result<ObjectRef> {
        let running = self.running.read();
        let running = running.as_ref().ok_or(ComputeError::NotInitialized)?;
        let output = self.object();
        let mailboxes = running.mailboxes.lock();
        let mailbox = mailboxes
            .get(&actor)
            .ok_or_else(|| ComputeError::Unregistered(format!("actor {}", actor.0)))?;
        mailbox
            .send(ActorMessage {
                method: method.to_string(),
                args,
                kwargs,
                output: output.clone(),
            })
            .map_err(|_| ComputeError::Communication(format!("actor {} has stopped", actor.0)))?;
        Ok(output)
    }
}
