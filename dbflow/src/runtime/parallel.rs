//! The worker-pool runtime.
//!
//! Operators whose dependencies are satisfied run concurrently: the circuit
//! is stratified into levels by data-edge depth, and each level is fanned out
//! to a fixed pool of long-lived worker threads over a ready queue. Workers
//! never share mutable state — each task carries clones of its input
//! carriers and moves the operator's own state in and out — so the only
//! coordination points are the two channels.
//!
//! A step waits for its outstanding tasks under a step-wide deadline. Worker
//! panics are caught and reported as runtime failures; a timeout likewise
//! poisons the runtime. Thread placement is left to the OS scheduler.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::algebra::Weight;
use crate::circuit::{CircuitDefinition, NodeId, OperatorKind};
use crate::error::{Error, Result};
use crate::runtime::{evaluate, panic_message, Runtime, RuntimeConfig, RuntimeState};
use crate::zset::ZSet;
use crate::Data;

struct Task<T> {
    node: NodeId,
    name: String,
    kind: OperatorKind<T>,
    inputs: Vec<ZSet<T>>,
    state: Option<ZSet<T>>,
    clock: i64,
}

enum TaskResult<T> {
    Done { node: NodeId, output: ZSet<T>, new_state: Option<ZSet<T>> },
    Panicked { node: NodeId, name: String, message: String },
}

struct WorkerPool<T> {
    task_tx: Option<Sender<Task<T>>>,
    result_rx: Receiver<TaskResult<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Data> WorkerPool<T> {
    fn new(threads: usize) -> Self {
        let (task_tx, task_rx) = unbounded::<Task<T>>();
        let (result_tx, result_rx) = unbounded::<TaskResult<T>>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let worker = std::thread::Builder::new()
                .name(format!("dbflow-worker-{index}"))
                .spawn(move || {
                    // Reused across tasks; the per-thread scratch cache.
                    let mut scratch: Vec<(T, Weight)> = Vec::new();
                    while let Ok(task) = task_rx.recv() {
                        let Task { node, name, kind, inputs, state, clock } = task;
                        let input_refs: Vec<&ZSet<T>> = inputs.iter().collect();
                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            evaluate(&kind, &input_refs, state.as_ref(), clock, &mut scratch)
                        }));
                        let result = match outcome {
                            Ok((output, new_state)) => TaskResult::Done { node, output, new_state },
                            Err(payload) => TaskResult::Panicked {
                                node,
                                name,
                                message: panic_message(payload),
                            },
                        };
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                })
                .expect("spawn worker thread");
            workers.push(worker);
        }

        WorkerPool { task_tx: Some(task_tx), result_rx, workers }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        // Closing the queue lets every worker drain and exit.
        self.task_tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Stratifies nodes by data-edge depth; every level only reads prior levels.
fn stratify<T: Data>(circuit: &CircuitDefinition<T>) -> Vec<Vec<NodeId>> {
    let mut depth: HashMap<NodeId, usize> = HashMap::new();
    for &node in circuit.order() {
        let level = circuit
            .dependencies(node)
            .iter()
            .map(|dep| depth[dep] + 1)
            .max()
            .unwrap_or(0);
        depth.insert(node, level);
    }
    let max_level = depth.values().copied().max().map(|d| d + 1).unwrap_or(0);
    let mut levels = vec![Vec::new(); max_level];
    for &node in circuit.order() {
        levels[depth[&node]].push(node);
    }
    levels
}

/// A runtime executing each step across a pool of worker threads.
pub struct ParallelRuntime<T: Data> {
    runtime: Runtime<T>,
    levels: Vec<Vec<NodeId>>,
    pool: WorkerPool<T>,
}

impl<T: Data> ParallelRuntime<T> {
    /// Wraps a circuit with a worker pool sized from the configuration.
    pub fn new(circuit: CircuitDefinition<T>, config: RuntimeConfig) -> Result<Self> {
        let threads = if config.worker_threads == 0 {
            num_cpus::get()
        } else {
            config.worker_threads
        };
        let runtime = Runtime::new(circuit, config)?;
        let levels = stratify(&runtime.circuit);
        tracing::debug!(threads, levels = levels.len(), "parallel runtime ready");
        Ok(ParallelRuntime { runtime, levels, pool: WorkerPool::new(threads) })
    }

    /// The underlying runtime, for state inspection and handles.
    pub fn runtime(&self) -> &Runtime<T> {
        &self.runtime
    }

    /// See [`Runtime::start`].
    pub fn start(&mut self) -> Result<()> {
        self.runtime.start()
    }

    /// See [`Runtime::pause`].
    pub fn pause(&mut self) -> Result<()> {
        self.runtime.pause()
    }

    /// See [`Runtime::terminate`].
    pub fn terminate(&mut self) {
        self.runtime.terminate();
    }

    /// See [`Runtime::state`].
    pub fn state(&self) -> &RuntimeState {
        self.runtime.state()
    }

    /// A writer for the named input.
    pub fn input_handle(&self, name: &str) -> Result<crate::circuit::handle::InputHandle<T>> {
        self.runtime.input_handle(name)
    }

    /// A reader for the named output.
    pub fn output_handle(&self, name: &str) -> Result<crate::circuit::handle::OutputHandle<T>> {
        self.runtime.output_handle(name)
    }

    /// Executes one step, fanning each ready level out to the pool.
    pub fn step(&mut self) -> Result<()> {
        self.runtime.check_steppable()?;
        let mut carriers = self.runtime.prepare_step();
        let clock = self.runtime.clocks[0];
        let deadline = Instant::now() + self.runtime.config.step_timeout;
        let empty = ZSet::with_config(self.runtime.config.zset);

        let task_tx = self
            .pool
            .task_tx
            .as_ref()
            .ok_or_else(|| Error::Runtime("worker pool shut down".into()))?;

        for level in self.levels.iter() {
            if self.runtime.cancel.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }

            let mut outstanding = 0usize;
            for &node in level {
                let record = &self.runtime.circuit.operators[&node];
                let inputs: Vec<ZSet<T>> = match &record.kind {
                    OperatorKind::Input => {
                        vec![carriers.get(&node).cloned().unwrap_or_else(|| empty.clone())]
                    }
                    _ => record
                        .inputs
                        .iter()
                        .map(|i| carriers.get(i).cloned().unwrap_or_else(|| empty.clone()))
                        .collect(),
                };
                let task = Task {
                    node,
                    name: record.name.clone(),
                    kind: record.kind.clone(),
                    inputs,
                    state: self.runtime.op_state.remove(&node),
                    clock,
                };
                task_tx
                    .send(task)
                    .map_err(|_| Error::Runtime("worker pool disconnected".into()))?;
                outstanding += 1;
            }

            while outstanding > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.pool.result_rx.recv_timeout(remaining) {
                    Ok(TaskResult::Done { node, output, new_state }) => {
                        if let Some(state) = new_state {
                            self.runtime.op_state.insert(node, state);
                        }
                        carriers.insert(node, output);
                        outstanding -= 1;
                    }
                    Ok(TaskResult::Panicked { node, name, message }) => {
                        tracing::error!(%node, operator = %name, panic = %message, "worker fault");
                        let error = Error::Runtime(format!(
                            "operator '{name}' ({node}) panicked on a worker: {message}"
                        ));
                        return Err(self.runtime.fail(error));
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let timeout = self.runtime.config.step_timeout;
                        return Err(self.runtime.fail(Error::Timeout(timeout)));
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(self
                            .runtime
                            .fail(Error::Runtime("worker pool disconnected".into())));
                    }
                }
            }
        }

        self.runtime.finish_step(carriers);
        Ok(())
    }

    /// Runs `count` consecutive steps.
    pub fn run_steps(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.step()?;
        }
        Ok(())
    }
}
