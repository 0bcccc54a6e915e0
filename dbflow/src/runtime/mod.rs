//! The step-driven runtime.
//!
//! A runtime owns a frozen [`CircuitDefinition`] and drives it one step at a
//! time: advance the logical clocks, drain the input handles into carriers,
//! execute every operator in dependency order, publish to the output
//! handles, and periodically run maintenance (compaction of layered Z-sets).
//!
//! The state machine is `Created → Running ↔ Paused → Terminated`, with a
//! terminal `Failed` holding the first error. An operator failure poisons the
//! runtime: later steps return the stored error without side effects.
//! `terminate` is infallible and idempotent.
//!
//! Stateful operators (`integrate`, `delay`) keep their state in the runtime,
//! not the circuit, which is what keeps definitions immutable and lets
//! checkpoints serialize operator state by node id.

pub mod parallel;

pub use parallel::ParallelRuntime;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::algebra::{Abelian, Monoid, Semigroup, Weight};
use crate::checkpoint::CheckpointManager;
use crate::circuit::handle::{InputFeed, InputHandle, OutputHandle, OutputPort};
use crate::circuit::{CircuitDefinition, NodeId, OperatorKind};
use crate::codec::{BinCodec, Codec};
use crate::error::{Error, Result};
use crate::wal::{Wal, WalRecord};
use crate::zset::{ZSet, ZSetConfig};
use crate::Data;

/// Tuning and wiring for a runtime.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Worker threads for the parallel runtime; 0 means one per CPU.
    pub worker_threads: usize,
    /// Cadence of autonomous stepping in [`Runtime::run_for`].
    pub step_interval: Duration,
    /// Capacity of input and output handle queues.
    pub max_buffer_size: usize,
    /// Create a checkpoint at every epoch end.
    pub enable_checkpointing: bool,
    /// Base directory for the WAL and checkpoints; `None` disables both.
    pub storage_path: Option<PathBuf>,
    /// Run maintenance every this many steps; 0 disables.
    pub maintenance_cadence: u64,
    /// Deadline for one parallel step.
    pub step_timeout: Duration,
    /// Representation used for carriers and operator state.
    pub zset: ZSetConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: 0,
            step_interval: Duration::from_millis(100),
            max_buffer_size: 1000,
            enable_checkpointing: false,
            storage_path: None,
            maintenance_cadence: 100,
            step_timeout: Duration::from_secs(30),
            zset: ZSetConfig::default(),
        }
    }
}

/// Where a runtime is in its lifecycle.
#[derive(Clone, Debug)]
pub enum RuntimeState {
    /// Built, not yet started.
    Created,
    /// Accepting steps.
    Running,
    /// Started, then paused; may resume.
    Paused,
    /// Shut down; terminal.
    Terminated,
    /// Poisoned by an error; terminal.
    Failed(Arc<Error>),
}

impl RuntimeState {
    /// True while steps are accepted.
    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeState::Running)
    }

    /// True in either terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RuntimeState::Terminated | RuntimeState::Failed(_))
    }
}

/// Executes one operator against its inputs and prior state.
///
/// Returns the output carrier and, for stateful operators, the replacement
/// state. `scratch` is a reusable pair buffer for the fused per-key paths.
pub(crate) fn evaluate<T: Data>(
    kind: &OperatorKind<T>,
    inputs: &[&ZSet<T>],
    state: Option<&ZSet<T>>,
    clock: i64,
    scratch: &mut Vec<(T, Weight)>,
) -> (ZSet<T>, Option<ZSet<T>>) {
    let first = |inputs: &[&ZSet<T>]| -> ZSet<T> {
        inputs.first().map(|z| (*z).clone()).unwrap_or_default()
    };
    match kind {
        OperatorKind::Input => (first(inputs), None),
        OperatorKind::Map(transform) => (inputs[0].map(|k| transform(k)), None),
        OperatorKind::Filter(predicate) => (inputs[0].filter(|k| predicate(k)), None),
        OperatorKind::FilterMap { predicate, transform } => {
            scratch.clear();
            for (key, weight) in inputs[0].pairs() {
                if predicate(&key) {
                    scratch.push((transform(&key), weight));
                }
            }
            let mut output = ZSet::with_backend(inputs[0].backend());
            output.extend(scratch.drain(..));
            (output, None)
        }
        OperatorKind::MapFilter { transform, predicate } => {
            scratch.clear();
            for (key, weight) in inputs[0].pairs() {
                let mapped = transform(&key);
                if predicate(&mapped) {
                    scratch.push((mapped, weight));
                }
            }
            let mut output = ZSet::with_backend(inputs[0].backend());
            output.extend(scratch.drain(..));
            (output, None)
        }
        OperatorKind::Negate => (first(inputs).negated(), None),
        OperatorKind::Integrate => {
            let mut accumulated = state.cloned().unwrap_or_else(ZSet::zero);
            accumulated.plus_equals(inputs[0]);
            (accumulated.clone(), Some(accumulated))
        }
        OperatorKind::Delay => {
            let output = state.cloned().unwrap_or_else(ZSet::zero);
            (output, Some(inputs[0].clone()))
        }
        OperatorKind::Apply(function) => (function(inputs[0]), None),
        OperatorKind::Apply2(function) => (function(inputs[0], inputs[1]), None),
        OperatorKind::Inspect(callback) => {
            callback(clock, inputs[0]);
            (inputs[0].clone(), None)
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The single-threaded, cooperative runtime.
pub struct Runtime<T: Data> {
    pub(crate) circuit: CircuitDefinition<T>,
    pub(crate) config: RuntimeConfig,
    pub(crate) state: RuntimeState,
    pub(crate) step_count: u64,
    pub(crate) clocks: Vec<i64>,
    pub(crate) op_state: HashMap<NodeId, ZSet<T>>,
    pub(crate) carriers: HashMap<NodeId, ZSet<T>>,
    pub(crate) feeds: HashMap<String, InputFeed<T>>,
    pub(crate) ports: HashMap<String, OutputPort<T>>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) scratch: Vec<(T, Weight)>,
    epoch: i64,
    wal: Option<Wal>,
    checkpoints: Option<CheckpointManager>,
}

impl<T: Data> Runtime<T> {
    /// Wraps a circuit with fresh handles and, when configured, durability.
    pub fn new(circuit: CircuitDefinition<T>, config: RuntimeConfig) -> Result<Self> {
        let feeds = circuit
            .inputs()
            .iter()
            .map(|(name, &node)| {
                (name.clone(), InputFeed::new(node, name, config.max_buffer_size))
            })
            .collect();
        let ports = circuit
            .outputs()
            .iter()
            .map(|(name, &node)| {
                (name.clone(), OutputPort::new(node, name, config.max_buffer_size))
            })
            .collect();

        let (wal, checkpoints) = match &config.storage_path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                let wal = Wal::open(path.join("wal.log"))?;
                let checkpoints = CheckpointManager::new(path.clone())?;
                (Some(wal), Some(checkpoints))
            }
            None => (None, None),
        };

        let clocks = vec![0; circuit.scopes()];
        Ok(Runtime {
            circuit,
            config,
            state: RuntimeState::Created,
            step_count: 0,
            clocks,
            op_state: HashMap::new(),
            carriers: HashMap::new(),
            feeds,
            ports,
            cancel: Arc::new(AtomicBool::new(false)),
            scratch: Vec::new(),
            epoch: 0,
            wal,
            checkpoints,
        })
    }

    /// The wrapped circuit.
    pub fn circuit(&self) -> &CircuitDefinition<T> {
        &self.circuit
    }

    /// The lifecycle state.
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Steps taken so far.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// The logical clock of scope 0.
    pub fn clock(&self) -> i64 {
        self.clocks[0]
    }

    /// A writer for the named input.
    pub fn input_handle(&self, name: &str) -> Result<InputHandle<T>> {
        self.feeds
            .get(name)
            .map(InputFeed::handle)
            .ok_or_else(|| Error::Runtime(format!("no input handle named '{name}'")))
    }

    /// A reader for the named output.
    pub fn output_handle(&self, name: &str) -> Result<OutputHandle<T>> {
        self.ports
            .get(name)
            .map(OutputPort::handle)
            .ok_or_else(|| Error::Runtime(format!("no output handle named '{name}'")))
    }

    /// `Created | Paused → Running`.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            RuntimeState::Created | RuntimeState::Paused => {
                self.state = RuntimeState::Running;
                tracing::debug!(circuit = ?self.circuit.id(), "runtime running");
                Ok(())
            }
            ref other => Err(Error::Runtime(format!("cannot start while {other:?}"))),
        }
    }

    /// `Running → Paused`.
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            RuntimeState::Running => {
                self.state = RuntimeState::Paused;
                Ok(())
            }
            ref other => Err(Error::Runtime(format!("cannot pause while {other:?}"))),
        }
    }

    /// Shuts the runtime down. Infallible and idempotent.
    pub fn terminate(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if !self.state.is_terminal() {
            tracing::debug!(circuit = ?self.circuit.id(), "runtime terminated");
            self.state = RuntimeState::Terminated;
        }
    }

    /// A token observers may use to request cancellation.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub(crate) fn check_steppable(&self) -> Result<()> {
        match &self.state {
            RuntimeState::Running => {
                if self.cancel.load(Ordering::Relaxed) {
                    return Err(Error::Cancelled);
                }
                Ok(())
            }
            RuntimeState::Failed(cause) => Err(Error::Failed(Arc::clone(cause))),
            other => Err(Error::Runtime(format!("step while {other:?}"))),
        }
    }

    /// Advances clocks and drains the input feeds into fresh carriers.
    pub(crate) fn prepare_step(&mut self) -> HashMap<NodeId, ZSet<T>> {
        self.step_count += 1;
        for clock in self.clocks.iter_mut() {
            *clock = self.step_count as i64;
        }
        let mut carriers = HashMap::with_capacity(self.circuit.operator_count());
        for feed in self.feeds.values() {
            let mut delta = ZSet::with_config(self.config.zset);
            for queued in feed.drain() {
                delta.plus_equals(&queued);
            }
            carriers.insert(feed.node, delta);
        }
        carriers
    }

    /// Publishes outputs, stores carriers, and runs periodic maintenance.
    pub(crate) fn finish_step(&mut self, carriers: HashMap<NodeId, ZSet<T>>) {
        for port in self.ports.values() {
            if let Some(value) = carriers.get(&port.node) {
                port.publish(value.clone());
            }
        }
        self.carriers = carriers;

        let cadence = self.config.maintenance_cadence;
        if cadence > 0 && self.step_count % cadence == 0 {
            for state in self.op_state.values_mut() {
                state.maintain();
            }
            tracing::debug!(step = self.step_count, "runtime maintenance pass");
        }
    }

    pub(crate) fn fail(&mut self, error: Error) -> Error {
        let (cause, returned) = error.into_failed();
        tracing::error!(%cause, "runtime entered failed state");
        self.state = RuntimeState::Failed(cause);
        returned
    }

    /// Executes one step in dependency order.
    pub fn step(&mut self) -> Result<()> {
        self.check_steppable()?;
        let mut carriers = self.prepare_step();
        let clock = self.clocks[0];

        let empty = ZSet::with_config(self.config.zset);
        let order = self.circuit.order().to_vec();
        for node in order {
            let record =
                self.circuit.operators.get(&node).expect("scheduled node exists").clone();
            let inputs: Vec<&ZSet<T>> = match &record.kind {
                // Input carriers were seeded from the feeds.
                OperatorKind::Input => {
                    vec![carriers.get(&node).unwrap_or(&empty)]
                }
                _ => record.inputs.iter().map(|i| carriers.get(i).unwrap_or(&empty)).collect(),
            };
            let state = self.op_state.get(&node);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                evaluate(&record.kind, &inputs, state, clock, &mut self.scratch)
            }));
            match outcome {
                Ok((output, new_state)) => {
                    if let Some(new_state) = new_state {
                        self.op_state.insert(node, new_state);
                    }
                    carriers.insert(node, output);
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    let error = Error::Runtime(format!(
                        "operator '{}' ({}) panicked: {message}",
                        record.name, record.id
                    ));
                    return Err(self.fail(error));
                }
            }
        }

        self.finish_step(carriers);
        Ok(())
    }

    /// Runs `count` consecutive steps.
    pub fn run_steps(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.step()?;
        }
        Ok(())
    }

    /// Steps autonomously at the configured interval until `duration` passes.
    pub fn run_for(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.step()?;
            std::thread::sleep(self.config.step_interval);
        }
        Ok(())
    }

    /// The most recent carrier value of `node`, if it has executed.
    pub fn carrier(&self, node: NodeId) -> Option<&ZSet<T>> {
        self.carriers.get(&node)
    }

    /// The internal state of a stateful operator.
    pub fn operator_state(&self, node: NodeId) -> Option<&ZSet<T>> {
        self.op_state.get(&node)
    }

    /// The current epoch counter.
    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// The write-ahead log, when a storage path is configured.
    pub fn wal(&self) -> Option<&Wal> {
        self.wal.as_ref()
    }
}

impl<T: Data + Serialize + DeserializeOwned> Runtime<T> {
    /// Opens a new epoch, recording it in the WAL when one is configured.
    pub fn begin_epoch(&mut self) -> Result<i64> {
        self.epoch += 1;
        if let Some(wal) = &self.wal {
            wal.append(&WalRecord::BeginEpoch(self.epoch))?;
        }
        Ok(self.epoch)
    }

    /// Closes the current epoch; checkpoints when configured to.
    pub fn end_epoch(&mut self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.append(&WalRecord::EndEpoch(self.epoch))?;
        }
        if self.config.enable_checkpointing {
            self.create_checkpoint(&format!("epoch-{}", self.epoch))?;
        }
        Ok(())
    }

    /// Serializes every stateful operator's state into a named checkpoint.
    pub fn create_checkpoint(&mut self, name: &str) -> Result<()> {
        let manager = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| Error::Runtime("checkpointing requires a storage path".into()))?;
        let codec = BinCodec;
        let mut states = Vec::new();
        for node in self.circuit.stateful_nodes() {
            let pairs = self
                .op_state
                .get(&node)
                .map(|state| state.pairs())
                .unwrap_or_default();
            states.push((node, codec.serialize(&pairs)?));
        }
        manager.create(self.circuit.id(), self.epoch, name, &states)?;
        if let Some(wal) = &self.wal {
            wal.append(&WalRecord::CheckpointCreated {
                epoch: self.epoch,
                name: name.to_string(),
            })?;
        }
        tracing::info!(epoch = self.epoch, name, "checkpoint created");
        Ok(())
    }

    /// Restores stateful operators from the checkpoint taken at `epoch`.
    pub fn restore_checkpoint(&mut self, epoch: i64) -> Result<()> {
        let manager = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| Error::Runtime("checkpointing requires a storage path".into()))?;
        let codec = BinCodec;
        let (manifest, states) = manager.restore(epoch)?;
        for (node, bytes) in states {
            if self.circuit.operator(node).is_some() {
                let pairs: Vec<(T, Weight)> = codec.deserialize(&bytes)?;
                let mut state = ZSet::with_config(self.config.zset);
                state.extend(pairs);
                self.op_state.insert(node, state);
            }
        }
        self.epoch = manifest.epoch;
        if let Some(wal) = &self.wal {
            wal.append(&WalRecord::RestoredFromCheckpoint {
                epoch: manifest.epoch,
                name: manifest.name.clone(),
            })?;
        }
        tracing::info!(epoch = manifest.epoch, name = %manifest.name, "checkpoint restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;

    fn identity_runtime() -> (Runtime<u64>, InputHandle<u64>, OutputHandle<u64>) {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        builder.add_output(&input, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();
        let handle = runtime.input_handle("src").unwrap();
        let output = runtime.output_handle("out").unwrap();
        (runtime, handle, output)
    }

    #[test]
    fn step_moves_deltas_to_outputs() {
        let (mut runtime, input, output) = identity_runtime();
        input.send(ZSet::from_pairs(vec![(1, 1), (2, 2)])).unwrap();
        runtime.step().unwrap();
        assert_eq!(output.current_value().unwrap().pairs(), vec![(1, 1), (2, 2)]);
        assert_eq!(runtime.clock(), 1);
    }

    #[test]
    fn filter_map_pipeline() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let evens = builder.filter(&input, "evens", |x| x % 2 == 0).unwrap();
        let doubled = builder.map(&evens, "double", |x| x * 2).unwrap();
        builder.add_output(&doubled, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();

        runtime
            .input_handle("src")
            .unwrap()
            .send(ZSet::from_pairs(vec![(1, 1), (2, 1), (4, 3)]))
            .unwrap();
        runtime.step().unwrap();
        let out = runtime.output_handle("out").unwrap().current_value().unwrap();
        assert_eq!(out.pairs(), vec![(4, 1), (8, 3)]);
    }

    #[test]
    fn integrate_accumulates_across_steps() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let total = builder.integrate(&input, "total").unwrap();
        builder.add_output(&total, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();
        let handle = runtime.input_handle("src").unwrap();
        let output = runtime.output_handle("out").unwrap();

        handle.send(ZSet::from_pairs(vec![(7, 1)])).unwrap();
        runtime.step().unwrap();
        assert_eq!(output.current_value().unwrap().pairs(), vec![(7, 1)]);

        handle.send(ZSet::from_pairs(vec![(7, 2), (8, 1)])).unwrap();
        runtime.step().unwrap();
        assert_eq!(output.current_value().unwrap().pairs(), vec![(7, 3), (8, 1)]);

        // An empty step leaves the integral unchanged.
        runtime.step().unwrap();
        assert_eq!(output.current_value().unwrap().pairs(), vec![(7, 3), (8, 1)]);
    }

    #[test]
    fn delay_shifts_by_one_step() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let delayed = builder.delay(&input, "z1").unwrap();
        builder.add_output(&delayed, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();
        let handle = runtime.input_handle("src").unwrap();
        let output = runtime.output_handle("out").unwrap();

        handle.send(ZSet::from_pairs(vec![(1, 1)])).unwrap();
        runtime.step().unwrap();
        assert!(output.current_value().unwrap().is_empty());

        runtime.step().unwrap();
        assert_eq!(output.current_value().unwrap().pairs(), vec![(1, 1)]);
    }

    #[test]
    fn join_via_apply2() {
        type Row = (u64, i64);
        let mut builder: CircuitBuilder<Row> = CircuitBuilder::new();
        let left = builder.add_input("left").unwrap();
        let right = builder.add_input("right").unwrap();
        let joined = builder
            .join_with(
                &left,
                &right,
                "sum_join",
                |(k, v): &Row| (*k, *v),
                |(k, v): &Row| (*k, *v),
                |k, lv, rv| (*k, lv + rv),
            )
            .unwrap();
        builder.add_output(&joined, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();

        runtime
            .input_handle("left")
            .unwrap()
            .send(ZSet::from_pairs(vec![((1, 10), 1), ((2, 20), 1)]))
            .unwrap();
        runtime
            .input_handle("right")
            .unwrap()
            .send(ZSet::from_pairs(vec![((1, 5), 2), ((3, 9), 1)]))
            .unwrap();
        runtime.step().unwrap();
        let out = runtime.output_handle("out").unwrap().current_value().unwrap();
        assert_eq!(out.pairs(), vec![((1, 15), 2)]);
    }

    #[test]
    fn step_requires_running_state() {
        let (mut runtime, _input, _output) = identity_runtime();
        runtime.pause().unwrap();
        assert!(matches!(runtime.step(), Err(Error::Runtime(_))));
        runtime.start().unwrap();
        runtime.step().unwrap();
    }

    #[test]
    fn operator_panic_poisons_runtime() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let bad = builder
            .map(&input, "bad", |x| if *x == 13 { panic!("unlucky") } else { *x })
            .unwrap();
        builder.add_output(&bad, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();
        let handle = runtime.input_handle("src").unwrap();

        handle.send(ZSet::from_pairs(vec![(13, 1)])).unwrap();
        assert!(matches!(runtime.step(), Err(Error::Runtime(_))));
        assert!(matches!(runtime.state(), RuntimeState::Failed(_)));
        // Subsequent steps return the stored failure without executing.
        assert!(matches!(runtime.step(), Err(Error::Failed(_))));
    }

    #[test]
    fn terminate_is_idempotent() {
        let (mut runtime, _input, _output) = identity_runtime();
        runtime.terminate();
        runtime.terminate();
        assert!(matches!(runtime.state(), RuntimeState::Terminated));
        assert!(matches!(runtime.step(), Err(Error::Runtime(_))));
    }

    #[test]
    fn inspect_sees_the_clock() {
        use std::sync::atomic::{AtomicI64, Ordering};
        let seen = Arc::new(AtomicI64::new(0));
        let seen_in_op = Arc::clone(&seen);

        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let watched = builder
            .inspect(&input, "watch", move |clock, _| {
                seen_in_op.store(clock, Ordering::Relaxed);
            })
            .unwrap();
        builder.add_output(&watched, "out").unwrap();
        let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
        runtime.start().unwrap();
        runtime.run_steps(3).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }
}
