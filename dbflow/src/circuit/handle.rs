//! Input and output handles: the runtime's external surface.
//!
//! Handles wrap bounded channels. Producers push Z-set deltas into an
//! [`InputHandle`]; the runtime drains them at each step. The runtime pushes
//! step results through an output port, and consumers observe them with an
//! [`OutputHandle`], which additionally caches the most recently published
//! value for polling-style access.
//!
//! Senders are clonable (multi-writer) and receivers are clonable
//! (multi-reader); the queues are bounded, so a slow consumer applies
//! backpressure to `send` while `publish` prefers dropping queue entries
//! over blocking the step loop (the cache always reflects the latest value).

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::circuit::NodeId;
use crate::error::{Error, Result};
use crate::zset::ZSet;

/// Default bound for handle queues.
pub const DEFAULT_HANDLE_CAPACITY: usize = 1000;

/// A writer of deltas into a named circuit input.
pub struct InputHandle<T> {
    node: NodeId,
    name: String,
    sender: Sender<ZSet<T>>,
}

impl<T> Clone for InputHandle<T> {
    fn clone(&self) -> Self {
        InputHandle { node: self.node, name: self.name.clone(), sender: self.sender.clone() }
    }
}

impl<T> InputHandle<T> {
    /// The node backing this input.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The handle's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a delta, blocking while the queue is full.
    ///
    /// Fails with a runtime error once the reader side is gone.
    pub fn send(&self, delta: ZSet<T>) -> Result<()> {
        self.sender
            .send(delta)
            .map_err(|_| Error::Runtime(format!("input handle '{}' is closed", self.name)))
    }

    /// Closes the writer side. Queued deltas remain readable.
    pub fn complete(self) {
        drop(self);
    }
}

/// The runtime-side reader paired with [`InputHandle`]s.
pub(crate) struct InputFeed<T> {
    pub(crate) node: NodeId,
    pub(crate) name: String,
    pub(crate) receiver: Receiver<ZSet<T>>,
    pub(crate) sender: Sender<ZSet<T>>,
}

impl<T> InputFeed<T> {
    pub(crate) fn new(node: NodeId, name: &str, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        InputFeed { node, name: name.to_string(), receiver, sender }
    }

    pub(crate) fn handle(&self) -> InputHandle<T> {
        InputHandle { node: self.node, name: self.name.clone(), sender: self.sender.clone() }
    }

    /// Drains every queued delta.
    pub(crate) fn drain(&self) -> Vec<ZSet<T>> {
        let mut drained = Vec::new();
        while let Ok(delta) = self.receiver.try_recv() {
            drained.push(delta);
        }
        drained
    }
}

/// A reader of values published at a named circuit output.
pub struct OutputHandle<T> {
    node: NodeId,
    name: String,
    receiver: Receiver<ZSet<T>>,
    current: Arc<Mutex<Option<ZSet<T>>>>,
}

impl<T> Clone for OutputHandle<T> {
    fn clone(&self) -> Self {
        OutputHandle {
            node: self.node,
            name: self.name.clone(),
            receiver: self.receiver.clone(),
            current: Arc::clone(&self.current),
        }
    }
}

impl<T: Clone> OutputHandle<T> {
    /// The node feeding this output.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The handle's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The next published value, if one is queued.
    pub fn try_recv(&self) -> Option<ZSet<T>> {
        self.receiver.try_recv().ok()
    }

    /// The most recently published value, if any step has published.
    pub fn current_value(&self) -> Option<ZSet<T>> {
        self.current.lock().clone()
    }
}

/// The runtime-side writer paired with [`OutputHandle`]s.
pub(crate) struct OutputPort<T> {
    pub(crate) node: NodeId,
    pub(crate) name: String,
    sender: Sender<ZSet<T>>,
    receiver: Receiver<ZSet<T>>,
    current: Arc<Mutex<Option<ZSet<T>>>>,
}

impl<T: Clone> OutputPort<T> {
    pub(crate) fn new(node: NodeId, name: &str, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        OutputPort {
            node,
            name: name.to_string(),
            sender,
            receiver,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn handle(&self) -> OutputHandle<T> {
        OutputHandle {
            node: self.node,
            name: self.name.clone(),
            receiver: self.receiver.clone(),
            current: Arc::clone(&self.current),
        }
    }

    /// Publishes a step result: updates the cache, then enqueues.
    ///
    /// When the queue is full the oldest entry is discarded in favor of the
    /// new one; the cache always holds the latest value regardless.
    pub(crate) fn publish(&self, value: ZSet<T>) {
        *self.current.lock() = Some(value.clone());
        match self.sender.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(value)) => {
                let _ = self.receiver.try_recv();
                let _ = self.sender.try_send(value);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
