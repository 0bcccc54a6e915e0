//! An incremental view-maintenance engine based on DBSP.
//!
//! `dbflow` processes *changes* to relational inputs and produces *changes*
//! to derived outputs, rather than recomputing from scratch. Every change is
//! a [`ZSet`]: a finite map from elements to non-zero signed weights.
//! Z-sets form an abelian group, which is what makes delta propagation
//! compositional — inserting, deleting, and updating are all just addition.
//!
//! The main moving parts:
//!
//! * [`zset`] — the adaptive multi-backend Z-set, the universal container of
//!   change, and [`indexed`] for the by-key form joins and group-bys need.
//! * [`trace`] — sorted batches layered log-structured, with budgeted
//!   compaction; the spine behind the larger Z-set representations.
//! * [`circuit`] — the static dataflow graph: builder, scheduler, optimizer,
//!   and the bounded input/output handles.
//! * [`runtime`] — the step loop (single-threaded and worker-pool variants)
//!   that drives operators in dependency order.
//! * [`storage`] — an abstract ordered KV contract with Z-set, hybrid, and
//!   temporal layers above it.
//! * [`wal`] and [`checkpoint`] — CRC-framed durability primitives.
//!
//! A minimal flow: build a circuit, run it, feed deltas.
//!
//! ```
//! use dbflow::circuit::CircuitBuilder;
//! use dbflow::runtime::{Runtime, RuntimeConfig};
//! use dbflow::zset::ZSet;
//!
//! let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
//! let input = builder.add_input("numbers")?;
//! let evens = builder.filter(&input, "evens", |n| n % 2 == 0)?;
//! let doubled = builder.map(&evens, "doubled", |n| n * 2)?;
//! builder.add_output(&doubled, "out")?;
//!
//! let mut runtime = Runtime::new(builder.build()?, RuntimeConfig::default())?;
//! runtime.start()?;
//!
//! runtime.input_handle("numbers")?.send(ZSet::from_pairs(vec![(1, 1), (2, 1)]))?;
//! runtime.step()?;
//! assert_eq!(
//!     runtime.output_handle("out")?.current_value().unwrap().pairs(),
//!     vec![(4, 1)],
//! );
//! # Ok::<(), dbflow::Error>(())
//! ```

pub mod algebra;
pub mod checkpoint;
pub mod circuit;
pub mod codec;
pub mod consolidation;
pub mod delta;
pub mod error;
pub mod indexed;
pub mod storage;
pub mod stream;
pub mod trace;
pub mod wal;
pub mod zset;

pub mod runtime;

pub use algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};
pub use circuit::{CircuitBuilder, CircuitDefinition, GlobalNodeId, NodeId};
pub use delta::DeltaBuilder;
pub use error::{Error, Result};
pub use indexed::IndexedZSet;
pub use runtime::{ParallelRuntime, Runtime, RuntimeConfig};
pub use stream::Stream;
pub use zset::{Backend, ZSet, ZSetConfig};

use std::fmt::Debug;
use std::hash::Hash;

/// The bound every circuit element type satisfies.
///
/// Total order and equality for batches and indexes, hashing for the hash
/// backends, and `Send + Sync` so carriers may cross worker threads.
pub trait Data: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Ord + Hash + Debug + Send + Sync + 'static> Data for T {}
