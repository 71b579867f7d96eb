//! Implementations of [OwnedTape], [NoneTape], and the gradient container
//! [Gradients].
#![allow(clippy::type_complexity)]

use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::Error;
use crate::unique_id::{unique_id, HasUniqueId, UniqueId};

/// A generic container for keeping gradients of tensors keyed by the
/// tensor's [UniqueId].
///
/// Every buffer carries a leading *cotangent axis* of length
/// [Gradients::num_cotangents]. A plain reverse pass uses one cotangent row,
/// a vector-Jacobian product seeded with `k` rows produces `k` gradient rows
/// for every tensor the pass reaches.
///
/// The container also keeps track of how many bytes of gradient buffers are
/// alive, and the peak of that number over the reverse pass.
#[derive(Clone, Debug)]
pub struct Gradients {
    gradient_by_id: HashMap<UniqueId, ArrayD<f32>>,
    num_cotangents: usize,
    live_bytes: usize,
    pending_free: usize,
    peak_bytes: usize,
}

fn num_bytes(a: &ArrayD<f32>) -> usize {
    a.len() * std::mem::size_of::<f32>()
}

impl Gradients {
    /// Creates an empty container whose buffers have `num_cotangents` rows.
    pub fn new(num_cotangents: usize) -> Self {
        Self {
            gradient_by_id: Default::default(),
            num_cotangents,
            live_bytes: 0,
            pending_free: 0,
            peak_bytes: 0,
        }
    }

    /// Number of cotangent rows every buffer carries.
    pub fn num_cotangents(&self) -> usize {
        self.num_cotangents
    }

    /// Largest number of bytes held by gradient buffers at any one time.
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Bytes currently held by gradient buffers.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    fn track_alloc(&mut self, bytes: usize) {
        self.live_bytes += bytes;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);
    }

    /// Inserts a full buffer (with the cotangent axis) for `id`.
    ///
    /// **Panics** if the leading axis is not `num_cotangents` long. This
    /// indicates an unrecoverable bug in the caller.
    pub(crate) fn insert(&mut self, id: UniqueId, grad: ArrayD<f32>) {
        assert_eq!(grad.shape()[0], self.num_cotangents);
        self.track_alloc(num_bytes(&grad));
        if let Some(old) = self.gradient_by_id.insert(id, grad) {
            self.live_bytes -= num_bytes(&old);
        }
    }

    /// Retrieves mutable gradient for `id`, allocating zeros of shape
    /// `(num_cotangents,) + shape` if it isn't present.
    pub(crate) fn get_or_alloc_mut(&mut self, id: UniqueId, shape: &[usize]) -> &mut ArrayD<f32> {
        if !self.gradient_by_id.contains_key(&id) {
            let mut full = Vec::with_capacity(shape.len() + 1);
            full.push(self.num_cotangents);
            full.extend_from_slice(shape);
            let buf = ArrayD::zeros(IxDyn(&full));
            self.track_alloc(num_bytes(&buf));
            self.gradient_by_id.insert(id, buf);
        }
        self.gradient_by_id.get_mut(&id).unwrap()
    }

    /// Removes the gradient of an intermediate tensor so its producing op can
    /// propagate it. The bytes stay accounted for until [Gradients::settle].
    pub(crate) fn take(&mut self, id: UniqueId) -> Option<ArrayD<f32>> {
        let grad = self.gradient_by_id.remove(&id)?;
        self.pending_free += num_bytes(&grad);
        Some(grad)
    }

    /// Releases the bytes of every buffer taken since the last call.
    pub(crate) fn settle(&mut self) {
        self.live_bytes -= self.pending_free;
        self.pending_free = 0;
    }

    /// Returns the full buffer (with the leading cotangent axis) of `t`.
    pub fn get_rows<T: HasUniqueId>(&self, t: &T) -> Option<&ArrayD<f32>> {
        self.gradient_by_id.get(t.id())
    }

    /// Like [Gradients::get_rows] but errors if `t` was never reached.
    pub fn try_get_rows<T: HasUniqueId>(&self, t: &T) -> Result<&ArrayD<f32>, Error> {
        self.get_rows(t).ok_or(Error::MissingGradient(*t.id()))
    }

    /// The gradient of `t` for a single-cotangent pass, shaped like `t`.
    pub fn get<T: HasUniqueId>(&self, t: &T) -> Result<ArrayViewD<'_, f32>, Error> {
        if self.num_cotangents != 1 {
            return Err(Error::ShapeMismatch {
                op: "Gradients::get",
                lhs: vec![self.num_cotangents],
                rhs: vec![1],
            });
        }
        Ok(self.try_get_rows(t)?.index_axis(Axis(0), 0))
    }
}

type BackwardOp = Box<dyn Fn(&mut Gradients) -> Result<(), Error>>;

/// Contains a list of backward operations.
///
/// Operations are `Fn`, not `FnOnce`: the same tape can be run in reverse
/// any number of times, each time into a fresh [Gradients].
#[derive(Default)]
pub struct OwnedTape {
    /// A list of (Time, BackwardOp) pairs, kept sorted by Time so that ops
    /// from merged tapes run in the right order.
    pub(crate) operations: Vec<(UniqueId, BackwardOp)>,
}

impl std::fmt::Debug for OwnedTape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedTape")
            .field("num_operations", &self.operations.len())
            .finish()
    }
}

impl OwnedTape {
    pub fn num_ops(&self) -> usize {
        self.operations.len()
    }

    /// Runs every backward op, newest first, against `grads`.
    pub(crate) fn execute(&self, grads: &mut Gradients) -> Result<(), Error> {
        for (_, operation) in self.operations.iter().rev() {
            (operation)(grads)?;
            grads.settle();
        }
        Ok(())
    }
}

/// Contains nothing. When [Tape::add_backward_op] is called, this struct does nothing.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoneTape;

/// Something that can track backward operations.
pub trait Tape: Default + std::fmt::Debug + Merge<Self> + Merge<NoneTape> {
    /// Whether this object is currently tracking gradients. This is known at compile time.
    const OWNS_TAPE: bool;
    fn add_backward_op<F>(&mut self, operation: F)
    where
        F: 'static + Fn(&mut Gradients) -> Result<(), Error>;
}

impl Tape for OwnedTape {
    const OWNS_TAPE: bool = true;
    fn add_backward_op<F>(&mut self, operation: F)
    where
        F: 'static + Fn(&mut Gradients) -> Result<(), Error>,
    {
        self.operations.push((unique_id(), Box::new(operation)));
    }
}

impl Tape for NoneTape {
    const OWNS_TAPE: bool = false;
    fn add_backward_op<F>(&mut self, _: F)
    where
        F: 'static + Fn(&mut Gradients) -> Result<(), Error>,
    {
    }
}

/// Combine two things
pub trait Merge<T: ?Sized> {
    /// Merges `T` into `self`
    fn merge(self, other: T) -> Self;
}

impl Merge<NoneTape> for NoneTape {
    fn merge(self, _: NoneTape) -> Self {
        self
    }
}

impl Merge<NoneTape> for OwnedTape {
    fn merge(self, _: NoneTape) -> Self {
        self
    }
}

impl Merge<OwnedTape> for OwnedTape {
    fn merge(mut self, mut other: Self) -> Self {
        self.operations.append(&mut other.operations);
        self.operations.sort_by_key(|(k, _)| *k);
        self
    }
}
