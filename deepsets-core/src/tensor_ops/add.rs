use ndarray::{Axis, IxDyn};

use super::{shape_mismatch, with_cotangent_axis};
use crate::{
    error::Error,
    gradients::{Merge, NoneTape, Tape},
    tensor::Tensor,
};

impl<T: Tape> Tensor<T> {
    /// Adds `rhs`, whose shape must equal the trailing axes of `self`, to
    /// every leading index of `self`. A bias of shape `(O,)` added to a
    /// `(W, P, O)` batch is the typical use.
    pub fn try_broadcast_add(self, rhs: &Tensor) -> Result<Self, Error> {
        let x_shape = self.shape().to_vec();
        let b_shape = rhs.shape().to_vec();
        if b_shape.len() > x_shape.len() || x_shape[x_shape.len() - b_shape.len()..] != b_shape[..] {
            return Err(shape_mismatch("broadcast_add", &x_shape, &b_shape));
        }
        let rows: usize = x_shape[..x_shape.len() - b_shape.len()].iter().product();
        let cols: usize = b_shape.iter().product();

        let mut y = self.data.as_ref().clone();
        y += rhs.data.as_ref();

        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, b_id, out_id) = (x.id, rhs.id, result.id);

        tape.add_backward_op(move |grads| {
            let Some(grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            let k = grads.num_cotangents();
            let grad_b = grad_out
                .to_shape((k, rows, cols))
                .map_err(|_| shape_mismatch("broadcast_add", grad_out.shape(), &[k, rows, cols]))?
                .sum_axis(Axis(1))
                .into_shape(IxDyn(&with_cotangent_axis(k, &b_shape)))
                .map_err(|_| shape_mismatch("broadcast_add", &[k, cols], &b_shape))?;
            *grads.get_or_alloc_mut(b_id, &b_shape) += &grad_b;
            *grads.get_or_alloc_mut(x_id, &x_shape) += &grad_out;
            Ok(())
        });

        Ok(result.put_tape(tape))
    }

    pub fn broadcast_add(self, rhs: &Tensor) -> Self {
        self.try_broadcast_add(rhs).unwrap()
    }

    /// Elementwise sum of two tensors of the same shape. Both may carry a
    /// tape, the tapes are merged into the result.
    pub fn try_add<R: Tape>(self, rhs: Tensor<R>) -> Result<Self, Error>
    where
        T: Merge<R>,
    {
        if self.shape() != rhs.shape() {
            return Err(shape_mismatch("add", self.shape(), rhs.shape()));
        }
        let shape = self.shape().to_vec();
        let mut y = self.data.as_ref().clone();
        y += rhs.data.as_ref();

        let (lhs, lhs_tape) = self.split_tape();
        let (rhs, rhs_tape) = rhs.split_tape();
        let mut tape = lhs_tape.merge(rhs_tape);
        let result = Tensor::from_op(y, NoneTape);
        let (lhs_id, rhs_id, out_id) = (lhs.id, rhs.id, result.id);

        tape.add_backward_op(move |grads| {
            let Some(grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            *grads.get_or_alloc_mut(lhs_id, &shape) += &grad_out;
            *grads.get_or_alloc_mut(rhs_id, &shape) += &grad_out;
            Ok(())
        });

        Ok(result.put_tape(tape))
    }

    pub fn add<R: Tape>(self, rhs: Tensor<R>) -> Self
    where
        T: Merge<R>,
    {
        self.try_add(rhs).unwrap()
    }
}
