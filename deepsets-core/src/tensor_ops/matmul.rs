use ndarray::{s, Ix2, IxDyn};

use super::{shape_mismatch, with_cotangent_axis};
use crate::{
    error::Error,
    gradients::{NoneTape, Tape},
    tensor::Tensor,
};

impl<T: Tape> Tensor<T> {
    /// Contracts the last axis of `self` with the second axis of `weight`,
    /// i.e. `y = x · weightᵀ`.
    ///
    /// `self` has shape `(..., I)`, `weight` has shape `(O, I)`, the result
    /// has shape `(..., O)`, so a layer's weight applies the same way to
    /// walkers, particles of walkers, or single vectors.
    pub fn try_matmul_transposed(self, weight: &Tensor) -> Result<Self, Error> {
        let x_shape = self.shape().to_vec();
        let w_shape = weight.shape().to_vec();
        if w_shape.len() != 2 || x_shape.is_empty() || x_shape[x_shape.len() - 1] != w_shape[1] {
            return Err(shape_mismatch("matmul_transposed", &x_shape, &w_shape));
        }
        let (o, i) = (w_shape[0], w_shape[1]);
        let rows: usize = x_shape[..x_shape.len() - 1].iter().product();
        let mut out_shape = x_shape[..x_shape.len() - 1].to_vec();
        out_shape.push(o);

        let w_data = weight.data.clone();
        let y = {
            let x2 = self
                .data
                .to_shape((rows, i))
                .map_err(|_| shape_mismatch("matmul_transposed", &x_shape, &[rows, i]))?;
            let w2 = w_data
                .view()
                .into_dimensionality::<Ix2>()
                .map_err(|_| shape_mismatch("matmul_transposed", &w_shape, &[o, i]))?;
            x2.dot(&w2.t())
                .into_shape(IxDyn(&out_shape))
                .map_err(|_| shape_mismatch("matmul_transposed", &[rows, o], &out_shape))?
        };

        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, w_id, out_id) = (x.id, weight.id, result.id);
        let x_data = x.data.clone();

        tape.add_backward_op(move |grads| {
            let Some(grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            let k = grads.num_cotangents();
            let g2 = grad_out
                .to_shape((k * rows, o))
                .map_err(|_| shape_mismatch("matmul_transposed", grad_out.shape(), &[k * rows, o]))?;
            let w2 = w_data
                .view()
                .into_dimensionality::<Ix2>()
                .map_err(|_| shape_mismatch("matmul_transposed", w_data.shape(), &[o, i]))?;
            let x2 = x_data
                .to_shape((rows, i))
                .map_err(|_| shape_mismatch("matmul_transposed", x_data.shape(), &[rows, i]))?;

            let grad_x = g2
                .dot(&w2)
                .into_shape(IxDyn(&with_cotangent_axis(k, x_data.shape())))
                .map_err(|_| shape_mismatch("matmul_transposed", &[k * rows, i], x_data.shape()))?;
            *grads.get_or_alloc_mut(x_id, x_data.shape()) += &grad_x;

            let grad_w = grads.get_or_alloc_mut(w_id, &[o, i]);
            for (row, mut grad_w_row) in grad_w.outer_iter_mut().enumerate() {
                let g_row = g2.slice(s![row * rows..(row + 1) * rows, ..]);
                grad_w_row += &g_row.t().dot(&x2);
            }
            Ok(())
        });

        Ok(result.put_tape(tape))
    }

    pub fn matmul_transposed(self, weight: &Tensor) -> Self {
        self.try_matmul_transposed(weight).unwrap()
    }
}
