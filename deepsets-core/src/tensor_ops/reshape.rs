use ndarray::IxDyn;

use super::{shape_mismatch, with_cotangent_axis};
use crate::{
    error::Error,
    gradients::{NoneTape, Tape},
    tensor::Tensor,
};

impl<T: Tape> Tensor<T> {
    /// Reinterprets the elements (row-major) with a new shape of the same size.
    pub fn try_reshape(self, new_shape: &[usize]) -> Result<Self, Error> {
        let old_shape = self.shape().to_vec();
        let expected: usize = old_shape.iter().product();
        let found: usize = new_shape.iter().product();
        if expected != found {
            return Err(Error::WrongNumElements { expected, found });
        }
        let y = self
            .data
            .to_shape(IxDyn(new_shape))
            .map_err(|_| shape_mismatch("reshape", &old_shape, new_shape))?
            .into_owned();
        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, out_id) = (x.id, result.id);
        tape.add_backward_op(move |grads| {
            let Some(grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            let k = grads.num_cotangents();
            let grad_x = grad_out
                .to_shape(IxDyn(&with_cotangent_axis(k, &old_shape)))
                .map_err(|_| shape_mismatch("reshape", grad_out.shape(), &old_shape))?;
            *grads.get_or_alloc_mut(x_id, &old_shape) += &grad_x;
            Ok(())
        });
        Ok(result.put_tape(tape))
    }

    pub fn reshape(self, new_shape: &[usize]) -> Self {
        self.try_reshape(new_shape).unwrap()
    }
}
