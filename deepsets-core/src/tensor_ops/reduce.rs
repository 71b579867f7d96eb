use ndarray::Axis;

use crate::{
    error::Error,
    gradients::{NoneTape, Tape},
    tensor::Tensor,
};

fn check_axis(axis: usize, ndim: usize) -> Result<(), Error> {
    if axis >= ndim {
        return Err(Error::AxisOutOfBounds { axis, ndim });
    }
    Ok(())
}

impl<T: Tape> Tensor<T> {
    /// Sums along `axis`, removing it from the shape.
    ///
    /// This is the permutation invariant pooling step of a Deep Sets model:
    /// the result does not depend on the order of the summed entries.
    pub fn try_sum_axis(self, axis: usize) -> Result<Self, Error> {
        check_axis(axis, self.ndim())?;
        let shape = self.shape().to_vec();
        let y = self.data.sum_axis(Axis(axis));
        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, out_id) = (x.id, result.id);
        tape.add_backward_op(move |grads| {
            let Some(grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            let grad_out = grad_out.insert_axis(Axis(axis + 1));
            *grads.get_or_alloc_mut(x_id, &shape) += &grad_out;
            Ok(())
        });
        Ok(result.put_tape(tape))
    }

    pub fn sum_axis(self, axis: usize) -> Self {
        self.try_sum_axis(axis).unwrap()
    }

    /// Subtracts the mean along `axis`, keeping the shape. For a `(W, P, D)`
    /// batch and `axis = 1` every walker's particles end up centered on the
    /// walker's center of mass.
    pub fn try_center_along(self, axis: usize) -> Result<Self, Error> {
        check_axis(axis, self.ndim())?;
        if self.shape()[axis] == 0 {
            return Err(Error::WrongNumElements {
                expected: 1,
                found: 0,
            });
        }
        let shape = self.shape().to_vec();
        let mut y = self.data.as_ref().clone();
        let mean = self
            .data
            .mean_axis(Axis(axis))
            .ok_or(Error::AxisOutOfBounds {
                axis,
                ndim: shape.len(),
            })?
            .insert_axis(Axis(axis));
        y -= &mean;

        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, out_id) = (x.id, result.id);
        tape.add_backward_op(move |grads| {
            let Some(mut grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            // centering is a linear projection, its adjoint is itself
            if let Some(mean) = grad_out.mean_axis(Axis(axis + 1)) {
                grad_out -= &mean.insert_axis(Axis(axis + 1));
            }
            *grads.get_or_alloc_mut(x_id, &shape) += &grad_out;
            Ok(())
        });
        Ok(result.put_tape(tape))
    }

    pub fn center_along(self, axis: usize) -> Self {
        self.try_center_along(axis).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use crate::{tensor::Tensor, tests::*};

    #[test]
    fn test_sum_axis_shapes_and_grads() {
        let x = Tensor::from_shape_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let y0 = x.trace().sum_axis(0);
        assert_close(y0.array(), &[5.0, 7.0, 9.0], 1e-6);
        let y1 = x.trace().sum_axis(1);
        assert_close(y1.array(), &[6.0, 15.0], 1e-6);

        let g = y1.square().backward().unwrap();
        assert_close(
            &g.get(&x).unwrap().to_owned(),
            &[12.0, 12.0, 12.0, 30.0, 30.0, 30.0],
            1e-5,
        );
        assert!(x.clone().try_sum_axis(2).is_err());
    }

    #[test]
    fn test_center_along() {
        let x = Tensor::from_shape_vec(&[1, 2, 1], vec![0.5, -0.5]).unwrap();
        assert_close(x.clone().center_along(1).array(), &[0.5, -0.5], 1e-7);

        let x = Tensor::from_shape_vec(&[2, 2, 1], vec![1.0, 3.0, 0.0, 0.0]).unwrap();
        let y = x.trace().center_along(1);
        assert_close(y.array(), &[-1.0, 1.0, 0.0, 0.0], 1e-7);

        // shifting every particle of a walker leaves the centered output unchanged,
        // so the gradient of any function of it sums to zero over the particles.
        let g = y.square().backward().unwrap();
        let gx = g.get(&x).unwrap().to_owned();
        assert_close(&gx, &[-2.0, 2.0, 0.0, 0.0], 1e-6);
    }
}
