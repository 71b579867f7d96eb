use std::sync::Arc;

use crate::{
    diff_fns::*,
    error::Error,
    gradients::{NoneTape, Tape},
    tensor::Tensor,
};

impl<T: Tape> Tensor<T> {
    /// Applies `F` elementwise. The derivative `F::df(x)` is stored on the
    /// tape at forward time and multiplied into every cotangent row.
    pub fn try_map<F: DifferentiableFunction<f32>>(self) -> Result<Self, Error> {
        let y = self.data.mapv(|x| F::f(&x));
        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, out_id) = (x.id, result.id);
        if T::OWNS_TAPE {
            let deriv = Arc::new(x.data.mapv(|x| F::df(&x)));
            tape.add_backward_op(move |grads| {
                let Some(mut grad_out) = grads.take(out_id) else {
                    return Ok(());
                };
                for mut row in grad_out.outer_iter_mut() {
                    row *= deriv.as_ref();
                }
                *grads.get_or_alloc_mut(x_id, deriv.shape()) += &grad_out;
                Ok(())
            });
        }
        Ok(result.put_tape(tape))
    }

    /// Multiplies every element by the constant `s`.
    pub fn try_scale(self, s: f32) -> Result<Self, Error> {
        let y = self.data.mapv(|x| x * s);
        let shape = self.shape().to_vec();
        let (x, mut tape) = self.split_tape();
        let result = Tensor::from_op(y, NoneTape);
        let (x_id, out_id) = (x.id, result.id);
        tape.add_backward_op(move |grads| {
            let Some(mut grad_out) = grads.take(out_id) else {
                return Ok(());
            };
            grad_out *= s;
            *grads.get_or_alloc_mut(x_id, &shape) += &grad_out;
            Ok(())
        });
        Ok(result.put_tape(tape))
    }

    pub fn scale(self, s: f32) -> Self {
        self.try_scale(s).unwrap()
    }

    pub fn negate(self) -> Self {
        self.scale(-1.0)
    }

    pub fn try_negate(self) -> Result<Self, Error> {
        self.try_scale(-1.0)
    }
}

macro_rules! unary_ops {
    ($($func:ident, $try_func:ident, $F:ty, #[$doc:meta]);* $(;)?) => {
        impl<T: Tape> Tensor<T> {
            $(
                #[$doc]
                pub fn $try_func(self) -> Result<Self, Error> {
                    self.try_map::<$F>()
                }

                #[$doc]
                pub fn $func(self) -> Self {
                    self.$try_func().unwrap()
                }
            )*
        }
    };
}

unary_ops!(
    tanh, try_tanh, Tanh, #[doc = "Elementwise [Tanh]."];
    sigmoid, try_sigmoid, Sigmoid, #[doc = "Elementwise [Sigmoid]."];
    relu, try_relu, ReLU, #[doc = "Elementwise [ReLU]."];
    softplus, try_softplus, Softplus, #[doc = "Elementwise [Softplus]."];
    square, try_square, Square, #[doc = "Elementwise [Square]."];
);
