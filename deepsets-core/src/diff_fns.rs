//! A set of differentiable functions specified by structs implementing
//! [DifferentiableFunction]. The elementwise tensor ops in
//! [crate::tensor_ops] are all driven by these.

use num_traits::Float;

/// A function that acts on 1 value that is differentiable.
pub trait DifferentiableFunction<T> {
    /// The actual function
    fn f(x: &T) -> T;

    /// The derivative of the function at `x`.
    fn df(x: &T) -> T;
}

/// [Rectified Linear Unit (ReLU)](https://en.wikipedia.org/wiki/Rectifier_(neural_networks)) computes `max(0, x)`.
///
/// The derivative is the [Heaviside](https://en.wikipedia.org/wiki/Heaviside_step_function) function.
///
/// ```rust
/// # use deepsets_core::prelude::*;
/// assert_eq!(ReLU::f(&1.0), 1.0);
/// assert_eq!(ReLU::f(&-1.0), 0.0);
/// assert_eq!(ReLU::df(&1.0), 1.0);
/// assert_eq!(ReLU::df(&-1.0), 0.0);
/// ```
#[derive(Default, Debug, Clone, Copy)]
pub struct ReLU;
impl<T: Float> DifferentiableFunction<T> for ReLU {
    fn f(x: &T) -> T {
        x.max(T::zero())
    }

    fn df(x: &T) -> T {
        if x > &T::zero() {
            T::one()
        } else {
            T::zero()
        }
    }
}

/// Square computes `x * x`.
///
/// The derivative is `2 * x`.
///
/// ```rust
/// # use deepsets_core::prelude::*;
/// assert_eq!(Square::f(&-2.0), 4.0);
/// assert_eq!(Square::df(&-1.0), -2.0);
/// ```
#[derive(Default, Debug, Clone, Copy)]
pub struct Square;
impl<T: Float> DifferentiableFunction<T> for Square {
    fn f(x: &T) -> T {
        x.powi(2)
    }

    fn df(x: &T) -> T {
        *x + *x
    }
}

/// [Hyperbolic Tangent (Tanh)](https://en.wikipedia.org/wiki/Hyperbolic_functions) computes `tanh(x)`.
///
/// The derivative is `1.0 - square(tanh(x))`.
#[derive(Default, Debug, Clone, Copy)]
pub struct Tanh;
impl<T: Float> DifferentiableFunction<T> for Tanh {
    fn f(x: &T) -> T {
        x.tanh()
    }

    fn df(x: &T) -> T {
        T::one() - x.tanh().powi(2)
    }
}

/// [Sigmoid](https://en.wikipedia.org/wiki/Sigmoid_function) computes `1 / (1 + exp(-x))`.
///
/// The derivative is `sigmoid(x) * (1.0 - sigmoid(x))`
#[derive(Default, Debug, Clone, Copy)]
pub struct Sigmoid;
impl<T: Float> DifferentiableFunction<T> for Sigmoid {
    fn f(x: &T) -> T {
        (T::one() + x.neg().exp()).recip()
    }

    fn df(x: &T) -> T {
        let s = Self::f(x);
        s * (T::one() - s)
    }
}

/// Softplus computes `ln(1 + exp(x))`, a smooth ReLU.
///
/// Its derivative is [Sigmoid]. Large inputs are passed through as is to
/// avoid overflowing `exp`.
#[derive(Default, Debug, Clone, Copy)]
pub struct Softplus;
impl<T: Float> DifferentiableFunction<T> for Softplus {
    fn f(x: &T) -> T {
        let threshold = <T as num_traits::NumCast>::from(20.0).unwrap_or_else(T::max_value);
        if *x > threshold {
            *x
        } else {
            x.exp().ln_1p()
        }
    }

    fn df(x: &T) -> T {
        Sigmoid::f(x)
    }
}
