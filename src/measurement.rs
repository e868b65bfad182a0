use num_traits::Float;
use serde::{Deserialize, Serialize};

/// A measured quantity and its one-sigma uncertainty
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Measurement<E> {
    pub value: E,
    pub uncertainty: E,
}

impl<E: Float> Measurement<E> {
    pub const fn new(value: E, uncertainty: E) -> Self {
        Self { value, uncertainty }
    }

    /// A value known exactly
    pub fn from_centroid(value: E) -> Self {
        Self {
            value,
            uncertainty: E::zero(),
        }
    }

    /// The uncertainty as a fraction of the value
    ///
    /// Returns zero for an exact value, and infinity for an uncertain zero.
    pub fn relative_uncertainty(&self) -> E {
        if self.uncertainty == E::zero() {
            E::zero()
        } else {
            (self.uncertainty / self.value).abs()
        }
    }

    /// Scale both the value and its uncertainty
    pub fn scale(self, factor: E) -> Self {
        Self {
            value: self.value * factor,
            uncertainty: self.uncertainty * factor.abs(),
        }
    }
}

/// Combine independent relative errors in quadrature
///
/// Each term is a relative standard deviation, the result is the relative standard deviation of
/// a product or quotient of the underlying quantities.
pub fn quadrature<E: Float>(relative_errors: impl IntoIterator<Item = E>) -> E {
    relative_errors
        .into_iter()
        .fold(E::zero(), |acc, term| acc + term * term)
        .sqrt()
}

#[cfg(test)]
mod tests {
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{quadrature, Measurement};

    #[test]
    fn relative_uncertainty_of_exact_value_is_zero() {
        let measurement = Measurement::from_centroid(12.5_f64);
        approx::assert_relative_eq!(measurement.relative_uncertainty(), 0.0);
    }

    #[test]
    fn relative_uncertainty_ignores_sign() {
        let measurement = Measurement::new(-4.0_f64, 0.2);
        approx::assert_relative_eq!(measurement.relative_uncertainty(), 0.05);
    }

    #[test]
    fn scaling_preserves_relative_uncertainty() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        for _ in 0..20 {
            let measurement = Measurement::new(rng.gen_range(1.0..100.0), rng.gen_range(0.0..1.0));
            let factor: f64 = rng.gen_range(-10.0..10.0);
            approx::assert_relative_eq!(
                measurement.scale(factor).relative_uncertainty(),
                measurement.relative_uncertainty(),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn quadrature_of_a_pythagorean_triple() {
        approx::assert_relative_eq!(quadrature([3.0_f64, 4.0]), 5.0);
    }
}
