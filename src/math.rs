use ndarray::{Array, Array1, Array2};
use ndarray_linalg::{LeastSquaresSvd, Scalar};

use crate::{Error, Result};

/// Generate the Vandermode matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive.
///
/// # Examples
///
/// ```
/// use detector_efficiency::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
///
/// # Errors
/// Never in practice, the element count always matches the requested shape.
pub fn vandermonde<T: Copy + Scalar>(x: &[T], degree: usize) -> Result<Array2<T>> {
    let vals = x.iter().flat_map(|&xi| {
        let mut power = T::one();
        (0..=degree).map(move |_| {
            let value = power;
            power *= xi;
            value
        })
    });

    Ok(Array::from_iter(vals).into_shape((x.len(), degree + 1))?)
}

/// Weighted least squares polynomial through `(x, y)`
///
/// Coefficients are returned lowest power first. Each residual is multiplied by the matching
/// entry of `weights`, usually the reciprocal of the standard deviation of `y`.
///
/// # Examples
///
/// ```
/// use detector_efficiency::math::polyfit;
///
/// let x = [0., 1., 2., 3.];
/// let y = [1., 3., 5., 7.];
/// let coefficients = polyfit(&x, &y, 1, None).unwrap();
///
/// approx::assert_relative_eq!(coefficients[0], 1., epsilon = 1e-10);
/// approx::assert_relative_eq!(coefficients[1], 2., epsilon = 1e-10);
/// ```
///
/// # Errors
/// Returns an error if the inputs differ in length, there are fewer points than coefficients, or
/// the decomposition fails.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize, weights: Option<&[f64]>) -> Result<Vec<f64>> {
    if x.len() != y.len() || weights.is_some_and(|w| w.len() != x.len()) {
        return Err(Error::InvalidInput(
            "polynomial fit needs one y value and weight per x value".to_owned(),
        ));
    }
    if x.len() <= degree {
        return Err(Error::InvalidInput(format!(
            "a degree {degree} polynomial needs more than {} points",
            x.len()
        )));
    }

    let mut a = vandermonde(x, degree)?;
    let mut b = Array1::from_vec(y.to_vec());
    if let Some(weights) = weights {
        for ((mut row, target), &weight) in a.rows_mut().into_iter().zip(b.iter_mut()).zip(weights)
        {
            row *= weight;
            *target *= weight;
        }
    }

    let result = a.least_squares(&b)?;
    Ok(result.solution.to_vec())
}
