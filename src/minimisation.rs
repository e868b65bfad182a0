use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{Executor, Jacobian, Operator};
use argmin::solver::gaussnewton::{GaussNewton, GaussNewtonLS};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use ndarray::{s, Array1, Array2};
use tracing::{debug, warn};

use crate::config::SolverConfig;
use crate::{Error, FitStage, Result};

/// A parametric curve `y = f(x; p)`
pub(crate) trait Model: Clone {
    fn evaluate(&self, x: f64, params: &[f64]) -> f64;
}

/// Admissible range of a single parameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Bound {
    Free,
    AtLeast(f64),
    Within(f64, f64),
}

impl Bound {
    fn contains(self, value: f64) -> bool {
        match self {
            Self::Free => true,
            Self::AtLeast(low) => value >= low,
            Self::Within(low, high) => (low..=high).contains(&value),
        }
    }

    fn clamp(self, value: f64) -> f64 {
        match self {
            Self::Free => value,
            Self::AtLeast(low) => value.max(low),
            Self::Within(low, high) => value.clamp(low, high),
        }
    }
}

/// Outcome of a converged fit
#[derive(Clone, Debug)]
pub(crate) struct FitResult {
    pub(crate) params: Vec<f64>,
    pub(crate) chi_squared: f64,
}

/// Weighted least squares fit of a [`Model`] to sampled data
///
/// Bounded parameters are handled with an active set: after each solve any parameter outside
/// its bound is pinned to the bound and the remaining parameters are fitted again.
#[derive(Clone, Debug)]
pub(crate) struct CurveFit<M> {
    model: M,
    x: Array1<f64>,
    y: Array1<f64>,
    /// One over the standard deviation of each sample
    weights: Array1<f64>,
    initial: Vec<f64>,
    bounds: Vec<Bound>,
    fixed: Vec<bool>,
    damping: f64,
}

impl<M: Model> CurveFit<M> {
    pub(crate) fn new(model: M, x: &[f64], y: &[f64], initial: Vec<f64>) -> Self {
        let num_params = initial.len();
        Self {
            model,
            x: Array1::from_vec(x.to_vec()),
            y: Array1::from_vec(y.to_vec()),
            weights: Array1::ones(x.len()),
            initial,
            bounds: vec![Bound::Free; num_params],
            fixed: vec![false; num_params],
            damping: 0.0,
        }
    }

    /// Weight each residual by the inverse of the sample's standard deviation
    pub(crate) fn with_uncertainties(mut self, sigma: &[f64]) -> Self {
        self.weights = sigma.iter().map(|s| 1.0 / s).collect();
        self
    }

    pub(crate) fn with_bound(mut self, index: usize, bound: Bound) -> Self {
        self.bounds[index] = bound;
        self
    }

    pub(crate) fn with_fixed(mut self, index: usize) -> Self {
        self.fixed[index] = true;
        self
    }

    /// Penalise each free parameter's distance from its initial value by `damping`
    ///
    /// Keeps the normal equations regular when some combination of parameters is not determined
    /// by the data. The penalty is excluded from the reported chi squared.
    pub(crate) fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub(crate) fn solve(self, config: &SolverConfig, stage: FitStage) -> Result<FitResult> {
        if self.x.len() != self.y.len() || self.x.len() != self.weights.len() {
            return Err(Error::InvalidInput(format!(
                "{stage} fit given {} abscissae, {} ordinates and {} weights",
                self.x.len(),
                self.y.len(),
                self.weights.len()
            )));
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(Error::InvalidInput(format!(
                "{stage} fit given a non-positive or non-finite uncertainty"
            )));
        }

        let mut params = self
            .initial
            .iter()
            .zip(&self.bounds)
            .map(|(value, bound)| bound.clamp(*value))
            .collect::<Vec<_>>();
        let mut fixed = self.fixed.clone();
        let anchor = params.clone();

        loop {
            let free = (0..params.len()).filter(|ii| !fixed[*ii]).collect::<Vec<_>>();
            if free.is_empty() {
                break;
            }
            if free.len() > self.x.len() {
                return Err(Error::non_convergence(
                    stage,
                    format!(
                        "{} free parameters cannot be determined from {} samples",
                        free.len(),
                        self.x.len()
                    ),
                ));
            }

            let problem = Problem {
                model: self.model.clone(),
                x: self.x.clone(),
                y: self.y.clone(),
                weights: self.weights.clone(),
                params: params.clone(),
                free: free.clone(),
                damping: self.damping,
                anchor: anchor.clone(),
            };
            let initial = free.iter().map(|ii| params[*ii]).collect::<Array1<f64>>();
            let solution = problem
                .solve(initial, config)
                .map_err(|e| Error::non_convergence(stage, e))?;

            if solution.iter().any(|p| !p.is_finite()) {
                return Err(Error::non_convergence(
                    stage,
                    "solver produced non-finite parameters",
                ));
            }
            for (ii, value) in free.iter().zip(solution) {
                params[*ii] = value;
            }

            let violated = free
                .into_iter()
                .filter(|ii| !self.bounds[*ii].contains(params[*ii]))
                .collect::<Vec<_>>();
            if violated.is_empty() {
                break;
            }
            for ii in violated {
                debug!(%stage, parameter = ii, value = params[ii], "pinning parameter to its bound");
                params[ii] = self.bounds[ii].clamp(params[ii]);
                fixed[ii] = true;
            }
        }

        let chi_squared = self
            .x
            .iter()
            .zip(&self.y)
            .zip(&self.weights)
            .map(|((x, y), w)| ((self.model.evaluate(*x, &params) - y) * w).powi(2))
            .sum::<f64>();
        if !chi_squared.is_finite() {
            return Err(Error::non_convergence(stage, "model is not finite over the data"));
        }

        Ok(FitResult {
            params,
            chi_squared,
        })
    }
}

/// The weighted residual problem over the free parameters of a fit
#[derive(Clone)]
struct Problem<M> {
    model: M,
    x: Array1<f64>,
    y: Array1<f64>,
    weights: Array1<f64>,
    /// All parameters, fixed ones hold their final values
    params: Vec<f64>,
    /// Indices into `params` varied by the solver
    free: Vec<usize>,
    damping: f64,
    /// Values the damping pulls the free parameters towards
    anchor: Vec<f64>,
}

impl<M: Model> Problem<M> {
    /// Expand the solver's vector of free parameters into the full parameter list
    fn promote(&self, free_params: &Array1<f64>) -> Vec<f64> {
        let mut params = self.params.clone();
        for (ii, value) in self.free.iter().zip(free_params) {
            params[*ii] = *value;
        }
        params
    }

    fn num_residuals(&self) -> usize {
        if self.damping > 0.0 {
            self.x.len() + self.free.len()
        } else {
            self.x.len()
        }
    }

    fn residuals(&self, params: &[f64]) -> Array1<f64> {
        let data = self
            .x
            .iter()
            .zip(&self.y)
            .zip(&self.weights)
            .map(|((x, y), w)| (self.model.evaluate(*x, params) - y) * w);
        let penalty = self
            .free
            .iter()
            .filter(|_| self.damping > 0.0)
            .map(|ii| self.damping * (params[*ii] - self.anchor[*ii]));
        data.chain(penalty).collect()
    }

    /// Central difference estimate of the `jj`th column of the Jacobian
    fn jacobian_column(&self, free_params: &Array1<f64>, jj: usize) -> Array1<f64> {
        let step = f64::EPSILON.cbrt() * free_params[jj].abs().max(1.0);
        let mut plus = free_params.clone();
        plus[jj] += step;
        let mut minus = free_params.clone();
        minus[jj] -= step;
        (self.residuals(&self.promote(&plus)) - self.residuals(&self.promote(&minus)))
            / (2. * step)
    }

    /// Run the optimisation
    ///
    /// Gauss-Newton with a More-Thuente line search is tried first. The line search refuses to
    /// start from a point where the gradient already vanishes, so when it fails the undamped
    /// solver is run from the same start.
    fn solve(
        self,
        initial: Array1<f64>,
        config: &SolverConfig,
    ) -> ::std::result::Result<Array1<f64>, argmin::core::Error> {
        match self.clone().solve_with_line_search(initial.clone(), config) {
            Ok(param) => Ok(param),
            Err(e) => {
                warn!("line search solve failed ({e}), retrying without line search");
                self.solve_undamped(initial, config)
            }
        }
    }

    fn solve_with_line_search(
        self,
        initial: Array1<f64>,
        config: &SolverConfig,
    ) -> ::std::result::Result<Array1<f64>, argmin::core::Error> {
        let linesearch = MoreThuenteLineSearch::new().with_bounds(0.0, 1.0)?;
        let solver = GaussNewtonLS::new(linesearch).with_tolerance(config.tolerance)?;

        let mut executor = Executor::new(self, solver)
            .configure(|state| state.param(initial).max_iters(config.max_iters));
        if config.log_iterations {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let res = executor.run()?;

        let mut state = res.state().clone();
        state
            .take_param()
            .ok_or_else(|| argmin::core::Error::msg("solver returned no parameters"))
    }

    fn solve_undamped(
        self,
        initial: Array1<f64>,
        config: &SolverConfig,
    ) -> ::std::result::Result<Array1<f64>, argmin::core::Error> {
        let solver = GaussNewton::new().with_tolerance(config.tolerance)?;

        let mut executor = Executor::new(self, solver)
            .configure(|state| state.param(initial).max_iters(config.max_iters));
        if config.log_iterations {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let res = executor.run()?;

        let mut state = res.state().clone();
        state
            .take_param()
            .ok_or_else(|| argmin::core::Error::msg("solver returned no parameters"))
    }
}

impl<M: Model> Operator for Problem<M> {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.residuals(&self.promote(p)))
    }
}

impl<M: Model> Jacobian for Problem<M> {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        let mut jacobian = Array2::zeros((self.num_residuals(), p.len()));
        for jj in 0..p.len() {
            let col = self.jacobian_column(p, jj);
            jacobian.slice_mut(s![.., jj]).assign(&col);
        }
        Ok(jacobian)
    }
}
