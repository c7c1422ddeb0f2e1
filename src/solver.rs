// Position solver - bounded quasi-Newton minimization over (lat, lon)
//
// The multilateration objectives are sums of absolute residuals, evaluated in
// degrees. The solver is a projected BFGS with forward-difference gradients
// and Armijo backtracking, stopping on relative objective reduction or a small
// projected gradient. Every call is bounded by MAX_ITERATIONS.

use nalgebra::{Matrix2, Vector2};

use crate::error::SolverError;

const MAX_ITERATIONS: usize = 500;
const MAX_LINE_SEARCH_STEPS: usize = 30;
/// Relative reduction tolerance, 1e7 * machine epsilon
const FTOL: f64 = 1e7 * f64::EPSILON;
/// Projected gradient tolerance
const PGTOL: f64 = 1e-5;
/// Finite-difference step in degrees
const GRADIENT_STEP: f64 = 1e-8;
const ARMIJO_C1: f64 = 1e-4;

/// Axis-aligned search box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: Vector2<f64>,
    pub upper: Vector2<f64>,
}

impl Bounds {
    /// Box of `center ± half_width` on both axes.
    pub fn around(center: Vector2<f64>, half_width: f64) -> Self {
        let delta = Vector2::new(half_width, half_width);
        Bounds {
            lower: center - delta,
            upper: center + delta,
        }
    }

    pub fn contains(&self, x: &Vector2<f64>) -> bool {
        (0..2).all(|i| x[i] >= self.lower[i] && x[i] <= self.upper[i])
    }

    fn project(&self, x: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            x[0].clamp(self.lower[0], self.upper[0]),
            x[1].clamp(self.lower[1], self.upper[1]),
        )
    }
}

/// Minimum found by the solver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimum {
    pub x: Vector2<f64>,
    pub value: f64,
    pub iterations: usize,
}

/// Objective over a candidate position plus optional box constraint
struct Problem<'a, F: Fn(f64, f64) -> f64> {
    objective: &'a F,
    bounds: Option<Bounds>,
}

impl<'a, F: Fn(f64, f64) -> f64> Problem<'a, F> {
    fn eval(&self, x: &Vector2<f64>) -> Result<f64, SolverError> {
        let value = (self.objective)(x[0], x[1]);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(SolverError::NonFinite { lat: x[0], lon: x[1] })
        }
    }

    fn project(&self, x: Vector2<f64>) -> Vector2<f64> {
        match &self.bounds {
            Some(b) => b.project(x),
            None => x,
        }
    }

    /// Forward-difference gradient; steps backwards at an upper bound.
    fn gradient(&self, x: &Vector2<f64>, fx: f64) -> Result<Vector2<f64>, SolverError> {
        let mut grad = Vector2::zeros();
        for j in 0..2 {
            let mut step = GRADIENT_STEP;
            if let Some(b) = &self.bounds {
                if x[j] + step > b.upper[j] {
                    step = -step;
                }
            }
            let mut x_step = *x;
            x_step[j] += step;
            grad[j] = (self.eval(&x_step)? - fx) / step;
        }
        Ok(grad)
    }

    /// Infinity norm of the projected gradient step.
    fn projected_gradient_norm(&self, x: &Vector2<f64>, grad: &Vector2<f64>) -> f64 {
        let pg = self.project(x - grad) - x;
        pg.amax()
    }
}

/// Minimize `objective(lat, lon)` from `initial_guess`.
///
/// # Arguments
/// * `objective` - Function of a candidate position in degrees
/// * `initial_guess` - Starting point (lat, lon)
/// * `bounds` - Optional search box; the initial guess must lie inside it
///
/// # Returns
/// * `Ok(Minimum)` once a stopping criterion is met
/// * `Err(SolverError)` for a non-finite objective, an infeasible start, or
///   when MAX_ITERATIONS is exhausted
pub fn minimize<F>(
    objective: F,
    initial_guess: Vector2<f64>,
    bounds: Option<Bounds>,
) -> Result<Minimum, SolverError>
where
    F: Fn(f64, f64) -> f64,
{
    if let Some(b) = &bounds {
        if !b.contains(&initial_guess) {
            return Err(SolverError::InfeasibleStart);
        }
    }

    let problem = Problem {
        objective: &objective,
        bounds,
    };

    let mut x = initial_guess;
    let mut fx = problem.eval(&x)?;
    let mut grad = problem.gradient(&x, fx)?;
    // Inverse Hessian approximation
    let mut h_inv = Matrix2::identity();
    let mut fresh_direction = true;

    for iter in 0..MAX_ITERATIONS {
        if problem.projected_gradient_norm(&x, &grad) <= PGTOL {
            return Ok(Minimum { x, value: fx, iterations: iter });
        }

        let mut direction = -(h_inv * grad);
        if grad.dot(&direction) >= 0.0 {
            // Not a descent direction: restart from steepest descent
            h_inv = Matrix2::identity();
            direction = -grad;
            fresh_direction = true;
        }

        // First step after a (re)start is limited to unit length
        let mut alpha = if fresh_direction {
            (1.0 / direction.norm()).min(1.0)
        } else {
            1.0
        };

        let mut accepted = None;
        for _ in 0..MAX_LINE_SEARCH_STEPS {
            let x_new = problem.project(x + direction * alpha);
            let step = x_new - x;
            if step.amax() == 0.0 {
                break;
            }
            let f_new = problem.eval(&x_new)?;
            if f_new <= fx + ARMIJO_C1 * grad.dot(&step) {
                accepted = Some((x_new, f_new));
                break;
            }
            alpha *= 0.5;
        }

        let (x_new, f_new) = match accepted {
            Some(found) => found,
            // Line search can't make progress: x is the best point we have
            None => return Ok(Minimum { x, value: fx, iterations: iter }),
        };

        let reduction = (fx - f_new) / fx.abs().max(f_new.abs()).max(1.0);
        let grad_new = problem.gradient(&x_new, f_new)?;

        // BFGS update of the inverse Hessian
        let s = x_new - x;
        let y = grad_new - grad;
        let sy = s.dot(&y);
        if sy > 1e-10 {
            let rho = 1.0 / sy;
            let identity = Matrix2::identity();
            let left = identity - s * y.transpose() * rho;
            let right = identity - y * s.transpose() * rho;
            h_inv = left * h_inv * right + s * s.transpose() * rho;
            fresh_direction = false;
        }

        x = x_new;
        fx = f_new;
        grad = grad_new;

        if reduction <= FTOL {
            return Ok(Minimum { x, value: fx, iterations: iter + 1 });
        }
    }

    Err(SolverError::MaxIterations(MAX_ITERATIONS))
}
