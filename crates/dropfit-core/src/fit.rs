//! Levenberg–Marquardt fit of the Young–Laplace shape model to a drop
//! profile.
//!
//! Five parameters are optimized: apex position (x, y), apex radius, Bond
//! number and image rotation. Each iteration projects every profile point
//! onto the current model curve (Newton closest-point search, seeded per
//! side from the previous point), assembles the normal equations of the
//! signed-distance residuals and applies a damped Gauss–Newton update; the
//! damping factor follows a gain-ratio λ/ν scheme. Steps are only accepted
//! when they reduce the sum of squared residuals.
//!
//! The whole fit runs synchronously in [`YoungLaplaceFit::new`]; hosts that
//! want it off the UI thread run the constructor on a worker and poll
//! [`YoungLaplaceFit::is_done`]. Cancellation is cooperative through a
//! [`CancelToken`] checked once per iteration. An unexpected numerical
//! failure never panics or propagates: it is logged and the fit is marked
//! done with its best-effort state, so one bad frame cannot abort a batch.

mod jacobian;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::{Matrix2, SMatrix, SVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::guess;
use crate::shape::{volume_and_surface_area, YoungLaplaceShape};

const SLOW_CONVERGENCE_THRESHOLD: f64 = 0.25;
const FAST_CONVERGENCE_THRESHOLD: f64 = 0.75;

/// Fewest profile points a fit will accept (one more than the parameter
/// count).
pub const MIN_PROFILE_POINTS: usize = 6;

type Matrix5 = SMatrix<f64, 5, 5>;
type Vector5 = SVector<f64, 5>;

/// The five fitted parameters, in image-pixel units and radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    pub apex_x: f64,
    pub apex_y: f64,
    pub apex_radius: f64,
    pub bond_number: f64,
    pub rotation: f64,
}

impl FitParams {
    pub(crate) const COUNT: usize = 5;

    fn nan() -> Self {
        Self {
            apex_x: f64::NAN,
            apex_y: f64::NAN,
            apex_radius: f64::NAN,
            bond_number: f64::NAN,
            rotation: f64::NAN,
        }
    }

    fn as_vector(&self) -> Vector5 {
        Vector5::new(
            self.apex_x,
            self.apex_y,
            self.apex_radius,
            self.bond_number,
            self.rotation,
        )
    }

    fn applying(&self, delta: &Vector5) -> Self {
        Self {
            apex_x: self.apex_x + delta[0],
            apex_y: self.apex_y + delta[1],
            apex_radius: self.apex_radius + delta[2],
            bond_number: self.bond_number + delta[3],
            rotation: self.rotation + delta[4],
        }
    }
}

/// Why the optimization loop stopped: a bitwise-OR set of the four
/// independent stopping conditions checked each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StopReason(u8);

impl StopReason {
    pub const NONE: StopReason = StopReason(0);
    pub const CONVERGENCE_IN_PARAMETERS: StopReason = StopReason(1);
    pub const CONVERGENCE_IN_GRADIENT: StopReason = StopReason(1 << 1);
    pub const CONVERGENCE_IN_OBJECTIVE: StopReason = StopReason(1 << 2);
    pub const MAXIMUM_STEPS_EXCEEDED: StopReason = StopReason(1 << 3);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: StopReason) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StopReason {
    type Output = StopReason;

    fn bitor(self, rhs: StopReason) -> StopReason {
        StopReason(self.0 | rhs.0)
    }
}

impl BitOrAssign for StopReason {
    fn bitor_assign(&mut self, rhs: StopReason) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(StopReason, &str); 4] = [
            (
                StopReason::CONVERGENCE_IN_PARAMETERS,
                "CONVERGENCE_IN_PARAMETERS",
            ),
            (
                StopReason::CONVERGENCE_IN_GRADIENT,
                "CONVERGENCE_IN_GRADIENT",
            ),
            (
                StopReason::CONVERGENCE_IN_OBJECTIVE,
                "CONVERGENCE_IN_OBJECTIVE",
            ),
            (
                StopReason::MAXIMUM_STEPS_EXCEEDED,
                "MAXIMUM_STEPS_EXCEEDED",
            ),
        ];

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Terminal failure modes of a fit.
///
/// None of these propagate out of [`YoungLaplaceFit::new`]; the driver
/// catches them, logs them and marks the fit done.
#[derive(Debug, Clone, Error)]
pub enum FitError {
    #[error("fit cancelled")]
    Cancelled,
    #[error("drop profile has too few points ({got}, need at least {MIN_PROFILE_POINTS})")]
    ProfileTooShort { got: usize },
    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Thread-safe cooperative cancellation flag.
///
/// Clones share the same flag; any clone may cancel from any thread. The fit
/// polls the flag once per iteration, so cancellation takes effect within one
/// full optimizer step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Convergence tolerances and iteration budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitConfig {
    /// Maximum relative parameter step below which the fit converges.
    pub delta_tol: f64,
    /// Maximum gradient component below which the fit converges.
    pub gradient_tol: f64,
    /// Objective (SSR per degree of freedom) below which the fit converges.
    pub objective_tol: f64,
    /// Optimizer iteration budget.
    pub max_steps: usize,
    /// Arclength tolerance of the closest-point Newton search.
    pub arclength_tol: f64,
    /// Step budget of the closest-point Newton search.
    pub max_arclength_steps: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            delta_tol: 1e-6,
            gradient_tol: 1e-6,
            objective_tol: 1e-4,
            max_steps: 10,
            arclength_tol: 1e-6,
            max_arclength_steps: 10,
        }
    }
}

/// Snapshot handed to the progress callback after every parameter update and
/// once when the fit finishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitProgress {
    pub params: FitParams,
    pub volume: f64,
    pub surface_area: f64,
    pub ssr: f64,
    pub is_done: bool,
    pub is_cancelled: bool,
}

/// Serializable summary of a finished fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub params: FitParams,
    /// Drop volume in cubic pixels.
    pub volume: f64,
    /// Drop surface area in square pixels.
    pub surface_area: f64,
    /// Per-point `(arclength, signed distance)` residuals of the last
    /// accepted step.
    pub residuals: Vec<[f64; 2]>,
    pub stop_reason: StopReason,
    pub is_cancelled: bool,
}

pub type UpdateCallback = Box<dyn FnMut(&FitProgress) + Send>;
pub type LogCallback = Box<dyn FnMut(&str) + Send>;

/// Construction options for [`YoungLaplaceFit`].
#[derive(Default)]
pub struct FitOptions {
    pub config: FitConfig,
    /// Invoked after every parameter update and at completion.
    pub on_update: Option<UpdateCallback>,
    /// Receives the per-step progress table and warnings, one line at a time.
    pub logger: Option<LogCallback>,
    /// Shared cancellation flag; keep a clone to cancel from another thread.
    pub cancel: CancelToken,
}

/// One synchronous Young–Laplace fit over a drop profile.
///
/// Not restartable: construct a new instance per fit. All mutable optimizer
/// state is confined to the constructing thread; only [`CancelToken`] may be
/// touched concurrently.
pub struct YoungLaplaceFit {
    profile: Vec<[f64; 2]>,
    params: FitParams,
    rot: Matrix2<f64>,
    shape: Option<YoungLaplaceShape>,
    profile_size: f64,
    residuals: Vec<[f64; 2]>,
    volume: f64,
    surface_area: f64,
    ssr: f64,
    stop_reason: StopReason,
    is_done: bool,
    is_cancelled: bool,
    config: FitConfig,
    on_update: Option<UpdateCallback>,
    logger: Option<LogCallback>,
    cancel: CancelToken,
}

struct StepOutcome {
    lambda: f64,
    lambda_cutoff: f64,
    ssr: f64,
    stop_reason: StopReason,
}

impl YoungLaplaceFit {
    /// Fit the Young–Laplace model to `drop_profile` (pixel coordinates, any
    /// order), running to completion before returning.
    pub fn new(drop_profile: &[[f64; 2]], options: FitOptions) -> Self {
        let mut profile = drop_profile.to_vec();
        profile.sort_by(|a, b| a[1].total_cmp(&b[1]));

        let mut fit = Self {
            profile,
            params: FitParams::nan(),
            rot: Matrix2::identity(),
            shape: None,
            profile_size: 0.0,
            residuals: Vec::new(),
            volume: f64::NAN,
            surface_area: f64::NAN,
            ssr: f64::INFINITY,
            stop_reason: StopReason::NONE,
            is_done: false,
            is_cancelled: false,
            config: options.config,
            on_update: options.on_update,
            logger: options.logger,
            cancel: options.cancel,
        };
        fit.run();
        fit
    }

    fn run(&mut self) {
        match self.drive() {
            Ok(stop_reason) => {
                self.stop_reason = stop_reason;
                self.log(&format!("\nFitting finished ({stop_reason})\n"));
                info!(%stop_reason, bond_number = self.params.bond_number, "fit finished");
            }
            Err(FitError::Cancelled) => {
                self.is_cancelled = true;
                self.log("\nCancelled.\n");
                info!("fit cancelled");
            }
            Err(err) => {
                self.log(&format!("\n{err}\n"));
                error!(%err, "fit aborted");
            }
        }

        self.is_done = true;
        self.notify_update();
    }

    fn drive(&mut self) -> Result<StopReason, FitError> {
        if self.profile.len() < MIN_PROFILE_POINTS {
            return Err(FitError::ProfileTooShort {
                got: self.profile.len(),
            });
        }

        self.initial_guess();
        self.optimise()
    }

    /// Seed the parameters from the raw contour.
    ///
    /// The guess routines assume a drop opening upwards; when the profile
    /// points the other way the contour is flipped in y (and reversed to
    /// restore ascending order) and the flip is absorbed into an initial
    /// rotation of pi.
    fn initial_guess(&mut self) {
        let n = self.profile.len();
        let mean_y = self.profile.iter().map(|p| p[1]).sum::<f64>() / n as f64;
        let ends_mean_y = (self.profile[0][1] + self.profile[n - 1][1]) / 2.0;

        let params = if ends_mean_y < mean_y {
            let mut flipped = self.profile.clone();
            for p in &mut flipped {
                p[1] = -p[1];
            }
            flipped.reverse();

            let [apex_x, apex_y, apex_radius] = guess::fit_circle(&flipped);
            let bond_number = guess::bond_number(&flipped, apex_x, apex_y, apex_radius);

            self.profile.reverse();

            FitParams {
                apex_x,
                apex_y: -apex_y,
                apex_radius,
                bond_number,
                rotation: std::f64::consts::PI,
            }
        } else {
            let [apex_x, apex_y, apex_radius] = guess::fit_circle(&self.profile);
            let bond_number = guess::bond_number(&self.profile, apex_x, apex_y, apex_radius);

            FitParams {
                apex_x,
                apex_y,
                apex_radius,
                bond_number,
                rotation: 0.0,
            }
        };

        self.set_params(params);
    }

    fn optimise(&mut self) -> Result<StopReason, FitError> {
        self.log(&format!(
            "{:>4}  {:>10}  {:>10}  {:>10}  {:>11}  {:>10}  {:>11}\n",
            "Step", "Objective", "x-centre", "z-centre", "Apex radius", "Bond", "Image angle"
        ));

        let mut lambda = 0.0;
        let mut lambda_cutoff = 0.0;
        let mut ssr = f64::INFINITY;

        let mut step = 0usize;
        loop {
            let outcome = self.optimise_step(lambda, lambda_cutoff, ssr)?;
            lambda = outcome.lambda;
            lambda_cutoff = outcome.lambda_cutoff;
            ssr = outcome.ssr;
            let mut stop_reason = outcome.stop_reason;

            let objective = ssr / self.degrees_of_freedom() as f64;

            self.log(&format!(
                "{:>4}  {:>10.4e}  {:>10.4}  {:>10.4}  {:>11.4}  {:>10.4}  {:>10.4}\u{b0}\n",
                step,
                objective,
                self.params.apex_x,
                self.params.apex_y,
                self.params.apex_radius,
                self.params.bond_number,
                self.params.rotation.to_degrees(),
            ));
            debug!(
                step,
                objective,
                bond_number = self.params.bond_number,
                apex_radius = self.params.apex_radius,
                lambda,
                "optimizer step"
            );

            stop_reason |= self.convergence_in_objective(objective);
            stop_reason |= self.maximum_steps_exceeded(step);

            if !stop_reason.is_empty() {
                return Ok(stop_reason);
            }

            if self.cancel.is_cancelled() {
                return Err(FitError::Cancelled);
            }

            step += 1;
        }
    }

    /// One damped Gauss–Newton update.
    ///
    /// The gain ratio compares the achieved SSR reduction against the
    /// reduction predicted by the local quadratic model; slow convergence
    /// inflates λ by an adaptive ν ∈ [2, 10] (bootstrapping λ from 1/‖A⁻¹‖∞
    /// the first time), fast convergence halves λ, snapping to 0 below the
    /// bootstrap cutoff. The step is only applied when SSR improves.
    fn optimise_step(
        &mut self,
        lambda: f64,
        lambda_cutoff: f64,
        ssr: f64,
    ) -> Result<StepOutcome, FitError> {
        let (a, v, residuals) = self.assemble_normal_equations()?;

        let damped = a + lambda * Matrix5::from_diagonal(&a.diagonal());
        let delta = damped
            .lu()
            .solve(&(-v))
            .ok_or_else(|| FitError::Numerical("singular damped normal equations".into()))?;

        let mut lambda_next = lambda;
        let mut lambda_cutoff_next = lambda_cutoff;
        let mut ssr_next: f64 = residuals.iter().map(|r| r[1] * r[1]).sum();

        let mut stop_reason = StopReason::NONE;

        if ssr.is_finite() {
            let gain_ratio = (ssr - ssr_next) / delta.dot(&(-2.0 * v - a * delta));

            if gain_ratio < SLOW_CONVERGENCE_THRESHOLD {
                let mut nu = (2.0 - (ssr_next - ssr) / delta.dot(&v)).clamp(2.0, 10.0);

                if lambda_next == 0.0 {
                    let a_inv = a.try_inverse().ok_or_else(|| {
                        FitError::Numerical("singular normal equations".into())
                    })?;
                    lambda_cutoff_next = 1.0 / inf_norm(&a_inv);
                    lambda_next = lambda_cutoff_next;
                    nu /= 2.0;
                }

                lambda_next *= nu;
            } else if gain_ratio > FAST_CONVERGENCE_THRESHOLD {
                lambda_next /= 2.0;

                if 0.0 < lambda_next && lambda_next < lambda_cutoff {
                    lambda_next = 0.0;
                }
            }
        }

        if ssr_next < ssr {
            self.profile_size = residuals.iter().map(|r| r[0].abs()).fold(0.0, f64::max);
            self.residuals = residuals;
            self.ssr = ssr_next;

            let new_params = self.params.applying(&delta);
            let scaled_delta = delta.component_div(&new_params.as_vector());
            self.set_params(new_params);

            stop_reason |= self.convergence_in_parameters(&scaled_delta);
            stop_reason |= self.convergence_in_gradient(&v);
        } else {
            // Worse than before: keep the previous parameters and let the
            // inflated lambda shrink the next step.
            ssr_next = ssr;
        }

        Ok(StepOutcome {
            lambda: lambda_next,
            lambda_cutoff: lambda_cutoff_next,
            ssr: ssr_next,
            stop_reason,
        })
    }

    /// Replace the parameters, refreshing everything derived from them: the
    /// apex rotation matrix, the shape model interpolant and the
    /// volume/surface integrals.
    fn set_params(&mut self, params: FitParams) {
        self.params = params;

        let (sin, cos) = params.rotation.sin_cos();
        self.rot = Matrix2::new(cos, -sin, sin, cos);

        self.shape = Some(YoungLaplaceShape::new(
            params.bond_number,
            params.apex_radius,
        ));

        let (volume, surface_area) =
            volume_and_surface_area(params.bond_number, self.profile_size);
        self.volume = volume * params.apex_radius.powi(3);
        self.surface_area = surface_area * params.apex_radius.powi(2);

        self.notify_update();
    }

    fn convergence_in_parameters(&self, scaled_delta: &Vector5) -> StopReason {
        if scaled_delta.iter().all(|d| d.abs() < self.config.delta_tol) {
            StopReason::CONVERGENCE_IN_PARAMETERS
        } else {
            StopReason::NONE
        }
    }

    fn convergence_in_gradient(&self, gradient: &Vector5) -> StopReason {
        if gradient.iter().all(|g| g.abs() < self.config.gradient_tol) {
            StopReason::CONVERGENCE_IN_GRADIENT
        } else {
            StopReason::NONE
        }
    }

    fn convergence_in_objective(&self, objective: f64) -> StopReason {
        if objective < self.config.objective_tol {
            StopReason::CONVERGENCE_IN_OBJECTIVE
        } else {
            StopReason::NONE
        }
    }

    fn maximum_steps_exceeded(&self, step: usize) -> StopReason {
        if step >= self.config.max_steps {
            StopReason::MAXIMUM_STEPS_EXCEEDED
        } else {
            StopReason::NONE
        }
    }

    fn log(&mut self, line: &str) {
        if let Some(logger) = self.logger.as_mut() {
            logger(line);
        }
    }

    fn notify_update(&mut self) {
        let progress = FitProgress {
            params: self.params,
            volume: self.volume,
            surface_area: self.surface_area,
            ssr: self.ssr,
            is_done: self.is_done,
            is_cancelled: self.is_cancelled,
        };
        if let Some(on_update) = self.on_update.as_mut() {
            on_update(&progress);
        }
    }

    /// `numPoints - 5 + 1`: residual count less the parameter count, plus
    /// one. Saturates at zero for the too-short profiles a done fit may
    /// still be holding.
    pub fn degrees_of_freedom(&self) -> usize {
        (self.profile.len() + 1).saturating_sub(FitParams::COUNT)
    }

    pub fn params(&self) -> FitParams {
        self.params
    }

    pub fn apex_x(&self) -> f64 {
        self.params.apex_x
    }

    pub fn apex_y(&self) -> f64 {
        self.params.apex_y
    }

    pub fn apex_radius(&self) -> f64 {
        self.params.apex_radius
    }

    pub fn bond_number(&self) -> f64 {
        self.params.bond_number
    }

    pub fn rotation(&self) -> f64 {
        self.params.rotation
    }

    /// Drop volume in cubic pixels.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Drop surface area in square pixels.
    pub fn surface_area(&self) -> f64 {
        self.surface_area
    }

    /// `(arclength, signed distance)` residuals of the last accepted step.
    pub fn residuals(&self) -> &[[f64; 2]] {
        &self.residuals
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }

    pub fn is_done(&self) -> bool {
        self.is_done
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
    }

    /// Request cancellation; a no-op once the fit has finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Map model arclengths to points in the original image frame, for
    /// drawing the fitted profile over the source image.
    pub fn fitted_curve(&mut self, arclengths: &[f64]) -> Vec<[f64; 2]> {
        let rot_t = self.rot.transpose();
        let (apex_x, apex_y) = (self.params.apex_x, self.params.apex_y);

        let Some(shape) = self.shape.as_mut() else {
            return Vec::new();
        };

        arclengths
            .iter()
            .map(|&s| {
                let p = shape.evaluate(s);
                let xy = rot_t * nalgebra::Vector2::new(p.r, p.z);
                [apex_x + xy[0], apex_y + xy[1]]
            })
            .collect()
    }

    pub fn report(&self) -> FitReport {
        FitReport {
            params: self.params,
            volume: self.volume,
            surface_area: self.surface_area,
            residuals: self.residuals.clone(),
            stop_reason: self.stop_reason,
            is_cancelled: self.is_cancelled,
        }
    }
}

fn inf_norm(m: &Matrix5) -> f64 {
    m.row_iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_display_joins_flags() {
        let reason = StopReason::CONVERGENCE_IN_PARAMETERS | StopReason::CONVERGENCE_IN_GRADIENT;
        assert_eq!(
            reason.to_string(),
            "CONVERGENCE_IN_PARAMETERS | CONVERGENCE_IN_GRADIENT"
        );
        assert_eq!(StopReason::NONE.to_string(), "");
        assert!(reason.contains(StopReason::CONVERGENCE_IN_GRADIENT));
        assert!(!reason.contains(StopReason::MAXIMUM_STEPS_EXCEEDED));
    }

    #[test]
    fn short_profiles_are_rejected_not_crashed() {
        for n in [0usize, 1, 5] {
            let profile: Vec<[f64; 2]> = (0..n).map(|i| [i as f64, i as f64]).collect();
            let fit = YoungLaplaceFit::new(&profile, FitOptions::default());
            assert!(fit.is_done(), "n = {n}");
            assert!(!fit.is_cancelled(), "n = {n}");
            assert!(fit.bond_number().is_nan(), "n = {n}");
            assert!(fit.residuals().is_empty(), "n = {n}");
        }
    }

    #[test]
    fn degrees_of_freedom_formula() {
        let profile: Vec<[f64; 2]> = (0..6).map(|i| [i as f64, i as f64]).collect();
        let fit = YoungLaplaceFit::new(&profile, FitOptions::default());
        assert_eq!(fit.degrees_of_freedom(), 2);

        let profile: Vec<[f64; 2]> = (0..100).map(|i| [i as f64, i as f64]).collect();
        let fit = YoungLaplaceFit::new(&profile, FitOptions::default());
        assert_eq!(fit.degrees_of_freedom(), 96);
    }

    #[test]
    fn degrees_of_freedom_saturates_on_rejected_profiles() {
        for n in [0usize, 2, 3] {
            let profile: Vec<[f64; 2]> = (0..n).map(|i| [i as f64, i as f64]).collect();
            let fit = YoungLaplaceFit::new(&profile, FitOptions::default());
            assert!(fit.is_done(), "n = {n}");
            assert_eq!(fit.degrees_of_freedom(), 0, "n = {n}");
        }
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn inf_norm_is_max_absolute_row_sum() {
        let mut m = Matrix5::identity();
        m[(2, 0)] = -3.0;
        m[(2, 4)] = 2.5;
        assert_eq!(inf_norm(&m), 3.0 + 1.0 + 2.5);
    }
}
