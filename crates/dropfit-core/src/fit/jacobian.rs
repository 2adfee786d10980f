//! Residual and Jacobian assembly for one optimizer iteration.

use nalgebra::Vector2;
use tracing::warn;

use super::{FitError, Matrix5, Vector5, YoungLaplaceFit};

impl YoungLaplaceFit {
    /// Project every profile point onto the current model curve and
    /// accumulate the normal equations `A = JᵀJ`, `v = Jᵀe` of the
    /// signed-distance residuals, together with the per-point
    /// `(arclength, signed distance)` pairs.
    ///
    /// Points are visited in ascending-height order; the closest-point
    /// search for each point is seeded with the previous point's arclength,
    /// tracked separately for the two sides of the apex. A search that runs
    /// out of Newton steps is logged but its best estimate still enters the
    /// system, degrading precision instead of failing the fit.
    pub(super) fn assemble_normal_equations(
        &mut self,
    ) -> Result<(Matrix5, Vector5, Vec<[f64; 2]>), FitError> {
        let Some(mut shape) = self.shape.take() else {
            return Err(FitError::Numerical("shape model not initialized".into()));
        };

        let params = self.params;
        let apex = Vector2::new(params.apex_x, params.apex_y);
        let rot = self.rot;
        let rot_t = rot.transpose();
        let max_steps = self.config.max_arclength_steps;
        let tol = self.config.arclength_tol;

        // Seeds for the left (s < 0) and right (s > 0) halves of the profile.
        let seed_span = 0.05 * self.profile_size.max(4.0);
        let mut seeds = [-seed_span, seed_span];

        let mut a = Matrix5::zeros();
        let mut v = Vector5::zeros();
        let mut residuals = Vec::with_capacity(self.profile.len());

        for i in 0..self.profile.len() {
            let point = self.profile[i];
            let rz = rot * (Vector2::new(point[0], point[1]) - apex);

            let side = usize::from(rz[0] > 0.0);
            let found = shape.closest([rz[0], rz[1]], seeds[side], max_steps, tol);

            if found.steps_exceeded {
                warn!(
                    arclength = found.arclength,
                    max_steps, "closest-point search failed to converge"
                );
                self.log(&format!(
                    "Warning: closest-point search failed to converge in {} steps... (s_i = {:.4})\n",
                    max_steps, found.arclength
                ));
            }

            seeds[side] = found.arclength;

            // Signed distance: magnitude of the residual vector, signed like
            // its radial component.
            let e_i = found.e_r.hypot(found.e_z).copysign(found.e_r);
            if e_i.abs() < 1e-14 {
                residuals.push([found.arclength, 0.0]);
                continue;
            }

            let sample = shape.evaluate(found.arclength);
            let r = sample.r + found.e_r;
            let z = sample.z + found.e_z;

            // Residual vector rotated back into the image frame gives the
            // apex-position derivatives.
            let e_xy = rot_t * Vector2::new(found.e_r, found.e_z);

            let row = Vector5::new(
                -e_xy[0] / e_i,
                -e_xy[1] / e_i,
                -(found.e_r * sample.r + found.e_z * sample.z) / (params.apex_radius * e_i),
                -(found.e_r * sample.dr_dbo + found.e_z * sample.dz_dbo) / e_i,
                (found.e_r * -z + found.e_z * r) / e_i,
            );

            a += row * row.transpose();
            v += row * e_i;
            residuals.push([found.arclength, e_i]);
        }

        self.shape = Some(shape);

        Ok((a, v, residuals))
    }
}
