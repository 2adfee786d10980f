//! Uniform-grid piecewise cubic Hermite interpolant.
//!
//! Each segment matches values and first derivatives at both breakpoints, so
//! the interpolant is C¹ everywhere and its boundary slopes equal the exact
//! ODE derivatives supplied by the integrator.

/// Interpolant over `C` channels sharing one uniform breakpoint grid on
/// `[0, size]`.
#[derive(Debug, Clone)]
pub(crate) struct HermiteSpline<const C: usize> {
    step: f64,
    values: Vec<[f64; C]>,
    derivs: Vec<[f64; C]>,
}

impl<const C: usize> HermiteSpline<C> {
    pub(crate) fn new(step: f64, values: Vec<[f64; C]>, derivs: Vec<[f64; C]>) -> Self {
        debug_assert!(values.len() >= 2 && values.len() == derivs.len());
        debug_assert!(step > 0.0);
        Self {
            step,
            values,
            derivs,
        }
    }

    /// Upper end of the interpolated domain.
    pub(crate) fn size(&self) -> f64 {
        self.step * (self.values.len() - 1) as f64
    }

    /// Evaluate all channels at `s`, clamped into the solved domain.
    pub(crate) fn eval(&self, s: f64) -> [f64; C] {
        let t = s.clamp(0.0, self.size());
        let mut seg = (t / self.step) as usize;
        if seg >= self.values.len() - 1 {
            seg = self.values.len() - 2;
        }
        let u = (t - seg as f64 * self.step) / self.step;

        let u2 = u * u;
        let u3 = u2 * u;
        let h00 = 2.0 * u3 - 3.0 * u2 + 1.0;
        let h10 = u3 - 2.0 * u2 + u;
        let h01 = -2.0 * u3 + 3.0 * u2;
        let h11 = u3 - u2;

        let v0 = &self.values[seg];
        let v1 = &self.values[seg + 1];
        let d0 = &self.derivs[seg];
        let d1 = &self.derivs[seg + 1];

        let mut out = [0.0; C];
        for c in 0..C {
            out[c] = h00 * v0[c] + h01 * v1[c] + self.step * (h10 * d0[c] + h11 * d1[c]);
        }
        out
    }
}
