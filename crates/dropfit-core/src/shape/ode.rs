//! Right-hand sides of the dimensionless Young–Laplace ODE systems and a
//! fixed-step RK4 integrator with dense output.
//!
//! Arclength `s` is scaled by the apex radius, so the apex curvature is 1 and
//! the shape is fully determined by the Bond number. The 1/r singularity at
//! the apex is sidestepped by starting the integration at r = `APEX_EPS`
//! instead of 0.

use std::f64::consts::PI;

/// Initial radial offset replacing the exact apex (r = 0) initial condition.
pub(crate) const APEX_EPS: f64 = 1e-6;

/// Derivative of the 6-state shape system `[r, z, phi, dr/dBo, dz/dBo, dphi/dBo]`.
///
/// The last three components propagate the sensitivity of the profile to the
/// Bond number, which the fitter consumes directly as Jacobian channels.
pub(crate) fn shape_rhs(state: &[f64; 6], bond_number: f64) -> [f64; 6] {
    let [r, z, phi, dr_dbo, dz_dbo, dphi_dbo] = *state;
    let (sin_phi, cos_phi) = phi.sin_cos();

    let r_s = cos_phi;
    let z_s = sin_phi;
    let phi_s = 2.0 - bond_number * z - sin_phi / r;
    let dr_dbo_s = -sin_phi * dphi_dbo;
    let dz_dbo_s = cos_phi * dphi_dbo;
    let dphi_dbo_s =
        sin_phi * dr_dbo / (r * r) - cos_phi * dphi_dbo / r - z - bond_number * dz_dbo;

    [r_s, z_s, phi_s, dr_dbo_s, dz_dbo_s, dphi_dbo_s]
}

/// Derivative of the 5-state volume/surface system `[r, z, phi, vol, sur]`.
pub(crate) fn volsur_rhs(state: &[f64; 5], bond_number: f64) -> [f64; 5] {
    let [r, z, phi, _vol, _sur] = *state;
    let (sin_phi, cos_phi) = phi.sin_cos();

    [
        cos_phi,
        sin_phi,
        2.0 - bond_number * z - sin_phi / r,
        PI * r * r * sin_phi,
        2.0 * PI * r,
    ]
}

/// One classic fourth-order Runge–Kutta step of width `h`.
pub(crate) fn rk4_step<const N: usize>(
    f: impl Fn(&[f64; N]) -> [f64; N],
    y: &[f64; N],
    h: f64,
) -> [f64; N] {
    let k1 = f(y);
    let k2 = f(&add_scaled(y, &k1, 0.5 * h));
    let k3 = f(&add_scaled(y, &k2, 0.5 * h));
    let k4 = f(&add_scaled(y, &k3, h));

    let mut out = *y;
    for i in 0..N {
        out[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
    }
    out
}

fn add_scaled<const N: usize>(y: &[f64; N], k: &[f64; N], h: f64) -> [f64; N] {
    let mut out = *y;
    for i in 0..N {
        out[i] += h * k[i];
    }
    out
}

/// Integrate the shape system over a uniform grid of `num_breakpoints` nodes
/// spanning `[0, size]`.
///
/// Returns the nodal states together with the exact nodal derivatives (one
/// extra RHS evaluation per node), which the interpolant uses as Hermite
/// slopes.
pub(crate) fn integrate_shape_dense(
    bond_number: f64,
    size: f64,
    num_breakpoints: usize,
) -> (Vec<[f64; 6]>, Vec<[f64; 6]>) {
    let n = num_breakpoints.max(2);
    let h = size / (n - 1) as f64;
    let rhs = |y: &[f64; 6]| shape_rhs(y, bond_number);

    let mut values = Vec::with_capacity(n);
    let mut derivs = Vec::with_capacity(n);

    let mut y = [APEX_EPS, 0.0, 0.0, 0.0, 0.0, 0.0];
    values.push(y);
    derivs.push(rhs(&y));

    for _ in 1..n {
        y = rk4_step(rhs, &y, h);
        values.push(y);
        derivs.push(rhs(&y));
    }

    (values, derivs)
}
