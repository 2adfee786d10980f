//! Needle width from its two edge contours.
//!
//! The calibration needle appears in the image as two nearly parallel edges.
//! A small Gauss–Newton solve fits both as a pair of parallel lines with
//! three unknowns (the two x-intercepts and the common inclination); the
//! perpendicular distance between the lines is the needle diameter in pixels,
//! which the host divides into the known physical diameter to obtain the
//! pixel-to-metre scale.

use nalgebra::{Matrix3, Vector3};

/// Relative parameter step below which the needle solve stops.
pub const NEEDLE_TOL: f64 = 1e-4;

/// Iteration budget of the needle solve.
pub const NEEDLE_STEPS: usize = 20;

/// Needle diameter, in the units of the input points, from the left and
/// right edge contours.
///
/// Point order within each edge is arbitrary. Returns NaN when either edge is
/// empty or the solve degenerates.
pub fn width_from_needle_profile(left_edge: &[[f64; 2]], right_edge: &[[f64; 2]]) -> f64 {
    if left_edge.is_empty() || right_edge.is_empty() {
        return f64::NAN;
    }

    let mut edge0 = left_edge.to_vec();
    let mut edge1 = right_edge.to_vec();
    edge0.sort_by(|a, b| a[1].total_cmp(&b[1]));
    edge1.sort_by(|a, b| a[1].total_cmp(&b[1]));

    // Work relative to the topmost left-edge point to keep the moments small.
    let origin = edge0[0];
    for p in edge0.iter_mut().chain(edge1.iter_mut()) {
        p[0] -= origin[0];
        p[1] -= origin[1];
    }

    match optimise_needle(&edge0, &edge1) {
        Some([x0, x1, theta]) => ((x1 - x0) * theta.sin()).abs(),
        None => f64::NAN,
    }
}

/// Gauss–Newton over `(x0, x1, theta)` with residuals
/// `(x_k - x_i)·sin(theta) - y_k·cos(theta)` per edge point.
///
/// Starts from a perfectly vertical needle through each edge's first point.
fn optimise_needle(edge0: &[[f64; 2]], edge1: &[[f64; 2]]) -> Option<[f64; 3]> {
    let mut params = Vector3::new(edge0[0][0], edge1[0][0], std::f64::consts::FRAC_PI_2);

    for step in 0.. {
        let mut jtj = Matrix3::<f64>::zeros();
        let mut jte = Vector3::<f64>::zeros();

        accumulate_edge(&mut jtj, &mut jte, edge0, params[0], params[2], 0);
        accumulate_edge(&mut jtj, &mut jte, edge1, params[1], params[2], 1);

        let delta = jtj.lu().solve(&(-jte))?;

        params += delta;

        let converged = (0..3).all(|i| (delta[i] / params[i]).abs() < NEEDLE_TOL);
        if converged || step > NEEDLE_STEPS {
            break;
        }
    }

    if params.iter().all(|p| p.is_finite()) {
        Some([params[0], params[1], params[2]])
    } else {
        None
    }
}

/// Add one edge's contribution to the normal equations. `x_col` selects which
/// intercept column (0 or 1) this edge's x-derivatives occupy; the
/// inclination derivative always lands in column 2.
fn accumulate_edge(
    jtj: &mut Matrix3<f64>,
    jte: &mut Vector3<f64>,
    edge: &[[f64; 2]],
    x0: f64,
    theta: f64,
    x_col: usize,
) {
    let (sin_theta, cos_theta) = theta.sin_cos();

    for &[x, y] in edge {
        let residual = (x - x0) * sin_theta - y * cos_theta;
        let d_x0 = -sin_theta;
        let d_theta = (x - x0) * cos_theta + y * sin_theta;

        jtj[(x_col, x_col)] += d_x0 * d_x0;
        jtj[(x_col, 2)] += d_x0 * d_theta;
        jtj[(2, x_col)] += d_x0 * d_theta;
        jtj[(2, 2)] += d_theta * d_theta;

        jte[x_col] += d_x0 * residual;
        jte[2] += d_theta * residual;
    }
}
