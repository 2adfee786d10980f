//! First estimates of the apex and Bond number from a raw contour.
//!
//! These seed the Levenberg–Marquardt fit: an algebraic circle fit over the
//! apex neighbourhood gives position and radius, and an empirical polynomial
//! in the drop radius measured two apex-radii above the apex gives the Bond
//! number. The polynomial coefficients and the 0.15 fallback are tuned
//! constants from the reference numerical data; changing them shifts the
//! optimizer's convergence basin, so they are preserved as-is.

/// Number of contour points averaged on each side when measuring the drop
/// radius at a given height.
const POINTS_TO_AVERAGE: usize = 5;

/// Naive Bond number used when the contour is too short to measure.
const FALLBACK_BOND_NUMBER: f64 = 0.15;

/// Algebraic (Kåsa) least-squares circle fit over the apex neighbourhood.
///
/// Uses the first `clamp(10% of n, 10, n)` contour points, which are the ones
/// nearest the apex once the contour is sorted by height. Returns
/// `[apex_x, apex_y, apex_radius]` where `apex_y` is the bottom of the fitted
/// circle (centre minus radius). A degenerate point distribution yields NaNs.
pub fn fit_circle(contour: &[[f64; 2]]) -> [f64; 3] {
    if contour.is_empty() {
        return [f64::NAN; 3];
    }

    let n = ((contour.len() as f64 * 0.1) as usize)
        .max(10)
        .min(contour.len());

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_x2 = 0.0;
    let mut sum_y2 = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x3 = 0.0;
    let mut sum_y3 = 0.0;
    let mut sum_x2y = 0.0;
    let mut sum_xy2 = 0.0;

    for &[x, y] in &contour[..n] {
        sum_x += x;
        sum_y += y;
        sum_x2 += x * x;
        sum_y2 += y * y;
        sum_xy += x * y;
        sum_x3 += x * x * x;
        sum_y3 += y * y * y;
        sum_x2y += x * x * y;
        sum_xy2 += x * y * y;
    }

    let n = n as f64;
    let d11 = n * sum_xy - sum_x * sum_y;
    let d20 = n * sum_x2 - sum_x * sum_x;
    let d02 = n * sum_y2 - sum_y * sum_y;
    let d30 = n * sum_x3 - sum_x2 * sum_x;
    let d03 = n * sum_y3 - sum_y2 * sum_y;
    let d21 = n * sum_x2y - sum_x2 * sum_y;
    let d12 = n * sum_xy2 - sum_x * sum_y2;

    let denom = d20 * d02 - d11 * d11;
    if denom.abs() < f64::EPSILON * (d20 * d02).abs().max(1.0) {
        return [f64::NAN; 3];
    }

    let x = (0.5 * (d30 + d12) * d02 - 0.5 * (d03 + d21) * d11) / denom;
    let y = (0.5 * (d03 + d21) * d20 - 0.5 * (d30 + d12) * d11) / denom;
    let c = (sum_x2 + sum_y2 - 2.0 * x * sum_x - 2.0 * y * sum_y) / n;

    let radius = (c + x * x + y * y).sqrt();

    [x, y - radius, radius]
}

/// Estimate the Bond number from the drop radius at scaled height 2.
///
/// The polynomial is interpolated from numerical reference solutions of the
/// Young–Laplace equation. When the contour does not reach two apex-radii
/// above the apex, falls back to a naive constant guess.
pub fn bond_number(contour: &[[f64; 2]], apex_x: f64, apex_y: f64, apex_radius: f64) -> f64 {
    let r_z2 = scaled_radius_at_scaled_height(contour, apex_x, apex_y, apex_radius, 2.0);

    if r_z2 > 0.0 {
        return 0.1756 * r_z2.powi(2) + 0.5234 * r_z2.powi(3) - 0.2563 * r_z2.powi(4);
    }

    FALLBACK_BOND_NUMBER
}

/// Drop radius at height `height * apex_radius` above the apex, normalized by
/// the apex radius and averaged over the nearest contour points.
///
/// Returns NaN when the contour is empty, does not reach the requested
/// height, or has too few points around the crossing index to average over.
pub(crate) fn scaled_radius_at_scaled_height(
    contour: &[[f64; 2]],
    apex_x: f64,
    apex_y: f64,
    apex_radius: f64,
    height: f64,
) -> f64 {
    let num_points = contour.len();
    if num_points == 0 {
        return f64::NAN;
    }

    let z_value = apex_y + height * apex_radius;

    if contour[num_points - 1][1] < z_value {
        return f64::NAN;
    }

    let index = match contour.iter().position(|p| p[1] >= z_value) {
        Some(i) => i,
        None => return f64::NAN,
    };

    if index < POINTS_TO_AVERAGE || num_points - index < POINTS_TO_AVERAGE {
        return f64::NAN;
    }

    let sum_radius: f64 = contour[index - POINTS_TO_AVERAGE..index + POINTS_TO_AVERAGE]
        .iter()
        .map(|p| (p[0] - apex_x).abs())
        .sum();

    sum_radius / (2.0 * POINTS_TO_AVERAGE as f64 * apex_radius)
}
