//! Physical quantities derived from a finished fit.
//!
//! Pure formulas: the fit produces dimensionless and pixel-unit results, and
//! this module combines them with externally supplied physical parameters
//! (densities, gravity, needle diameter) into SI outputs. Everything
//! NaN-propagates, so missing inputs surface as NaN outputs rather than
//! errors.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::fit::FitReport;

/// Externally supplied experimental parameters, in SI units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParams {
    /// Density of the drop phase, kg/m³.
    pub drop_density: f64,
    /// Density of the continuous (surrounding) phase, kg/m³.
    pub continuous_density: f64,
    /// Physical needle diameter, m.
    pub needle_diameter: f64,
    /// Gravitational acceleration, m/s².
    pub gravity: f64,
}

/// SI-unit outputs derived from one fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedProperties {
    /// Interfacial tension, N/m.
    pub interfacial_tension: f64,
    /// Drop volume, m³.
    pub volume: f64,
    /// Drop surface area, m².
    pub surface_area: f64,
    /// Apex radius, m.
    pub apex_radius: f64,
    /// Worthington number (experimental-quality indicator).
    pub worthington: f64,
}

/// Interfacial tension `|Δρ|·g·R²/Bo` from the fitted Bond number and the
/// apex radius in metres.
pub fn interfacial_tension(
    drop_density: f64,
    continuous_density: f64,
    bond_number: f64,
    apex_radius: f64,
    gravity: f64,
) -> f64 {
    let delta_density = (drop_density - continuous_density).abs();
    delta_density * gravity * apex_radius * apex_radius / bond_number
}

/// Worthington number `|Δρ|·g·V / (π·γ·d)`: the drop volume relative to the
/// maximum volume the needle can hold at detachment.
pub fn worthington(
    drop_density: f64,
    continuous_density: f64,
    gravity: f64,
    interfacial_tension: f64,
    volume: f64,
    needle_width: f64,
) -> f64 {
    let delta_density = (drop_density - continuous_density).abs();
    delta_density * gravity * volume / (PI * interfacial_tension * needle_width)
}

/// Image scale from the needle's physical diameter and its fitted width in
/// pixels.
pub fn metres_per_pixel(needle_diameter: f64, needle_width_px: f64) -> f64 {
    needle_diameter / needle_width_px
}

/// Convert a fit's pixel-unit outputs into SI quantities.
pub fn derive_properties(
    report: &FitReport,
    params: &PhysicalParams,
    needle_width_px: f64,
) -> DerivedProperties {
    let m_per_px = metres_per_pixel(params.needle_diameter, needle_width_px);

    let apex_radius = report.params.apex_radius * m_per_px;
    let volume = report.volume * m_per_px.powi(3);
    let surface_area = report.surface_area * m_per_px.powi(2);

    let ift = interfacial_tension(
        params.drop_density,
        params.continuous_density,
        report.params.bond_number,
        apex_radius,
        params.gravity,
    );
    let worthington = worthington(
        params.drop_density,
        params.continuous_density,
        params.gravity,
        ift,
        volume,
        params.needle_diameter,
    );

    DerivedProperties {
        interfacial_tension: ift,
        volume,
        surface_area,
        apex_radius,
        worthington,
    }
}
