//! dropfit-core — Young–Laplace profile fitting for pendant-drop
//! tensiometry.
//!
//! Takes a drop-edge pixel contour (extracted upstream by the imaging layer)
//! and fits the axisymmetric Young–Laplace capillary equation to it,
//! recovering the Bond number, apex position, apex radius and image rotation,
//! from which interfacial tension, drop volume, surface area and the
//! Worthington number follow. The stages are:
//!
//! 1. **Guess** – apex position/radius from an algebraic circle fit near the
//!    apex, Bond number from an empirical polynomial in the drop width.
//! 2. **Shape** – the dimensionless Young–Laplace ODE integrated and cached
//!    as a C¹ interpolant over arclength, with Bond-number sensitivities and
//!    a Newton closest-point search.
//! 3. **Fit** – Levenberg–Marquardt over the five parameters, with
//!    gain-ratio damping, bitwise-OR stop reasons, cooperative cancellation
//!    and a per-fit log stream.
//! 4. **Needle** – parallel-line Gauss–Newton fit of the calibration
//!    needle's edges, yielding the pixel-to-metre scale.
//! 5. **Physics** – pure conversions to interfacial tension, SI
//!    volume/surface area and the Worthington number.
//!
//! The fit runs synchronously on the calling thread and is intended to be
//! dispatched onto a worker by the host; [`CancelToken`] is the only piece
//! shared across threads.

pub mod fit;
pub mod guess;
pub mod needle;
pub mod physics;
pub mod shape;

pub use fit::{
    CancelToken, FitConfig, FitError, FitOptions, FitParams, FitProgress, FitReport, StopReason,
    YoungLaplaceFit, MIN_PROFILE_POINTS,
};
pub use needle::width_from_needle_profile;
pub use physics::{
    derive_properties, interfacial_tension, metres_per_pixel, worthington, DerivedProperties,
    PhysicalParams,
};
pub use shape::{volume_and_surface_area, ClosestPoint, ProfileSample, YoungLaplaceShape};
