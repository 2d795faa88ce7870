//! # Innate Primitives
//!
//! Fixed constants of the matching engine: unit conversions, contour-model
//! coverage probabilities, localization-map contour levels and limits.

use std::f64::consts::PI;

// =============================================================================
// UNIT CONVERSIONS
// =============================================================================

/// Full sphere solid angle in steradians.
pub const FOUR_PI: f64 = 4.0 * PI;

/// One square degree in steradians.
pub const SQDG_TO_SR: f64 = (PI / 180.0) * (PI / 180.0);

/// One square arcsecond in steradians.
pub const SQARCSEC_TO_SR: f64 = (PI / 180.0 / 3600.0) * (PI / 180.0 / 3600.0);

/// Full sky in square degrees.
pub const FULL_SKY_SQDG: f64 = FOUR_PI / SQDG_TO_SR;

// =============================================================================
// CONTOUR MODEL
// =============================================================================

/// Assumed probability that the true position lies inside the stated contour.
pub const CONTOUR_COVERAGE_IN: f64 = 0.9;

/// Assumed probability that the true position lies outside the stated contour.
pub const CONTOUR_COVERAGE_OUT: f64 = 0.1;

/// −2ΔlogL level of the 90% contour for maps calibrated with Wilks' theorem
/// (chi-square, two degrees of freedom).
pub const WILKS_CONTOUR_LEVEL: f64 = 4.605170185988092;

/// −2ΔlogL level of the 90% contour for maps calibrated with simulations.
pub const SIMULATED_CONTOUR_LEVEL: f64 = 64.2;

/// Marker in a localization map's comments selecting `WILKS_CONTOUR_LEVEL`.
pub const WILKS_MARKER: &str = "Wilks theorem";

// =============================================================================
// SELECTION & PRIOR DEFAULTS
// =============================================================================

/// Default disc radius for candidate pre-selection.
pub const DEFAULT_DISC_RADIUS_ARCSEC: f64 = 100.0;

/// Largest HEALPix resolution parameter representable with 64-bit NESTED ids.
pub const MAX_NSIDE: u32 = 1 << 29;

/// Allowed |log2(total / expected)| for the surface-density prior check.
pub const PRIOR_CONSISTENCY_LOG2_TOLERANCE: f64 = 2.0;

/// Default column holding the source-group key.
pub const DEFAULT_GROUP_COLUMN: &str = "source_index";

// =============================================================================
// CACHE PAYLOAD FORMAT
// =============================================================================

/// Magic bytes for memoized payloads ("SKymatch Cache").
pub const CACHE_MAGIC: &[u8; 4] = b"SKMC";

/// Current payload format version.
///
/// Increment this when a cached type changes shape; stale entries are then
/// recomputed instead of misread.
pub const CACHE_FORMAT_VERSION: u8 = 1;

/// Maximum size of a single cached payload (256 MB).
pub const MAX_CACHE_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;
