//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the matching engine:
//! - Row and source-group identifiers (`RowId`, `SourceId`)
//! - Sky positions and great-circle geometry (`SkyPosition`)
//! - Per-candidate score containers (`CandidateScores`)
//! - Error types (`MatchError`, `ConsistencyWarning`)
//!
//! ## Ordering Guarantees
//!
//! Identifiers implement `Ord` so that every result container can be a
//! `BTreeMap`/`BTreeSet`. Parallel evaluation therefore never changes the
//! order in which results are reported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Position of a detection row inside its catalog (0-based, file order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub usize);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a source group: all rows sharing it are detections of one source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    /// Create a source id from anything string-like.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bayes factors (or posteriors) of the candidates of one secondary catalog.
///
/// Rows absent from the map were never scored, which is equivalent to zero.
pub type CandidateScores = BTreeMap<RowId, f64>;

// =============================================================================
// SKY POSITION
// =============================================================================

/// Equatorial position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    /// Right ascension in degrees, [0, 360).
    pub ra: f64,
    /// Declination in degrees, [-90, 90].
    pub dec: f64,
}

impl SkyPosition {
    /// Create a position, rejecting coordinates outside the valid ranges.
    pub fn new(ra: f64, dec: f64) -> Result<Self, MatchError> {
        if !ra.is_finite() || !(0.0..360.0).contains(&ra) {
            return Err(MatchError::DataFormat(format!(
                "right ascension {ra} outside [0, 360)"
            )));
        }
        if !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
            return Err(MatchError::DataFormat(format!(
                "declination {dec} outside [-90, 90]"
            )));
        }
        Ok(Self { ra, dec })
    }

    /// Great-circle separation in radians.
    ///
    /// Vincenty formulation: stable for both tiny and antipodal separations.
    #[must_use]
    pub fn separation_rad(&self, other: &SkyPosition) -> f64 {
        let (sin_d1, cos_d1) = self.dec.to_radians().sin_cos();
        let (sin_d2, cos_d2) = other.dec.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (other.ra - self.ra).to_radians().sin_cos();

        let num1 = cos_d2 * sin_dra;
        let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
        let denominator = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

        num1.hypot(num2).atan2(denominator)
    }

    /// Great-circle separation in arcseconds.
    #[must_use]
    pub fn separation_arcsec(&self, other: &SkyPosition) -> f64 {
        self.separation_rad(other).to_degrees() * 3600.0
    }

    /// Unit vector (x, y, z) of this position.
    #[must_use]
    pub fn to_unit_vector(&self) -> [f64; 3] {
        let (sin_ra, cos_ra) = self.ra.to_radians().sin_cos();
        let (sin_dec, cos_dec) = self.dec.to_radians().sin_cos();
        [cos_dec * cos_ra, cos_dec * sin_ra, sin_dec]
    }
}

// =============================================================================
// CONSISTENCY WARNING
// =============================================================================

/// The surface-density prior does not integrate to the expected number of
/// chance associations over the configured survey area.
///
/// Usually a wrong `nside` or `area_sqdg`. Non-fatal unless the prior is
/// configured as strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyWarning {
    /// Index of the secondary catalog whose prior map was checked.
    pub secondary: usize,
    /// Prior mass integrated over the primary sources.
    pub total_prior: f64,
    /// Expected value, `(area / 4π)^(k-1)`.
    pub expected: f64,
    /// `log2(total_prior / expected)`.
    pub log2_ratio: f64,
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prior for secondary catalog {} integrates to {:.4e}, expected {:.4e} (log2 ratio {:+.2}); check nside and area_sqdg",
            self.secondary, self.total_prior, self.expected, self.log2_ratio
        )
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while configuring or running a match.
///
/// - `Config` fails fast, before any catalog is read
/// - `DataFormat` is raised per row or per localization map; callers that
///   iterate over rows log it and carry on
/// - `Consistency` only surfaces when the prior is configured as strict
#[derive(Debug, Error)]
pub enum MatchError {
    /// Invalid model parameters, missing required columns, unknown model type.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A malformed catalog row or an unreadable localization map.
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// The prior self-consistency check failed in strict mode.
    #[error("Prior consistency check failed: {0}")]
    Consistency(ConsistencyWarning),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The memoization store failed.
    #[error("Cache error: {0}")]
    Cache(String),
}

// =============================================================================
// TESTS
// =============================================================================
