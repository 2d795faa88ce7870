//! # Localization Maps
//!
//! Per-pixel −2ΔlogL surfaces of an alert's position, stored as JSON:
//!
//! ```json
//! { "nside": 64, "ordering": "RING", "comments": ["..."], "values": [ ... ] }
//! ```
//!
//! A map reduces to a [`ContourRegion`]: the NESTED pixels below the contour
//! level and their total solid angle.

use crate::healpix::Healpix;
use crate::primitives::{
    CONTOUR_COVERAGE_IN, CONTOUR_COVERAGE_OUT, FOUR_PI, SIMULATED_CONTOUR_LEVEL,
    WILKS_CONTOUR_LEVEL, WILKS_MARKER,
};
use crate::types::{MatchError, SkyPosition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pixel numbering of a stored map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelOrdering {
    Nested,
    Ring,
}

/// A full-sky localization surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationMap {
    pub nside: u32,
    pub ordering: PixelOrdering,
    #[serde(default)]
    pub comments: Vec<String>,
    pub values: Vec<f64>,
}

impl LocalizationMap {
    /// Parse and check a JSON map.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, MatchError> {
        let map: Self = serde_json::from_slice(bytes)
            .map_err(|e| MatchError::DataFormat(format!("invalid localization map: {e}")))?;
        let healpix = Healpix::new(map.nside)
            .map_err(|e| MatchError::DataFormat(format!("localization map: {e}")))?;
        if map.values.len() as u64 != healpix.npix() {
            return Err(MatchError::DataFormat(format!(
                "localization map has {} values, nside {} needs {}",
                map.values.len(),
                map.nside,
                healpix.npix()
            )));
        }
        Ok(map)
    }

    /// Contour level for this map's calibration.
    #[must_use]
    pub fn contour_level(&self) -> f64 {
        if self.comments.iter().any(|c| c.contains(WILKS_MARKER)) {
            WILKS_CONTOUR_LEVEL
        } else {
            SIMULATED_CONTOUR_LEVEL
        }
    }
}

// =============================================================================
// CONTOUR REGION
// =============================================================================

/// The confidence region of one localization map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourRegion {
    pub nside: u32,
    /// NESTED ids of the pixels inside the contour.
    pub pixels: BTreeSet<u64>,
    /// Solid angle of the contour in steradians.
    pub area_sr: f64,
    /// −2ΔlogL level that defined the contour.
    pub llh_level: f64,
}

impl ContourRegion {
    /// Extract the contour of `map`: every pixel whose value is below the level.
    pub fn from_map(map: &LocalizationMap) -> Result<Self, MatchError> {
        let healpix = Healpix::new(map.nside)?;
        let llh_level = map.contour_level();

        let pixels: BTreeSet<u64> = (0..healpix.npix())
            .filter(|&nest| {
                let stored = match map.ordering {
                    PixelOrdering::Nested => nest,
                    PixelOrdering::Ring => healpix.nest_to_ring(nest),
                };
                map.values
                    .get(stored as usize)
                    .is_some_and(|value| *value < llh_level)
            })
            .collect();

        let area_sr = pixels.len() as f64 * healpix.pixel_area_sr();
        tracing::debug!(
            nside = map.nside,
            pixels = pixels.len(),
            area_sqdg = area_sr / crate::primitives::SQDG_TO_SR,
            llh_level,
            "extracted contour"
        );
        Ok(Self {
            nside: map.nside,
            pixels,
            area_sr,
            llh_level,
        })
    }

    /// Whether `position` falls inside the contour.
    pub fn contains(&self, position: &SkyPosition) -> Result<bool, MatchError> {
        let healpix = Healpix::new(self.nside)?;
        Ok(self.pixels.contains(&healpix.pixel_of(position)))
    }

    /// Two-valued Bayes factor for a source at `position`.
    ///
    /// `C_in·4π/area` inside the contour, `C_out/(1 − area/4π)` outside.
    pub fn bayes_factor(&self, position: &SkyPosition) -> Result<f64, MatchError> {
        let inside = self.contains(position)?;
        Ok(if inside {
            CONTOUR_COVERAGE_IN * FOUR_PI / self.area_sr
        } else {
            CONTOUR_COVERAGE_OUT / (1.0 - self.area_sr / FOUR_PI)
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
