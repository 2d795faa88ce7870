//! # Run Configuration
//!
//! Typed description of a match run. The application reads it from TOML;
//! the engine only sees these types.
//!
//! Model choices are closed enums with serde discriminators, so an unknown
//! `match_type` or prior `name` is rejected while parsing. Everything else is
//! checked by [`MatchConfig::validate`] before any catalog is read.
//!
//! ```toml
//! name = "4lac-x-icecube"
//! posterior_threshold = 0.9
//!
//! [primary]
//! path = "4lac.csv"
//!
//! [[secondary]]
//! path = "alerts.csv"
//!
//! [bayes_factor]
//! match_type = "gaussian"
//! nside = 1024
//! disc_radius_arcsec = 100.0   # 0 scores every row of the secondary catalogs
//!
//! [prior]
//! name = "surface_density"
//! nside = 8
//! area_sqdg = 41252.96
//! ```

use crate::catalog::CatalogSource;
use crate::healpix::Healpix;
use crate::primitives::{DEFAULT_DISC_RADIUS_ARCSEC, FULL_SKY_SQDG};
use crate::types::MatchError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// TOP LEVEL
// =============================================================================

/// A complete match run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    /// Run name, used in logs and reports.
    pub name: String,
    /// Candidates with a posterior strictly above this are matches.
    pub posterior_threshold: f64,
    /// Directory of the persistent cache; in-memory when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    pub primary: CatalogSource,
    pub secondary: Vec<CatalogSource>,
    pub bayes_factor: BayesFactorConfig,
    pub prior: PriorConfig,
}

impl MatchConfig {
    /// Check every parameter. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.name.trim().is_empty() {
            return Err(MatchError::Config("name must not be empty".to_string()));
        }
        if !(0.0..1.0).contains(&self.posterior_threshold) {
            return Err(MatchError::Config(format!(
                "posterior_threshold must be in [0, 1), got {}",
                self.posterior_threshold
            )));
        }
        if self.secondary.is_empty() {
            return Err(MatchError::Config(
                "at least one [[secondary]] catalog is required".to_string(),
            ));
        }
        self.bayes_factor.validate()?;
        self.prior.validate()
    }

    /// Resolve relative catalog and cache paths against `base`, usually the
    /// directory of the configuration file.
    #[must_use]
    pub fn resolved_against(&self, base: &Path) -> Self {
        let mut resolved = self.clone();
        resolved.primary = self.primary.resolved_against(base);
        resolved.secondary = self
            .secondary
            .iter()
            .map(|s| s.resolved_against(base))
            .collect();
        resolved.cache_dir = self.cache_dir.as_ref().map(|dir| {
            if dir.is_relative() {
                base.join(dir)
            } else {
                dir.clone()
            }
        });
        resolved
    }
}

// =============================================================================
// BAYES FACTOR
// =============================================================================

fn default_disc_radius() -> Option<f64> {
    Some(DEFAULT_DISC_RADIUS_ARCSEC)
}

/// Bayes factor model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match_type", rename_all = "snake_case")]
pub enum BayesFactorConfig {
    /// Gaussian positional uncertainties (`sigma_arcsec` column).
    Gaussian {
        nside: u32,
        /// Candidate radius; `0` disables the radius cut.
        #[serde(default = "default_disc_radius")]
        disc_radius_arcsec: Option<f64>,
    },
    /// Localization contours (`filename` and `nside` columns).
    IcecubeContour {
        nside: u32,
        #[serde(default)]
        disc_radius_arcsec: Option<f64>,
    },
}

impl BayesFactorConfig {
    #[must_use]
    pub fn nside(&self) -> u32 {
        match self {
            Self::Gaussian { nside, .. } | Self::IcecubeContour { nside, .. } => *nside,
        }
    }

    /// Effective candidate radius. `None`, also for a configured `0`, means
    /// every row is a candidate.
    #[must_use]
    pub fn disc_radius_arcsec(&self) -> Option<f64> {
        match self {
            Self::Gaussian {
                disc_radius_arcsec, ..
            }
            | Self::IcecubeContour {
                disc_radius_arcsec, ..
            } => disc_radius_arcsec.filter(|radius| *radius != 0.0),
        }
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        Healpix::new(self.nside())?;
        match self {
            Self::Gaussian {
                disc_radius_arcsec: Some(radius),
                ..
            } if !radius.is_finite() || *radius < 0.0 => Err(MatchError::Config(format!(
                "disc_radius_arcsec must be finite and non-negative, got {radius}"
            ))),
            Self::IcecubeContour {
                disc_radius_arcsec: Some(radius),
                ..
            } if *radius != 0.0 => Err(MatchError::Config(
                "icecube_contour scores the whole secondary catalog; disc_radius_arcsec must not be set"
                    .to_string(),
            )),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// PRIOR
// =============================================================================

fn default_true() -> bool {
    true
}

/// Prior model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum PriorConfig {
    /// Local source densities on a coarse grid.
    SurfaceDensity {
        nside: u32,
        /// Sky area covered by the primary catalog, square degrees.
        area_sqdg: f64,
        #[serde(default = "default_true")]
        check_consistency: bool,
        /// Fail instead of warning when the consistency check fails.
        #[serde(default)]
        strict_consistency: bool,
    },
    /// Monte Carlo null from RA-permuted secondary catalogs.
    RaScramble {
        n_scrambles: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl PriorConfig {
    pub fn validate(&self) -> Result<(), MatchError> {
        match self {
            Self::SurfaceDensity {
                nside, area_sqdg, ..
            } => {
                Healpix::new(*nside)?;
                // Allow rounding in a hand-written full-sky value.
                if !area_sqdg.is_finite()
                    || *area_sqdg <= 0.0
                    || *area_sqdg > FULL_SKY_SQDG * (1.0 + 1e-6)
                {
                    return Err(MatchError::Config(format!(
                        "area_sqdg must be in (0, {FULL_SKY_SQDG:.2}], got {area_sqdg}"
                    )));
                }
                Ok(())
            }
            Self::RaScramble { n_scrambles, .. } => {
                if *n_scrambles == 0 {
                    return Err(MatchError::Config(
                        "n_scrambles must be at least 1".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Short name of the prior, as written in configuration files.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SurfaceDensity { .. } => "surface_density",
            Self::RaScramble { .. } => "ra_scramble",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
