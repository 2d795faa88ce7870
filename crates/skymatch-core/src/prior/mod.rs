//! # Prior Module
//!
//! Prior probabilities that a primary source has a counterpart in each
//! secondary catalog.
//!
//! Variants:
//! - `surface_density`: local source densities on a coarse HEALPix grid
//! - `ra_scramble`: empirical null from RA-permuted secondary catalogs

mod ra_scramble;
mod surface_density;

pub use ra_scramble::*;
pub use surface_density::*;

use crate::catalog::{Catalog, SourceSummary};
use crate::config::PriorConfig;
use crate::storage::Memoizer;
use crate::types::{ConsistencyWarning, MatchError};

/// Prior lookup for one primary source.
pub trait Prior: Send + Sync {
    /// One probability ≥ 0 per secondary catalog, in configuration order.
    fn evaluate(&self, primary: &SourceSummary) -> Result<Vec<f64>, MatchError>;
}

/// A configured prior variant.
#[derive(Debug)]
pub enum PriorModel {
    SurfaceDensity(SurfaceDensityPrior),
    RaScramble(RaScramblePrior),
}

impl PriorModel {
    /// Build the prior described by `config`.
    ///
    /// The surface-density variant bins every catalog here; the RA scramble
    /// defers all work to [`RaScramblePrior::scrambled_distribution`].
    pub fn build(
        config: &PriorConfig,
        primary: &Catalog,
        secondaries: &[&Catalog],
        densities: &Memoizer<DensityMap>,
    ) -> Result<Self, MatchError> {
        config.validate()?;
        match *config {
            PriorConfig::SurfaceDensity {
                nside,
                area_sqdg,
                check_consistency,
                strict_consistency,
            } => {
                let params = SurfaceDensityParams {
                    nside,
                    area_sqdg,
                    check_consistency,
                    strict_consistency,
                };
                Ok(Self::SurfaceDensity(SurfaceDensityPrior::build(
                    params,
                    primary,
                    secondaries,
                    densities,
                )?))
            }
            PriorConfig::RaScramble { n_scrambles, seed } => {
                Ok(Self::RaScramble(RaScramblePrior::new(n_scrambles, seed)))
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SurfaceDensity(_) => "surface_density",
            Self::RaScramble(_) => "ra_scramble",
        }
    }

    /// Consistency warnings raised while building.
    #[must_use]
    pub fn warnings(&self) -> &[ConsistencyWarning] {
        match self {
            Self::SurfaceDensity(prior) => prior.warnings(),
            Self::RaScramble(_) => &[],
        }
    }
}

impl Prior for PriorModel {
    fn evaluate(&self, primary: &SourceSummary) -> Result<Vec<f64>, MatchError> {
        match self {
            Self::SurfaceDensity(prior) => prior.evaluate(primary),
            Self::RaScramble(_) => Err(MatchError::Config(
                "the ra_scramble prior has no per-source value; use it for a null distribution"
                    .to_string(),
            )),
        }
    }
}
