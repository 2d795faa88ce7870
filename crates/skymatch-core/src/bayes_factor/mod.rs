//! # Bayes Factor Module
//!
//! Likelihood ratios of "same source" against "unrelated sources" for a
//! primary source and each of its candidates.
//!
//! Variants:
//! - `gaussian`: Gaussian positional uncertainties
//! - `icecube_contour`: localization-map contours
//!
//! [`BayesFactorModel`] couples a variant with its candidate selector and
//! scores whole catalogs, one primary source per rayon task.

mod contour;
mod gaussian;

pub use contour::ContourBayesFactor;
pub use gaussian::{GaussianBayesFactor, gaussian_bayes_factor};

use crate::catalog::{Catalog, Column, SourceSummary};
use crate::config::BayesFactorConfig;
use crate::engine::MatchStage;
use crate::selection::{CandidateSelector, IndexedCatalog};
use crate::storage::CacheStore;
use crate::types::{CandidateScores, MatchError, RowId, SourceId};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Scores per primary source, one [`CandidateScores`] per secondary catalog.
pub type BayesFactorTable = BTreeMap<SourceId, Vec<CandidateScores>>;

/// Scoring of one primary source against one catalog's candidates.
///
/// Returned values are ≥ 0; rows left out of the result scored 0.
pub trait BayesFactor: Send + Sync {
    fn evaluate(
        &self,
        primary: &SourceSummary,
        catalog: &Catalog,
        candidates: &BTreeSet<RowId>,
    ) -> Result<CandidateScores, MatchError>;
}

// =============================================================================
// MODEL
// =============================================================================

/// A configured Bayes factor variant and its candidate selector.
#[derive(Debug)]
pub enum BayesFactorModel {
    Gaussian {
        selector: CandidateSelector,
        scorer: GaussianBayesFactor,
    },
    Contour {
        selector: CandidateSelector,
        scorer: ContourBayesFactor,
    },
}

impl BayesFactorModel {
    /// Build the model described by `config`. Contour regions are memoized
    /// in `store`.
    pub fn from_config(
        config: &BayesFactorConfig,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, MatchError> {
        config.validate()?;
        let selector = CandidateSelector::new(config.nside(), config.disc_radius_arcsec())?;
        Ok(match config {
            BayesFactorConfig::Gaussian { .. } => Self::Gaussian {
                selector,
                scorer: GaussianBayesFactor::new(config.disc_radius_arcsec()),
            },
            BayesFactorConfig::IcecubeContour { .. } => Self::Contour {
                selector,
                scorer: ContourBayesFactor::new(store),
            },
        })
    }

    #[must_use]
    pub fn selector(&self) -> &CandidateSelector {
        match self {
            Self::Gaussian { selector, .. } | Self::Contour { selector, .. } => selector,
        }
    }

    /// Discriminator, as written in configuration files.
    #[must_use]
    pub fn match_type(&self) -> &'static str {
        match self {
            Self::Gaussian { .. } => "gaussian",
            Self::Contour { .. } => "icecube_contour",
        }
    }

    /// Fail when a catalog lacks the columns this variant reads.
    pub fn check_columns(&self, primary: &Catalog, secondaries: &[&Catalog]) -> Result<(), MatchError> {
        match self {
            Self::Gaussian { .. } => {
                primary.require(Column::SigmaArcsec)?;
                secondaries
                    .iter()
                    .try_for_each(|c| c.require(Column::SigmaArcsec))
            }
            Self::Contour { .. } => secondaries
                .iter()
                .try_for_each(|c| c.require(Column::Localization)),
        }
    }

    /// Select and score the candidates of one primary source.
    pub fn score_source(
        &self,
        primary: &SourceSummary,
        secondaries: &[IndexedCatalog],
    ) -> Result<Vec<CandidateScores>, MatchError> {
        tracing::trace!(source = %primary.id, stage = %MatchStage::CandidateSelection);
        let candidates = self.selector().select(&primary.position, secondaries);

        tracing::trace!(source = %primary.id, stage = %MatchStage::Scoring);
        secondaries
            .iter()
            .zip(&candidates)
            .map(|(secondary, rows)| self.evaluate(primary, &secondary.catalog, rows))
            .collect()
    }

    /// Score every primary source in parallel.
    pub fn score_sources(
        &self,
        primaries: &[SourceSummary],
        secondaries: &[IndexedCatalog],
    ) -> Result<BayesFactorTable, MatchError> {
        tracing::info!(
            match_type = self.match_type(),
            primaries = primaries.len(),
            secondaries = secondaries.len(),
            strategy = ?self.selector().strategy(),
            "computing bayes factors"
        );
        let scored: Vec<(SourceId, Vec<CandidateScores>)> = primaries
            .par_iter()
            .map(|primary| -> Result<_, MatchError> {
                Ok((primary.id.clone(), self.score_source(primary, secondaries)?))
            })
            .collect::<Result<_, MatchError>>()?;
        Ok(scored.into_iter().collect())
    }
}

impl BayesFactor for BayesFactorModel {
    fn evaluate(
        &self,
        primary: &SourceSummary,
        catalog: &Catalog,
        candidates: &BTreeSet<RowId>,
    ) -> Result<CandidateScores, MatchError> {
        match self {
            Self::Gaussian { scorer, .. } => scorer.evaluate(primary, catalog, candidates),
            Self::Contour { scorer, .. } => scorer.evaluate(primary, catalog, candidates),
        }
    }
}
