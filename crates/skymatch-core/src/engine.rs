//! # Match Engine
//!
//! Orchestrates one cross-match run. Per primary source:
//!
//! | Stage | Work |
//! |-------|------|
//! | `CandidateSelection` | pixel lookup in every secondary index |
//! | `Scoring` | Bayes factor of every candidate |
//! | `PriorLookup` | one prior per secondary catalog |
//! | `PosteriorCombination` | `1 / (1 + (1 − prior)/(prior · bf))` |
//! | `Thresholding` | keep candidates with posterior above the threshold |
//!
//! [`StreamMatch`] owns the loaded catalogs and computes Bayes factors, the
//! prior and posteriors lazily, each at most once.

use crate::bayes_factor::{BayesFactorModel, BayesFactorTable};
use crate::catalog::{Catalog, SourceSummary};
use crate::config::{MatchConfig, PriorConfig};
use crate::prior::{DENSITY_NAMESPACE, DensityMap, Prior, PriorModel, ScrambleRealization};
use crate::selection::IndexedCatalog;
use crate::storage::{CacheStore, Memoizer, MemoryStore, RedbStore};
use crate::types::{CandidateScores, ConsistencyWarning, MatchError, RowId, SourceId};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// File name of the persistent cache inside `cache_dir`.
pub const CACHE_FILE_NAME: &str = "skymatch-cache.redb";

/// Posterior probabilities per primary source, one map per secondary catalog.
pub type PosteriorTable = BTreeMap<SourceId, Vec<CandidateScores>>;

/// Accepted candidate rows per primary source, one set per secondary catalog.
pub type MatchTable = BTreeMap<SourceId, Vec<BTreeSet<RowId>>>;

// =============================================================================
// STAGES
// =============================================================================

/// Per-source pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchStage {
    CandidateSelection,
    Scoring,
    PriorLookup,
    PosteriorCombination,
    Thresholding,
}

impl MatchStage {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            MatchStage::CandidateSelection => "candidate_selection",
            MatchStage::Scoring => "scoring",
            MatchStage::PriorLookup => "prior_lookup",
            MatchStage::PosteriorCombination => "posterior_combination",
            MatchStage::Thresholding => "thresholding",
        }
    }
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// POSTERIOR
// =============================================================================

/// Association probability from a prior and a Bayes factor.
///
/// A non-positive (or NaN) prior or Bayes factor gives 0, an infinite Bayes
/// factor or a prior of 1 or more gives 1. The result is always in [0, 1].
#[must_use]
pub fn posterior(prior: f64, bayes_factor: f64) -> f64 {
    if prior.is_nan() || bayes_factor.is_nan() || prior <= 0.0 || bayes_factor <= 0.0 {
        return 0.0;
    }
    if prior >= 1.0 || bayes_factor.is_infinite() {
        return 1.0;
    }
    (1.0 / (1.0 + (1.0 - prior) / (prior * bayes_factor))).clamp(0.0, 1.0)
}

// =============================================================================
// REPORT
// =============================================================================

/// Run summary for one secondary catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDiagnostics {
    pub catalog: String,
    pub rows: usize,
    pub sources: usize,
    /// Candidates accepted over all primary sources.
    pub n_matches: usize,
    /// Sum of all posteriors, accepted or not.
    pub posterior_sum: f64,
    pub warnings: Vec<ConsistencyWarning>,
}

/// Serializable result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub name: String,
    pub match_type: String,
    pub prior: String,
    pub posterior_threshold: f64,
    pub primary_catalog: String,
    pub primary_sources: usize,
    pub catalogs: Vec<CatalogDiagnostics>,
    /// Accepted rows per primary source, only sources with at least one match.
    pub matches: MatchTable,
}

// =============================================================================
// STREAM MATCH
// =============================================================================

/// One configured cross-match of a primary catalog against secondaries.
#[derive(Debug)]
pub struct StreamMatch {
    name: String,
    posterior_threshold: f64,
    primary: Catalog,
    primary_sources: Vec<SourceSummary>,
    secondaries: Vec<IndexedCatalog>,
    bayes_factor: BayesFactorModel,
    prior_config: PriorConfig,
    densities: Memoizer<DensityMap>,
    bayes_factors: OnceCell<BayesFactorTable>,
    prior: OnceCell<PriorModel>,
    posteriors: OnceCell<PosteriorTable>,
}

impl StreamMatch {
    /// Validate `config`, open its cache and load every catalog.
    pub fn from_config(config: &MatchConfig) -> Result<Self, MatchError> {
        config.validate()?;
        let store: Arc<dyn CacheStore> = match &config.cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| MatchError::Io(format!("{}: {}", dir.display(), e)))?;
                Arc::new(RedbStore::open(dir.join(CACHE_FILE_NAME))?)
            }
            None => Arc::new(MemoryStore::new()),
        };

        let primary = Catalog::load(&config.primary)?;
        let secondaries = config
            .secondary
            .iter()
            .map(Catalog::load)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(config, primary, secondaries, store)
    }

    /// Build a run over already loaded catalogs.
    ///
    /// Fails with `MatchError::Config` when a catalog lacks a column the
    /// Bayes factor model reads.
    pub fn new(
        config: &MatchConfig,
        primary: Catalog,
        secondaries: Vec<Catalog>,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, MatchError> {
        config.validate()?;
        if secondaries.len() != config.secondary.len() {
            return Err(MatchError::Config(format!(
                "{} secondary catalogs configured, {} given",
                config.secondary.len(),
                secondaries.len()
            )));
        }
        let bayes_factor = BayesFactorModel::from_config(&config.bayes_factor, Arc::clone(&store))?;
        {
            let refs: Vec<&Catalog> = secondaries.iter().collect();
            bayes_factor.check_columns(&primary, &refs)?;
        }

        let primary_sources = primary.sources();
        let secondaries: Vec<IndexedCatalog> = secondaries
            .into_iter()
            .map(|catalog| bayes_factor.selector().index(catalog))
            .collect();
        tracing::info!(
            run = %config.name,
            primary = primary.name(),
            primary_sources = primary_sources.len(),
            secondaries = secondaries.len(),
            match_type = bayes_factor.match_type(),
            prior = config.prior.name(),
            "match run ready"
        );

        Ok(Self {
            name: config.name.clone(),
            posterior_threshold: config.posterior_threshold,
            primary,
            primary_sources,
            secondaries,
            bayes_factor,
            prior_config: config.prior.clone(),
            densities: Memoizer::new(DENSITY_NAMESPACE, store),
            bayes_factors: OnceCell::new(),
            prior: OnceCell::new(),
            posteriors: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn primary(&self) -> &Catalog {
        &self.primary
    }

    #[must_use]
    pub fn primary_sources(&self) -> &[SourceSummary] {
        &self.primary_sources
    }

    #[must_use]
    pub fn secondaries(&self) -> &[IndexedCatalog] {
        &self.secondaries
    }

    #[must_use]
    pub fn bayes_factor_model(&self) -> &BayesFactorModel {
        &self.bayes_factor
    }

    fn secondary_catalogs(&self) -> Vec<&Catalog> {
        self.secondaries.iter().map(|s| &s.catalog).collect()
    }

    /// Bayes factors of every candidate, computed on first access.
    pub fn bayes_factors(&self) -> Result<&BayesFactorTable, MatchError> {
        self.bayes_factors.get_or_try_init(|| {
            self.bayes_factor
                .score_sources(&self.primary_sources, &self.secondaries)
        })
    }

    /// The prior model, built on first access.
    pub fn prior(&self) -> Result<&PriorModel, MatchError> {
        self.prior.get_or_try_init(|| {
            PriorModel::build(
                &self.prior_config,
                &self.primary,
                &self.secondary_catalogs(),
                &self.densities,
            )
        })
    }

    /// Posterior of every scored candidate.
    ///
    /// Requires a prior with per-source values; the RA scramble is a
    /// `MatchError::Config`.
    pub fn posteriors(&self) -> Result<&PosteriorTable, MatchError> {
        self.posteriors.get_or_try_init(|| {
            let prior = self.prior()?;
            if let PriorModel::RaScramble(_) = prior {
                return Err(MatchError::Config(
                    "posteriors need a surface_density prior; ra_scramble only yields a null distribution"
                        .to_string(),
                ));
            }
            let bayes_factors = self.bayes_factors()?;
            let empty: Vec<CandidateScores> = vec![CandidateScores::new(); self.secondaries.len()];

            let combined: Vec<(SourceId, Vec<CandidateScores>)> = self
                .primary_sources
                .par_iter()
                .map(|source| -> Result<_, MatchError> {
                    tracing::trace!(source = %source.id, stage = %MatchStage::PriorLookup);
                    let priors = prior.evaluate(source)?;

                    tracing::trace!(source = %source.id, stage = %MatchStage::PosteriorCombination);
                    let scores = bayes_factors.get(&source.id).unwrap_or(&empty);
                    let per_catalog: Vec<CandidateScores> = scores
                        .iter()
                        .zip(&priors)
                        .map(|(candidates, &p)| {
                            candidates
                                .iter()
                                .map(|(&row, &bf)| (row, posterior(p, bf)))
                                .collect()
                        })
                        .collect();
                    Ok((source.id.clone(), per_catalog))
                })
                .collect::<Result<_, MatchError>>()?;
            Ok(combined.into_iter().collect())
        })
    }

    /// Candidates with a posterior strictly above the threshold.
    ///
    /// Every primary source is present, with one (possibly empty) set per
    /// secondary catalog.
    pub fn matches(&self) -> Result<MatchTable, MatchError> {
        let threshold = self.posterior_threshold;
        Ok(self
            .posteriors()?
            .iter()
            .map(|(id, per_catalog)| {
                tracing::trace!(source = %id, stage = %MatchStage::Thresholding);
                let accepted: Vec<BTreeSet<RowId>> = per_catalog
                    .iter()
                    .map(|scores| {
                        scores
                            .iter()
                            .filter(|&(_, &p)| p > threshold)
                            .map(|(&row, _)| row)
                            .collect()
                    })
                    .collect();
                (id.clone(), accepted)
            })
            .collect())
    }

    /// Accepted candidates per secondary catalog.
    pub fn n_matches(&self) -> Result<Vec<usize>, MatchError> {
        let mut counts = vec![0; self.secondaries.len()];
        for per_catalog in self.matches()?.values() {
            for (count, rows) in counts.iter_mut().zip(per_catalog) {
                *count += rows.len();
            }
        }
        Ok(counts)
    }

    /// Summed posterior mass per secondary catalog.
    pub fn posterior_sum(&self) -> Result<Vec<f64>, MatchError> {
        let mut sums = vec![0.0; self.secondaries.len()];
        for per_catalog in self.posteriors()?.values() {
            for (sum, scores) in sums.iter_mut().zip(per_catalog) {
                *sum += scores.values().sum::<f64>();
            }
        }
        Ok(sums)
    }

    /// Warnings raised while building the prior.
    pub fn consistency_warnings(&self) -> Result<&[ConsistencyWarning], MatchError> {
        Ok(self.prior()?.warnings())
    }

    /// Full run summary.
    pub fn report(&self) -> Result<MatchReport, MatchError> {
        let n_matches = self.n_matches()?;
        let posterior_sum = self.posterior_sum()?;
        let warnings = self.consistency_warnings()?;

        let catalogs = self
            .secondaries
            .iter()
            .enumerate()
            .map(|(i, secondary)| CatalogDiagnostics {
                catalog: secondary.catalog.name().to_string(),
                rows: secondary.catalog.len(),
                sources: secondary.catalog.source_count(),
                n_matches: n_matches.get(i).copied().unwrap_or(0),
                posterior_sum: posterior_sum.get(i).copied().unwrap_or(0.0),
                warnings: warnings
                    .iter()
                    .filter(|w| w.secondary == i)
                    .cloned()
                    .collect(),
            })
            .collect();

        let matches = self
            .matches()?
            .into_iter()
            .filter(|(_, per_catalog)| per_catalog.iter().any(|rows| !rows.is_empty()))
            .collect();

        let report = MatchReport {
            name: self.name.clone(),
            match_type: self.bayes_factor.match_type().to_string(),
            prior: self.prior_config.name().to_string(),
            posterior_threshold: self.posterior_threshold,
            primary_catalog: self.primary.name().to_string(),
            primary_sources: self.primary_sources.len(),
            catalogs,
            matches,
        };
        tracing::info!(
            run = %report.name,
            matches = n_matches.iter().sum::<usize>(),
            warnings = warnings.len(),
            "match run complete"
        );
        Ok(report)
    }

    /// RA-scramble null distribution. Requires the `ra_scramble` prior.
    pub fn scrambled_distribution(&self) -> Result<Vec<ScrambleRealization>, MatchError> {
        match self.prior()? {
            PriorModel::RaScramble(scramble) => scramble.scrambled_distribution(
                &self.bayes_factor,
                &self.primary_sources,
                &self.secondary_catalogs(),
            ),
            other => Err(MatchError::Config(format!(
                "scrambled distribution needs the ra_scramble prior, configured prior is {}",
                other.name()
            ))),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
