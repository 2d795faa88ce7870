//! RA-scramble null distribution.
//!
//! Each realization permutes the `ra` column of every secondary catalog
//! (declinations stay put), re-indexes the catalogs and recomputes the full
//! Bayes factor table. Real spatial coincidences are destroyed while the
//! declination structure of each survey is kept, so the scores estimate the
//! "unrelated" population empirically.
//!
//! Every realization draws from its own generator, seeded from a master
//! generator; a configured master seed makes the whole distribution
//! reproducible.

use crate::bayes_factor::{BayesFactorModel, BayesFactorTable};
use crate::catalog::{Catalog, SourceSummary};
use crate::selection::IndexedCatalog;
use crate::types::MatchError;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// One scrambled Bayes factor table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrambleRealization {
    pub index: usize,
    /// Seed of this realization's generator.
    pub seed: u64,
    pub bayes_factors: BayesFactorTable,
}

impl ScrambleRealization {
    /// All positive scores against secondary catalog `secondary`.
    #[must_use]
    pub fn scores(&self, secondary: usize) -> Vec<f64> {
        self.bayes_factors
            .values()
            .filter_map(|per_catalog| per_catalog.get(secondary))
            .flat_map(|scores| scores.values().copied())
            .filter(|v| *v > 0.0)
            .collect()
    }
}

/// Monte Carlo null from RA-permuted secondary catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaScramblePrior {
    n_scrambles: usize,
    seed: Option<u64>,
}

impl RaScramblePrior {
    #[must_use]
    pub fn new(n_scrambles: usize, seed: Option<u64>) -> Self {
        Self { n_scrambles, seed }
    }

    #[must_use]
    pub fn n_scrambles(&self) -> usize {
        self.n_scrambles
    }

    /// Scramble once with `rng` and score every primary source.
    pub fn realize_scramble<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        model: &BayesFactorModel,
        primaries: &[SourceSummary],
        secondaries: &[&Catalog],
    ) -> Result<BayesFactorTable, MatchError> {
        let scrambled: Vec<IndexedCatalog> = secondaries
            .iter()
            .map(|catalog| model.selector().index(catalog.with_scrambled_ra(rng)))
            .collect();
        model.score_sources(primaries, &scrambled)
    }

    /// `n_scrambles` independent realizations.
    pub fn scrambled_distribution(
        &self,
        model: &BayesFactorModel,
        primaries: &[SourceSummary],
        secondaries: &[&Catalog],
    ) -> Result<Vec<ScrambleRealization>, MatchError> {
        let mut master = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let seeds: Vec<u64> = (0..self.n_scrambles).map(|_| master.next_u64()).collect();

        seeds
            .into_iter()
            .enumerate()
            .map(|(index, seed)| {
                tracing::info!(realization = index + 1, of = self.n_scrambles, "scrambling right ascensions");
                let mut rng = StdRng::seed_from_u64(seed);
                Ok(ScrambleRealization {
                    index,
                    seed,
                    bayes_factors: self.realize_scramble(&mut rng, model, primaries, secondaries)?,
                })
            })
            .collect()
    }
}
