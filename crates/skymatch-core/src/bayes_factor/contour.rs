//! Localization-contour Bayes factor.
//!
//! Each candidate carries a localization map. The map is reduced to its
//! confidence contour once per distinct file content; the primary is then
//! either inside (strong evidence, scaled by the contour's smallness) or
//! outside (weak evidence against). This is a fixed-confidence,
//! two-hypothesis approximation, not an integral over the likelihood surface.

use super::BayesFactor;
use crate::catalog::{Catalog, Localization, SourceSummary};
use crate::formats::{ContourRegion, LocalizationMap};
use crate::storage::{CacheStore, Memoizer, content_key};
use crate::types::{CandidateScores, MatchError, RowId};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Memoizer namespace of contour regions.
const CONTOUR_NAMESPACE: &str = "contour";

type RegionCell = Arc<OnceCell<Arc<ContourRegion>>>;

/// Contour-based scoring of candidates with localization maps.
#[derive(Debug)]
pub struct ContourBayesFactor {
    contours: Memoizer<ContourRegion>,
    /// One cell per map path; a file is read by the first caller only.
    by_path: Mutex<BTreeMap<PathBuf, RegionCell>>,
}

impl ContourBayesFactor {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            contours: Memoizer::new(CONTOUR_NAMESPACE, store),
            by_path: Mutex::new(BTreeMap::new()),
        }
    }

    /// The contour of a candidate's localization map.
    pub fn region(&self, localization: &Localization) -> Result<Arc<ContourRegion>, MatchError> {
        let cell = {
            let mut cells = self
                .by_path
                .lock()
                .map_err(|_| MatchError::Cache("contour path map lock poisoned".to_string()))?;
            Arc::clone(cells.entry(localization.filename.clone()).or_default())
        };
        let region = Arc::clone(cell.get_or_try_init(|| self.region_from_file(localization))?);

        if region.nside != localization.nside {
            return Err(MatchError::DataFormat(format!(
                "{} has nside {}, catalog says {}",
                localization.filename.display(),
                region.nside,
                localization.nside
            )));
        }
        Ok(region)
    }

    /// Read the map and resolve its contour, keyed by file content.
    fn region_from_file(&self, localization: &Localization) -> Result<Arc<ContourRegion>, MatchError> {
        let bytes = std::fs::read(&localization.filename).map_err(|e| {
            MatchError::DataFormat(format!("{}: {}", localization.filename.display(), e))
        })?;
        let key = content_key(&bytes);
        self.contours.get_or_compute(&key, || {
            let map = LocalizationMap::from_json_slice(&bytes)?;
            ContourRegion::from_map(&map)
        })
    }

    fn score(&self, primary: &SourceSummary, localization: &Localization) -> Result<f64, MatchError> {
        self.region(localization)?.bayes_factor(&primary.position)
    }
}

impl BayesFactor for ContourBayesFactor {
    fn evaluate(
        &self,
        primary: &SourceSummary,
        catalog: &Catalog,
        candidates: &BTreeSet<RowId>,
    ) -> Result<CandidateScores, MatchError> {
        let mut scores = CandidateScores::new();
        for &row in candidates {
            let Some(localization) = catalog.row(row).and_then(|d| d.localization.as_ref())
            else {
                continue;
            };
            let value = match self.score(primary, localization) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        source = %primary.id,
                        row = %row,
                        "localization map unusable, scoring 0: {}",
                        e
                    );
                    0.0
                }
            };
            scores.insert(row, value);
        }
        Ok(scores)
    }
}
