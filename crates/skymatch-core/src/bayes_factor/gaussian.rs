//! Gaussian positional Bayes factor.

use super::BayesFactor;
use crate::catalog::{Catalog, SourceSummary};
use crate::primitives::SQARCSEC_TO_SR;
use crate::types::{CandidateScores, MatchError, RowId};
use std::collections::BTreeSet;

/// Same-source likelihood of two Gaussian positions over a uniform sky.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianBayesFactor {
    disc_radius_arcsec: Option<f64>,
}

impl GaussianBayesFactor {
    #[must_use]
    pub fn new(disc_radius_arcsec: Option<f64>) -> Self {
        Self { disc_radius_arcsec }
    }
}

/// `2/s² · exp(−ψ²/(2s²))`, with ψ and s in arcseconds, converted from
/// per square arcsecond to per steradian.
#[must_use]
pub fn gaussian_bayes_factor(separation_arcsec: f64, sigma_sum_sq: f64) -> f64 {
    2.0 / sigma_sum_sq * (-separation_arcsec.powi(2) / (2.0 * sigma_sum_sq)).exp() / SQARCSEC_TO_SR
}

impl BayesFactor for GaussianBayesFactor {
    fn evaluate(
        &self,
        primary: &SourceSummary,
        catalog: &Catalog,
        candidates: &BTreeSet<RowId>,
    ) -> Result<CandidateScores, MatchError> {
        let primary_sigma = primary.sigma_arcsec.ok_or_else(|| {
            MatchError::Config(format!(
                "primary source {} has no sigma_arcsec",
                primary.id
            ))
        })?;

        let mut scores = CandidateScores::new();
        for &row in candidates {
            let Some(detection) = catalog.row(row) else {
                continue;
            };
            let Some(sigma) = detection.sigma_arcsec else {
                tracing::warn!(source = %primary.id, row = %row, "candidate has no sigma_arcsec");
                continue;
            };
            let psi = primary.position.separation_arcsec(&detection.position);
            if self.disc_radius_arcsec.is_some_and(|radius| psi >= radius) {
                continue;
            }
            let sigma_sum_sq = primary_sigma.powi(2) + sigma.powi(2);
            if sigma_sum_sq <= 0.0 {
                tracing::warn!(source = %primary.id, row = %row, "zero combined uncertainty");
                continue;
            }
            scores.insert(row, gaussian_bayes_factor(psi, sigma_sum_sq));
        }
        tracing::debug!(
            source = %primary.id,
            candidates = candidates.len(),
            scored = scores.len(),
            "gaussian scoring"
        );
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Columns, Detection};
    use crate::types::{SkyPosition, SourceId};
    use approx::assert_relative_eq;

    fn secondary(rows: &[(f64, f64, f64)]) -> Catalog {
        let rows = rows
            .iter()
            .enumerate()
            .map(|(i, (ra, dec, sigma))| Detection {
                position: SkyPosition::new(*ra, *dec).expect("valid"),
                sigma_arcsec: Some(*sigma),
                localization: None,
                group: SourceId::new(i.to_string()),
            })
            .collect();
        Catalog::from_detections(
            "secondary",
            rows,
            Columns {
                sigma_arcsec: true,
                localization: false,
            },
        )
    }

    fn primary(ra: f64, dec: f64, sigma: f64) -> SourceSummary {
        SourceSummary {
            id: SourceId::new("p"),
            position: SkyPosition::new(ra, dec).expect("valid"),
            sigma_arcsec: Some(sigma),
            rows: vec![RowId(0)],
        }
    }

    #[test]
    fn coincident_positions_give_peak_value() {
        let catalog = secondary(&[(10.0, 10.0, 1.0)]);
        let model = GaussianBayesFactor::new(Some(100.0));
        let scores = model
            .evaluate(&primary(10.0, 10.0, 1.0), &catalog, &BTreeSet::from([RowId(0)]))
            .expect("scores");
        assert_relative_eq!(scores[&RowId(0)], 1.0 / SQARCSEC_TO_SR, max_relative = 1e-9);
    }

    #[test]
    fn outside_radius_is_absent() {
        let catalog = secondary(&[(10.0, 10.0, 1.0), (10.0, 10.5, 1.0)]);
        let model = GaussianBayesFactor::new(Some(100.0));
        let scores = model
            .evaluate(
                &primary(10.0, 10.0, 1.0),
                &catalog,
                &BTreeSet::from([RowId(0), RowId(1)]),
            )
            .expect("scores");
        assert!(scores.contains_key(&RowId(0)));
        assert!(!scores.contains_key(&RowId(1)));
    }

    #[test]
    fn no_radius_keeps_distant_candidates() {
        let catalog = secondary(&[(10.0, 10.5, 1.0)]);
        let model = GaussianBayesFactor::new(None);
        let scores = model
            .evaluate(&primary(10.0, 10.0, 1.0), &catalog, &BTreeSet::from([RowId(0)]))
            .expect("scores");
        assert_eq!(scores.len(), 1);
        assert!(scores[&RowId(0)] >= 0.0);
    }

    #[test]
    fn score_decreases_with_separation() {
        let mut previous = f64::INFINITY;
        for psi in [0.0, 0.5, 1.0, 2.0, 5.0] {
            let value = gaussian_bayes_factor(psi, 2.0);
            assert!(value < previous);
            previous = value;
        }
    }

    #[test]
    fn candidate_without_sigma_is_skipped() {
        let mut rows: Vec<Detection> = secondary(&[(10.0, 10.0, 1.0), (10.0, 10.0, 1.0)])
            .rows()
            .map(|(_, d)| d.clone())
            .collect();
        rows[0].sigma_arcsec = None;
        let catalog = Catalog::from_detections(
            "partial",
            rows,
            Columns {
                sigma_arcsec: true,
                localization: false,
            },
        );
        let scores = GaussianBayesFactor::new(Some(100.0))
            .evaluate(
                &primary(10.0, 10.0, 1.0),
                &catalog,
                &BTreeSet::from([RowId(0), RowId(1)]),
            )
            .expect("scores");
        assert!(!scores.contains_key(&RowId(0)));
        assert_relative_eq!(scores[&RowId(1)], 1.0 / SQARCSEC_TO_SR, max_relative = 1e-9);
    }

    #[test]
    fn missing_primary_sigma_is_config_error() {
        let catalog = secondary(&[(10.0, 10.0, 1.0)]);
        let mut p = primary(10.0, 10.0, 1.0);
        p.sigma_arcsec = None;
        let err = GaussianBayesFactor::new(Some(100.0))
            .evaluate(&p, &catalog, &BTreeSet::from([RowId(0)]))
            .expect_err("must fail");
        assert!(matches!(err, MatchError::Config(_)));
    }
}
