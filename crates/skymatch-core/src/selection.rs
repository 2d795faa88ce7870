//! # Candidate Selection
//!
//! Narrows each secondary catalog to the rows near a primary position.
//!
//! Two tiers, chosen by comparing the index resolution to the disc radius:
//! - index finer than the radius: the pixels overlapping the disc
//! - otherwise: the primary's pixel and its neighbours
//!
//! The coarse tier does not filter by exact separation; scorers that care
//! (the Gaussian model) apply the radius themselves. Without a radius every
//! row is a candidate.

use crate::catalog::Catalog;
use crate::healpix::Healpix;
use crate::types::{MatchError, RowId, SkyPosition};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// PIXEL INDEX
// =============================================================================

/// Pixel → rows map of one catalog. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct PixelIndex {
    healpix: Healpix,
    cells: BTreeMap<u64, Vec<RowId>>,
    row_count: usize,
}

impl PixelIndex {
    /// Bin every row of `catalog` on `healpix`.
    #[must_use]
    pub fn build(catalog: &Catalog, healpix: Healpix) -> Self {
        let mut cells: BTreeMap<u64, Vec<RowId>> = BTreeMap::new();
        for (id, detection) in catalog.rows() {
            cells
                .entry(healpix.pixel_of(&detection.position))
                .or_default()
                .push(id);
        }
        Self {
            healpix,
            cells,
            row_count: catalog.len(),
        }
    }

    #[must_use]
    pub fn healpix(&self) -> Healpix {
        self.healpix
    }

    /// Number of pixels holding at least one row.
    #[must_use]
    pub fn occupied_pixels(&self) -> usize {
        self.cells.len()
    }

    /// Rows binned into any of `pixels`.
    #[must_use]
    pub fn rows_in<'a>(&self, pixels: impl IntoIterator<Item = &'a u64>) -> BTreeSet<RowId> {
        pixels
            .into_iter()
            .filter_map(|p| self.cells.get(p))
            .flatten()
            .copied()
            .collect()
    }

    /// Every row of the indexed catalog.
    #[must_use]
    pub fn all_rows(&self) -> BTreeSet<RowId> {
        (0..self.row_count).map(RowId).collect()
    }
}

/// A catalog together with its pixel index.
#[derive(Debug, Clone)]
pub struct IndexedCatalog {
    pub catalog: Catalog,
    pub index: PixelIndex,
}

// =============================================================================
// SELECTOR
// =============================================================================

/// How candidates are pre-selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Pixels overlapping the disc.
    Disc,
    /// Primary pixel plus its neighbours.
    Neighbors,
    /// No radius configured: every row.
    Everything,
}

/// Candidate pre-selection on a fixed grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateSelector {
    healpix: Healpix,
    disc_radius_arcsec: Option<f64>,
}

impl CandidateSelector {
    pub fn new(nside: u32, disc_radius_arcsec: Option<f64>) -> Result<Self, MatchError> {
        if let Some(radius) = disc_radius_arcsec {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(MatchError::Config(format!(
                    "disc_radius_arcsec must be positive and finite, got {radius}"
                )));
            }
        }
        Ok(Self {
            healpix: Healpix::new(nside)?,
            disc_radius_arcsec,
        })
    }

    #[must_use]
    pub fn healpix(&self) -> Healpix {
        self.healpix
    }

    #[must_use]
    pub fn disc_radius_arcsec(&self) -> Option<f64> {
        self.disc_radius_arcsec
    }

    #[must_use]
    pub fn strategy(&self) -> SelectionStrategy {
        match self.disc_radius_arcsec {
            None => SelectionStrategy::Everything,
            Some(radius) if self.healpix.resolution_arcsec() < radius => SelectionStrategy::Disc,
            Some(_) => SelectionStrategy::Neighbors,
        }
    }

    /// Index `catalog` on this selector's grid.
    #[must_use]
    pub fn index(&self, catalog: Catalog) -> IndexedCatalog {
        let index = PixelIndex::build(&catalog, self.healpix);
        IndexedCatalog { catalog, index }
    }

    /// Pixels to search around `position`; `None` means everywhere.
    #[must_use]
    pub fn search_pixels(&self, position: &SkyPosition) -> Option<BTreeSet<u64>> {
        match (self.strategy(), self.disc_radius_arcsec) {
            (SelectionStrategy::Disc, Some(radius)) => {
                let radius_rad = (radius / 3600.0).to_radians();
                Some(self.healpix.query_disc(position, radius_rad))
            }
            (SelectionStrategy::Neighbors, _) => Some(
                self.healpix
                    .pixel_with_neighbors(self.healpix.pixel_of(position))
                    .into_iter()
                    .collect(),
            ),
            _ => None,
        }
    }

    /// One candidate set per secondary catalog, in catalog order.
    #[must_use]
    pub fn select(
        &self,
        position: &SkyPosition,
        secondaries: &[IndexedCatalog],
    ) -> Vec<BTreeSet<RowId>> {
        let pixels = self.search_pixels(position);
        secondaries
            .iter()
            .map(|secondary| match &pixels {
                Some(pixels) => secondary.index.rows_in(pixels),
                None => secondary.index.all_rows(),
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Columns, Detection};
    use crate::types::SourceId;

    fn catalog(positions: &[(f64, f64)]) -> Catalog {
        let rows = positions
            .iter()
            .enumerate()
            .map(|(i, (ra, dec))| Detection {
                position: SkyPosition::new(*ra, *dec).expect("valid"),
                sigma_arcsec: Some(1.0),
                localization: None,
                group: SourceId::new(i.to_string()),
            })
            .collect();
        Catalog::from_detections("test", rows, Columns::default())
    }

    #[test]
    fn strategy_follows_resolution() {
        // nside 1024 ~ 206 arcsec
        assert_eq!(
            CandidateSelector::new(1024, Some(100.0)).expect("sel").strategy(),
            SelectionStrategy::Neighbors
        );
        // nside 8192 ~ 26 arcsec
        assert_eq!(
            CandidateSelector::new(8192, Some(100.0)).expect("sel").strategy(),
            SelectionStrategy::Disc
        );
        assert_eq!(
            CandidateSelector::new(64, None).expect("sel").strategy(),
            SelectionStrategy::Everything
        );
    }

    #[test]
    fn rejects_bad_radius_and_nside() {
        assert!(CandidateSelector::new(64, Some(-1.0)).is_err());
        assert!(CandidateSelector::new(64, Some(f64::NAN)).is_err());
        assert!(CandidateSelector::new(100, Some(10.0)).is_err());
    }

    #[test]
    fn disc_selection_finds_nearby_rows_only() {
        let selector = CandidateSelector::new(8192, Some(100.0)).expect("sel");
        let secondary = selector.index(catalog(&[(150.0, 2.0), (150.01, 2.0), (151.0, 2.0)]));
        let origin = SkyPosition::new(150.0, 2.0).expect("valid");

        let selected = selector.select(&origin, std::slice::from_ref(&secondary));
        assert_eq!(selected.len(), 1);
        assert!(selected[0].contains(&RowId(0)));
        assert!(selected[0].contains(&RowId(1)));
        assert!(!selected[0].contains(&RowId(2)));
    }

    #[test]
    fn empty_neighbourhood_is_empty_set() {
        let selector = CandidateSelector::new(1024, Some(100.0)).expect("sel");
        let secondary = selector.index(catalog(&[(10.0, 10.0)]));
        let origin = SkyPosition::new(200.0, -40.0).expect("valid");
        let selected = selector.select(&origin, &[secondary]);
        assert!(selected[0].is_empty());
    }

    #[test]
    fn no_radius_selects_everything() {
        let selector = CandidateSelector::new(16, None).expect("sel");
        let a = selector.index(catalog(&[(10.0, 10.0), (200.0, -40.0)]));
        let b = selector.index(catalog(&[(300.0, 80.0)]));
        let origin = SkyPosition::new(0.0, 0.0).expect("valid");
        let selected = selector.select(&origin, &[a, b]);
        assert_eq!(selected[0].len(), 2);
        assert_eq!(selected[1].len(), 1);
    }

    #[test]
    fn index_counts_occupied_pixels() {
        let selector = CandidateSelector::new(4, Some(100.0)).expect("sel");
        let indexed = selector.index(catalog(&[(10.0, 10.0), (10.001, 10.0), (200.0, -40.0)]));
        assert_eq!(indexed.index.occupied_pixels(), 2);
        assert_eq!(indexed.index.all_rows().len(), 3);
    }
}
