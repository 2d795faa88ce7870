//! Surface-density prior.
//!
//! All catalogs are binned on one coarse grid. In each pixel the density of
//! a catalog is its number of source groups (at their median positions) per
//! steradian. For a set of `k` catalogs the prior of a true association is
//!
//! ```text
//! p(pix) = ρ_*(pix) / (Π_i ρ_i(pix) · (4π)^(k−1))
//! ```
//!
//! where `ρ_*` is the smallest of the member densities: a pixel cannot hold
//! more true associations than its sparsest catalog has sources. Pixels where
//! any member is empty have prior 0.

use super::Prior;
use crate::catalog::{Catalog, SourceSummary};
use crate::healpix::Healpix;
use crate::primitives::{FOUR_PI, PRIOR_CONSISTENCY_LOG2_TOLERANCE, SQDG_TO_SR};
use crate::storage::{ContentHasher, Memoizer};
use crate::types::{ConsistencyWarning, MatchError, SkyPosition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Memoizer namespace of density maps.
pub const DENSITY_NAMESPACE: &str = "density";

// =============================================================================
// DENSITY MAP
// =============================================================================

/// Per-catalog source densities on a shared grid. Catalog 0 is the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityMap {
    pub nside: u32,
    /// Number of source groups binned per catalog.
    pub source_counts: Vec<usize>,
    /// Non-zero densities (sources per steradian) per catalog.
    pub densities: Vec<BTreeMap<u64, f64>>,
}

impl DensityMap {
    /// Bin the source positions of each catalog.
    #[must_use]
    pub fn compute(healpix: Healpix, catalogs: &[Vec<SkyPosition>]) -> Self {
        let pixel_area = healpix.pixel_area_sr();
        let densities = catalogs
            .iter()
            .map(|positions| {
                let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
                for position in positions {
                    *counts.entry(healpix.pixel_of(position)).or_default() += 1;
                }
                counts
                    .into_iter()
                    .map(|(pixel, n)| (pixel, n as f64 / pixel_area))
                    .collect()
            })
            .collect();
        Self {
            nside: healpix.nside(),
            source_counts: catalogs.iter().map(Vec::len).collect(),
            densities,
        }
    }

    /// Density of `catalog` in `pixel`; 0 for empty pixels.
    #[must_use]
    pub fn density(&self, catalog: usize, pixel: u64) -> f64 {
        self.densities
            .get(catalog)
            .and_then(|d| d.get(&pixel))
            .copied()
            .unwrap_or(0.0)
    }

    /// Prior map of the catalog set `members` (at least two indices).
    ///
    /// The numerator is the smallest member density of each pixel, not the
    /// density of one fixed catalog. Where every catalog covers the sky
    /// uniformly this equals the local density of the globally smallest one.
    pub fn prior_map(&self, members: &[usize]) -> Result<PriorMap, MatchError> {
        if members.len() < 2 {
            return Err(MatchError::Config(
                "a prior needs at least two catalogs".to_string(),
            ));
        }
        if let Some(bad) = members.iter().find(|&&m| m >= self.densities.len()) {
            return Err(MatchError::Config(format!(
                "catalog index {bad} out of range ({} catalogs)",
                self.densities.len()
            )));
        }

        let scale = FOUR_PI.powi(members.len() as i32 - 1);
        let mut values = BTreeMap::new();
        for &pixel in self.densities[members[0]].keys() {
            let member_densities: Vec<f64> = members.iter().map(|&m| self.density(m, pixel)).collect();
            if member_densities.iter().any(|d| *d <= 0.0) {
                continue;
            }
            let sparsest = member_densities.iter().copied().fold(f64::INFINITY, f64::min);
            let product: f64 = member_densities.iter().product();
            values.insert(pixel, sparsest / (product * scale));
        }

        Ok(PriorMap {
            nside: self.nside,
            members: members.to_vec(),
            values,
        })
    }
}

/// Prior probability per pixel for one catalog set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorMap {
    pub nside: u32,
    /// Catalog indices; the first is the primary.
    pub members: Vec<usize>,
    values: BTreeMap<u64, f64>,
}

impl PriorMap {
    /// Prior in `pixel`; 0 where any member catalog is empty.
    #[must_use]
    pub fn value(&self, pixel: u64) -> f64 {
        self.values.get(&pixel).copied().unwrap_or(0.0)
    }

    /// Number of pixels with a non-zero prior.
    #[must_use]
    pub fn support(&self) -> usize {
        self.values.len()
    }

    fn median(&self) -> Option<f64> {
        crate::catalog::median(self.values.values().copied().collect())
    }
}

// =============================================================================
// CONSISTENCY
// =============================================================================

/// Compare the prior mass over the primary sources with the expected number
/// of chance associations, `(area/4π)^(k−1)`.
///
/// Returns a warning when `|log2(total/expected)|` exceeds the tolerance.
#[must_use]
pub fn check_consistency(
    map: &PriorMap,
    density: &DensityMap,
    primary_pixels: &[u64],
    area_sr: f64,
    secondary: usize,
) -> Option<ConsistencyWarning> {
    let counts: Vec<f64> = map
        .members
        .iter()
        .map(|&m| density.source_counts.get(m).copied().unwrap_or(0) as f64)
        .collect();
    let sparsest = counts.iter().copied().fold(f64::INFINITY, f64::min);
    let others: f64 = counts.iter().skip(1).product();

    let mass: f64 = primary_pixels.iter().map(|&p| map.value(p)).sum();
    let total_prior = if sparsest > 0.0 { mass * others / sparsest } else { 0.0 };
    let expected = (area_sr / FOUR_PI).powi(map.members.len() as i32 - 1);
    let log2_ratio = (total_prior / expected).log2();

    tracing::debug!(secondary, total_prior, expected, log2_ratio, "prior consistency");
    // NaN and infinite ratios fail the check too.
    if log2_ratio.abs() <= PRIOR_CONSISTENCY_LOG2_TOLERANCE {
        None
    } else {
        Some(ConsistencyWarning {
            secondary,
            total_prior,
            expected,
            log2_ratio,
        })
    }
}

// =============================================================================
// PRIOR
// =============================================================================

/// Parameters of the surface-density prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceDensityParams {
    pub nside: u32,
    pub area_sqdg: f64,
    pub check_consistency: bool,
    pub strict_consistency: bool,
}

/// Pairwise (primary, secondary) surface-density priors.
#[derive(Debug)]
pub struct SurfaceDensityPrior {
    healpix: Healpix,
    params: SurfaceDensityParams,
    density: Arc<DensityMap>,
    pair_maps: Vec<PriorMap>,
    warnings: Vec<ConsistencyWarning>,
}

impl SurfaceDensityPrior {
    /// Bin all catalogs, build one prior map per secondary catalog and run
    /// the consistency check.
    ///
    /// Fails with `MatchError::Consistency` only in strict mode.
    pub fn build(
        params: SurfaceDensityParams,
        primary: &Catalog,
        secondaries: &[&Catalog],
        densities: &Memoizer<DensityMap>,
    ) -> Result<Self, MatchError> {
        let healpix = Healpix::new(params.nside)?;
        let primary_sources = primary.sources();
        let secondary_sources: Vec<Vec<SourceSummary>> =
            secondaries.iter().map(|c| c.sources()).collect();
        let positions: Vec<Vec<SkyPosition>> = std::iter::once(&primary_sources)
            .chain(&secondary_sources)
            .map(|sources| sources.iter().map(|s| s.position).collect())
            .collect();

        let mut hasher = ContentHasher::new();
        hasher.update_u64(u64::from(params.nside));
        for catalog in &positions {
            hasher.update_u64(catalog.len() as u64);
            for p in catalog {
                hasher.update_f64(p.ra).update_f64(p.dec);
            }
        }
        let density = densities.get_or_compute(&hasher.finalize(), || {
            tracing::info!(nside = params.nside, catalogs = positions.len(), "computing density map");
            Ok(DensityMap::compute(healpix, &positions))
        })?;

        let pair_maps = (1..=secondaries.len())
            .map(|i| density.prior_map(&[0, i]))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, map) in pair_maps.iter().enumerate() {
            tracing::info!(
                secondary = i,
                support = map.support(),
                median_prior = map.median().unwrap_or(0.0),
                "prior map ready"
            );
        }

        let mut warnings = Vec::new();
        if params.check_consistency {
            let primary_pixels: Vec<u64> = primary_sources
                .iter()
                .map(|s| healpix.pixel_of(&s.position))
                .collect();
            let area_sr = params.area_sqdg * SQDG_TO_SR;
            for (i, map) in pair_maps.iter().enumerate() {
                if let Some(warning) = check_consistency(map, &density, &primary_pixels, area_sr, i) {
                    if params.strict_consistency {
                        return Err(MatchError::Consistency(warning));
                    }
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        Ok(Self {
            healpix,
            params,
            density,
            pair_maps,
            warnings,
        })
    }

    #[must_use]
    pub fn params(&self) -> SurfaceDensityParams {
        self.params
    }

    #[must_use]
    pub fn density_map(&self) -> &DensityMap {
        &self.density
    }

    /// Prior map of the primary and secondary catalog `secondary`.
    #[must_use]
    pub fn pair_map(&self, secondary: usize) -> Option<&PriorMap> {
        self.pair_maps.get(secondary)
    }

    /// Prior map of all catalogs at once (`k` = number of catalogs).
    pub fn joint_map(&self) -> Result<PriorMap, MatchError> {
        let members: Vec<usize> = (0..self.density.densities.len()).collect();
        self.density.prior_map(&members)
    }

    /// Consistency warnings raised while building.
    #[must_use]
    pub fn warnings(&self) -> &[ConsistencyWarning] {
        &self.warnings
    }
}

impl Prior for SurfaceDensityPrior {
    fn evaluate(&self, primary: &SourceSummary) -> Result<Vec<f64>, MatchError> {
        let pixel = self.healpix.pixel_of(&primary.position);
        Ok(self.pair_maps.iter().map(|m| m.value(pixel)).collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Columns, Detection};
    use crate::storage::{CacheStore, MemoryStore};
    use crate::types::SourceId;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn uniform_positions(rng: &mut ChaCha8Rng, n: usize) -> Vec<SkyPosition> {
        (0..n)
            .map(|_| {
                let z: f64 = rng.gen_range(-1.0..1.0);
                SkyPosition {
                    ra: rng.gen_range(0.0..360.0),
                    dec: z.asin().to_degrees(),
                }
            })
            .collect()
    }

    /// Uniform over the cap north of `min_dec`.
    fn cap_positions(rng: &mut ChaCha8Rng, n: usize, min_dec: f64) -> Vec<SkyPosition> {
        let z_min = min_dec.to_radians().sin();
        (0..n)
            .map(|_| {
                let z: f64 = rng.gen_range(z_min..1.0);
                SkyPosition {
                    ra: rng.gen_range(0.0..360.0),
                    dec: z.asin().to_degrees(),
                }
            })
            .collect()
    }

    fn catalog(name: &str, positions: &[SkyPosition]) -> Catalog {
        let rows = positions
            .iter()
            .enumerate()
            .map(|(i, p)| Detection {
                position: *p,
                sigma_arcsec: Some(1.0),
                localization: None,
                group: SourceId::new(format!("{i:06}")),
            })
            .collect();
        Catalog::from_detections(name, rows, Columns::default())
    }

    fn memo() -> Memoizer<DensityMap> {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        Memoizer::new(DENSITY_NAMESPACE, store)
    }

    fn params(area_sqdg: f64, strict: bool) -> SurfaceDensityParams {
        SurfaceDensityParams {
            nside: 4,
            area_sqdg,
            check_consistency: true,
            strict_consistency: strict,
        }
    }

    #[test]
    fn prior_formula_in_single_pixel() {
        let healpix = Healpix::new(1).expect("nside");
        let here = SkyPosition::new(45.0, 40.0).expect("valid");
        let density = DensityMap::compute(healpix, &[vec![here; 2], vec![here; 8]]);
        let area = healpix.pixel_area_sr();
        assert_relative_eq!(density.density(0, 0), 2.0 / area);

        let map = density.prior_map(&[0, 1]).expect("map");
        let expected = (2.0 / area) / ((2.0 / area) * (8.0 / area) * FOUR_PI);
        assert_relative_eq!(map.value(0), expected, max_relative = 1e-12);
        assert_eq!(map.value(5), 0.0);
        assert_eq!(map.support(), 1);
    }

    #[test]
    fn empty_pixel_gives_zero_prior() {
        let healpix = Healpix::new(1).expect("nside");
        let north = SkyPosition::new(45.0, 40.0).expect("valid");
        let south = SkyPosition::new(45.0, -40.0).expect("valid");
        let density = DensityMap::compute(healpix, &[vec![north, south], vec![north]]);
        let map = density.prior_map(&[0, 1]).expect("map");
        assert!(map.value(healpix.pixel_of(&north)) > 0.0);
        assert_eq!(map.value(healpix.pixel_of(&south)), 0.0);
    }

    #[test]
    fn prior_map_rejects_bad_members() {
        let density = DensityMap::compute(Healpix::new(1).expect("nside"), &[Vec::new()]);
        assert!(density.prior_map(&[0]).is_err());
        assert!(density.prior_map(&[0, 3]).is_err());
    }

    #[test]
    fn uniform_full_sky_is_consistent() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let primary = catalog("primary", &uniform_positions(&mut rng, 5000));
        let secondary = catalog("secondary", &uniform_positions(&mut rng, 20000));

        let prior = SurfaceDensityPrior::build(
            params(crate::primitives::FULL_SKY_SQDG, true),
            &primary,
            &[&secondary],
            &memo(),
        )
        .expect("consistent prior");
        assert!(prior.warnings().is_empty());

        let values = prior.evaluate(&primary.sources()[0]).expect("prior");
        assert_eq!(values.len(), 1);
        assert!(values[0] > 0.0);
    }

    #[test]
    fn wrong_area_warns_or_fails_when_strict() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let primary = catalog("primary", &uniform_positions(&mut rng, 2000));
        let secondary = catalog("secondary", &uniform_positions(&mut rng, 4000));

        let lenient = SurfaceDensityPrior::build(params(100.0, false), &primary, &[&secondary], &memo())
            .expect("lenient build");
        assert_eq!(lenient.warnings().len(), 1);
        assert!(lenient.warnings()[0].log2_ratio > 2.0);

        let strict = SurfaceDensityPrior::build(params(100.0, true), &primary, &[&secondary], &memo());
        assert!(matches!(strict, Err(MatchError::Consistency(_))));
    }

    #[test]
    fn uniform_cap_is_consistent_with_its_area() {
        // dec > 30 deg covers pi steradians.
        let cap_sqdg = std::f64::consts::PI / SQDG_TO_SR;
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let primary = catalog("primary", &cap_positions(&mut rng, 3000, 30.0));
        let secondary = catalog("secondary", &cap_positions(&mut rng, 6000, 30.0));

        for nside in [2, 4, 8] {
            let p = SurfaceDensityParams {
                nside,
                ..params(cap_sqdg, true)
            };
            let prior = SurfaceDensityPrior::build(p, &primary, &[&secondary], &memo())
                .expect("consistent prior");
            assert!(prior.warnings().is_empty(), "nside {nside}");
        }

        // Declared areas well beyond the 4x band are flagged.
        for area in [cap_sqdg / 8.0, cap_sqdg / 20.0] {
            let prior = SurfaceDensityPrior::build(params(area, false), &primary, &[&secondary], &memo())
                .expect("lenient build");
            assert_eq!(prior.warnings().len(), 1, "area {area}");
        }
    }

    #[test]
    fn joint_map_covers_all_catalogs() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let primary = catalog("primary", &uniform_positions(&mut rng, 3000));
        let a = catalog("a", &uniform_positions(&mut rng, 3000));
        let b = catalog("b", &uniform_positions(&mut rng, 3000));
        let prior = SurfaceDensityPrior::build(
            params(crate::primitives::FULL_SKY_SQDG, false),
            &primary,
            &[&a, &b],
            &memo(),
        )
        .expect("prior");
        let joint = prior.joint_map().expect("joint");
        assert_eq!(joint.members, vec![0, 1, 2]);
        assert!(prior.pair_map(1).is_some());
        assert!(prior.pair_map(2).is_none());

        let pixel = Healpix::new(4).expect("nside").pixel_of(&primary.sources()[0].position);
        let pair = prior.pair_map(0).expect("pair").value(pixel);
        assert!(joint.value(pixel) < pair);
    }

    #[test]
    fn density_map_is_memoized() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let primary = catalog("primary", &uniform_positions(&mut rng, 100));
        let secondary = catalog("secondary", &uniform_positions(&mut rng, 100));
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn CacheStore> = store.clone();
        let memo = Memoizer::new(DENSITY_NAMESPACE, shared);
        let p = SurfaceDensityParams {
            check_consistency: false,
            ..params(1000.0, false)
        };
        let first = SurfaceDensityPrior::build(p, &primary, &[&secondary], &memo).expect("first");
        let second = SurfaceDensityPrior::build(p, &primary, &[&secondary], &memo).expect("second");
        assert_eq!(first.density_map(), second.density_map());
        assert_eq!(store.len().expect("lock"), 1);
    }
}
