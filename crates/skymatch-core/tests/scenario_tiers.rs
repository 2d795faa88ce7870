//! # Scenario Tier Tests (T0-T4)
//!
//! End-to-end runs of the match engine.
//!
//! ## Tiers
//! - T0: Configuration
//! - T1: Coincident Sources
//! - T2: Out-of-Radius Rejection
//! - T3: Catalog Files and Persistent Cache
//! - T4: Prior Consistency
//! - T5: Localization Contours

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use skymatch_core::catalog::Columns;
use skymatch_core::primitives::{FULL_SKY_SQDG, SQARCSEC_TO_SR, SQDG_TO_SR};
use skymatch_core::{
    BayesFactorConfig, Catalog, CatalogSource, Detection, Healpix, LocalizationMap, MatchConfig,
    MatchError, MemoryStore, PixelOrdering, PriorConfig, RowId, SelectionStrategy, SkyPosition,
    SourceId, StreamMatch, posterior,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

fn catalog(name: &str, rows: &[(f64, f64, f64)]) -> Catalog {
    let rows = rows
        .iter()
        .enumerate()
        .map(|(i, (ra, dec, sigma))| Detection {
            position: SkyPosition::new(*ra, *dec).expect("valid"),
            sigma_arcsec: Some(*sigma),
            localization: None,
            group: SourceId::new(format!("{name}{i}")),
        })
        .collect();
    Catalog::from_detections(
        name,
        rows,
        Columns {
            sigma_arcsec: true,
            localization: false,
        },
    )
}

fn config(prior: PriorConfig) -> MatchConfig {
    MatchConfig {
        name: "scenario".to_string(),
        posterior_threshold: 0.9,
        cache_dir: None,
        primary: CatalogSource::new("primary.csv"),
        secondary: vec![CatalogSource::new("secondary.csv")],
        bayes_factor: BayesFactorConfig::Gaussian {
            nside: 1024,
            disc_radius_arcsec: Some(100.0),
        },
        prior,
    }
}

fn density_prior(area_sqdg: f64) -> PriorConfig {
    PriorConfig::SurfaceDensity {
        nside: 4,
        area_sqdg,
        check_consistency: true,
        strict_consistency: false,
    }
}

// =============================================================================
// TIER T0: CONFIGURATION
// =============================================================================

mod t0_configuration {
    use super::*;

    /// T0.1: Discriminated model configuration parses from JSON.
    #[test]
    fn discriminators_parse() {
        let json = r#"{
            "name": "fermi-icecube",
            "posterior_threshold": 0.5,
            "primary": { "path": "fermi.csv" },
            "secondary": [{ "path": "alerts.csv", "delimiter": ";" }],
            "bayes_factor": { "match_type": "icecube_contour", "nside": 64 },
            "prior": { "name": "ra_scramble", "n_scrambles": 10, "seed": 1 }
        }"#;
        let config: MatchConfig = serde_json::from_str(json).expect("parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.secondary[0].delimiter, ';');
    }

    /// T0.2: Unknown discriminators are rejected at parse time.
    #[test]
    fn unknown_match_type_rejected() {
        let json = r#"{ "match_type": "lorentzian", "nside": 64 }"#;
        assert!(serde_json::from_str::<BayesFactorConfig>(json).is_err());
    }

    /// T0.3: A catalog without the required column fails before scoring.
    #[test]
    fn missing_sigma_column_rejected() {
        let bare = Catalog::from_detections(
            "bare",
            vec![Detection {
                position: SkyPosition::new(1.0, 1.0).expect("valid"),
                sigma_arcsec: None,
                localization: None,
                group: SourceId::new("x"),
            }],
            Columns::default(),
        );
        let result = StreamMatch::new(
            &config(density_prior(FULL_SKY_SQDG)),
            catalog("p", &[(1.0, 1.0, 1.0)]),
            vec![bare],
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(MatchError::Config(_))));
    }
}

// =============================================================================
// TIER T1: COINCIDENT SOURCES
// =============================================================================

mod t1_coincident_sources {
    use super::*;

    /// T1.1: Identical positions give the peak Bayes factor and, with a prior
    /// of 1e-6, a posterior above 0.99.
    #[test]
    fn identical_position_is_a_match() {
        let run = StreamMatch::new(
            &config(density_prior(FULL_SKY_SQDG)),
            catalog("p", &[(10.0, 0.0, 1.0)]),
            vec![catalog("s", &[(10.0, 0.0, 1.0)])],
            Arc::new(MemoryStore::new()),
        )
        .expect("run");

        let table = run.bayes_factors().expect("bayes factors");
        let bf = table[&SourceId::new("p0")][0][&RowId(0)];
        let expected = 2.0 / 2.0 * (0.0f64).exp() / SQARCSEC_TO_SR;
        assert!((bf - expected).abs() <= 1e-9 * expected);
        assert!(posterior(1e-6, bf) > 0.99);

        let matches = run.matches().expect("matches");
        assert_eq!(matches[&SourceId::new("p0")][0], BTreeSet::from([RowId(0)]));
    }
}

// =============================================================================
// TIER T2: OUT-OF-RADIUS REJECTION
// =============================================================================

mod t2_out_of_radius {
    use super::*;

    /// T2.1: A candidate 1000 arcsec away is never selected with a 100 arcsec
    /// radius, and the match set is empty.
    #[test]
    fn distant_candidate_excluded() {
        let offset_deg = 1000.0 / 3600.0;
        let run = StreamMatch::new(
            &config(density_prior(FULL_SKY_SQDG)),
            catalog("p", &[(10.0, 0.0, 1.0)]),
            vec![catalog("s", &[(10.0, offset_deg, 1.0)])],
            Arc::new(MemoryStore::new()),
        )
        .expect("run");

        let primary = &run.primary_sources()[0];
        let selected = run
            .bayes_factor_model()
            .selector()
            .select(&primary.position, run.secondaries());
        assert!(selected[0].is_empty());

        let matches = run.matches().expect("matches");
        assert!(matches[&SourceId::new("p0")][0].is_empty());
        assert_eq!(run.n_matches().expect("n"), vec![0]);
        assert!(run.report().expect("report").matches.is_empty());
    }
}

// =============================================================================
// TIER T3: CATALOG FILES AND PERSISTENT CACHE
// =============================================================================

mod t3_files_and_cache {
    use super::*;

    fn write_catalogs(dir: &Path) {
        std::fs::write(
            dir.join("primary.csv"),
            "source_index,ra,dec,sigma_arcsec\n\
             a,10.0,0.0,1.0\n\
             a,10.0002,0.0,1.0\n\
             b,200.0,45.0,2.0\n\
             c,not-a-number,0.0,1.0\n",
        )
        .expect("write primary");
        std::fs::write(
            dir.join("secondary.csv"),
            "ra;dec;sigma_arcsec\n\
             10.0001;0.0;1.0\n\
             200.0;45.0005;2.0\n\
             300.0;-20.0;1.0\n",
        )
        .expect("write secondary");
    }

    fn file_config(dir: &Path, cache: bool) -> MatchConfig {
        let mut config = config(density_prior(FULL_SKY_SQDG));
        config.primary = CatalogSource::new(dir.join("primary.csv"));
        config.secondary = vec![CatalogSource {
            path: dir.join("secondary.csv"),
            delimiter: ';',
            group_column: None,
        }];
        if cache {
            config.cache_dir = Some(dir.join("cache"));
        }
        config
    }

    /// T3.1: Grouped rows collapse to one source and bad rows are skipped.
    #[test]
    fn csv_run_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_catalogs(dir.path());

        let run = StreamMatch::from_config(&file_config(dir.path(), false)).expect("run");
        assert_eq!(run.primary().len(), 3);
        assert_eq!(run.primary_sources().len(), 2);
        assert_eq!(run.secondaries()[0].catalog.len(), 3);

        let report = run.report().expect("report");
        assert_eq!(report.primary_sources, 2);
        assert_eq!(report.catalogs[0].catalog, "secondary");
        assert_eq!(report.matches[&SourceId::new("a")][0], BTreeSet::from([RowId(0)]));
        assert_eq!(report.matches[&SourceId::new("b")][0], BTreeSet::from([RowId(1)]));
    }

    /// T3.2: A persistent cache gives the same report on a second run.
    #[test]
    fn redb_cache_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_catalogs(dir.path());

        let first = StreamMatch::from_config(&file_config(dir.path(), true))
            .expect("first run")
            .report()
            .expect("first report");
        assert!(dir.path().join("cache").join("skymatch-cache.redb").exists());

        let second = StreamMatch::from_config(&file_config(dir.path(), true))
            .expect("second run")
            .report()
            .expect("second report");
        assert_eq!(first, second);
    }

    /// T3.3: A missing catalog file is an I/O error.
    #[test]
    fn missing_catalog_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = StreamMatch::from_config(&file_config(dir.path(), false));
        assert!(matches!(result, Err(MatchError::Io(_))));
    }
}

// =============================================================================
// TIER T4: PRIOR CONSISTENCY
// =============================================================================

mod t4_prior_consistency {
    use super::*;

    fn uniform(rng: &mut ChaCha8Rng, name: &str, n: usize) -> Catalog {
        let rows: Vec<(f64, f64, f64)> = (0..n)
            .map(|_| {
                let z: f64 = rng.gen_range(-1.0..1.0);
                (rng.gen_range(0.0..360.0), z.asin().to_degrees(), 1.0)
            })
            .collect();
        catalog(name, &rows)
    }

    /// Uniform north of dec 30, a cap of pi steradians.
    fn northern_cap(rng: &mut ChaCha8Rng, name: &str, n: usize) -> Catalog {
        let rows: Vec<(f64, f64, f64)> = (0..n)
            .map(|_| {
                let z: f64 = rng.gen_range(0.5..1.0);
                (rng.gen_range(0.0..360.0), z.asin().to_degrees(), 1.0)
            })
            .collect();
        catalog(name, &rows)
    }

    fn cap_run(area_sqdg: f64) -> StreamMatch {
        let mut rng = ChaCha8Rng::seed_from_u64(29);
        let primary = northern_cap(&mut rng, "p", 3000);
        let secondary = northern_cap(&mut rng, "s", 6000);
        StreamMatch::new(
            &config(density_prior(area_sqdg)),
            primary,
            vec![secondary],
            Arc::new(MemoryStore::new()),
        )
        .expect("run")
    }

    fn run(area_sqdg: f64) -> StreamMatch {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let primary = uniform(&mut rng, "p", 2000);
        let secondary = uniform(&mut rng, "s", 4000);
        StreamMatch::new(
            &config(density_prior(area_sqdg)),
            primary,
            vec![secondary],
            Arc::new(MemoryStore::new()),
        )
        .expect("run")
    }

    /// T4.1: Uniform full-sky catalogs pass the consistency check.
    #[test]
    fn full_sky_is_consistent() {
        assert!(run(FULL_SKY_SQDG).consistency_warnings().expect("prior").is_empty());
    }

    /// T4.2: A wrong survey area is surfaced in the report.
    #[test]
    fn wrong_area_is_reported() {
        let run = run(100.0);
        let report = run.report().expect("report");
        assert_eq!(report.catalogs[0].warnings.len(), 1);
        assert!(report.catalogs[0].warnings[0].log2_ratio > 2.0);
    }

    /// T4.3: Catalogs uniform over a partial cap pass with the cap's area.
    #[test]
    fn partial_cap_is_consistent() {
        let cap_sqdg = std::f64::consts::PI / SQDG_TO_SR;
        assert!(cap_run(cap_sqdg).consistency_warnings().expect("prior").is_empty());
    }

    /// T4.4: The same catalogs with an area 8x too small are flagged.
    #[test]
    fn partial_cap_with_small_area_is_reported() {
        let cap_sqdg = std::f64::consts::PI / SQDG_TO_SR;
        let run = cap_run(cap_sqdg / 8.0);
        let warnings = run.consistency_warnings().expect("prior");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].log2_ratio > 2.0);
    }
}

// =============================================================================
// TIER T5: LOCALIZATION CONTOURS
// =============================================================================

mod t5_localization_contours {
    use super::*;

    const MAP_NSIDE: u32 = 8;

    /// Wilks-calibrated map with a 10 degree contour around `center`.
    fn write_map(path: &Path, center: &SkyPosition) {
        let healpix = Healpix::new(MAP_NSIDE).expect("nside");
        let values = (0..healpix.npix())
            .map(|p| {
                if healpix.pixel_center(p).separation_rad(center).to_degrees() < 10.0 {
                    1.0
                } else {
                    500.0
                }
            })
            .collect();
        let map = LocalizationMap {
            nside: MAP_NSIDE,
            ordering: PixelOrdering::Nested,
            comments: vec!["contour from Wilks theorem".to_string()],
            values,
        };
        std::fs::write(path, serde_json::to_vec(&map).expect("json")).expect("write map");
    }

    /// Primary `inside` sits in the shared contour, `outside` does not. The
    /// second alert row is placed at `outside` so both primaries have a
    /// non-zero prior.
    fn write_inputs(dir: &Path) -> MatchConfig {
        std::fs::create_dir_all(dir.join("maps")).expect("mkdir");
        write_map(
            &dir.join("maps/alert.json"),
            &SkyPosition::new(50.0, 20.0).expect("valid"),
        );
        std::fs::write(
            dir.join("sources.csv"),
            "source_index,ra,dec
inside,50.0,20.0
outside,230.0,-20.0
",
        )
        .expect("write primary");
        std::fs::write(
            dir.join("alerts.csv"),
            "ra,dec,filename,nside
             50.0,20.0,maps/alert.json,8
             230.0,-20.0,maps/alert.json,8
",
        )
        .expect("write alerts");

        MatchConfig {
            name: "contours".to_string(),
            posterior_threshold: 0.5,
            cache_dir: None,
            primary: CatalogSource::new(dir.join("sources.csv")),
            secondary: vec![CatalogSource::new(dir.join("alerts.csv"))],
            bayes_factor: BayesFactorConfig::IcecubeContour {
                nside: 64,
                disc_radius_arcsec: None,
            },
            prior: PriorConfig::SurfaceDensity {
                nside: 1,
                area_sqdg: FULL_SKY_SQDG,
                check_consistency: false,
                strict_consistency: false,
            },
        }
    }

    /// T5.1: Every alert is a candidate and the map's own nside decides
    /// containment.
    #[test]
    fn contour_run_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = StreamMatch::from_config(&write_inputs(dir.path())).expect("run");
        assert_eq!(
            run.bayes_factor_model().selector().strategy(),
            SelectionStrategy::Everything
        );

        let inside = SourceId::new("inside");
        let outside = SourceId::new("outside");
        let table = run.bayes_factors().expect("bayes factors");
        assert_eq!(table[&inside][0].len(), 2);
        assert_eq!(table[&outside][0].len(), 2);
        assert!(table[&inside][0].values().all(|bf| *bf > 1.0));
        assert!(table[&outside][0].values().all(|bf| *bf < 1.0));

        let posteriors = run.posteriors().expect("posteriors");
        assert!(posteriors[&inside][0].values().all(|p| *p > 0.5));
        assert!(posteriors[&outside][0].values().all(|p| *p > 0.0 && *p < 0.5));

        let matches = run.matches().expect("matches");
        assert_eq!(matches[&inside][0], BTreeSet::from([RowId(0), RowId(1)]));
        assert!(matches[&outside][0].is_empty());
    }

    /// T5.2: A row whose nside disagrees with its map scores 0 and never
    /// matches.
    #[test]
    fn nside_mismatch_never_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_inputs(dir.path());
        std::fs::write(
            dir.path().join("alerts.csv"),
            "ra,dec,filename,nside
50.0,20.0,maps/alert.json,16
",
        )
        .expect("rewrite alerts");

        let run = StreamMatch::from_config(&config).expect("run");
        let table = run.bayes_factors().expect("bayes factors");
        assert_eq!(table[&SourceId::new("inside")][0][&RowId(0)], 0.0);
        assert_eq!(run.n_matches().expect("n"), vec![0]);
    }
}
