//! # CLI Command Implementations

use skymatch_core::{
    Healpix, MatchConfig, MatchError, MatchReport, PriorModel, SkyPosition, StreamMatch,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE HELPERS
// =============================================================================

/// Maximum size of a run configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), MatchError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        MatchError::Io(format!("Cannot read metadata of '{}': {}", path.display(), e))
    })?;

    if metadata.len() > max_size {
        return Err(MatchError::Config(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, MatchError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        MatchError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(MatchError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| MatchError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Serialize `value` as pretty JSON into `path`.
fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<PathBuf, MatchError> {
    let target = validate_output_path(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| MatchError::Serialization(e.to_string()))?;
    std::fs::write(&target, json)
        .map_err(|e| MatchError::Io(format!("Cannot write '{}': {}", target.display(), e)))?;
    Ok(target)
}

/// Read, parse and validate a TOML run configuration.
///
/// Relative catalog and cache paths are resolved against the directory of
/// the configuration file.
pub fn load_config(path: &Path) -> Result<MatchConfig, MatchError> {
    validate_file_size(path, MAX_CONFIG_FILE_SIZE)?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| MatchError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;
    let config: MatchConfig = toml::from_str(&text)
        .map_err(|e| MatchError::Config(format!("{}: {}", path.display(), e)))?;

    let base = path.parent().unwrap_or(Path::new("."));
    let config = config.resolved_against(base);
    config.validate()?;
    tracing::debug!(config = %path.display(), run = %config.name, "configuration loaded");
    Ok(config)
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Match catalogs and report.
pub fn cmd_run(
    config_path: &Path,
    output: Option<&Path>,
    json_mode: bool,
    verbose: bool,
) -> Result<(), MatchError> {
    let config = load_config(config_path)?;
    let run = StreamMatch::from_config(&config)?;
    let report = run.report()?;

    let written = output.map(|path| write_json(path, &report)).transpose()?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        return Ok(());
    }

    print_report(&report, verbose);
    if let Some(path) = written {
        println!();
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_report(report: &MatchReport, verbose: bool) {
    println!("skymatch run: {}", report.name);
    println!("==================");
    println!("Bayes factor:    {}", report.match_type);
    println!("Prior:           {}", report.prior);
    println!("Threshold:       {}", report.posterior_threshold);
    println!(
        "Primary catalog: {} ({} sources)",
        report.primary_catalog, report.primary_sources
    );
    println!();

    for diagnostics in &report.catalogs {
        println!("Catalog {}", diagnostics.catalog);
        println!("  Rows:          {}", diagnostics.rows);
        println!("  Sources:       {}", diagnostics.sources);
        println!("  Matches:       {}", diagnostics.n_matches);
        println!("  Posterior sum: {:.4}", diagnostics.posterior_sum);
        for warning in &diagnostics.warnings {
            println!("  Warning:       {}", warning);
        }
    }

    if verbose {
        println!();
        println!("Matches");
        for (source, per_catalog) in &report.matches {
            for (catalog, rows) in report.catalogs.iter().zip(per_catalog) {
                if rows.is_empty() {
                    continue;
                }
                let rows: Vec<String> = rows.iter().map(ToString::to_string).collect();
                println!("  {} -> {}: rows {}", source, catalog.catalog, rows.join(", "));
            }
        }
    }
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Validate configuration, catalogs and prior consistency.
pub fn cmd_validate(config_path: &Path, json_mode: bool) -> Result<(), MatchError> {
    let config = load_config(config_path)?;
    let run = StreamMatch::from_config(&config)?;
    let prior = run.prior()?;
    let warnings = prior.warnings();

    if json_mode {
        let output = serde_json::json!({
            "valid": true,
            "name": config.name,
            "match_type": run.bayes_factor_model().match_type(),
            "prior": prior.name(),
            "primary_rows": run.primary().len(),
            "primary_sources": run.primary_sources().len(),
            "secondary": run.secondaries().iter().map(|s| serde_json::json!({
                "catalog": s.catalog.name(),
                "rows": s.catalog.len(),
                "sources": s.catalog.source_count(),
                "occupied_pixels": s.index.occupied_pixels(),
            })).collect::<Vec<_>>(),
            "warnings": warnings,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Configuration '{}' is valid", config.name);
    println!("  Bayes factor: {}", run.bayes_factor_model().match_type());
    println!("  Prior:        {}", prior.name());
    println!(
        "  Primary:      {} rows, {} sources",
        run.primary().len(),
        run.primary_sources().len()
    );
    for secondary in run.secondaries() {
        println!(
            "  Secondary:    {} ({} rows, {} sources, {} pixels)",
            secondary.catalog.name(),
            secondary.catalog.len(),
            secondary.catalog.source_count(),
            secondary.index.occupied_pixels()
        );
    }
    if let PriorModel::SurfaceDensity(density) = prior {
        if warnings.is_empty() {
            println!(
                "  Prior consistency: ok (area {} sq deg)",
                density.params().area_sqdg
            );
        }
    }
    for warning in warnings {
        println!("  Warning: {}", warning);
    }
    Ok(())
}

// =============================================================================
// SCRAMBLE COMMAND
// =============================================================================

/// Compute and write the RA-scramble null distribution.
pub fn cmd_scramble(config_path: &Path, output: &Path, json_mode: bool) -> Result<(), MatchError> {
    let config = load_config(config_path)?;
    let run = StreamMatch::from_config(&config)?;
    let realizations = run.scrambled_distribution()?;
    let written = write_json(output, &realizations)?;

    let n_catalogs = run.secondaries().len();
    let summary: Vec<serde_json::Value> = realizations
        .iter()
        .map(|r| {
            serde_json::json!({
                "index": r.index,
                "seed": r.seed,
                "scored": (0..n_catalogs).map(|i| r.scores(i).len()).collect::<Vec<_>>(),
            })
        })
        .collect();

    if json_mode {
        let output = serde_json::json!({
            "output": written.to_string_lossy(),
            "realizations": summary,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("RA scramble: {} realizations", realizations.len());
    for r in &realizations {
        let scored: Vec<String> = (0..n_catalogs)
            .map(|i| r.scores(i).len().to_string())
            .collect();
        println!(
            "  #{:<4} seed {:>20}  scored candidates: {}",
            r.index,
            r.seed,
            scored.join(", ")
        );
    }
    println!("Written to {}", written.display());
    Ok(())
}

// =============================================================================
// PIXEL COMMAND
// =============================================================================

/// Pixel lookup for one position.
pub fn cmd_pixel(
    nside: u32,
    ra: f64,
    dec: f64,
    radius_arcsec: Option<f64>,
    json_mode: bool,
) -> Result<(), MatchError> {
    let healpix = Healpix::new(nside)?;
    let position = SkyPosition::new(ra, dec)?;
    let pixel = healpix.pixel_of(&position);
    let center = healpix.pixel_center(pixel);
    let neighbors: Vec<u64> = healpix.neighbors(pixel).into_iter().flatten().collect();

    let disc = match radius_arcsec {
        Some(radius) if radius.is_finite() && radius > 0.0 => {
            Some(healpix.query_disc(&position, (radius / 3600.0).to_radians()))
        }
        Some(radius) => {
            return Err(MatchError::Config(format!(
                "radius_arcsec must be positive, got {radius}"
            )));
        }
        None => None,
    };

    if json_mode {
        let output = serde_json::json!({
            "nside": nside,
            "npix": healpix.npix(),
            "resolution_arcsec": healpix.resolution_arcsec(),
            "pixel": pixel,
            "ring_pixel": healpix.nest_to_ring(pixel),
            "center": center,
            "neighbors": neighbors,
            "disc": disc,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("nside {} ({} pixels, {:.2} arcsec)", nside, healpix.npix(), healpix.resolution_arcsec());
    println!("Pixel (NESTED): {}", pixel);
    println!("Pixel (RING):   {}", healpix.nest_to_ring(pixel));
    println!("Center:         ra {:.6}, dec {:.6}", center.ra, center.dec);
    let neighbors: Vec<String> = neighbors.iter().map(ToString::to_string).collect();
    println!("Neighbors:      {}", neighbors.join(", "));
    if let Some(disc) = disc {
        println!("Disc:           {} pixels", disc.len());
    }
    Ok(())
}
