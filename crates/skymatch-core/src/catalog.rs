//! # Source Catalogs
//!
//! Detection tables read from delimited text, partitioned into source groups.
//!
//! Columns:
//! - `ra`, `dec` (degrees): always required
//! - `sigma_arcsec`: positional uncertainty, required by the Gaussian model
//! - `filename`, `nside`: localization map per row, required by the contour model
//! - group column (`source_index` by default): rows sharing a value are one source
//!
//! Malformed rows are skipped with a warning; a missing required column is a
//! configuration error. Catalogs never change after loading.

use crate::primitives::DEFAULT_GROUP_COLUMN;
use crate::types::{MatchError, RowId, SkyPosition, SourceId};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// SOURCE DESCRIPTION
// =============================================================================

/// Where and how to read a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSource {
    /// Path of the delimited text file.
    pub path: PathBuf,
    /// Field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Column holding the group key. When `None`, `source_index` is used if
    /// present, otherwise every row is its own source.
    #[serde(default)]
    pub group_column: Option<String>,
}

fn default_delimiter() -> char {
    ','
}

impl CatalogSource {
    /// A comma-separated file with default grouping.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: default_delimiter(),
            group_column: None,
        }
    }

    /// Resolve a relative path against `base`.
    #[must_use]
    pub fn resolved_against(&self, base: &Path) -> Self {
        let mut resolved = self.clone();
        if self.path.is_relative() {
            resolved.path = base.join(&self.path);
        }
        resolved
    }
}

// =============================================================================
// ROWS
// =============================================================================

/// Localization map attached to a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localization {
    /// Map file, resolved against the catalog's directory.
    pub filename: PathBuf,
    /// Native resolution of the map.
    pub nside: u32,
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub position: SkyPosition,
    pub sigma_arcsec: Option<f64>,
    pub localization: Option<Localization>,
    pub group: SourceId,
}

/// Optional columns present in a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Columns {
    pub sigma_arcsec: bool,
    pub localization: bool,
}

/// A column a model may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    SigmaArcsec,
    Localization,
}

impl Column {
    fn describe(self) -> &'static str {
        match self {
            Column::SigmaArcsec => "sigma_arcsec",
            Column::Localization => "filename and nside",
        }
    }
}

/// Summary of one source group, as used for matching and priors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub id: SourceId,
    /// Median `ra` and median `dec` of the group's rows.
    pub position: SkyPosition,
    /// Median `sigma_arcsec` of the group's rows.
    pub sigma_arcsec: Option<f64>,
    pub rows: Vec<RowId>,
}

// =============================================================================
// CATALOG
// =============================================================================

/// An immutable table of detections.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    name: String,
    rows: Vec<Detection>,
    columns: Columns,
    groups: BTreeMap<SourceId, Vec<RowId>>,
}

impl Catalog {
    /// Build a catalog from already parsed rows.
    #[must_use]
    pub fn from_detections(name: impl Into<String>, rows: Vec<Detection>, columns: Columns) -> Self {
        let mut groups: BTreeMap<SourceId, Vec<RowId>> = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            groups.entry(row.group.clone()).or_default().push(RowId(i));
        }
        Self {
            name: name.into(),
            rows,
            columns,
            groups,
        }
    }

    /// Read a catalog from delimited text.
    pub fn load(source: &CatalogSource) -> Result<Self, MatchError> {
        let delimiter = u8::try_from(source.delimiter).map_err(|_| {
            MatchError::Config(format!(
                "delimiter {:?} is not a single-byte character",
                source.delimiter
            ))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_path(&source.path)
            .map_err(|e| {
                MatchError::Io(format!("cannot open {}: {}", source.path.display(), e))
            })?;

        let headers = reader
            .headers()
            .map_err(|e| MatchError::DataFormat(format!("{}: {}", source.path.display(), e)))?
            .clone();
        let layout = ColumnLayout::from_headers(&headers, source)?;
        let base_dir = source
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for (line, record) in reader.records().enumerate() {
            let parsed = record
                .map_err(|e| MatchError::DataFormat(e.to_string()))
                .and_then(|record| layout.parse(&record, rows.len(), &base_dir));
            match parsed {
                Ok(detection) => rows.push(detection),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        catalog = %source.path.display(),
                        line = line + 2,
                        "skipping row: {}",
                        e
                    );
                }
            }
        }

        let name = source
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.path.display().to_string());
        let catalog = Self::from_detections(name, rows, layout.columns());
        tracing::info!(
            catalog = %catalog.name,
            rows = catalog.len(),
            sources = catalog.source_count(),
            skipped,
            "loaded catalog"
        );
        Ok(catalog)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> Columns {
        self.columns
    }

    /// Fail with a configuration error when `column` is absent.
    pub fn require(&self, column: Column) -> Result<(), MatchError> {
        let present = match column {
            Column::SigmaArcsec => self.columns.sigma_arcsec,
            Column::Localization => self.columns.localization,
        };
        if present {
            Ok(())
        } else {
            Err(MatchError::Config(format!(
                "catalog '{}' lacks required column(s) {}",
                self.name,
                column.describe()
            )))
        }
    }

    #[must_use]
    pub fn row(&self, id: RowId) -> Option<&Detection> {
        self.rows.get(id.0)
    }

    /// Rows in file order.
    pub fn rows(&self) -> impl Iterator<Item = (RowId, &Detection)> {
        self.rows.iter().enumerate().map(|(i, d)| (RowId(i), d))
    }

    /// Number of distinct source groups.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.groups.len()
    }

    /// One summary per source group, in group-key order.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceSummary> {
        self.groups
            .iter()
            .filter_map(|(id, rows)| self.summarize(id, rows))
            .collect()
    }

    fn summarize(&self, id: &SourceId, rows: &[RowId]) -> Option<SourceSummary> {
        let members: Vec<&Detection> = rows.iter().filter_map(|r| self.row(*r)).collect();
        let ra = median(members.iter().map(|d| d.position.ra).collect())?;
        let dec = median(members.iter().map(|d| d.position.dec).collect())?;
        let sigma_arcsec = median(members.iter().filter_map(|d| d.sigma_arcsec).collect());
        Some(SourceSummary {
            id: id.clone(),
            position: SkyPosition { ra, dec },
            sigma_arcsec,
            rows: rows.to_vec(),
        })
    }

    /// A copy with the `ra` column randomly permuted across rows.
    ///
    /// Declinations, uncertainties and group keys stay on their rows.
    #[must_use]
    pub fn with_scrambled_ra<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let mut ras: Vec<f64> = self.rows.iter().map(|d| d.position.ra).collect();
        ras.shuffle(rng);
        let rows = self
            .rows
            .iter()
            .zip(ras)
            .map(|(d, ra)| Detection {
                position: SkyPosition {
                    ra,
                    dec: d.position.dec,
                },
                ..d.clone()
            })
            .collect();
        Self {
            name: self.name.clone(),
            rows,
            columns: self.columns,
            groups: self.groups.clone(),
        }
    }
}

/// Median of `values`, averaging the two middle elements for even lengths.
pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(0.5 * (values[mid - 1] + values[mid]))
    }
}

// =============================================================================
// HEADER LAYOUT
// =============================================================================

#[derive(Debug)]
struct ColumnLayout {
    ra: usize,
    dec: usize,
    sigma_arcsec: Option<usize>,
    filename: Option<usize>,
    nside: Option<usize>,
    group: Option<usize>,
}

impl ColumnLayout {
    fn from_headers(headers: &csv::StringRecord, source: &CatalogSource) -> Result<Self, MatchError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let required = |name: &str| {
            find(name).ok_or_else(|| {
                MatchError::Config(format!(
                    "{} has no '{}' column",
                    source.path.display(),
                    name
                ))
            })
        };

        let group = match &source.group_column {
            Some(column) => Some(required(column.as_str())?),
            None => find(DEFAULT_GROUP_COLUMN),
        };

        Ok(Self {
            ra: required("ra")?,
            dec: required("dec")?,
            sigma_arcsec: find("sigma_arcsec"),
            filename: find("filename"),
            nside: find("nside"),
            group,
        })
    }

    fn columns(&self) -> Columns {
        Columns {
            sigma_arcsec: self.sigma_arcsec.is_some(),
            localization: self.filename.is_some() && self.nside.is_some(),
        }
    }

    fn parse(
        &self,
        record: &csv::StringRecord,
        row: usize,
        base_dir: &Path,
    ) -> Result<Detection, MatchError> {
        let field = |i: usize| {
            record
                .get(i)
                .ok_or_else(|| MatchError::DataFormat(format!("missing field {i}")))
        };
        let number = |i: usize, what: &str| -> Result<f64, MatchError> {
            let raw = field(i)?;
            raw.parse::<f64>()
                .map_err(|_| MatchError::DataFormat(format!("{what} '{raw}' is not a number")))
        };

        let position = SkyPosition::new(number(self.ra, "ra")?, number(self.dec, "dec")?)?;

        let sigma_arcsec = match self.sigma_arcsec {
            Some(i) => {
                let sigma = number(i, "sigma_arcsec")?;
                if !sigma.is_finite() || sigma < 0.0 {
                    return Err(MatchError::DataFormat(format!(
                        "sigma_arcsec {sigma} must be finite and non-negative"
                    )));
                }
                Some(sigma)
            }
            None => None,
        };

        let localization = match (self.filename, self.nside) {
            (Some(f), Some(n)) => {
                let raw_nside = field(n)?;
                let nside = raw_nside.parse::<u32>().map_err(|_| {
                    MatchError::DataFormat(format!("nside '{raw_nside}' is not an integer"))
                })?;
                let filename = PathBuf::from(field(f)?);
                let filename = if filename.is_relative() {
                    base_dir.join(filename)
                } else {
                    filename
                };
                Some(Localization { filename, nside })
            }
            _ => None,
        };

        let group = match self.group {
            Some(i) => SourceId::new(field(i)?),
            None => SourceId::new(row.to_string()),
        };

        Ok(Detection {
            position,
            sigma_arcsec,
            localization,
            group,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
