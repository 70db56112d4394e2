//! Radiomic feature extraction from an (image, mask) pair.
//!
//! The pair is read as grayscale, the mask binarized against its own maximum,
//! both resized and written as NRRD next to the inputs, and the extractor's
//! output is filtered into the column layout the category classifiers were
//! trained on.

mod pyradiomics;

use std::path::{Path, PathBuf};

use image::{imageops::FilterType, GrayImage, Luma};
use ndarray::Array2;
use serde_json::Value;

use crate::errors::{PwatError, Result};
use crate::nrrd::write_nrrd;
use crate::traits::{ImageSource, RadiomicsExtractor};

pub use pyradiomics::PyRadiomicsCli;

/// Provenance keys emitted by the extractor that never reach a classifier.
pub const DIAGNOSTIC_DENYLIST: [&str; 20] = [
    "diagnostics_Versions_PyRadiomics",
    "diagnostics_Versions_Numpy",
    "diagnostics_Versions_SimpleITK",
    "diagnostics_Versions_PyWavelet",
    "diagnostics_Versions_Python",
    "diagnostics_Configuration_Settings",
    "diagnostics_Image-original_Spacing",
    "diagnostics_Image-original_Size",
    "diagnostics_Image-original_Mean",
    "diagnostics_Image-original_Minimum",
    "diagnostics_Image-original_Maximum",
    "diagnostics_Mask-original_Hash",
    "diagnostics_Mask-original_Spacing",
    "diagnostics_Mask-original_Size",
    "diagnostics_Configuration_EnabledImageTypes",
    "diagnostics_Image-original_Hash",
    "diagnostics_Image-original_Dimensionality",
    "diagnostics_Mask-original_CenterOfMass",
    "diagnostics_Mask-original_BoundingBox",
    "diagnostics_Mask-original_CenterOfMassIndex",
];

/// Identifier column prepended to the row and removed before classification.
pub const IDENTIFIER_COLUMN: &str = "imagen";

/// Columns removed positionally after the denylist and identifier.
pub const DEFAULT_LEADING_DROP: usize = 2;

pub const INTERCHANGE_EXTENSION: &str = "nrrd";

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
    List(Vec<f64>),
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Value> for FeatureValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map_or_else(|| Self::Text(n.to_string()), Self::Number),
            Value::Bool(b) => Self::Number(if b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().map_or(Self::Text(s), Self::Number),
            Value::Array(items) => {
                let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                numbers.map_or_else(|| Self::Text(Value::Array(items).to_string()), Self::List)
            }
            other => Self::Text(other.to_string()),
        }
    }
}

/// Extractor output in its native key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMap {
    entries: Vec<(String, FeatureValue)>,
}

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Builds a map from a JSON object, keeping the document's key order.
    pub fn from_json_object(object: serde_json::Map<String, Value>) -> Self {
        Self {
            entries: object
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect(),
        }
    }
}

impl IntoIterator for FeatureMap {
    type Item = (String, FeatureValue);
    type IntoIter = std::vec::IntoIter<(String, FeatureValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<FeatureValue>> FromIterator<(K, V)> for FeatureMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// Drops every denylisted diagnostic key, keeping order.
pub fn filter_diagnostics(features: FeatureMap) -> FeatureMap {
    FeatureMap {
        entries: features
            .into_iter()
            .filter(|(key, _)| !DIAGNOSTIC_DENYLIST.contains(&key.as_str()))
            .collect(),
    }
}

/// A single-row table of named feature columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    values: Vec<FeatureValue>,
}

impl FeatureTable {
    /// Row with `identifier` in the leading [`IDENTIFIER_COLUMN`], followed
    /// by the features in order.
    pub fn single_row(identifier: &str, features: FeatureMap) -> Self {
        let (mut columns, mut values) = (
            vec![IDENTIFIER_COLUMN.to_string()],
            vec![FeatureValue::Text(identifier.to_string())],
        );
        for (name, value) in features {
            columns.push(name);
            values.push(value);
        }
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn value(&self, column: &str) -> Option<&FeatureValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn drop_column(&mut self, column: &str) -> Result<()> {
        let index = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| PwatError::extraction(format!("column `{column}` not found")))?;
        self.columns.remove(index);
        self.values.remove(index);
        Ok(())
    }

    pub fn drop_leading(&mut self, count: usize) {
        let count = count.min(self.columns.len());
        self.columns.drain(..count);
        self.values.drain(..count);
    }

    /// Keeps exactly `names`, in that order.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let mut selected = Self {
            columns: Vec::with_capacity(names.len()),
            values: Vec::with_capacity(names.len()),
        };
        for name in names {
            let value = self.value(name).ok_or_else(|| {
                PwatError::extraction(format!("allowlisted feature `{name}` was not extracted"))
            })?;
            selected.columns.push(name.clone());
            selected.values.push(value.clone());
        }
        Ok(selected)
    }

    /// The row as an unnamed `1 x n` matrix. Every value must be numeric.
    pub fn to_matrix(&self) -> Result<Array2<f64>> {
        let numbers = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(name, value)| {
                value.as_number().ok_or_else(|| {
                    PwatError::extraction(format!("feature `{name}` is not numeric: {value:?}"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array2::from_shape_vec((1, numbers.len()), numbers)?)
    }
}

/// Which columns of the filtered row reach the classifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureLayout {
    /// Drop this many leading columns, keep the rest in extractor order.
    DropLeading(usize),
    /// Keep exactly these columns in this order.
    Allowlist(Vec<String>),
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self::DropLeading(DEFAULT_LEADING_DROP)
    }
}

impl FeatureLayout {
    /// Reads a JSON array of column names.
    pub fn from_allowlist_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| PwatError::FileSystem {
            path: path.to_path_buf(),
            operation: "feature allowlist read".to_string(),
            source,
        })?;
        let columns: Vec<String> =
            serde_json::from_str(&text).map_err(|e| PwatError::Configuration {
                message: format!("{}: {e}", path.display()),
            })?;
        if columns.is_empty() {
            return Err(PwatError::Configuration {
                message: format!("{}: feature allowlist is empty", path.display()),
            });
        }
        Ok(Self::Allowlist(columns))
    }

    pub fn apply(&self, mut table: FeatureTable) -> Result<FeatureTable> {
        match self {
            Self::DropLeading(count) => {
                table.drop_leading(*count);
                Ok(table)
            }
            Self::Allowlist(columns) => table.select(columns),
        }
    }
}

/// NRRD files written for one (image, mask) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePaths {
    pub image: PathBuf,
    pub mask: PathBuf,
}

/// Same path with the extension swapped to `.nrrd`.
pub fn interchange_path(path: &Path) -> PathBuf {
    path.with_extension(INTERCHANGE_EXTENSION)
}

/// `value / max` truncated to an integer: only pixels at the mask's maximum
/// become 1.
pub fn binarize_by_max(mask: &GrayImage, path: &Path) -> Result<GrayImage> {
    let max = mask.pixels().map(|Luma([v])| *v).max().unwrap_or(0);
    if max == 0 {
        return Err(PwatError::EmptyMask {
            path: path.to_path_buf(),
        });
    }
    Ok(GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let Luma([v]) = *mask.get_pixel(x, y);
        Luma([v / max])
    }))
}

/// Reads the pair (image first, then mask), binarizes the mask, resizes both
/// to `size` x `size` and writes them as NRRD beside the inputs.
///
/// Fails before reading anything when both inputs map to the same volume
/// path.
pub fn prepare_volumes(
    source: &dyn ImageSource,
    image_path: &Path,
    mask_path: &Path,
    size: u32,
) -> Result<VolumePaths> {
    let paths = VolumePaths {
        image: interchange_path(image_path),
        mask: interchange_path(mask_path),
    };
    // `wound.png` + `wound.jpg` would write both volumes to `wound.nrrd`
    if paths.image == paths.mask {
        return Err(PwatError::Validation {
            field: "mask_path".to_string(),
            reason: format!(
                "{} and {} share the volume path {}",
                image_path.display(),
                mask_path.display(),
                paths.image.display()
            ),
        });
    }

    let image = source.read_grayscale(image_path)?;
    let mask = source.read_grayscale(mask_path)?;
    let mask = binarize_by_max(&mask, mask_path)?;

    let image = image::imageops::resize(&image, size, size, FilterType::Triangle);
    // nearest keeps the mask in {0, 1}
    let mask = image::imageops::resize(&mask, size, size, FilterType::Nearest);

    write_nrrd(&paths.image, &image)?;
    write_nrrd(&paths.mask, &mask)?;
    tracing::debug!(
        image = %paths.image.display(),
        mask = %paths.mask.display(),
        "interchange volumes written"
    );
    Ok(paths)
}

/// Runs the full extraction for one pair and returns the row in classifier
/// column layout.
pub fn extract_feature_row(
    extractor: &dyn RadiomicsExtractor,
    source: &dyn ImageSource,
    image_path: &Path,
    mask_path: &Path,
    size: u32,
    layout: &FeatureLayout,
) -> Result<FeatureTable> {
    let volumes = prepare_volumes(source, image_path, mask_path, size)?;
    let raw = extractor.execute(&volumes.image, &volumes.mask)?;
    let raw_len = raw.len();

    let filtered = filter_diagnostics(raw);
    let identifier = image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut table = FeatureTable::single_row(&identifier, filtered);
    table.drop_column(IDENTIFIER_COLUMN)?;
    let table = layout.apply(table)?;

    tracing::debug!(
        extracted = raw_len,
        kept = table.len(),
        "feature row assembled"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::StaticExtractor;
    use crate::preprocess::FsImageSource;
    use tempfile::TempDir;

    fn sample_features() -> FeatureMap {
        [
            ("diagnostics_Versions_PyRadiomics", FeatureValue::Text("v3.1.0".into())),
            ("diagnostics_Image-original_Size", FeatureValue::List(vec![256.0, 256.0])),
            ("diagnostics_Mask-original_VoxelNum", FeatureValue::Number(812.0)),
            ("diagnostics_Mask-original_VolumeNum", FeatureValue::Number(1.0)),
            ("original_firstorder_Mean", FeatureValue::Number(0.1)),
            ("original_glcm_Contrast", FeatureValue::Number(0.2)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn denylist_removes_only_listed_keys() {
        let filtered = filter_diagnostics(sample_features());
        assert_eq!(
            filtered.keys().collect::<Vec<_>>(),
            vec![
                "diagnostics_Mask-original_VoxelNum",
                "diagnostics_Mask-original_VolumeNum",
                "original_firstorder_Mean",
                "original_glcm_Contrast",
            ]
        );
    }

    #[test]
    fn default_layout_drops_two_leading_columns() -> Result<()> {
        let mut table = FeatureTable::single_row("wound.jpg", filter_diagnostics(sample_features()));
        table.drop_column(IDENTIFIER_COLUMN)?;
        let table = FeatureLayout::default().apply(table)?;

        assert_eq!(
            table.columns(),
            &["original_firstorder_Mean", "original_glcm_Contrast"]
        );
        assert_eq!(table.to_matrix()?, ndarray::array![[0.1, 0.2]]);
        Ok(())
    }

    #[test]
    fn allowlist_layout_selects_by_name() -> Result<()> {
        let table = FeatureTable::single_row("wound.jpg", sample_features());
        let layout = FeatureLayout::Allowlist(vec![
            "original_glcm_Contrast".to_string(),
            "original_firstorder_Mean".to_string(),
        ]);
        let table = layout.apply(table)?;
        assert_eq!(table.to_matrix()?, ndarray::array![[0.2, 0.1]]);

        let missing = FeatureLayout::Allowlist(vec!["original_ngtdm_Busyness".to_string()]);
        assert!(missing
            .apply(FeatureTable::single_row("wound.jpg", sample_features()))
            .is_err());
        Ok(())
    }

    #[test]
    fn text_values_cannot_become_a_matrix() {
        let table = FeatureTable::single_row("wound.jpg", sample_features());
        assert!(table.to_matrix().is_err());
    }

    #[test]
    fn json_values_keep_numbers_and_order() {
        let object = serde_json::json!({
            "b": 2.5,
            "a": "3.0",
            "c": [1, 2],
            "d": {"nested": true}
        });
        let Value::Object(object) = object else {
            unreachable!()
        };
        let map = FeatureMap::from_json_object(object);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a", "c", "d"]);
        assert_eq!(map.get("a"), Some(&FeatureValue::Number(3.0)));
        assert_eq!(map.get("c"), Some(&FeatureValue::List(vec![1.0, 2.0])));
        assert!(matches!(map.get("d"), Some(FeatureValue::Text(_))));
    }

    #[test]
    fn binarize_keeps_only_maximum_pixels() -> Result<()> {
        let mask = GrayImage::from_raw(4, 1, vec![0, 100, 254, 255]).unwrap();
        let binary = binarize_by_max(&mask, Path::new("mask.jpg"))?;
        assert_eq!(binary.as_raw(), &vec![0, 0, 0, 1]);
        Ok(())
    }

    #[test]
    fn empty_mask_is_a_defined_error() {
        let mask = GrayImage::new(8, 8);
        assert!(matches!(
            binarize_by_max(&mask, Path::new("empty.jpg")),
            Err(PwatError::EmptyMask { .. })
        ));
    }

    #[test]
    fn interchange_path_swaps_extension() {
        assert_eq!(
            interchange_path(Path::new("predicts/imgs/mar4 copy.jpg")),
            PathBuf::from("predicts/imgs/mar4 copy.nrrd")
        );
        assert_eq!(
            interchange_path(Path::new("scan.png")),
            PathBuf::from("scan.nrrd")
        );
    }

    #[test]
    fn shared_stem_in_one_directory_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let image_path = dir.path().join("wound.png");
        let mask_path = dir.path().join("wound.jpg");
        GrayImage::from_pixel(16, 16, Luma([90])).save(&image_path)?;
        GrayImage::from_pixel(16, 16, Luma([255])).save(&mask_path)?;

        let extractor = StaticExtractor::new(sample_features());
        let result = extract_feature_row(
            &extractor,
            &FsImageSource,
            &image_path,
            &mask_path,
            64,
            &FeatureLayout::default(),
        );

        assert!(matches!(result, Err(PwatError::Validation { ref field, .. }) if field == "mask_path"));
        assert!(extractor.calls().is_empty());
        assert!(!dir.path().join("wound.nrrd").exists());
        Ok(())
    }

    #[test]
    fn extraction_writes_volumes_and_passes_them_to_extractor() -> Result<()> {
        let dir = TempDir::new()?;
        let image_path = dir.path().join("sample_image.jpg");
        let mask_path = dir.path().join("sample_mask.png");
        GrayImage::from_pixel(32, 32, Luma([90])).save(&image_path)?;
        GrayImage::from_fn(32, 32, |x, _| Luma([if x < 16 { 255 } else { 0 }])).save(&mask_path)?;

        let extractor = StaticExtractor::new(sample_features());
        let table = extract_feature_row(
            &extractor,
            &FsImageSource,
            &image_path,
            &mask_path,
            256,
            &FeatureLayout::default(),
        )?;

        assert_eq!(table.len(), 2);
        assert_eq!(
            extractor.calls(),
            vec![(
                dir.path().join("sample_image.nrrd"),
                dir.path().join("sample_mask.nrrd")
            )]
        );
        let mask = crate::nrrd::read_nrrd(&dir.path().join("sample_mask.nrrd"))?;
        assert_eq!(mask.dimensions(), (256, 256));
        assert!(mask.pixels().all(|Luma([v])| *v <= 1));
        assert_eq!(mask.get_pixel(0, 0).0, [1]);
        assert_eq!(mask.get_pixel(255, 0).0, [0]);
        Ok(())
    }
}
