//! Turning a directory of class-colored PNG masks into datapoint entries.
//!
//! The directory must contain `datapoint_map.json` (mask file stem to item
//! path or paths) and `class_map.json` (category name to RGB color). Pixel
//! to polygon extraction is delegated to a [`MaskPolygonizer`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rb_format::Label;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::UploadError;
use crate::upload::DatapointEntry;

pub const DATAPOINT_MAP_FILE: &str = "datapoint_map.json";
pub const CLASS_MAP_FILE: &str = "class_map.json";

/// Category name to the RGB color it is painted with.
pub type ClassMap = BTreeMap<String, [u8; 3]>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    One(String),
    Many(Vec<String>),
}

impl ItemRef {
    fn into_items(self) -> Vec<String> {
        match self {
            ItemRef::One(item) => vec![item],
            ItemRef::Many(items) => items,
        }
    }
}

/// Outline of one category in a mask, in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskRegion {
    pub category: String,
    /// `[width, height]`
    pub image_size: [u32; 2],
    pub regions: Vec<Vec<[f64; 2]>>,
    pub holes: Vec<Vec<[f64; 2]>>,
}

impl MaskRegion {
    fn into_label(self) -> Label {
        let mut label = Label {
            category: vec![vec!["object".to_string(), self.category]],
            ..Default::default()
        };
        label.extra.insert(
            "pixel".to_string(),
            json!({
                "imagesize": self.image_size,
                "regions": self.regions,
                "holes": self.holes,
            }),
        );
        label
    }
}

/// Extracts per-category polygons from a mask image.
pub trait MaskPolygonizer: Send + Sync {
    /// One region per category of `class_map` present in the mask.
    fn polygonize(&self, mask: &Path, class_map: &ClassMap) -> Result<Vec<MaskRegion>, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaskManifest {
    pub datapoint_map: BTreeMap<String, ItemRef>,
    pub class_map: ClassMap,
}

async fn read_manifest<T: for<'de> Deserialize<'de>>(
    dir: &Path,
    file: &str,
) -> Result<T, UploadError> {
    let path = dir.join(file);
    if !tokio::fs::try_exists(&path).await? {
        return Err(UploadError::MissingManifest { path });
    }
    let raw = tokio::fs::read(&path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

impl MaskManifest {
    pub async fn load(dir: &Path) -> Result<Self, UploadError> {
        Ok(Self {
            datapoint_map: read_manifest(dir, DATAPOINT_MAP_FILE).await?,
            class_map: read_manifest(dir, CLASS_MAP_FILE).await?,
        })
    }
}

/// PNG files directly inside `dir`, sorted by name.
pub async fn mask_files(dir: &Path) -> Result<Vec<PathBuf>, UploadError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Build one entry per mask. Fails on the first unmapped or unreadable mask.
pub async fn entries_from_masks(
    dir: &Path,
    polygonizer: &dyn MaskPolygonizer,
) -> Result<Vec<DatapointEntry>, UploadError> {
    let MaskManifest {
        mut datapoint_map,
        class_map,
    } = MaskManifest::load(dir).await?;

    let files = mask_files(dir).await?;
    debug!(masks = files.len(), classes = class_map.len(), "Converting masks");

    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let items = datapoint_map
            .remove(&stem)
            .ok_or_else(|| UploadError::UnmappedMask { file: file.clone() })?
            .into_items();
        let regions = polygonizer
            .polygonize(&path, &class_map)
            .map_err(|message| UploadError::Polygonize {
                file: file.clone(),
                message,
            })?;

        let mut entry = DatapointEntry::new(file, items);
        entry.labels = regions.into_iter().map(MaskRegion::into_label).collect();
        entries.push(entry);
    }
    Ok(entries)
}
