//! Flat label records as stored by the annotation service.
//!
//! A [`Label`] keeps every key it was read with so that the flat format
//! round-trips unchanged. The geometry it carries is exposed through
//! [`LabelShape`], a borrowed view resolved in a fixed priority order.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Normalized 2D point, `[0, 1]` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub xnorm: f64,
    pub ynorm: f64,
}

/// Voxel coordinates inside a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelPoint {
    pub i: i64,
    pub j: i64,
    pub k: i64,
}

/// Patient/world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormBox {
    pub xnorm: f64,
    pub ynorm: f64,
    pub wnorm: f64,
    pub hnorm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cuboid {
    pub point1: VoxelPoint,
    pub point2: VoxelPoint,
    pub absolutepoint1: WorldPoint,
    pub absolutepoint2: WorldPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthMeasure {
    pub point1: VoxelPoint,
    pub point2: VoxelPoint,
    pub absolutepoint1: WorldPoint,
    pub absolutepoint2: WorldPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleMeasure {
    pub point1: VoxelPoint,
    pub vertex: VoxelPoint,
    pub point2: VoxelPoint,
    pub absolutepoint1: WorldPoint,
    pub absolutevertex: WorldPoint,
    pub absolutepoint2: WorldPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
}

/// Reference to an instance inside a segmentation volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DicomRef {
    pub instanceid: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groupids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAttribute {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// A single label in the flat task format.
///
/// Reading never fails on an object: a known key whose value does not fit
/// its type is kept verbatim in `extra` and takes no part in dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Label {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<RawAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labelid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trackid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frameindex: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumeindex: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasklevelclassify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiclassify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dicom: Option<DicomRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length3d: Option<LengthMeasure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle3d: Option<AngleMeasure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<NormPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point3d: Option<VoxelPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyline: Option<Vec<NormPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox2d: Option<NormBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox3d: Option<Cuboid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<NormPoint>>,

    /// Keys this crate does not interpret (`pixel`, `classify`, ...) and
    /// known keys whose value was malformed.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Moves typed keys out of a label object, leaving malformed ones behind.
struct LabelFields {
    map: Map<String, Value>,
    malformed: Vec<&'static str>,
}

impl LabelFields {
    fn take<T: DeserializeOwned>(&mut self, key: &'static str) -> Option<T> {
        let value = self.map.remove(key)?;
        if value.is_null() {
            return None;
        }
        match T::deserialize(&value) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                self.map.insert(key.to_string(), value);
                self.malformed.push(key);
                None
            }
        }
    }
}

impl From<Map<String, Value>> for Label {
    fn from(map: Map<String, Value>) -> Self {
        let mut fields = LabelFields {
            map,
            malformed: Vec::new(),
        };
        let label = Label {
            category: fields.take("category").unwrap_or_default(),
            attributes: fields.take("attributes").unwrap_or_default(),
            labelid: fields.take("labelid"),
            trackid: fields.take("trackid"),
            keyframe: fields.take("keyframe"),
            end: fields.take("end"),
            frameindex: fields.take("frameindex"),
            volumeindex: fields.take("volumeindex"),
            tasklevelclassify: fields.take("tasklevelclassify"),
            multiclassify: fields.take("multiclassify"),
            dicom: fields.take("dicom"),
            length3d: fields.take("length3d"),
            angle3d: fields.take("angle3d"),
            point: fields.take("point"),
            point3d: fields.take("point3d"),
            polyline: fields.take("polyline"),
            bbox2d: fields.take("bbox2d"),
            bbox3d: fields.take("bbox3d"),
            polygon: fields.take("polygon"),
            extra: Map::new(),
        };
        if !fields.malformed.is_empty() {
            debug!(
                labelid = ?label.labelid,
                keys = ?fields.malformed,
                "Keeping malformed label keys verbatim"
            );
        }
        Label {
            extra: fields.map,
            ..label
        }
    }
}

/// Geometry carried by a label, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LabelShape<'a> {
    TaskClassification,
    MultiClassification,
    Instance(&'a DicomRef),
    Length(&'a LengthMeasure),
    Angle(&'a AngleMeasure),
    Point(&'a NormPoint),
    Point3d(&'a VoxelPoint),
    Polyline(&'a [NormPoint]),
    BoundingBox(&'a NormBox),
    Cuboid(&'a Cuboid),
    Polygon(&'a [NormPoint]),
}

impl LabelShape<'_> {
    /// The flat-format key this shape was read from.
    pub fn key(&self) -> &'static str {
        match self {
            LabelShape::TaskClassification => "tasklevelclassify",
            LabelShape::MultiClassification => "multiclassify",
            LabelShape::Instance(_) => "dicom",
            LabelShape::Length(_) => "length3d",
            LabelShape::Angle(_) => "angle3d",
            LabelShape::Point(_) => "point",
            LabelShape::Point3d(_) => "point3d",
            LabelShape::Polyline(_) => "polyline",
            LabelShape::BoundingBox(_) => "bbox2d",
            LabelShape::Cuboid(_) => "bbox3d",
            LabelShape::Polygon(_) => "polygon",
        }
    }
}

/// Category as emitted in the series format: a leaf name for two-level
/// paths, otherwise the path below the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Category {
    Name(String),
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Text(String),
    Other(Value),
}

impl From<&Value> for AttributeValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => AttributeValue::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => AttributeValue::Bool(false),
            Value::String(s) => AttributeValue::Text(s.clone()),
            other => AttributeValue::Other(other.clone()),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

impl Label {
    /// Every shape key present on this label, highest priority first.
    ///
    /// A well-formed label yields exactly one item.
    pub fn shapes(&self) -> impl Iterator<Item = LabelShape<'_>> {
        [
            self.tasklevelclassify
                .filter(|flag| *flag)
                .map(|_| LabelShape::TaskClassification),
            self.multiclassify
                .filter(|flag| *flag)
                .map(|_| LabelShape::MultiClassification),
            self.dicom.as_ref().map(LabelShape::Instance),
            self.length3d.as_ref().map(LabelShape::Length),
            self.angle3d.as_ref().map(LabelShape::Angle),
            self.point.as_ref().map(LabelShape::Point),
            self.point3d.as_ref().map(LabelShape::Point3d),
            self.polyline.as_deref().map(LabelShape::Polyline),
            self.bbox2d.as_ref().map(LabelShape::BoundingBox),
            self.bbox3d.as_ref().map(LabelShape::Cuboid),
            self.polygon.as_deref().map(LabelShape::Polygon),
        ]
        .into_iter()
        .flatten()
    }

    /// The shape this label is routed by, if any.
    pub fn shape(&self) -> Option<LabelShape<'_>> {
        self.shapes().next()
    }

    pub fn resolved_category(&self) -> Option<Category> {
        let path = self.category.first()?;
        if path.len() == 2 {
            Some(Category::Name(path[1].clone()))
        } else {
            Some(Category::Path(path.iter().skip(1).cloned().collect()))
        }
    }

    /// Attribute map keyed by name, `None` when the label has no attributes.
    pub fn resolved_attributes(&self) -> Option<Attributes> {
        if self.attributes.is_empty() {
            return None;
        }
        Some(
            self.attributes
                .iter()
                .map(|attr| (attr.name.clone(), AttributeValue::from(&attr.value)))
                .collect(),
        )
    }

    /// Drop unknown keys whose value is null.
    pub fn clean(mut self) -> Self {
        self.extra.retain(|_, value| !value.is_null());
        self
    }
}
