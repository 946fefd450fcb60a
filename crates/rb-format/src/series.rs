//! Per-volume ("series") label layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::label::{
    AngleMeasure, Attributes, Category, Label, LabelShape, LengthMeasure, NormPoint, VoxelPoint,
    WorldPoint,
};
use crate::task::LabelMapEntry;

/// Category and attributes shared by every series record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl From<&Label> for LabelMeta {
    fn from(label: &Label) -> Self {
        Self {
            category: label.resolved_category(),
            attributes: label.resolved_attributes(),
        }
    }
}

/// Video/track placement of a geometric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMeta {
    pub key_frame: bool,
    pub end_track: bool,
    pub frame_index: u64,
}

impl From<&Label> for TrackMeta {
    fn from(label: &Label) -> Self {
        Self {
            key_frame: label.keyframe.unwrap_or(true),
            end_track: label.end.unwrap_or(true),
            frame_index: label.frameindex.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    #[serde(flatten)]
    pub meta: LabelMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl From<&NormPoint> for Point2 {
    fn from(point: &NormPoint) -> Self {
        Self {
            x: point.xnorm,
            y: point.ynorm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthRecord {
    pub point1: VoxelPoint,
    pub point2: VoxelPoint,
    pub absolute_point1: WorldPoint,
    pub absolute_point2: WorldPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AngleRecord {
    pub point1: VoxelPoint,
    pub vertex: VoxelPoint,
    pub point2: VoxelPoint,
    pub absolute_point1: WorldPoint,
    pub absolute_vertex: WorldPoint,
    pub absolute_point2: WorldPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Measurement {
    Length(LengthRecord),
    Angle(AngleRecord),
}

impl Measurement {
    fn length(measure: &LengthMeasure, meta: LabelMeta) -> Self {
        Measurement::Length(LengthRecord {
            point1: measure.point1,
            point2: measure.point2,
            absolute_point1: measure.absolutepoint1,
            absolute_point2: measure.absolutepoint2,
            normal: measure.normal.clone(),
            length: measure.length,
            meta,
        })
    }

    fn angle(measure: &AngleMeasure, meta: LabelMeta) -> Self {
        Measurement::Angle(AngleRecord {
            point1: measure.point1,
            vertex: measure.vertex,
            point2: measure.point2,
            absolute_point1: measure.absolutepoint1,
            absolute_vertex: measure.absolutevertex,
            absolute_point2: measure.absolutepoint2,
            normal: measure.normal.clone(),
            angle: measure.angle,
            meta,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(flatten)]
    pub track: TrackMeta,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark3d {
    pub i: i64,
    pub j: i64,
    pub k: i64,
    #[serde(flatten)]
    pub track: TrackMeta,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

/// Open (polyline) or closed (polygon) point chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointChain {
    pub points: Vec<Point2>,
    #[serde(flatten)]
    pub track: TrackMeta,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(flatten)]
    pub track: TrackMeta,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox3d {
    pub point1: VoxelPoint,
    pub point2: VoxelPoint,
    pub absolute_point1: WorldPoint,
    pub absolute_point2: WorldPoint,
    #[serde(flatten)]
    pub track: TrackMeta,
    #[serde(flatten)]
    pub meta: LabelMeta,
}

/// One logical volume of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_frames: Option<u32>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_map: Option<BTreeMap<String, ClassificationRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifications: Option<Vec<ClassificationRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<Vec<Measurement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Landmark>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks3d: Option<Vec<Landmark3d>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polylines: Option<Vec<PointChain>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_boxes3d: Option<Vec<BoundingBox3d>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygons: Option<Vec<PointChain>>,
}

/// Accumulates labels for one volume; built into a [`Series`] once.
#[derive(Debug, Default)]
struct VolumeBuilder {
    name: Option<String>,
    num_frames: Option<u32>,
    items: Vec<String>,
    segmentations: Option<String>,
    segment_map: BTreeMap<String, ClassificationRecord>,
    classifications: Vec<ClassificationRecord>,
    measurements: Vec<Measurement>,
    landmarks: Vec<Landmark>,
    landmarks3d: Vec<Landmark3d>,
    polylines: Vec<PointChain>,
    bounding_boxes: Vec<BoundingBox>,
    bounding_boxes3d: Vec<BoundingBox3d>,
    polygons: Vec<PointChain>,
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

impl VolumeBuilder {
    fn from_skeleton(series: &Series) -> Self {
        Self {
            name: series.name.clone(),
            num_frames: series.num_frames,
            items: series.items.clone(),
            segmentations: series.segmentations.clone(),
            ..Default::default()
        }
    }

    fn build(self) -> Series {
        Series {
            name: self.name,
            num_frames: self.num_frames,
            items: self.items,
            segmentations: self.segmentations,
            segment_map: (!self.segment_map.is_empty()).then_some(self.segment_map),
            classifications: non_empty(self.classifications),
            measurements: non_empty(self.measurements),
            landmarks: non_empty(self.landmarks),
            landmarks3d: non_empty(self.landmarks3d),
            polylines: non_empty(self.polylines),
            bounding_boxes: non_empty(self.bounding_boxes),
            bounding_boxes3d: non_empty(self.bounding_boxes3d),
            polygons: non_empty(self.polygons),
        }
    }
}

/// Volumes plus the task-level classification, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesBundle {
    pub series: Vec<Series>,
    pub classification: Option<ClassificationRecord>,
}

/// Volume indices at or past this bound (or past the task's own volume
/// count, if larger) are skipped instead of grown into.
pub const MAX_VOLUMES: usize = 1024;

fn label_map_index(position: usize, entry: &LabelMapEntry) -> usize {
    entry.image_index.unwrap_or(position)
}

/// Distribute flat labels into per-volume buckets.
///
/// `volumes` is used as the skeleton and is never mutated; the returned
/// series list is extended with empty volumes to cover every volume index
/// referenced by `labels_map` or by a label's `volumeindex`, up to
/// [`MAX_VOLUMES`]. Labels and map entries past that bound are skipped.
pub fn dicom_rb_series(
    labels: &[Label],
    labels_map: &[LabelMapEntry],
    volumes: &[Series],
) -> SeriesBundle {
    let mut builders: Vec<VolumeBuilder> = volumes.iter().map(VolumeBuilder::from_skeleton).collect();
    let limit = volumes.len().max(MAX_VOLUMES);

    let required = labels_map
        .iter()
        .enumerate()
        .map(|(position, entry)| label_map_index(position, entry))
        .chain(labels.iter().map(|label| label.volumeindex.unwrap_or(0)))
        .filter(|&index| index < limit)
        .max()
        .map_or(0, |index| index + 1);
    if builders.len() < required {
        builders.resize_with(required, VolumeBuilder::default);
    }

    for (position, entry) in labels_map.iter().enumerate() {
        let index = label_map_index(position, entry);
        if index >= limit {
            warn!(index, limit, "Skipping labels map entry with an unusable volume index");
            continue;
        }
        if let Some(name) = &entry.label_name {
            builders[index].segmentations = Some(name.clone());
        }
    }

    let mut classification = None;
    for label in labels {
        let index = label.volumeindex.unwrap_or(0);
        if index >= limit {
            warn!(labelid = ?label.labelid, index, limit, "Skipping label with an unusable volume index");
            continue;
        }

        let mut shapes = label.shapes();
        let Some(shape) = shapes.next() else {
            debug!(labelid = ?label.labelid, "Dropping label without a recognized shape");
            continue;
        };
        let ignored: Vec<&'static str> = shapes.map(|s| s.key()).collect();
        if !ignored.is_empty() {
            warn!(
                labelid = ?label.labelid,
                routed = shape.key(),
                ?ignored,
                "Label carries more than one shape key"
            );
        }

        let meta = LabelMeta::from(label);
        let volume = &mut builders[index];
        match shape {
            LabelShape::TaskClassification => {
                classification = Some(ClassificationRecord { meta });
            }
            LabelShape::MultiClassification => {
                volume.classifications.push(ClassificationRecord { meta });
            }
            LabelShape::Instance(dicom) => {
                let key = dicom.instanceid.to_string();
                match label.volumeindex {
                    Some(index) if index < builders.len() => {
                        builders[index]
                            .segment_map
                            .insert(key, ClassificationRecord { meta });
                    }
                    _ => {
                        for builder in builders.iter_mut() {
                            builder
                                .segment_map
                                .insert(key.clone(), ClassificationRecord { meta: meta.clone() });
                        }
                    }
                }
            }
            LabelShape::Length(measure) => {
                volume.measurements.push(Measurement::length(measure, meta));
            }
            LabelShape::Angle(measure) => {
                volume.measurements.push(Measurement::angle(measure, meta));
            }
            LabelShape::Point(point) => volume.landmarks.push(Landmark {
                x: point.xnorm,
                y: point.ynorm,
                track: TrackMeta::from(label),
                meta,
            }),
            LabelShape::Point3d(point) => volume.landmarks3d.push(Landmark3d {
                i: point.i,
                j: point.j,
                k: point.k,
                track: TrackMeta::from(label),
                meta,
            }),
            LabelShape::Polyline(points) => volume.polylines.push(PointChain {
                points: points.iter().map(Point2::from).collect(),
                track: TrackMeta::from(label),
                meta,
            }),
            LabelShape::BoundingBox(bbox) => volume.bounding_boxes.push(BoundingBox {
                x: bbox.xnorm,
                y: bbox.ynorm,
                width: bbox.wnorm,
                height: bbox.hnorm,
                track: TrackMeta::from(label),
                meta,
            }),
            LabelShape::Cuboid(cuboid) => volume.bounding_boxes3d.push(BoundingBox3d {
                point1: cuboid.point1,
                point2: cuboid.point2,
                absolute_point1: cuboid.absolutepoint1,
                absolute_point2: cuboid.absolutepoint2,
                track: TrackMeta::from(label),
                meta,
            }),
            LabelShape::Polygon(points) => volume.polygons.push(PointChain {
                points: points.iter().map(Point2::from).collect(),
                track: TrackMeta::from(label),
                meta,
            }),
        }
    }

    SeriesBundle {
        series: builders.into_iter().map(VolumeBuilder::build).collect(),
        classification,
    }
}
