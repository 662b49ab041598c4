use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::geometry::{CoordinateMap, ScaledBBox};
use crate::recognition::{PageResult, RecognitionUnit};

const REF_PREFIX: &str = "ref-";
const REF_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Generic,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SnapshotGeometry {
    Box(ScaledBBox),
    Polygon { polygon: Vec<[i64; 2]> },
}

/// One node of the snapshot tree. Field order is the emission order.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotNode {
    pub role: Role,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<SnapshotGeometry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    fn container(name: Option<String>) -> Self {
        Self {
            role: Role::Generic,
            reference: generate_ref(),
            name,
            bbox: None,
            children: Vec::new(),
        }
    }

    fn text(name: String) -> Self {
        Self {
            role: Role::Text,
            reference: generate_ref(),
            name: Some(name),
            bbox: None,
            children: Vec::new(),
        }
    }
}

// Best-effort uniqueness from a time-and-counter seed; collisions are not
// checked for.
fn generate_ref() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let digest = md5::compute(format!("{nanos}:{sequence}"));
    let hex = format!("{digest:x}");
    format!("{}{}", REF_PREFIX, &hex[..REF_LEN])
}

/// Builds the snapshot tree: a root container named after the image file,
/// a metadata child, then one container per page with at least one
/// non-empty unit. Geometry is mapped back to original-image pixels.
pub fn build(
    pages: &[PageResult],
    image_path: &Path,
    language: &str,
    map: &CoordinateMap,
) -> SnapshotNode {
    let file_name = image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_path.display().to_string());
    let mut root = SnapshotNode::container(Some(format!("OCR Result: {file_name}")));

    let mut metadata = SnapshotNode::container(None);
    metadata
        .children
        .push(SnapshotNode::text(format!("Source Image: {}", image_path.display())));
    metadata
        .children
        .push(SnapshotNode::text(format!("Language: {language}")));
    root.children.push(metadata);

    for page in pages {
        let mut container = SnapshotNode::container(None);
        for unit in &page.units {
            let trimmed = unit.text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut leaf = SnapshotNode::text(trimmed.to_string());
            leaf.bbox = unit_geometry(unit, map);
            container.children.push(leaf);
        }
        if !container.children.is_empty() {
            root.children.push(container);
        }
    }

    root
}

// Box geometry wins over a polygon; a polygon contributes its first four
// points; anything else is no geometry.
fn unit_geometry(unit: &RecognitionUnit, map: &CoordinateMap) -> Option<SnapshotGeometry> {
    if let Some(bbox) = unit.bbox.as_ref() {
        return Some(SnapshotGeometry::Box(map.map_bbox(bbox)));
    }
    let polygon = unit.polygon.as_ref()?;
    if polygon.len() < 4 {
        return None;
    }
    Some(SnapshotGeometry::Polygon {
        polygon: polygon.iter().take(4).map(|point| map.map_point(point)).collect(),
    })
}

/// Serializes the tree as a single-element YAML list in block style, keys
/// in declaration order.
pub fn render(root: &SnapshotNode) -> Result<String> {
    serde_yaml::to_string(std::slice::from_ref(root))
        .with_context(|| "failed to serialize snapshot document")
}
