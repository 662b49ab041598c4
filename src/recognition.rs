use serde_json::Value;

use crate::geometry::{BBox, Point};

/// One detected text span with whatever geometry the engine reported.
/// Coordinates are in preprocessed-image pixel space.
#[derive(Debug, Clone, Default)]
pub struct RecognitionUnit {
    pub text: String,
    pub bbox: Option<BBox>,
    pub polygon: Option<Vec<Point>>,
}

#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub units: Vec<RecognitionUnit>,
}

impl PageResult {
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            units: texts
                .into_iter()
                .map(|text| RecognitionUnit {
                    text: text.into(),
                    ..RecognitionUnit::default()
                })
                .collect(),
        }
    }
}

/// Adapts one engine result document into a `PageResult`. Depending on the
/// engine version the fields sit at the top level or under a `res` key;
/// all of the defensive probing lives here. Malformed geometry entries
/// resolve to `None`, never an error.
pub fn parse_page_result(value: &Value) -> PageResult {
    let body = value
        .get("res")
        .filter(|nested| nested.is_object())
        .unwrap_or(value);
    let texts = string_list(body.get("rec_texts"));
    let boxes = body.get("rec_boxes");
    let polygons = body.get("rec_polys").or_else(|| body.get("dt_polys"));

    let units = texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| RecognitionUnit {
            text,
            bbox: parse_bbox(boxes.and_then(|entries| entries.get(index))),
            polygon: parse_polygon(polygons.and_then(|entries| entries.get(index))),
        })
        .collect();

    PageResult { units }
}

// Non-string entries map to empty strings so indices stay aligned with
// the geometry arrays; empty texts are filtered downstream.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().unwrap_or_default().to_string())
            .collect(),
        Some(Value::String(text)) => {
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text.clone()]
            }
        }
        _ => Vec::new(),
    }
}

fn parse_bbox(value: Option<&Value>) -> Option<BBox> {
    let entries = value?.as_array()?;
    if entries.len() < 4 {
        return None;
    }
    let mut coords = [0f64; 4];
    for (slot, entry) in coords.iter_mut().zip(entries.iter()) {
        *slot = entry.as_f64()?;
    }
    Some(BBox {
        x_min: coords[0],
        y_min: coords[1],
        x_max: coords[2],
        y_max: coords[3],
    })
}

fn parse_polygon(value: Option<&Value>) -> Option<Vec<Point>> {
    let entries = value?.as_array()?;
    let points: Vec<Point> = entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            Some(Point {
                x: pair.first()?.as_f64()?,
                y: pair.get(1)?.as_f64()?,
            })
        })
        .collect();
    if points.len() >= 4 { Some(points) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_top_level_result() {
        let value = json!({
            "rec_texts": ["Hello", "World"],
            "rec_boxes": [[1.0, 2.0, 30.0, 40.0], [5, 6, 70, 80]],
        });
        let page = parse_page_result(&value);
        assert_eq!(page.units.len(), 2);
        assert_eq!(page.units[0].text, "Hello");
        assert_eq!(
            page.units[0].bbox,
            Some(BBox {
                x_min: 1.0,
                y_min: 2.0,
                x_max: 30.0,
                y_max: 40.0,
            })
        );
        assert_eq!(page.units[1].text, "World");
        assert!(page.units[1].polygon.is_none());
    }

    #[test]
    fn parses_nested_res_wrapper() {
        let value = json!({
            "res": {
                "rec_texts": ["nested"],
                "dt_polys": [[[0, 0], [10, 0], [10, 5], [0, 5]]],
            }
        });
        let page = parse_page_result(&value);
        assert_eq!(page.units.len(), 1);
        assert!(page.units[0].bbox.is_none());
        let polygon = page.units[0].polygon.as_ref().expect("polygon");
        assert_eq!(polygon.len(), 4);
        assert_eq!(polygon[2], Point { x: 10.0, y: 5.0 });
    }

    #[test]
    fn single_string_becomes_one_unit() {
        let page = parse_page_result(&json!({ "rec_texts": "only line" }));
        assert_eq!(page.units.len(), 1);
        assert_eq!(page.units[0].text, "only line");
    }

    #[test]
    fn malformed_geometry_is_dropped_per_unit() {
        let value = json!({
            "rec_texts": ["a", "b", "c"],
            "rec_boxes": [[1.0, 2.0], "nonsense"],
            "rec_polys": [null, [[0, 0], [1, 1]], [[0, 0], [1, 0], [1, 1], [0, 1]]],
        });
        let page = parse_page_result(&value);
        assert_eq!(page.units.len(), 3);
        // short box and short polygon both resolve to no geometry
        assert!(page.units[0].bbox.is_none());
        assert!(page.units[0].polygon.is_none());
        assert!(page.units[1].bbox.is_none());
        assert!(page.units[1].polygon.is_none());
        // the third unit still gets its valid polygon
        assert!(page.units[2].polygon.is_some());
    }

    #[test]
    fn missing_fields_yield_empty_page() {
        let page = parse_page_result(&json!({ "something_else": true }));
        assert!(page.units.is_empty());
    }
}
