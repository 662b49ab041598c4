use serde::Serialize;

/// Axis-aligned box in the coordinate space the engine reported it in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Box mapped back to original-image pixels, truncated to integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaledBBox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

/// Maps coordinates from preprocessed-image pixel space back to the
/// original image. When the two sizes match the mapping is the identity
/// apart from integer truncation.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMap {
    original: Dimensions,
    prepared: Dimensions,
}

impl CoordinateMap {
    pub fn new(original: Dimensions, prepared: Dimensions) -> Self {
        Self { original, prepared }
    }

    pub fn identity(size: Dimensions) -> Self {
        Self::new(size, size)
    }

    fn scale(&self) -> Option<(f64, f64)> {
        if self.original == self.prepared {
            return None;
        }
        Some((
            f64::from(self.original.width) / f64::from(self.prepared.width),
            f64::from(self.original.height) / f64::from(self.prepared.height),
        ))
    }

    pub fn map_x(&self, x: f64) -> i64 {
        match self.scale() {
            Some((sx, _)) => (x * sx) as i64,
            None => x as i64,
        }
    }

    pub fn map_y(&self, y: f64) -> i64 {
        match self.scale() {
            Some((_, sy)) => (y * sy) as i64,
            None => y as i64,
        }
    }

    pub fn map_bbox(&self, bbox: &BBox) -> ScaledBBox {
        ScaledBBox {
            x_min: self.map_x(bbox.x_min),
            y_min: self.map_y(bbox.y_min),
            x_max: self.map_x(bbox.x_max),
            y_max: self.map_y(bbox.y_max),
        }
    }

    pub fn map_point(&self, point: &Point) -> [i64; 2] {
        [self.map_x(point.x), self.map_y(point.y)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn identity_truncates_only() {
        let map = CoordinateMap::identity(dims(800, 600));
        let scaled = map.map_bbox(&BBox {
            x_min: 1.7,
            y_min: 2.9,
            x_max: 10.2,
            y_max: 20.8,
        });
        assert_eq!(
            scaled,
            ScaledBBox {
                x_min: 1,
                y_min: 2,
                x_max: 10,
                y_max: 20,
            }
        );
    }

    #[test]
    fn maps_back_to_original_space() {
        let map = CoordinateMap::new(dims(3000, 1000), dims(1920, 640));
        // scale_x = scale_y = 1.5625
        assert_eq!(map.map_x(100.0), 156);
        assert_eq!(map.map_y(100.0), 156);
        assert_eq!(map.map_point(&Point { x: 0.0, y: 640.0 }), [0, 1000]);
    }

    #[test]
    fn round_trip_within_one_pixel() {
        let forward = CoordinateMap::new(dims(3000, 1000), dims(1920, 640));
        let inverse = CoordinateMap::new(dims(1920, 640), dims(3000, 1000));
        for x in [0i64, 37, 640, 1919] {
            let there = forward.map_x(x as f64);
            let back = inverse.map_x(there as f64);
            assert!((back - x).abs() <= 1, "x={} came back as {}", x, back);
        }
        for y in [0i64, 11, 320, 639] {
            let there = forward.map_y(y as f64);
            let back = inverse.map_y(there as f64);
            assert!((back - y).abs() <= 1, "y={} came back as {}", y, back);
        }
    }
}
