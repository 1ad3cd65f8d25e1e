//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// An axis-aligned extent in some CRS.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857, etc.), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box containing every point. `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let mut bbox = Self::new(x, y, x, y);
        for (x, y) in iter {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another with a non-empty area.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Points along the outline, `steps` per edge.
    ///
    /// Used to reproject an envelope without losing curvature at the edges.
    pub fn densify(&self, steps: usize) -> Vec<(f64, f64)> {
        let steps = steps.max(1);
        let mut points = Vec::with_capacity(steps * 4);
        for i in 0..steps {
            let t = i as f64 / steps as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            points.push((x, self.min_y));
            points.push((self.max_x, y));
            points.push((self.max_x - t * self.width(), self.max_y));
            points.push((self.min_x, self.max_y - t * self.height()));
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));

        let intersection = a.intersection(&b).unwrap();
        assert_eq!(intersection, BoundingBox::new(5.0, 5.0, 10.0, 10.0));
    }

    #[test]
    fn test_touching_edges_do_not_intersect() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_densify_covers_corners() {
        let bbox = BoundingBox::new(-10.0, -5.0, 10.0, 5.0);
        let envelope = BoundingBox::from_points(bbox.densify(8)).unwrap();
        assert_eq!(envelope, bbox);
    }
}
