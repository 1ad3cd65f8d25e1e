//! Affine geotransforms.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::buffer::RasterShape;

/// Tolerance, in pixels, under which two grids are considered aligned.
pub const ALIGNMENT_EPSILON: f64 = 1e-6;

/// Six-coefficient affine transform from pixel to CRS coordinates.
///
/// Coefficients follow the GDAL order `[x0, a, b, y0, d, e]`:
///
/// ```text
/// x = x0 + col * a + row * b
/// y = y0 + col * d + row * e
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    pub fn new(coefficients: [f64; 6]) -> Self {
        Self(coefficients)
    }

    /// North-up transform with the given upper-left origin and pixel size.
    pub fn from_origin(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    /// Signed pixel size `(a, e)`; `e` is negative for north-up rasters.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.0[1], self.0[5])
    }

    /// Pixel (fractional) to CRS coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let [x0, a, b, y0, d, e] = self.0;
        (x0 + col * a + row * b, y0 + col * d + row * e)
    }

    /// Inverse transform, `None` when the matrix is singular.
    pub fn invert(&self) -> Option<GeoTransform> {
        let [x0, a, b, y0, d, e] = self.0;
        let det = a * e - b * d;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Some(GeoTransform([
            -x0 * ia - y0 * ib,
            ia,
            ib,
            -x0 * id - y0 * ie,
            id,
            ie,
        ]))
    }

    /// CRS coordinates to fractional pixel `(col, row)`.
    pub fn to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.invert().map(|inv| inv.apply(x, y))
    }

    /// Transform of the grid whose origin is pixel `(col, row)` of this one.
    pub fn shifted(&self, col: f64, row: f64) -> GeoTransform {
        let (x, y) = self.apply(col, row);
        let mut c = self.0;
        c[0] = x;
        c[3] = y;
        GeoTransform(c)
    }

    /// Extent covered by a raster of `shape` pixels.
    pub fn bounds(&self, shape: RasterShape) -> BoundingBox {
        let cols = shape.cols as f64;
        let rows = shape.rows as f64;
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(cols, 0.0),
            self.apply(0.0, rows),
            self.apply(cols, rows),
        ];
        // Four points are never empty
        BoundingBox::from_points(corners).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Whether both transforms share pixel size and rotation.
    pub fn same_resolution(&self, other: &GeoTransform) -> bool {
        [1usize, 2, 4, 5].iter().all(|&i| {
            let scale = self.0[i].abs().max(other.0[i].abs()).max(f64::MIN_POSITIVE);
            (self.0[i] - other.0[i]).abs() / scale < ALIGNMENT_EPSILON
        })
    }

    /// Integer pixel offset of `other`'s origin inside this grid, when
    /// both grids share resolution and `other` starts on a pixel corner.
    pub fn aligned_offset(&self, other: &GeoTransform) -> Option<(i64, i64)> {
        if !self.same_resolution(other) {
            return None;
        }
        let (ox, oy) = other.origin();
        let (col, row) = self.to_pixel(ox, oy)?;
        let (rc, rr) = (col.round(), row.round());
        if (col - rc).abs() < ALIGNMENT_EPSILON && (row - rr).abs() < ALIGNMENT_EPSILON {
            Some((rc as i64, rr as i64))
        } else {
            None
        }
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(c: [f64; 6]) -> Self {
        Self(c)
    }
}
