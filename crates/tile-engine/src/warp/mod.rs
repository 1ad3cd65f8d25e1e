//! Coordinate transformation and resampling between grids.
//!
//! The [`Warper`] trait is the seam for plugging in a full projection
//! library. The built-in [`GridWarper`] handles identical CRSs and the
//! EPSG:4326 / EPSG:3857 pair, with x = longitude and y = latitude for
//! geographic coordinates.

pub mod interpolation;

use std::f64::consts::PI;

use tilestore_common::{
    BoundingBox, Crs, CrsCode, DataType, GeoTransform, RasterBuffer, RasterShape, StoreError,
    StoreResult,
};

use crate::types::ResampleMethod;
pub use interpolation::{
    average_interpolate, bilinear_interpolate, cubic_interpolate, nearest_interpolate,
};

/// WGS84 semi-major axis (meters).
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Points per bbox edge when reprojecting an envelope.
const DENSIFY_STEPS: usize = 21;

/// A raster grid: CRS, affine transform and pixel dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub shape: RasterShape,
}

impl GridSpec {
    pub fn new(crs: Crs, transform: GeoTransform, shape: RasterShape) -> Self {
        Self {
            crs,
            transform,
            shape,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.shape)
    }
}

/// Reprojects coordinates and resamples pixel buffers.
pub trait Warper: Send + Sync {
    /// Transform points in place from `from` to `to`.
    fn transform_points(&self, from: &Crs, to: &Crs, points: &mut [(f64, f64)]) -> StoreResult<()>;

    /// Envelope of `bbox` after transformation, using densified edges.
    fn transform_bounds(&self, from: &Crs, to: &Crs, bbox: &BoundingBox) -> StoreResult<BoundingBox> {
        if from.same_as(to) {
            return Ok(*bbox);
        }
        let mut points = bbox.densify(DENSIFY_STEPS);
        self.transform_points(from, to, &mut points)?;
        BoundingBox::from_points(points.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite()))
            .ok_or_else(|| {
                StoreError::Reprojection(format!("extent cannot be projected from {} to {}", from, to))
            })
    }

    /// Materialize `src` (laid out on `src_grid`) onto `dst_grid`.
    ///
    /// Source pixels equal to `nodata` are treated as missing. Destination
    /// pixels outside the source extent take `nodata`, or 0 without one.
    fn resample(
        &self,
        src: &RasterBuffer,
        src_grid: &GridSpec,
        dst_grid: &GridSpec,
        method: ResampleMethod,
        nodata: Option<f64>,
    ) -> StoreResult<RasterBuffer>;
}

/// Built-in warper for same-CRS grids and EPSG:4326 <-> EPSG:3857.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridWarper;

impl GridWarper {
    pub fn new() -> Self {
        Self
    }

    fn pair(from: &Crs, to: &Crs) -> StoreResult<Option<(CrsCode, CrsCode)>> {
        if from.same_as(to) {
            return Ok(None);
        }
        match (from.code(), to.code()) {
            (Some(a), Some(b)) => Ok(Some((a, b))),
            _ => Err(StoreError::Reprojection(format!(
                "no transformation from {} to {}",
                from, to
            ))),
        }
    }
}

/// Lon/lat degrees to Web Mercator meters.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon.to_radians() * EARTH_RADIUS;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

/// Web Mercator meters to lon/lat degrees.
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

impl Warper for GridWarper {
    fn transform_points(&self, from: &Crs, to: &Crs, points: &mut [(f64, f64)]) -> StoreResult<()> {
        let Some(pair) = Self::pair(from, to)? else {
            return Ok(());
        };
        let f: fn(f64, f64) -> (f64, f64) = match pair {
            (CrsCode::Epsg4326, CrsCode::Epsg3857) => lonlat_to_mercator,
            (CrsCode::Epsg3857, CrsCode::Epsg4326) => mercator_to_lonlat,
            (a, b) => {
                return Err(StoreError::Reprojection(format!(
                    "no transformation from {} to {}",
                    a, b
                )))
            }
        };
        for p in points.iter_mut() {
            *p = f(p.0, p.1);
        }
        Ok(())
    }

    fn resample(
        &self,
        src: &RasterBuffer,
        src_grid: &GridSpec,
        dst_grid: &GridSpec,
        method: ResampleMethod,
        nodata: Option<f64>,
    ) -> StoreResult<RasterBuffer> {
        if src.shape() != src_grid.shape {
            return Err(StoreError::InvalidBuffer(format!(
                "source buffer is {}x{}, grid is {}x{}",
                src.shape().rows,
                src.shape().cols,
                src_grid.shape.rows,
                src_grid.shape.cols
            )));
        }
        let src_inverse = src_grid.transform.invert().ok_or_else(|| {
            StoreError::Reprojection("source geotransform is not invertible".to_string())
        })?;

        let width = src_grid.shape.cols;
        let height = src_grid.shape.rows;
        let fill = nodata.unwrap_or(0.0);
        let data_type = src.data_type();

        // Missing samples become NaN so the kernels can skip them
        let samples: Vec<f64> = match nodata {
            Some(nd) if !nd.is_nan() => src
                .data()
                .iter()
                .map(|&v| if v == nd { f64::NAN } else { v })
                .collect(),
            _ => src.data().to_vec(),
        };

        // Map a destination pixel-space point into source index space
        let to_source = |points: &mut Vec<(f64, f64)>| -> StoreResult<()> {
            self.transform_points(&dst_grid.crs, &src_grid.crs, points)?;
            for p in points.iter_mut() {
                let (col, row) = src_inverse.apply(p.0, p.1);
                *p = (col - 0.5, row - 0.5);
            }
            Ok(())
        };

        let rows = dst_grid.shape.rows;
        let cols = dst_grid.shape.cols;
        let mut out = Vec::with_capacity(rows * cols);

        if method == ResampleMethod::Average {
            // Pixel corner lattice, shared between neighbouring pixels
            let mut corners = Vec::with_capacity((rows + 1) * (cols + 1));
            for r in 0..=rows {
                for c in 0..=cols {
                    corners.push(dst_grid.transform.apply(c as f64, r as f64));
                }
            }
            to_source(&mut corners)?;
            for r in 0..rows {
                for c in 0..cols {
                    let ul = corners[r * (cols + 1) + c];
                    let lr = corners[(r + 1) * (cols + 1) + c + 1];
                    let centre = ((ul.0 + lr.0) / 2.0, (ul.1 + lr.1) / 2.0);
                    let value = on_source(width, height, centre)
                        .then(|| average_interpolate(&samples, width, height, ul, lr));
                    out.push(finish(value, fill, nodata, data_type));
                }
            }
        } else {
            let mut points = Vec::with_capacity(cols);
            for r in 0..rows {
                points.clear();
                for c in 0..cols {
                    points.push(dst_grid.transform.apply(c as f64 + 0.5, r as f64 + 0.5));
                }
                to_source(&mut points)?;
                for &(x, y) in &points {
                    let value = if on_source(width, height, (x, y)) {
                        Some(match method {
                            ResampleMethod::Nearest | ResampleMethod::Average => {
                                nearest_interpolate(&samples, width, height, x, y)
                            }
                            ResampleMethod::Bilinear => {
                                bilinear_interpolate(&samples, width, height, x, y)
                            }
                            ResampleMethod::Cubic => cubic_interpolate(&samples, width, height, x, y),
                        })
                    } else {
                        None
                    };
                    out.push(finish(value, fill, nodata, data_type));
                }
            }
        }

        RasterBuffer::from_vec(data_type, dst_grid.shape, out)
    }
}

fn on_source(width: usize, height: usize, (x, y): (f64, f64)) -> bool {
    x.is_finite()
        && y.is_finite()
        && x >= -0.5
        && y >= -0.5
        && x < width as f64 - 0.5
        && y < height as f64 - 0.5
}

/// Final sample value: outside the source takes `fill`, a missing sample
/// takes nodata, integer types are rounded and clamped.
fn finish(value: Option<f64>, fill: f64, nodata: Option<f64>, data_type: DataType) -> f64 {
    match value {
        None => fill,
        Some(v) if v.is_nan() => nodata.unwrap_or(if data_type.is_float() { f64::NAN } else { fill }),
        Some(v) if data_type.is_float() => v,
        Some(v) => {
            let (min, max) = data_type.range();
            v.round().clamp(min, max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestore_common::ErrorKind;

    fn grid(transform: GeoTransform, rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(Crs::wgs84(), transform, RasterShape::new(rows, cols))
    }

    fn numbered(data_type: DataType, rows: usize, cols: usize) -> RasterBuffer {
        let data = (0..rows * cols).map(|v| v as f64).collect();
        RasterBuffer::from_vec(data_type, RasterShape::new(rows, cols), data).unwrap()
    }

    #[test]
    fn test_mercator_round_trip() {
        let (x, y) = lonlat_to_mercator(180.0, 0.0);
        assert!((x - 20_037_508.342_789_244).abs() < 1e-6);
        assert!(y.abs() < 1e-6);

        let (x, y) = lonlat_to_mercator(-73.5, 45.25);
        let (lon, lat) = mercator_to_lonlat(x, y);
        assert!((lon + 73.5).abs() < 1e-9);
        assert!((lat - 45.25).abs() < 1e-9);
    }

    #[test]
    fn test_latitude_is_clamped() {
        let (_, y_pole) = lonlat_to_mercator(0.0, 90.0);
        let (_, y_max) = lonlat_to_mercator(0.0, MAX_MERCATOR_LAT);
        assert!(y_pole.is_finite());
        assert_eq!(y_pole, y_max);
    }

    #[test]
    fn test_unknown_crs_pair() {
        let err = GridWarper
            .transform_points(&Crs::new("EPSG:32633"), &Crs::wgs84(), &mut [(0.0, 0.0)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reprojection);

        // Same CRS never needs the transformation
        let mut pts = [(1.0, 2.0)];
        GridWarper
            .transform_points(&Crs::new("EPSG:32633"), &Crs::new("epsg:32633"), &mut pts)
            .unwrap();
        assert_eq!(pts, [(1.0, 2.0)]);
    }

    #[test]
    fn test_transform_bounds() {
        let bbox = BoundingBox::new(-180.0, -85.0, 180.0, 85.0);
        let merc = GridWarper
            .transform_bounds(&Crs::wgs84(), &Crs::web_mercator(), &bbox)
            .unwrap();
        assert!((merc.max_x - 20_037_508.342_789_244).abs() < 1e-6);
        let back = GridWarper
            .transform_bounds(&Crs::web_mercator(), &Crs::wgs84(), &merc)
            .unwrap();
        assert!((back.max_y - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_resample() {
        let src_grid = grid(GeoTransform::from_origin(0.0, 4.0, 1.0, 1.0), 4, 4);
        let src = numbered(DataType::Int32, 4, 4);
        for method in [
            ResampleMethod::Nearest,
            ResampleMethod::Bilinear,
            ResampleMethod::Cubic,
            ResampleMethod::Average,
        ] {
            let out = GridWarper
                .resample(&src, &src_grid, &src_grid, method, None)
                .unwrap();
            assert_eq!(out, src, "{}", method);
        }
    }

    #[test]
    fn test_downsample_average() {
        let src_grid = grid(GeoTransform::from_origin(0.0, 2.0, 1.0, 1.0), 2, 2);
        let src = RasterBuffer::from_vec(
            DataType::Float32,
            RasterShape::new(2, 2),
            vec![1.0, 2.0, 3.0, -1.0],
        )
        .unwrap();
        let dst_grid = grid(GeoTransform::from_origin(0.0, 2.0, 2.0, 2.0), 1, 1);
        let out = GridWarper
            .resample(&src, &src_grid, &dst_grid, ResampleMethod::Average, Some(-1.0))
            .unwrap();
        // The nodata pixel does not contribute
        assert_eq!(out.data(), &[2.0]);
    }

    #[test]
    fn test_outside_source_takes_fill() {
        let src_grid = grid(GeoTransform::from_origin(0.0, 2.0, 1.0, 1.0), 2, 2);
        let src = numbered(DataType::Uint8, 2, 2);
        // Shifted one pixel right: last column is outside
        let dst_grid = grid(GeoTransform::from_origin(1.0, 2.0, 1.0, 1.0), 2, 2);
        let out = GridWarper
            .resample(&src, &src_grid, &dst_grid, ResampleMethod::Nearest, Some(255.0))
            .unwrap();
        assert_eq!(out.data(), &[1.0, 255.0, 3.0, 255.0]);

        let out = GridWarper
            .resample(&src, &src_grid, &dst_grid, ResampleMethod::Nearest, None)
            .unwrap();
        assert_eq!(out.data(), &[1.0, 0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_integer_bilinear_is_rounded() {
        let src_grid = grid(GeoTransform::from_origin(0.0, 1.0, 1.0, 1.0), 1, 2);
        let src = RasterBuffer::from_vec(DataType::Uint8, RasterShape::new(1, 2), vec![0.0, 3.0])
            .unwrap();
        // Single pixel centred between the two source centres
        let dst_grid = grid(GeoTransform::from_origin(0.5, 1.0, 1.0, 1.0), 1, 1);
        let out = GridWarper
            .resample(&src, &src_grid, &dst_grid, ResampleMethod::Bilinear, None)
            .unwrap();
        assert_eq!(out.data(), &[2.0]);
    }

    #[test]
    fn test_resample_across_crs() {
        // 2x2 lon/lat grid around the origin, sampled on a small mercator grid
        let src_grid = grid(GeoTransform::from_origin(-2.0, 2.0, 2.0, 2.0), 2, 2);
        let src = numbered(DataType::Int16, 2, 2);
        let (x, y) = lonlat_to_mercator(-1.0, 1.0);
        let dst_grid = GridSpec::new(
            Crs::web_mercator(),
            GeoTransform::from_origin(x, y, -2.0 * x, 2.0 * y),
            RasterShape::new(1, 1),
        );
        let out = GridWarper
            .resample(&src, &src_grid, &dst_grid, ResampleMethod::Nearest, None)
            .unwrap();
        // Pixel centre maps to (0, 0): the lower-right source pixel
        assert_eq!(out.data(), &[3.0]);
    }
}
