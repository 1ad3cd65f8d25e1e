use geo::{GeodesicArea, LineString, Polygon};
use std::sync::Arc;

use tilestore_common::{Crs, DataType, RasterBuffer, StoreError, StoreResult};

use crate::types::RegionRequest;
use crate::warp::{GridSpec, Warper};

/// A synthetic band whose pixels hold their own area in square metres.
///
/// Nothing is stored: every read computes geodesic areas on the WGS84
/// ellipsoid for the requested grid.
#[derive(Clone)]
pub struct PixelAreaBand {
    warper: Arc<dyn Warper>,
    grid: GridSpec,
}

impl PixelAreaBand {
    pub(crate) fn new(warper: Arc<dyn Warper>, grid: GridSpec) -> Self {
        Self { warper, grid }
    }

    /// Grid used when a request carries no CRS.
    pub fn grid_spec(&self) -> &GridSpec {
        &self.grid
    }

    pub fn data_type(&self) -> DataType {
        DataType::Float64
    }

    /// Area of every pixel of `request`'s grid.
    pub fn read_region(&self, request: &RegionRequest) -> StoreResult<RasterBuffer> {
        let shape = request.shape;
        if shape.is_empty() {
            return Err(StoreError::invalid_region(
                "pixel area",
                format!("region of {}x{} pixels has no area", shape.cols, shape.rows),
            ));
        }
        let crs = request.crs.clone().unwrap_or_else(|| self.grid.crs.clone());
        let wgs84 = Crs::wgs84();
        let t = request.transform;

        // North-up grids in the built-in cylindrical CRSs: area depends on the row only
        let [_, _, skew_x, _, skew_y, _] = t.coefficients();
        let per_row = skew_x == 0.0 && skew_y == 0.0 && crs.code().is_some();
        let cols = if per_row { 1 } else { shape.cols };

        let mut areas = Vec::with_capacity(shape.len());
        for row in 0..shape.rows {
            let (top, bottom) = (row as f64, row as f64 + 1.0);
            for col in 0..cols {
                let (left, right) = (col as f64, col as f64 + 1.0);
                let mut ring = vec![
                    t.apply(left, top),
                    t.apply(right, top),
                    t.apply(right, bottom),
                    t.apply(left, bottom),
                ];
                self.warper.transform_points(&crs, &wgs84, &mut ring)?;
                let area = Polygon::new(LineString::from(ring), vec![]).geodesic_area_unsigned();
                if per_row {
                    areas.extend(std::iter::repeat(area).take(shape.cols));
                } else {
                    areas.push(area);
                }
            }
        }
        RasterBuffer::from_vec(DataType::Float64, shape, areas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warp::{lonlat_to_mercator, GridWarper};
    use test_utils::assert_approx_eq;
    use tilestore_common::{GeoTransform, RasterShape};

    fn band() -> PixelAreaBand {
        PixelAreaBand::new(
            Arc::new(GridWarper::new()),
            GridSpec::new(
                Crs::wgs84(),
                GeoTransform::from_origin(-180.0, 90.0, 1.0, 1.0),
                RasterShape::new(180, 360),
            ),
        )
    }

    #[test]
    fn test_degree_cell_area() {
        let request = RegionRequest::new(GeoTransform::from_origin(0.0, 1.0, 1.0, 1.0), RasterShape::new(1, 3));
        let areas = band().read_region(&request).unwrap();

        assert_eq!(areas.data_type(), DataType::Float64);
        // About 12,360 km2 at the equator
        let equator = areas.get(0, 0).unwrap();
        assert_approx_eq!(equator, 1.236e10, 1.5e8);
        assert_eq!(areas.get(0, 2), Some(equator));
    }

    #[test]
    fn test_area_shrinks_with_latitude() {
        let band = band();
        let cell = |top: f64| {
            let request = RegionRequest::new(GeoTransform::from_origin(0.0, top, 1.0, 1.0), RasterShape::new(1, 1));
            band.read_region(&request).unwrap().get(0, 0).unwrap()
        };
        let ratio = cell(61.0) / cell(1.0);
        assert!((0.47..0.51).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_mercator_request_measures_the_same_cell() {
        let (_, top) = lonlat_to_mercator(0.0, 1.0);
        let (right, _) = lonlat_to_mercator(1.0, 0.0);
        let request = RegionRequest::new(GeoTransform::from_origin(0.0, top, right, top), RasterShape::new(1, 1))
            .with_crs(Crs::web_mercator());
        let geographic = RegionRequest::new(GeoTransform::from_origin(0.0, 1.0, 1.0, 1.0), RasterShape::new(1, 1));

        let band = band();
        let mercator = band.read_region(&request).unwrap().get(0, 0).unwrap();
        let degrees = band.read_region(&geographic).unwrap().get(0, 0).unwrap();
        assert_approx_eq!(mercator, degrees, degrees * 1e-6);
    }

    #[test]
    fn test_unknown_crs_fails() {
        let request = RegionRequest::new(GeoTransform::from_origin(0.0, 1.0, 1.0, 1.0), RasterShape::new(1, 1))
            .with_crs(Crs::new("EPSG:32633"));
        assert!(band().read_region(&request).is_err());
    }
}
