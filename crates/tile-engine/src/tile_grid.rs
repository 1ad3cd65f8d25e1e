//! Tile addressing for a band.
//!
//! Pure coordinate math: no I/O and no shared state. A tile `(x, y)` covers
//! pixels `[x * tile_size, (x + 1) * tile_size)` by `[y * tile_size, ...)`,
//! clipped at the raster edge. Every tile-set result is ordered row-major
//! by `(y, x)`.

use geo::{BoundingRect, Coord, Geometry, Intersects, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use tilestore_common::{
    BoundingBox, GeoTransform, PixelWindow, RasterShape, StoreError, StoreResult,
};

/// Integer tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub x: usize,
    pub y: usize,
}

impl TileIndex {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl Ord for TileIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for TileIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.y)
    }
}

/// A region to intersect with the grid.
#[derive(Debug, Clone)]
pub enum Region {
    /// Pixel window of the band.
    Window(PixelWindow),
    /// Grid in band CRS described by transform and shape.
    Grid {
        transform: GeoTransform,
        shape: RasterShape,
    },
    /// Extent in band CRS.
    Bounds(BoundingBox),
    /// Geometry in band CRS.
    Geometry(Geometry<f64>),
}

/// Tile layout of one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    transform: GeoTransform,
    shape: RasterShape,
    tile_size: usize,
}

impl TileGrid {
    pub fn new(transform: GeoTransform, shape: RasterShape, tile_size: usize) -> StoreResult<Self> {
        if tile_size == 0 {
            return Err(StoreError::Config("tile size must be greater than 0".to_string()));
        }
        if shape.is_empty() {
            return Err(StoreError::Config(format!(
                "raster shape {}x{} is empty",
                shape.rows, shape.cols
            )));
        }
        if transform.invert().is_none() {
            return Err(StoreError::Config(format!(
                "geotransform {:?} is not invertible",
                transform.coefficients()
            )));
        }
        Ok(Self {
            transform,
            shape,
            tile_size,
        })
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn shape(&self) -> RasterShape {
        self.shape
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Number of tile columns.
    pub fn tiles_x(&self) -> usize {
        self.shape.cols.div_ceil(self.tile_size)
    }

    /// Number of tile rows.
    pub fn tiles_y(&self) -> usize {
        self.shape.rows.div_ceil(self.tile_size)
    }

    /// `(tiles_x, tiles_y)`.
    pub fn tile_counts(&self) -> (usize, usize) {
        (self.tiles_x(), self.tiles_y())
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x() * self.tiles_y()
    }

    fn full_window(&self) -> PixelWindow {
        PixelWindow::full(self.shape)
    }

    /// Tile containing pixel `(pixel_x, pixel_y)`.
    pub fn tile_index_for(&self, pixel_x: usize, pixel_y: usize) -> StoreResult<TileIndex> {
        if pixel_x >= self.shape.cols || pixel_y >= self.shape.rows {
            return Err(StoreError::invalid_region(
                "",
                format!(
                    "pixel ({}, {}) is outside the {}x{} raster",
                    pixel_x, pixel_y, self.shape.cols, self.shape.rows
                ),
            ));
        }
        Ok(TileIndex::new(pixel_x / self.tile_size, pixel_y / self.tile_size))
    }

    fn check_tile(&self, tile: TileIndex) -> StoreResult<()> {
        if tile.x >= self.tiles_x() || tile.y >= self.tiles_y() {
            return Err(StoreError::invalid_region(
                "",
                format!(
                    "tile {} is outside the {}x{} tile grid",
                    tile,
                    self.tiles_x(),
                    self.tiles_y()
                ),
            ));
        }
        Ok(())
    }

    /// Pixel window of `tile`, clipped at the raster edge.
    pub fn tile_window(&self, tile: TileIndex) -> StoreResult<PixelWindow> {
        self.check_tile(tile)?;
        let col_off = tile.x * self.tile_size;
        let row_off = tile.y * self.tile_size;
        Ok(PixelWindow::new(
            col_off as i64,
            row_off as i64,
            self.tile_size.min(self.shape.cols - col_off),
            self.tile_size.min(self.shape.rows - row_off),
        ))
    }

    /// Derived transform and (clipped) shape of `tile`.
    pub fn tile_transform_and_shape(
        &self,
        tile: TileIndex,
    ) -> StoreResult<(GeoTransform, RasterShape)> {
        let window = self.tile_window(tile)?;
        let transform = self
            .transform
            .shifted(window.col_off as f64, window.row_off as f64);
        Ok((transform, window.shape()))
    }

    /// Every tile of the band.
    pub fn all_tiles(&self) -> Vec<TileIndex> {
        let mut tiles = Vec::with_capacity(self.tile_count());
        for y in 0..self.tiles_y() {
            for x in 0..self.tiles_x() {
                tiles.push(TileIndex::new(x, y));
            }
        }
        tiles
    }

    /// Tiles overlapping a pixel window.
    pub fn tiles_in_window(&self, window: &PixelWindow) -> StoreResult<Vec<TileIndex>> {
        let clipped = self.clip(window)?;
        let ts = self.tile_size as i64;
        let x0 = (clipped.col_off / ts) as usize;
        let y0 = (clipped.row_off / ts) as usize;
        let x1 = ((clipped.col_end() - 1) / ts) as usize;
        let y1 = ((clipped.row_end() - 1) / ts) as usize;

        let mut tiles = Vec::with_capacity((x1 - x0 + 1) * (y1 - y0 + 1));
        for y in y0..=y1 {
            for x in x0..=x1 {
                tiles.push(TileIndex::new(x, y));
            }
        }
        Ok(tiles)
    }

    /// Intersection of `window` with the raster, or `InvalidRegion`.
    pub fn clip(&self, window: &PixelWindow) -> StoreResult<PixelWindow> {
        window.intersection(&self.full_window()).ok_or_else(|| {
            StoreError::invalid_region(
                "",
                format!(
                    "window {}x{} at ({}, {}) does not intersect the {}x{} raster",
                    window.cols,
                    window.rows,
                    window.col_off,
                    window.row_off,
                    self.shape.cols,
                    self.shape.rows
                ),
            )
        })
    }

    /// Fractional pixel extent `(col_min, row_min, col_max, row_max)` of a bbox.
    fn pixel_extent(&self, bbox: &BoundingBox) -> StoreResult<(f64, f64, f64, f64)> {
        let inverse = self
            .transform
            .invert()
            .ok_or_else(|| StoreError::Reprojection("singular band transform".to_string()))?;
        let corners = [
            inverse.apply(bbox.min_x, bbox.min_y),
            inverse.apply(bbox.max_x, bbox.min_y),
            inverse.apply(bbox.min_x, bbox.max_y),
            inverse.apply(bbox.max_x, bbox.max_y),
        ];
        let ext = BoundingBox::from_points(corners)
            .ok_or_else(|| StoreError::invalid_region("", "empty extent"))?;
        Ok((ext.min_x, ext.min_y, ext.max_x, ext.max_y))
    }

    /// Smallest pixel window covering `bbox` (band CRS), unclipped.
    pub fn window_for_bounds(&self, bbox: &BoundingBox) -> StoreResult<PixelWindow> {
        const EPS: f64 = 1e-9;
        let (c0, r0, c1, r1) = self.pixel_extent(bbox)?;
        let col_off = (c0 + EPS).floor() as i64;
        let row_off = (r0 + EPS).floor() as i64;
        let col_end = (c1 - EPS).ceil() as i64;
        let row_end = (r1 - EPS).ceil() as i64;
        if col_end <= col_off || row_end <= row_off {
            return Err(StoreError::invalid_region("", "region has no area"));
        }
        Ok(PixelWindow::new(
            col_off,
            row_off,
            (col_end - col_off) as usize,
            (row_end - row_off) as usize,
        ))
    }

    /// Pixels whose centres lie inside `bbox` (band CRS), unclipped.
    pub fn window_for_centres(&self, bbox: &BoundingBox) -> StoreResult<PixelWindow> {
        const EPS: f64 = 1e-9;
        let (c0, r0, c1, r1) = self.pixel_extent(bbox)?;
        let col_off = (c0 - 0.5 - EPS).ceil() as i64;
        let row_off = (r0 - 0.5 - EPS).ceil() as i64;
        let col_end = (c1 - 0.5 + EPS).floor() as i64 + 1;
        let row_end = (r1 - 0.5 + EPS).floor() as i64 + 1;
        if col_end <= col_off || row_end <= row_off {
            return Err(StoreError::invalid_region(
                "",
                "region does not contain any pixel centre",
            ));
        }
        Ok(PixelWindow::new(
            col_off,
            row_off,
            (col_end - col_off) as usize,
            (row_end - row_off) as usize,
        ))
    }

    fn tile_polygon(&self, tile: TileIndex) -> StoreResult<Polygon<f64>> {
        let w = self.tile_window(tile)?;
        let (c0, r0) = (w.col_off as f64, w.row_off as f64);
        let (c1, r1) = (w.col_end() as f64, w.row_end() as f64);
        let ring: Vec<Coord<f64>> = [(c0, r0), (c1, r0), (c1, r1), (c0, r1), (c0, r0)]
            .iter()
            .map(|&(c, r)| {
                let (x, y) = self.transform.apply(c, r);
                Coord { x, y }
            })
            .collect();
        Ok(Polygon::new(LineString::from(ring), vec![]))
    }

    /// Tiles intersecting `region`, ordered by `(y, x)`.
    ///
    /// A region that misses the raster is an `InvalidRegion` error, never an
    /// empty set.
    pub fn tiles_intersecting(&self, region: &Region) -> StoreResult<Vec<TileIndex>> {
        match region {
            Region::Window(window) => self.tiles_in_window(window),
            Region::Grid { transform, shape } => {
                self.tiles_intersecting(&Region::Bounds(transform.bounds(*shape)))
            }
            Region::Bounds(bbox) => self.tiles_in_window(&self.window_for_bounds(bbox)?),
            Region::Geometry(geometry) => {
                let rect = geometry
                    .bounding_rect()
                    .ok_or_else(|| StoreError::invalid_region("", "empty geometry"))?;
                let bbox = BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
                let window = if bbox.width() > 0.0 && bbox.height() > 0.0 {
                    self.window_for_bounds(&bbox)?
                } else {
                    // Points and axis-parallel lines have no area
                    let (c, r) = self
                        .transform
                        .to_pixel(bbox.min_x, bbox.min_y)
                        .ok_or_else(|| StoreError::Reprojection("singular band transform".into()))?;
                    let (c1, r1) = self
                        .transform
                        .to_pixel(bbox.max_x, bbox.max_y)
                        .ok_or_else(|| StoreError::Reprojection("singular band transform".into()))?;
                    let col_off = c.min(c1).floor() as i64;
                    let row_off = r.min(r1).floor() as i64;
                    PixelWindow::new(
                        col_off,
                        row_off,
                        (c.max(c1).floor() as i64 - col_off + 1) as usize,
                        (r.max(r1).floor() as i64 - row_off + 1) as usize,
                    )
                };

                let mut tiles = Vec::new();
                for tile in self.tiles_in_window(&window)? {
                    if geometry.intersects(&self.tile_polygon(tile)?) {
                        tiles.push(tile);
                    }
                }
                if tiles.is_empty() {
                    return Err(StoreError::invalid_region(
                        "",
                        "geometry does not intersect the raster",
                    ));
                }
                Ok(tiles)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon};
    use tilestore_common::ErrorKind;

    fn scenario() -> TileGrid {
        TileGrid::new(
            GeoTransform::new([180.0, 1.0, 0.0, 90.0, 0.0, -1.0]),
            RasterShape::new(4, 4),
            2,
        )
        .unwrap()
    }

    fn uneven() -> TileGrid {
        // 10 cols x 7 rows with 4px tiles: 3 x 2 tiles, edge tiles clipped
        TileGrid::new(
            GeoTransform::from_origin(0.0, 7.0, 1.0, 1.0),
            RasterShape::new(7, 10),
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_scenario() {
        let grid = scenario();
        assert_eq!(grid.tile_index_for(3, 3).unwrap(), TileIndex::new(1, 1));
        let (transform, shape) = grid.tile_transform_and_shape(TileIndex::new(1, 1)).unwrap();
        assert_eq!(shape, RasterShape::new(2, 2));
        assert_eq!(transform.origin(), (182.0, 88.0));
        assert_eq!(grid.tile_count(), 4);
    }

    #[test]
    fn test_round_trip_every_pixel() {
        let grid = uneven();
        for tile in grid.all_tiles() {
            let window = grid.tile_window(tile).unwrap();
            for row in window.row_off..window.row_end() {
                for col in window.col_off..window.col_end() {
                    assert_eq!(grid.tile_index_for(col as usize, row as usize).unwrap(), tile);
                }
            }
        }
    }

    #[test]
    fn test_edge_tiles_are_clipped() {
        let grid = uneven();
        assert_eq!(grid.tile_counts(), (3, 2));
        let (_, shape) = grid.tile_transform_and_shape(TileIndex::new(2, 1)).unwrap();
        assert_eq!(shape, RasterShape::new(3, 2));
        assert!(grid.tile_window(TileIndex::new(3, 0)).is_err());
    }

    #[test]
    fn test_out_of_bounds_pixel() {
        let err = scenario().tile_index_for(4, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRegion);
    }

    #[test]
    fn test_tiles_in_window_ordered() {
        let grid = uneven();
        let tiles = grid
            .tiles_in_window(&PixelWindow::new(3, 3, 6, 2))
            .unwrap();
        assert_eq!(
            tiles,
            vec![
                TileIndex::new(0, 0),
                TileIndex::new(1, 0),
                TileIndex::new(2, 0),
                TileIndex::new(0, 1),
                TileIndex::new(1, 1),
                TileIndex::new(2, 1),
            ]
        );
        let mut sorted = tiles.clone();
        sorted.sort();
        assert_eq!(sorted, tiles);
    }

    #[test]
    fn test_window_outside_raster_is_invalid() {
        let grid = uneven();
        let err = grid
            .tiles_in_window(&PixelWindow::new(10, 0, 5, 5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRegion);

        let err = grid
            .tiles_intersecting(&Region::Bounds(BoundingBox::new(20.0, 0.0, 30.0, 7.0)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRegion);
    }

    #[test]
    fn test_tiles_for_grid_region() {
        let grid = uneven();
        // Cover pixels cols 4..8, rows 0..4 exactly: only tile (1, 0)
        let region = Region::Grid {
            transform: GeoTransform::from_origin(4.0, 7.0, 1.0, 1.0),
            shape: RasterShape::new(4, 4),
        };
        assert_eq!(grid.tiles_intersecting(&region).unwrap(), vec![TileIndex::new(1, 0)]);
    }

    #[test]
    fn test_window_for_centres() {
        let grid = uneven();
        // Extent covers half of pixel 1 and all of pixels 2..=3
        let bbox = BoundingBox::new(1.5, 0.0, 4.0, 7.0);
        let w = grid.window_for_centres(&bbox).unwrap();
        assert_eq!((w.col_off, w.cols), (1, 3));
        let w = grid.window_for_bounds(&bbox).unwrap();
        assert_eq!((w.col_off, w.cols), (1, 3));

        let bbox = BoundingBox::new(1.6, 0.0, 4.0, 7.0);
        assert_eq!(grid.window_for_centres(&bbox).unwrap().col_off, 2);
    }

    #[test]
    fn test_tiles_intersecting_geometry() {
        let grid = uneven();
        // Triangle in the upper-left corner touching only tile (0, 0)
        let triangle = polygon![(x: 0.5, y: 6.5), (x: 3.0, y: 6.5), (x: 0.5, y: 4.0)];
        let tiles = grid
            .tiles_intersecting(&Region::Geometry(triangle.into()))
            .unwrap();
        assert_eq!(tiles, vec![TileIndex::new(0, 0)]);

        let p = point!(x: 9.5, y: 0.5);
        let tiles = grid.tiles_intersecting(&Region::Geometry(p.into())).unwrap();
        assert_eq!(tiles, vec![TileIndex::new(2, 1)]);

        let far = point!(x: 50.0, y: 50.0);
        assert!(grid.tiles_intersecting(&Region::Geometry(far.into())).is_err());
    }
}
