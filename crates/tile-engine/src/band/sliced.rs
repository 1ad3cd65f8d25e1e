use async_trait::async_trait;
use geo::{Contains, Coord, Geometry, MapCoords};
use std::sync::Arc;
use tracing::debug;

use storage::BandDescriptor;
use tilestore_common::{Crs, RasterBuffer, StoreError, StoreResult};

use super::RasterBand;
use crate::context::EngineContext;
use crate::region;
use crate::tile_grid::{Region, TileGrid, TileIndex};
use crate::types::RegionRequest;

/// A band stored as independently addressable tiles.
#[derive(Clone)]
pub struct SlicedBand {
    ctx: Arc<EngineContext>,
    desc: BandDescriptor,
    /// Addressing grid; finer than the stored grid when opened with a
    /// logical tile size.
    grid: TileGrid,
    /// Logical tile size, when it differs from the stored one.
    view: Option<usize>,
}

impl SlicedBand {
    pub(crate) fn new(ctx: Arc<EngineContext>, desc: BandDescriptor) -> StoreResult<Self> {
        let grid = region::storage_grid(&desc)?;
        if desc.sliced_tile_size().is_none() {
            return Err(StoreError::unsupported_band(
                desc.band_path.to_string(),
                "band is not sliced",
            ));
        }
        Ok(Self {
            ctx,
            desc,
            grid,
            view: None,
        })
    }

    /// The same band addressed with a smaller logical tile size.
    ///
    /// `tile_size` must divide the stored tile size. The returned handle is
    /// read-only unless `tile_size` equals the stored size.
    pub fn with_tile_size(&self, tile_size: usize) -> StoreResult<Self> {
        let stored = self.stored_tile_size();
        if tile_size == 0 || stored % tile_size != 0 {
            return Err(StoreError::unsupported_band(
                self.desc.band_path.to_string(),
                format!(
                    "logical tile size {} does not divide stored tile size {}",
                    tile_size, stored
                ),
            ));
        }
        let grid = TileGrid::new(self.desc.transform, self.desc.shape, tile_size)?;
        Ok(Self {
            ctx: Arc::clone(&self.ctx),
            desc: self.desc.clone(),
            grid,
            view: (tile_size != stored).then_some(tile_size),
        })
    }

    fn stored_tile_size(&self) -> usize {
        self.desc.sliced_tile_size().unwrap_or(self.grid.tile_size())
    }

    /// Tile size this handle addresses tiles with.
    pub fn tile_size(&self) -> usize {
        self.grid.tile_size()
    }

    pub fn tile_grid(&self) -> &TileGrid {
        &self.grid
    }

    pub async fn read_tile(&self, tile: TileIndex) -> StoreResult<RasterBuffer> {
        region::read_tile(&self.ctx, &self.desc, &self.grid, tile).await
    }

    /// Replace one whole tile. The buffer must match the clipped tile shape
    /// and the band data type.
    pub async fn write_tile(&self, tile: TileIndex, buffer: &RasterBuffer) -> StoreResult<()> {
        region::write_tile(&self.ctx, &self.desc, self.view, tile, buffer).await
    }

    /// Write `data`, laid out on `request`'s grid, into the band.
    ///
    /// Pixels of the band outside the data are left untouched.
    pub async fn write_region(&self, request: &RegionRequest, data: &RasterBuffer) -> StoreResult<()> {
        region::write_region(&self.ctx, &self.desc, self.view, request, data).await
    }

    /// `geometry`, given in `crs` (band CRS when `None`), in band CRS.
    fn to_band_crs(&self, geometry: &Geometry<f64>, crs: Option<&Crs>) -> StoreResult<Geometry<f64>> {
        let band_crs = &self.desc.crs;
        let from = crs.unwrap_or(band_crs);
        if from.same_as(band_crs) {
            return Ok(geometry.clone());
        }
        let warper = self.ctx.warper.as_ref();
        geometry.try_map_coords(|c| {
            let mut point = [(c.x, c.y)];
            warper.transform_points(from, band_crs, &mut point)?;
            Ok::<_, StoreError>(Coord {
                x: point[0].0,
                y: point[0].1,
            })
        })
    }

    /// Tiles of this handle's grid intersecting `region`, given in `crs`
    /// (band CRS when `None`). Pixel windows are always band pixels.
    pub fn tiles_intersecting(&self, region: &Region, crs: Option<&Crs>) -> StoreResult<Vec<TileIndex>> {
        let band_crs = &self.desc.crs;
        let from = crs.unwrap_or(band_crs);
        let region = if from.same_as(band_crs) {
            region.clone()
        } else {
            let warper = self.ctx.warper.as_ref();
            match region {
                Region::Window(w) => Region::Window(*w),
                Region::Grid { transform, shape } => {
                    Region::Bounds(warper.transform_bounds(from, band_crs, &transform.bounds(*shape))?)
                }
                Region::Bounds(bbox) => Region::Bounds(warper.transform_bounds(from, band_crs, bbox)?),
                Region::Geometry(geometry) => Region::Geometry(self.to_band_crs(geometry, crs)?),
            }
        };
        let tiles = self
            .grid
            .tiles_intersecting(&region)
            .map_err(|e| e.for_path(&self.desc.band_path))?;
        debug!(path = %self.desc.band_path, count = tiles.len(), "Tiles intersecting region");
        Ok(tiles)
    }

    /// Read `tile` with every pixel whose centre lies outside `cut_line`
    /// set to `fill`. `cut_line` is given in `crs` (band CRS when `None`).
    pub async fn mask_tile(
        &self,
        tile: TileIndex,
        cut_line: &Geometry<f64>,
        crs: Option<&Crs>,
        fill: f64,
    ) -> StoreResult<RasterBuffer> {
        let cut_line = self.to_band_crs(cut_line, crs)?;
        let (transform, shape) = self
            .grid
            .tile_transform_and_shape(tile)
            .map_err(|e| e.for_path(&self.desc.band_path))?;
        let mut data = self.read_tile(tile).await?;

        let mut masked = 0usize;
        for row in 0..shape.rows {
            for col in 0..shape.cols {
                let (x, y) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                if !cut_line.contains(&Coord { x, y }) {
                    data.set(row, col, fill);
                    masked += 1;
                }
            }
        }
        debug!(path = %self.desc.band_path, tile = %tile, masked, "Tile masked");
        Ok(data)
    }
}

#[async_trait]
impl RasterBand for SlicedBand {
    fn descriptor(&self) -> &BandDescriptor {
        &self.desc
    }

    fn is_writable(&self) -> bool {
        !self.desc.readonly && self.view.is_none()
    }

    async fn read_region(&self, request: &RegionRequest) -> StoreResult<RasterBuffer> {
        region::read_region(&self.ctx, &self.desc, request).await
    }

    async fn read_point(&self, x: f64, y: f64) -> StoreResult<Option<f64>> {
        region::read_point(&self.ctx, &self.desc, x, y).await
    }
}
