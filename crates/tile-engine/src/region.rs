//! Region reads and writes across tiles.
//!
//! Reads take no locks: tiles are fetched with bounded concurrency and
//! pasted into a buffer pre-filled with the band's fill value, so tiles
//! that were never written read as nodata. Writes go tile by tile in
//! row-major order, each under its tile lock, as a read-modify-write of
//! the whole tile.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, instrument};

use storage::{with_tile_lock, BandDescriptor, StorageBackend};
use tilestore_common::{
    Action, PixelWindow, RasterBuffer, RasterShape, StoreError, StoreResult,
};

use crate::codec::TileSpec;
use crate::context::EngineContext;
use crate::tile_grid::{TileGrid, TileIndex};
use crate::types::RegionRequest;
use crate::warp::GridSpec;

/// Extra source pixels read around a resampled window, enough for the
/// cubic kernel.
const RESAMPLE_PADDING: i64 = 2;

/// Storage layout of a band. An unsliced band is a grid of one tile.
pub(crate) fn storage_grid(desc: &BandDescriptor) -> StoreResult<TileGrid> {
    let tile_size = desc
        .sliced_tile_size()
        .unwrap_or_else(|| desc.shape.rows.max(desc.shape.cols));
    TileGrid::new(desc.transform, desc.shape, tile_size)
}

/// Storage key of stored tile `tile`.
fn storage_key(desc: &BandDescriptor, tile: TileIndex) -> String {
    match desc.sliced_tile_size() {
        Some(_) => desc.tile_key(tile.x, tile.y),
        None => desc.blob_key(),
    }
}

fn tile_spec(desc: &BandDescriptor, shape: RasterShape) -> TileSpec {
    TileSpec {
        data_type: desc.data_type,
        nodata: desc.nodata,
        shape,
    }
}

/// Check authority for `action` and return the endpoint holding the band.
pub(crate) fn band_backend(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    action: Action,
) -> StoreResult<Arc<dyn StorageBackend>> {
    ctx.catalog.resolve(&desc.band_path, action)?;
    ctx.catalog.endpoint(&desc.backend.endpoint)
}

fn check_writable(desc: &BandDescriptor, view_tile_size: Option<usize>) -> StoreResult<usize> {
    if desc.readonly {
        return Err(StoreError::ReadOnly {
            path: desc.band_path.to_string(),
        });
    }
    let stored = desc.sliced_tile_size().ok_or_else(|| {
        StoreError::unsupported_band(desc.band_path.to_string(), "band is not sliced")
    })?;
    if let Some(view) = view_tile_size {
        if view != stored {
            return Err(StoreError::unsupported_band(
                desc.band_path.to_string(),
                format!(
                    "opened with logical tile size {}, stored tile size is {}",
                    view, stored
                ),
            ));
        }
    }
    Ok(stored)
}

fn check_edge(ctx: &EngineContext, desc: &BandDescriptor, shape: RasterShape, what: &str) -> StoreResult<()> {
    let Some(max) = ctx.settings.max_region_edge else {
        return Ok(());
    };
    if shape.rows > max || shape.cols > max {
        return Err(StoreError::invalid_region(
            desc.band_path.to_string(),
            format!(
                "{} of {}x{} pixels exceeds the configured {} per edge",
                what, shape.cols, shape.rows, max
            ),
        ));
    }
    Ok(())
}

fn check_request_shape(ctx: &EngineContext, desc: &BandDescriptor, shape: RasterShape) -> StoreResult<()> {
    if shape.is_empty() {
        return Err(StoreError::invalid_region(
            desc.band_path.to_string(),
            format!("region of {}x{} pixels has no area", shape.cols, shape.rows),
        ));
    }
    check_edge(ctx, desc, shape, "region")
}

/// Fetch and decode one stored tile bypassing the cache. `None` when the
/// tile was never written.
async fn load_tile(
    ctx: &EngineContext,
    backend: &dyn StorageBackend,
    key: &str,
    spec: &TileSpec,
) -> StoreResult<Option<RasterBuffer>> {
    match backend.get(key).await {
        Ok(bytes) => Ok(Some(ctx.codec.decode(key, &bytes, spec)?)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Fetch one stored tile through the cache.
async fn fetch_tile(
    ctx: &EngineContext,
    backend: &dyn StorageBackend,
    key: &str,
    spec: &TileSpec,
) -> StoreResult<Option<Arc<RasterBuffer>>> {
    let endpoint = backend.name();
    if let Some(tile) = ctx.cached_tile(endpoint, key).await {
        return Ok(Some(tile));
    }
    let epoch = ctx.cache_epoch().await;
    match load_tile(ctx, backend, key, spec).await? {
        Some(tile) => {
            let tile = Arc::new(tile);
            if let Some(epoch) = epoch {
                ctx.fill_cache(endpoint, key, Arc::clone(&tile), epoch).await;
            }
            Ok(Some(tile))
        }
        None => Ok(None),
    }
}

/// Band pixels of `window`, which may extend past the raster. Pixels
/// outside the raster or in unwritten tiles take the fill value.
pub(crate) async fn read_window(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    backend: &dyn StorageBackend,
    window: PixelWindow,
) -> StoreResult<RasterBuffer> {
    let mut out = RasterBuffer::filled(desc.data_type, window.shape(), desc.fill_value());
    let grid = storage_grid(desc)?;
    let Some(clipped) = window.intersection(&PixelWindow::full(desc.shape)) else {
        return Ok(out);
    };
    let tiles = grid.tiles_in_window(&clipped)?;
    debug!(
        path = %desc.band_path,
        tiles = tiles.len(),
        cols = window.cols,
        rows = window.rows,
        "Reading window"
    );

    let fetched: Vec<(PixelWindow, Option<Arc<RasterBuffer>>)> = stream::iter(tiles)
        .map(|tile| async move {
            let tile_window = grid.tile_window(tile)?;
            let key = storage_key(desc, tile);
            let data = fetch_tile(ctx, backend, &key, &tile_spec(desc, tile_window.shape())).await?;
            Ok::<_, StoreError>((tile_window, data))
        })
        .buffered(ctx.settings.read_concurrency.max(1))
        .try_collect()
        .await?;

    for (tile_window, data) in fetched {
        if let Some(data) = data {
            out.paste(
                &data,
                tile_window.col_off - window.col_off,
                tile_window.row_off - window.row_off,
            );
        }
    }
    Ok(out)
}

/// Materialize `request` from the band.
#[instrument(skip(ctx, desc, request), fields(path = %desc.band_path))]
pub(crate) async fn read_region(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    request: &RegionRequest,
) -> StoreResult<RasterBuffer> {
    check_request_shape(ctx, desc, request.shape)?;
    let backend = band_backend(ctx, desc, Action::Read)?;
    let grid = storage_grid(desc)?;
    let request_crs = request.crs.clone().unwrap_or_else(|| desc.crs.clone());

    if request_crs.same_as(&desc.crs) {
        if let Some((col, row)) = desc.transform.aligned_offset(&request.transform) {
            let window = PixelWindow::new(col, row, request.shape.cols, request.shape.rows);
            grid.clip(&window).map_err(|e| e.for_path(&desc.band_path))?;
            return read_window(ctx, desc, backend.as_ref(), window).await;
        }
    }

    // Resampling path: read the native window covering the request
    let request_bounds = request.transform.bounds(request.shape);
    let band_bounds = ctx
        .warper
        .transform_bounds(&request_crs, &desc.crs, &request_bounds)?;
    let window = grid
        .window_for_bounds(&band_bounds)
        .and_then(|w| grid.clip(&w))
        .map_err(|e| e.for_path(&desc.band_path))?;
    let padded = PixelWindow::new(
        window.col_off - RESAMPLE_PADDING,
        window.row_off - RESAMPLE_PADDING,
        window.cols + 2 * RESAMPLE_PADDING as usize,
        window.rows + 2 * RESAMPLE_PADDING as usize,
    );
    let native_window = grid.clip(&padded).map_err(|e| e.for_path(&desc.band_path))?;

    check_edge(ctx, desc, native_window.shape(), "native window")?;

    debug!(
        method = %request.method,
        native_cols = native_window.cols,
        native_rows = native_window.rows,
        "Resampling region"
    );
    let native = read_window(ctx, desc, backend.as_ref(), native_window).await?;
    let src_grid = GridSpec::new(
        desc.crs.clone(),
        desc.transform
            .shifted(native_window.col_off as f64, native_window.row_off as f64),
        native_window.shape(),
    );
    let dst_grid = GridSpec::new(request_crs, request.transform, request.shape);
    ctx.warper
        .resample(&native, &src_grid, &dst_grid, request.method, desc.nodata)
}

/// Value at `(x, y)` in band CRS, `None` outside the raster or for nodata.
pub(crate) async fn read_point(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    x: f64,
    y: f64,
) -> StoreResult<Option<f64>> {
    let backend = band_backend(ctx, desc, Action::Read)?;
    let Some((col, row)) = desc.transform.to_pixel(x, y) else {
        return Ok(None);
    };
    let (col, row) = (col.floor(), row.floor());
    if col < 0.0 || row < 0.0 || col >= desc.shape.cols as f64 || row >= desc.shape.rows as f64 {
        return Ok(None);
    }
    let window = PixelWindow::new(col as i64, row as i64, 1, 1);
    let value = read_window(ctx, desc, backend.as_ref(), window)
        .await?
        .get(0, 0)
        .unwrap_or(f64::NAN);
    let is_nodata = match desc.nodata {
        Some(nd) => value == nd || (nd.is_nan() && value.is_nan()),
        None => false,
    };
    Ok((!is_nodata && !value.is_nan()).then_some(value))
}

/// Write a whole stored tile.
#[instrument(skip(ctx, desc, buffer), fields(path = %desc.band_path, tile = %tile))]
pub(crate) async fn write_tile(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    view_tile_size: Option<usize>,
    tile: TileIndex,
    buffer: &RasterBuffer,
) -> StoreResult<()> {
    check_writable(desc, view_tile_size)?;
    let grid = storage_grid(desc)?;
    let shape = grid
        .tile_window(tile)
        .map_err(|e| e.for_path(&desc.band_path))?
        .shape();
    if buffer.shape() != shape || buffer.data_type() != desc.data_type {
        return Err(StoreError::InvalidBuffer(format!(
            "tile {} of {} takes a {}x{} {} buffer, got {}x{} {}",
            tile,
            desc.band_path,
            shape.rows,
            shape.cols,
            desc.data_type,
            buffer.shape().rows,
            buffer.shape().cols,
            buffer.data_type()
        )));
    }

    let backend = band_backend(ctx, desc, Action::Write)?;
    let key = desc.tile_key(tile.x, tile.y);
    let spec = tile_spec(desc, shape);
    let bytes = ctx.codec.encode(&key, buffer, &spec)?;

    let store = Arc::clone(&backend);
    let put_key = key.clone();
    let written = Arc::new(buffer.clone());
    with_tile_lock(backend, &key, move || async move {
        store.put(&put_key, bytes).await?;
        ctx.cache_tile(store.name(), &put_key, written).await;
        Ok(())
    })
    .await?;
    debug!(key = %key, "Tile written");
    Ok(())
}

/// Read one tile of `view` (the stored grid or a finer logical grid).
pub(crate) async fn read_tile(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    view: &TileGrid,
    tile: TileIndex,
) -> StoreResult<RasterBuffer> {
    let backend = band_backend(ctx, desc, Action::Read)?;
    let window = view
        .tile_window(tile)
        .map_err(|e| e.for_path(&desc.band_path))?;
    read_window(ctx, desc, backend.as_ref(), window).await
}

/// Pixels of `data` to apply, in band pixel space.
struct Patch {
    window: PixelWindow,
    data: RasterBuffer,
    /// Row-major flags over `window`; `None` applies every pixel.
    mask: Option<Vec<bool>>,
}

impl Patch {
    /// Copy the covered part of this patch into `tile` located at `tile_window`.
    fn apply(&self, tile: &mut RasterBuffer, tile_window: &PixelWindow) {
        let Some(overlap) = self.window.intersection(tile_window) else {
            return;
        };
        let cols = self.window.cols;
        for row in overlap.row_off..overlap.row_end() {
            for col in overlap.col_off..overlap.col_end() {
                let pr = (row - self.window.row_off) as usize;
                let pc = (col - self.window.col_off) as usize;
                if let Some(mask) = &self.mask {
                    if !mask[pr * cols + pc] {
                        continue;
                    }
                }
                if let Some(v) = self.data.get(pr, pc) {
                    tile.set(
                        (row - tile_window.row_off) as usize,
                        (col - tile_window.col_off) as usize,
                        v,
                    );
                }
            }
        }
    }
}

/// Bring write data onto the band grid.
fn prepare_patch(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    grid: &TileGrid,
    request: &RegionRequest,
    data: &RasterBuffer,
) -> StoreResult<Patch> {
    let data_crs = request.crs.clone().unwrap_or_else(|| desc.crs.clone());

    if data_crs.same_as(&desc.crs) {
        if let Some((col, row)) = desc.transform.aligned_offset(&request.transform) {
            let window = PixelWindow::new(col, row, data.shape().cols, data.shape().rows);
            grid.clip(&window).map_err(|e| e.for_path(&desc.band_path))?;
            return Ok(Patch {
                window,
                data: data.clone(),
                mask: None,
            });
        }
    }

    // Resample first, then merge: only band pixels whose centres fall on
    // the data grid are written
    let data_bounds = request.transform.bounds(data.shape());
    let band_bounds = ctx
        .warper
        .transform_bounds(&data_crs, &desc.crs, &data_bounds)?;
    let window = grid
        .window_for_centres(&band_bounds)
        .and_then(|w| grid.clip(&w))
        .map_err(|e| e.for_path(&desc.band_path))?;

    let src_grid = GridSpec::new(data_crs.clone(), request.transform, data.shape());
    let dst_grid = GridSpec::new(
        desc.crs.clone(),
        desc.transform
            .shifted(window.col_off as f64, window.row_off as f64),
        window.shape(),
    );
    let typed = RasterBuffer::from_vec(desc.data_type, data.shape(), data.data().to_vec())?;
    let resampled = ctx
        .warper
        .resample(&typed, &src_grid, &dst_grid, request.method, desc.nodata)?;
    let mask = coverage(ctx, &dst_grid, &src_grid)?;
    debug!(
        method = %request.method,
        cols = window.cols,
        rows = window.rows,
        "Resampled write data onto band grid"
    );
    Ok(Patch {
        window,
        data: resampled,
        mask: Some(mask),
    })
}

/// Which pixel centres of `dst` fall inside the extent of `src`.
fn coverage(ctx: &EngineContext, dst: &GridSpec, src: &GridSpec) -> StoreResult<Vec<bool>> {
    let inverse = src
        .transform
        .invert()
        .ok_or_else(|| StoreError::Reprojection("data geotransform is not invertible".into()))?;
    let mut points = Vec::with_capacity(dst.shape.len());
    for row in 0..dst.shape.rows {
        for col in 0..dst.shape.cols {
            points.push(dst.transform.apply(col as f64 + 0.5, row as f64 + 0.5));
        }
    }
    ctx.warper.transform_points(&dst.crs, &src.crs, &mut points)?;
    Ok(points
        .into_iter()
        .map(|(x, y)| {
            let (c, r) = inverse.apply(x, y);
            c >= 0.0 && r >= 0.0 && c < src.shape.cols as f64 && r < src.shape.rows as f64
        })
        .collect())
}

/// Scatter `data`, laid out on `request`'s grid, into the band's tiles.
///
/// Atomic per tile, not across tiles: an error leaves earlier tiles
/// committed.
#[instrument(skip(ctx, desc, request, data), fields(path = %desc.band_path))]
pub(crate) async fn write_region(
    ctx: &EngineContext,
    desc: &BandDescriptor,
    view_tile_size: Option<usize>,
    request: &RegionRequest,
    data: &RasterBuffer,
) -> StoreResult<()> {
    check_writable(desc, view_tile_size)?;
    if data.shape() != request.shape {
        return Err(StoreError::InvalidBuffer(format!(
            "data is {}x{}, region is {}x{}",
            data.shape().rows,
            data.shape().cols,
            request.shape.rows,
            request.shape.cols
        )));
    }
    check_request_shape(ctx, desc, request.shape)?;
    let backend = band_backend(ctx, desc, Action::Write)?;
    let grid = storage_grid(desc)?;

    let patch = prepare_patch(ctx, desc, &grid, request, data)?;
    let target = grid
        .clip(&patch.window)
        .map_err(|e| e.for_path(&desc.band_path))?;
    let tiles = grid.tiles_in_window(&target)?;
    debug!(tiles = tiles.len(), "Writing region");

    for tile in tiles {
        let tile_window = grid.tile_window(tile)?;
        let key = desc.tile_key(tile.x, tile.y);
        let spec = tile_spec(desc, tile_window.shape());
        let store = Arc::clone(&backend);
        let patch = &patch;

        with_tile_lock(Arc::clone(&backend), &key, || async {
            // Always merge into the committed content, never a cached copy
            let mut buffer = match load_tile(ctx, store.as_ref(), &key, &spec).await? {
                Some(existing) => existing,
                None => RasterBuffer::filled(desc.data_type, spec.shape, desc.fill_value()),
            };
            patch.apply(&mut buffer, &tile_window);
            let bytes = ctx.codec.encode(&key, &buffer, &spec)?;
            store.put(&key, bytes).await?;
            ctx.cache_tile(store.name(), &key, Arc::new(buffer)).await;
            Ok(())
        })
        .await?;
        debug!(key = %key, "Tile merged");
    }
    Ok(())
}
