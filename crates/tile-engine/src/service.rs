//! High-level raster store service.
//!
//! The `RasterStore` is the entry point workers use: it resolves logical
//! paths through the catalog, creates and removes datasets, and opens band
//! handles for tile and region I/O.
//!
//! # Example
//!
//! ```rust,ignore
//! use tile_engine::{BandSpec, RasterStore, RegionRequest};
//! use tilestore_common::{Crs, DataType, EngineConfig, GeoTransform, RasterShape};
//!
//! let config = EngineConfig::discover(None)?;
//! let store = RasterStore::from_config(&config).await?;
//!
//! let spec = BandSpec::new(
//!     Crs::wgs84(),
//!     GeoTransform::from_origin(-180.0, 90.0, 0.01, 0.01),
//!     RasterShape::new(18_000, 36_000),
//!     DataType::Int16,
//! )
//! .with_nodata(-9999.0)
//! .with_tile_size(2048);
//! let band = store.create_band("/store/ls/dem/elevation", &spec).await?;
//!
//! let request = RegionRequest::new(GeoTransform::from_origin(10.0, 50.0, 0.01, 0.01), RasterShape::new(512, 512));
//! band.write_region(&request, &data).await?;
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use storage::{
    BackendLocation, BandDescriptor, BandRef, Descriptor, Filter, ImageDescriptor, MetadataCatalog,
};
use tilestore_common::{
    Action, BoundingBox, Crs, DataType, EngineConfig, EngineSettings, GeoTransform, LogicalPath,
    RasterBuffer, RasterShape, StoreError, StoreResult,
};

use crate::band::{Band, Dataset, Image, PixelAreaBand, ReadOnlyBand, SlicedBand};
use crate::codec::TileSpec;
use crate::context::EngineContext;
use crate::types::CacheStats;
use crate::warp::GridSpec;

/// Attributes of a band to create.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSpec {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub shape: RasterShape,
    pub data_type: DataType,
    pub nodata: Option<f64>,
    /// Stored tile size; the engine default when `None`.
    pub tile_size: Option<usize>,
    pub readonly: bool,
}

impl BandSpec {
    pub fn new(crs: Crs, transform: GeoTransform, shape: RasterShape, data_type: DataType) -> Self {
        Self {
            crs,
            transform,
            shape,
            data_type,
            nodata: None,
            tile_size: None,
            readonly: false,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = Some(tile_size);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.readonly = true;
        self
    }
}

/// One member band of an image to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBandSpec {
    pub name: String,
    pub data_type: DataType,
    pub nodata: Option<f64>,
}

impl ImageBandSpec {
    pub fn new(name: impl Into<String>, data_type: DataType, nodata: Option<f64>) -> Self {
        Self {
            name: name.into(),
            data_type,
            nodata,
        }
    }
}

/// Attributes of an image to create. Every band shares the image grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSpec {
    pub crs: Crs,
    pub transform: GeoTransform,
    pub shape: RasterShape,
    pub bands: Vec<ImageBandSpec>,
    pub tile_size: Option<usize>,
    /// Acquisition date as `yyyymmdd`.
    pub date: Option<u32>,
    pub year: Option<i32>,
    pub provider: Option<String>,
    pub processing_time: Option<DateTime<Utc>>,
}

impl ImageSpec {
    pub fn new(crs: Crs, transform: GeoTransform, shape: RasterShape) -> Self {
        Self {
            crs,
            transform,
            shape,
            bands: Vec::new(),
            tile_size: None,
            date: None,
            year: None,
            provider: None,
            processing_time: None,
        }
    }

    pub fn with_band(mut self, band: ImageBandSpec) -> Self {
        self.bands.push(band);
        self
    }
}

/// Metadata changes allowed after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandUpdate {
    /// `Some(None)` clears the nodata value.
    pub nodata: Option<Option<f64>>,
    pub readonly: Option<bool>,
}

/// Entry point for dataset lifecycle and band access.
#[derive(Clone)]
pub struct RasterStore {
    ctx: Arc<EngineContext>,
}

impl RasterStore {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Build the catalog, endpoints and document store from configuration.
    pub async fn from_config(config: &EngineConfig) -> StoreResult<Self> {
        let catalog = MetadataCatalog::from_config(config).await?;
        let ctx = EngineContext::new(
            Arc::new(catalog),
            config.engine.clone(),
            config.metadata_config.cache_config.max_cache_size,
        );
        info!(
            cache_bytes = config.metadata_config.cache_config.max_cache_size,
            read_concurrency = config.engine.read_concurrency,
            "Raster store ready"
        );
        Ok(Self::new(ctx))
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.ctx.catalog
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.ctx.cache_stats().await
    }

    /// Open whatever `path` names.
    pub async fn open(&self, path: &str) -> StoreResult<Dataset> {
        let path = LogicalPath::parse(path)?;
        match self.ctx.catalog.get_descriptor(&path).await? {
            Descriptor::Image(desc) => Ok(Dataset::Image(Image::new(Arc::clone(&self.ctx), desc))),
            Descriptor::Band(desc) => Ok(Band::from_descriptor(Arc::clone(&self.ctx), desc)?.into()),
        }
    }

    /// Open a band, failing with `UnsupportedBand` for an image.
    pub async fn open_band(&self, path: &str) -> StoreResult<Band> {
        self.open(path).await?.into_band().ok_or_else(|| {
            StoreError::unsupported_band(path, "path names an image, not a band")
        })
    }

    /// Open a tiled band.
    pub async fn open_sliced(&self, path: &str) -> StoreResult<SlicedBand> {
        self.open_band(path).await?.into_sliced().ok_or_else(|| {
            StoreError::unsupported_band(path, "band is stored as a single blob")
        })
    }

    pub async fn open_image(&self, path: &str) -> StoreResult<Image> {
        self.open(path)
            .await?
            .into_image()
            .ok_or_else(|| StoreError::unsupported_band(path, "path names a band, not an image"))
    }

    pub async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.ctx.catalog.exists(&LogicalPath::parse(path)?).await
    }

    fn band_descriptor(
        &self,
        path: &LogicalPath,
        spec: &BandSpec,
        tile_size: Option<usize>,
        image_path: Option<LogicalPath>,
    ) -> StoreResult<BandDescriptor> {
        let resolved = self.ctx.catalog.resolve(path, Action::Create)?;
        let endpoint = match self.ctx.catalog.placement(&resolved.datasource) {
            Some(name) => name.to_string(),
            None => resolved.endpoint.name().to_string(),
        };
        Ok(BandDescriptor {
            band_path: path.clone(),
            band_name: path.name().to_string(),
            crs: spec.crs.clone(),
            transform: spec.transform,
            shape: spec.shape,
            data_type: spec.data_type,
            nodata: spec.nodata,
            tile_size,
            readonly: spec.readonly,
            image_path,
            backend: BackendLocation {
                endpoint,
                key: resolved.physical_key,
            },
            created_at: Utc::now(),
        })
    }

    /// Register a tiled band. No tiles are written until the first write.
    #[instrument(skip(self, spec), fields(path = %path))]
    pub async fn create_band(&self, path: &str, spec: &BandSpec) -> StoreResult<Band> {
        let path = LogicalPath::parse(path)?;
        let tile_size = self.validate_spec(&path, spec)?;
        let desc = self.band_descriptor(&path, spec, Some(tile_size), None)?;

        self.ctx
            .catalog
            .create_descriptor(&path, &Descriptor::Band(desc.clone()))
            .await?;
        info!(
            rows = spec.shape.rows,
            cols = spec.shape.cols,
            data_type = %spec.data_type,
            tile_size,
            "Band created"
        );
        Band::from_descriptor(Arc::clone(&self.ctx), desc)
    }

    /// Register a blank, writable tiled band on the grid of `like`.
    ///
    /// The new band keeps the CRS, transform and shape of `like`, and its
    /// stored tile size when `like` is tiled.
    #[instrument(skip(self, like), fields(path = %path, like = %like.band_path))]
    pub async fn create_dataset(
        &self,
        path: &str,
        like: &BandDescriptor,
        data_type: DataType,
        nodata: Option<f64>,
    ) -> StoreResult<SlicedBand> {
        let mut spec = BandSpec::new(like.crs.clone(), like.transform, like.shape, data_type);
        spec.nodata = nodata;
        spec.tile_size = like.sliced_tile_size();
        self.create_band(path, &spec).await?.into_sliced().ok_or_else(|| {
            StoreError::unsupported_band(path, "created band is not tiled")
        })
    }

    /// A synthetic band holding each pixel's area in square metres.
    /// `grid` applies to requests that carry no CRS.
    pub fn open_pixel_area_band(&self, grid: GridSpec) -> PixelAreaBand {
        PixelAreaBand::new(Arc::clone(&self.ctx.warper), grid)
    }

    /// Register an image and one tiled band per member at `{image}/{name}`.
    #[instrument(skip(self, spec), fields(path = %path, bands = spec.bands.len()))]
    pub async fn create_image(&self, path: &str, spec: &ImageSpec) -> StoreResult<Image> {
        let path = LogicalPath::parse(path)?;
        if spec.bands.is_empty() {
            return Err(StoreError::catalog(path.to_string(), "an image needs at least one band"));
        }
        let mut seen = HashSet::new();
        for band in &spec.bands {
            if !seen.insert(band.name.as_str()) {
                return Err(StoreError::catalog(
                    path.to_string(),
                    format!("duplicate band name '{}'", band.name),
                ));
            }
        }

        let mut members = Vec::with_capacity(spec.bands.len());
        for band in &spec.bands {
            let band_path = path.join(&band.name)?;
            let band_spec = BandSpec {
                crs: spec.crs.clone(),
                transform: spec.transform,
                shape: spec.shape,
                data_type: band.data_type,
                nodata: band.nodata,
                tile_size: spec.tile_size,
                readonly: false,
            };
            let tile_size = self.validate_spec(&band_path, &band_spec)?;
            members.push(self.band_descriptor(&band_path, &band_spec, Some(tile_size), Some(path.clone()))?);
        }

        let image = ImageDescriptor {
            image_path: path.clone(),
            image_name: path.name().to_string(),
            crs: spec.crs.clone(),
            transform: spec.transform,
            shape: spec.shape,
            bands: members
                .iter()
                .map(|b| BandRef {
                    name: b.band_name.clone(),
                    path: b.band_path.clone(),
                })
                .collect(),
            wgs_boundary: self.wgs_boundary(&spec.crs, &spec.transform.bounds(spec.shape)),
            date: spec.date,
            year: spec.year,
            provider: spec.provider.clone(),
            processing_time: spec.processing_time,
            created_at: Utc::now(),
        };

        self.ctx
            .catalog
            .create_descriptor(&path, &Descriptor::Image(image.clone()))
            .await?;
        for member in members {
            let member_path = member.band_path.clone();
            self.ctx
                .catalog
                .create_descriptor(&member_path, &Descriptor::Band(member))
                .await?;
        }
        info!(bands = image.bands.len(), "Image created");
        Ok(Image::new(Arc::clone(&self.ctx), image))
    }

    /// Store `data` as one whole-raster blob and register a read-only,
    /// unsliced band over it.
    #[instrument(skip(self, spec, data), fields(path = %path))]
    pub async fn import_band(
        &self,
        path: &str,
        spec: &BandSpec,
        data: &RasterBuffer,
    ) -> StoreResult<ReadOnlyBand> {
        let path = LogicalPath::parse(path)?;
        self.validate_attributes(&path, spec)?;
        if data.shape() != spec.shape {
            return Err(StoreError::InvalidBuffer(format!(
                "data is {}x{}, band is {}x{}",
                data.shape().rows,
                data.shape().cols,
                spec.shape.rows,
                spec.shape.cols
            )));
        }

        let mut desc = self.band_descriptor(&path, spec, None, None)?;
        desc.readonly = true;
        let backend = self.ctx.catalog.endpoint(&desc.backend.endpoint)?;
        let key = desc.blob_key();
        let bytes = self.ctx.codec.encode(
            &key,
            data,
            &TileSpec {
                data_type: spec.data_type,
                nodata: spec.nodata,
                shape: spec.shape,
            },
        )?;
        let size = bytes.len();

        // The descriptor claims the path; only the claimant writes the blob
        self.ctx
            .catalog
            .create_descriptor(&path, &Descriptor::Band(desc.clone()))
            .await?;
        if let Err(e) = backend.put(&key, bytes).await {
            if let Err(rollback) = self.ctx.catalog.abandon_created(&path).await {
                warn!(error = %rollback, "Failed to remove descriptor of failed import");
            }
            return Err(e);
        }
        info!(bytes = size, "Band imported");
        Ok(ReadOnlyBand::new(Arc::clone(&self.ctx), desc))
    }

    /// Change the nodata value or read-only flag of a band.
    #[instrument(skip(self, update), fields(path = %path))]
    pub async fn update_band(&self, path: &str, update: &BandUpdate) -> StoreResult<BandDescriptor> {
        let path = LogicalPath::parse(path)?;
        let mut desc = match self.ctx.catalog.get_descriptor(&path).await? {
            Descriptor::Band(desc) => desc,
            Descriptor::Image(_) => {
                return Err(StoreError::unsupported_band(
                    path.to_string(),
                    "path names an image, not a band",
                ))
            }
        };

        if let Some(nodata) = update.nodata {
            if let Some(value) = nodata {
                check_nodata(&path, desc.data_type, value)?;
            }
            desc.nodata = nodata;
        }
        if let Some(readonly) = update.readonly {
            if !readonly && desc.sliced_tile_size().is_none() {
                return Err(StoreError::unsupported_band(
                    path.to_string(),
                    "a band stored as a single blob stays read-only",
                ));
            }
            desc.readonly = readonly;
        }

        self.ctx
            .catalog
            .put_descriptor(&path, &Descriptor::Band(desc.clone()))
            .await?;
        info!(nodata = ?desc.nodata, readonly = desc.readonly, "Band updated");
        Ok(desc)
    }

    /// Remove a dataset and every blob stored for it.
    ///
    /// Unlinking an image removes its bands. Unlinking a band that belongs
    /// to an image removes it from the image; an image left without bands
    /// is removed too.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn unlink(&self, path: &str) -> StoreResult<()> {
        let path = LogicalPath::parse(path)?;
        let datasource = self.ctx.catalog.datasource_for(&path)?.to_string();
        self.ctx.catalog.check_authority(&datasource, Action::Delete)?;

        match self.ctx.catalog.get_descriptor(&path).await? {
            Descriptor::Image(image) => {
                for band_ref in &image.bands {
                    match self.ctx.catalog.get_descriptor(&band_ref.path).await {
                        Ok(Descriptor::Band(desc)) => self.remove_band(&desc).await?,
                        Ok(Descriptor::Image(_)) | Err(StoreError::NotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                self.ctx.catalog.delete_descriptor(&path).await?;
                info!(bands = image.bands.len(), "Image unlinked");
            }
            Descriptor::Band(desc) => {
                let parent = match &desc.image_path {
                    Some(image_path) => match self.ctx.catalog.get_descriptor(image_path).await {
                        Ok(Descriptor::Image(image)) => Some(image),
                        Ok(Descriptor::Band(_)) | Err(StoreError::NotFound { .. }) => None,
                        Err(e) => return Err(e),
                    },
                    None => None,
                };
                if let Some(image) = &parent {
                    if image.bands.len() > 1 {
                        let ds = self.ctx.catalog.datasource_for(&image.image_path)?.to_string();
                        self.ctx.catalog.check_authority(&ds, Action::Write)?;
                    }
                }

                self.remove_band(&desc).await?;
                info!("Band unlinked");

                if let Some(mut image) = parent {
                    image.bands.retain(|b| b.path != desc.band_path);
                    if image.bands.is_empty() {
                        self.ctx.catalog.delete_descriptor(&image.image_path).await?;
                        info!(image = %image.image_path, "Image left without bands unlinked");
                    } else {
                        let image_path = image.image_path.clone();
                        self.ctx
                            .catalog
                            .put_descriptor(&image_path, &Descriptor::Image(image))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete a band's blobs and descriptor.
    async fn remove_band(&self, desc: &BandDescriptor) -> StoreResult<()> {
        self.ctx.catalog.resolve(&desc.band_path, Action::Delete)?;
        let backend = self.ctx.catalog.endpoint(&desc.backend.endpoint)?;

        let keys: Vec<String> = backend
            .list(&desc.backend.key)
            .await?
            .into_iter()
            .filter(|key| desc.owns_key(key))
            .collect();
        for key in &keys {
            backend.delete(key).await?;
        }
        let prefix = format!("{}/", desc.backend.key);
        let evicted = self.ctx.invalidate_prefix(backend.name(), &prefix).await;
        self.ctx.catalog.delete_descriptor(&desc.band_path).await?;
        debug!(path = %desc.band_path, blobs = keys.len(), evicted, "Band removed");
        Ok(())
    }

    /// Descriptors of `datasource` matching `filter`, ordered by path.
    pub async fn query_by_filter(
        &self,
        datasource: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Descriptor>> {
        self.ctx.catalog.query_by_filter(datasource, filter, limit).await
    }

    /// Same as [`RasterStore::query_by_filter`] with a Mongo-style JSON filter.
    pub async fn query_json(
        &self,
        datasource: &str,
        query: &Value,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Descriptor>> {
        let filter = Filter::from_json(query)?;
        self.query_by_filter(datasource, &filter, limit).await
    }

    /// Check attributes shared by every band kind.
    fn validate_attributes(&self, path: &LogicalPath, spec: &BandSpec) -> StoreResult<()> {
        if spec.shape.is_empty() {
            return Err(StoreError::catalog(path.to_string(), "band shape is empty"));
        }
        if spec.transform.invert().is_none() {
            return Err(StoreError::catalog(
                path.to_string(),
                "geotransform is not invertible",
            ));
        }
        if let Some(nodata) = spec.nodata {
            check_nodata(path, spec.data_type, nodata)?;
        }
        Ok(())
    }

    /// Validate a sliced band spec, returning the tile size to store.
    fn validate_spec(&self, path: &LogicalPath, spec: &BandSpec) -> StoreResult<usize> {
        self.validate_attributes(path, spec)?;
        match spec.tile_size {
            Some(0) => Err(StoreError::catalog(
                path.to_string(),
                "tile size must be greater than 0",
            )),
            Some(size) => Ok(size),
            None => Ok(self.ctx.settings.default_tile_size),
        }
    }

    fn wgs_boundary(&self, crs: &Crs, bounds: &BoundingBox) -> Option<BoundingBox> {
        match self.ctx.warper.transform_bounds(crs, &Crs::wgs84(), bounds) {
            Ok(b) => Some(b),
            Err(e) => {
                debug!(crs = %crs, error = %e, "No WGS84 boundary");
                None
            }
        }
    }
}

fn check_nodata(path: &LogicalPath, data_type: DataType, nodata: f64) -> StoreResult<()> {
    if data_type.can_represent(nodata) {
        Ok(())
    } else {
        Err(StoreError::catalog(
            path.to_string(),
            format!("nodata {} is not representable as {}", nodata, data_type),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::RasterBand;
    use test_utils::{memory_catalog, writable_path, ENDPOINT};
    use tilestore_common::ErrorKind;

    fn store(cache_size: usize) -> RasterStore {
        let (catalog, _) = memory_catalog();
        RasterStore::new(EngineContext::new(
            Arc::new(catalog),
            EngineSettings::default(),
            cache_size,
        ))
    }

    fn spec() -> BandSpec {
        BandSpec::new(
            Crs::wgs84(),
            GeoTransform::new([180.0, 1.0, 0.0, 90.0, 0.0, -1.0]),
            RasterShape::new(4, 4),
            DataType::Uint8,
        )
    }

    #[test]
    fn test_band_spec_builder() {
        let spec = spec().with_nodata(255.0).with_tile_size(2).read_only();
        assert_eq!(spec.nodata, Some(255.0));
        assert_eq!(spec.tile_size, Some(2));
        assert!(spec.readonly);
    }

    #[test]
    fn test_validate_spec() {
        let store = store(0);
        let path = LogicalPath::parse(&writable_path("a/b")).unwrap();

        assert_eq!(store.validate_spec(&path, &spec()).unwrap(), 2048);
        assert_eq!(store.validate_spec(&path, &spec().with_tile_size(256)).unwrap(), 256);

        let err = store.validate_spec(&path, &spec().with_nodata(-1.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Catalog);
        assert_eq!(err.subject(), Some("/store/ls/a/b"));

        let mut empty = spec();
        empty.shape = RasterShape::new(0, 4);
        assert!(store.validate_spec(&path, &empty).is_err());
    }

    #[test]
    fn test_band_descriptor_placement() {
        let store = store(0);
        let path = LogicalPath::parse(&writable_path("dem/elevation")).unwrap();
        let desc = store.band_descriptor(&path, &spec(), Some(2), None).unwrap();

        assert_eq!(desc.band_name, "elevation");
        assert_eq!(desc.backend.endpoint, ENDPOINT);
        assert_eq!(desc.backend.key, "ls/dem/elevation");
        assert_eq!(desc.tile_key(1, 0), "ls/dem/elevation/1_0.tile");
    }

    #[test]
    fn test_band_descriptor_needs_create_authority() {
        let store = store(0);
        let path = LogicalPath::parse("/store/arc/dem").unwrap();
        let err = store.band_descriptor(&path, &spec(), Some(2), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authority);
    }

    #[test]
    fn test_create_and_reopen() {
        let store = store(1 << 16);
        assert!(store.context().cache_enabled());

        tokio_test::block_on(async {
            let path = writable_path("dem/b1");
            let band = store.create_band(&path, &spec().with_tile_size(2)).await.unwrap();
            assert!(band.is_writable());

            let reopened = store.open_sliced(&path).await.unwrap();
            assert_eq!(reopened.descriptor(), band.descriptor());
            assert_eq!(reopened.tile_size(), 2);
        });
    }

    #[test]
    fn test_wgs_boundary_for_unsupported_crs() {
        let store = store(0);
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(store.wgs_boundary(&Crs::new("EPSG:32633"), &bounds).is_none());
        assert_eq!(store.wgs_boundary(&Crs::wgs84(), &bounds), Some(bounds));
    }
}
