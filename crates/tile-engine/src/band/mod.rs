//! Band, image and dataset handles.
//!
//! Handles are cheap to clone: they carry the descriptor they were opened
//! with and an `Arc` of the engine context. Descriptors are immutable
//! except through `RasterStore::update_band`, so a handle opened before an
//! update keeps the old attributes.

mod image;
mod pixel_area;
mod readonly;
mod sliced;

pub use image::Image;
pub use pixel_area::PixelAreaBand;
pub use readonly::ReadOnlyBand;
pub use sliced::SlicedBand;

use async_trait::async_trait;
use std::sync::Arc;

use storage::BandDescriptor;
use tilestore_common::{LogicalPath, RasterBuffer, StoreResult};

use crate::context::EngineContext;
use crate::types::RegionRequest;
use crate::warp::GridSpec;

/// Read access common to every band.
#[async_trait]
pub trait RasterBand: Send + Sync {
    fn descriptor(&self) -> &BandDescriptor;

    fn path(&self) -> &LogicalPath {
        &self.descriptor().band_path
    }

    /// CRS, transform and shape of the band.
    fn grid_spec(&self) -> GridSpec {
        let desc = self.descriptor();
        GridSpec::new(desc.crs.clone(), desc.transform, desc.shape)
    }

    /// Whether writes are accepted through this handle.
    fn is_writable(&self) -> bool;

    /// Read the band onto the grid described by `request`.
    ///
    /// # Returns
    /// A buffer of exactly `request.shape`. Pixels outside the band or in
    /// tiles never written take the nodata value (0 without one).
    async fn read_region(&self, request: &RegionRequest) -> StoreResult<RasterBuffer>;

    /// Value at a band-CRS coordinate.
    ///
    /// `None` outside the raster or where the pixel holds nodata.
    async fn read_point(&self, x: f64, y: f64) -> StoreResult<Option<f64>>;
}

/// A band of either storage layout.
#[derive(Clone)]
pub enum Band {
    ReadOnly(ReadOnlyBand),
    Sliced(SlicedBand),
}

impl Band {
    pub(crate) fn from_descriptor(ctx: Arc<EngineContext>, desc: BandDescriptor) -> StoreResult<Self> {
        Ok(match desc.sliced_tile_size() {
            Some(_) => Band::Sliced(SlicedBand::new(ctx, desc)?),
            None => Band::ReadOnly(ReadOnlyBand::new(ctx, desc)),
        })
    }

    pub fn as_sliced(&self) -> Option<&SlicedBand> {
        match self {
            Band::Sliced(b) => Some(b),
            Band::ReadOnly(_) => None,
        }
    }

    pub fn into_sliced(self) -> Option<SlicedBand> {
        match self {
            Band::Sliced(b) => Some(b),
            Band::ReadOnly(_) => None,
        }
    }

    fn inner(&self) -> &dyn RasterBand {
        match self {
            Band::ReadOnly(b) => b,
            Band::Sliced(b) => b,
        }
    }
}

#[async_trait]
impl RasterBand for Band {
    fn descriptor(&self) -> &BandDescriptor {
        self.inner().descriptor()
    }

    fn is_writable(&self) -> bool {
        self.inner().is_writable()
    }

    async fn read_region(&self, request: &RegionRequest) -> StoreResult<RasterBuffer> {
        self.inner().read_region(request).await
    }

    async fn read_point(&self, x: f64, y: f64) -> StoreResult<Option<f64>> {
        self.inner().read_point(x, y).await
    }
}

/// Whatever a logical path resolves to.
#[derive(Clone)]
pub enum Dataset {
    Image(Image),
    ReadOnlyBand(ReadOnlyBand),
    SlicedBand(SlicedBand),
}

impl Dataset {
    pub fn path(&self) -> &LogicalPath {
        match self {
            Dataset::Image(i) => i.path(),
            Dataset::ReadOnlyBand(b) => b.path(),
            Dataset::SlicedBand(b) => b.path(),
        }
    }

    /// The dataset as a band, `None` for an image.
    pub fn into_band(self) -> Option<Band> {
        match self {
            Dataset::Image(_) => None,
            Dataset::ReadOnlyBand(b) => Some(Band::ReadOnly(b)),
            Dataset::SlicedBand(b) => Some(Band::Sliced(b)),
        }
    }

    pub fn into_image(self) -> Option<Image> {
        match self {
            Dataset::Image(i) => Some(i),
            _ => None,
        }
    }
}

impl From<Band> for Dataset {
    fn from(band: Band) -> Self {
        match band {
            Band::ReadOnly(b) => Dataset::ReadOnlyBand(b),
            Band::Sliced(b) => Dataset::SlicedBand(b),
        }
    }
}
