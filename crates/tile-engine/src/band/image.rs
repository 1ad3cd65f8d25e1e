use futures::future::try_join_all;
use std::sync::Arc;

use storage::{Descriptor, ImageDescriptor};
use tilestore_common::{LogicalPath, RasterBuffer, StoreError, StoreResult};

use super::{Band, RasterBand};
use crate::context::EngineContext;
use crate::types::RegionRequest;

/// An ordered set of co-registered bands.
#[derive(Clone)]
pub struct Image {
    ctx: Arc<EngineContext>,
    desc: ImageDescriptor,
}

impl Image {
    pub(crate) fn new(ctx: Arc<EngineContext>, desc: ImageDescriptor) -> Self {
        Self { ctx, desc }
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.desc
    }

    pub fn path(&self) -> &LogicalPath {
        &self.desc.image_path
    }

    /// Band names in image order.
    pub fn band_names(&self) -> Vec<&str> {
        self.desc.bands.iter().map(|b| b.name.as_str()).collect()
    }

    /// Open member band `name`.
    pub async fn band(&self, name: &str) -> StoreResult<Band> {
        let band_ref = self.desc.band(name).ok_or_else(|| {
            StoreError::not_found(format!("{}/{}", self.desc.image_path, name))
        })?;
        match self.ctx.catalog.get_descriptor(&band_ref.path).await? {
            Descriptor::Band(desc) => Band::from_descriptor(Arc::clone(&self.ctx), desc),
            Descriptor::Image(_) => Err(StoreError::catalog(
                band_ref.path.to_string(),
                "image member is not a band",
            )),
        }
    }

    /// Open every member band, in image order.
    pub async fn bands(&self) -> StoreResult<Vec<Band>> {
        let mut bands = Vec::with_capacity(self.desc.bands.len());
        for band_ref in &self.desc.bands {
            bands.push(self.band(&band_ref.name).await?);
        }
        Ok(bands)
    }

    /// Read the same region from every band, in image order.
    pub async fn read_region(&self, request: &RegionRequest) -> StoreResult<Vec<(String, RasterBuffer)>> {
        let bands = self.bands().await?;
        let buffers = try_join_all(bands.iter().map(|b| b.read_region(request))).await?;
        Ok(self
            .desc
            .bands
            .iter()
            .map(|b| b.name.clone())
            .zip(buffers)
            .collect())
    }
}
