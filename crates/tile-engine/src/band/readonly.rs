use async_trait::async_trait;
use std::sync::Arc;

use storage::BandDescriptor;
use tilestore_common::{Action, PixelWindow, RasterBuffer, StoreResult};

use super::RasterBand;
use crate::context::EngineContext;
use crate::region;
use crate::types::RegionRequest;

/// A band stored as one whole-raster blob. Never writable.
#[derive(Clone)]
pub struct ReadOnlyBand {
    ctx: Arc<EngineContext>,
    desc: BandDescriptor,
}

impl ReadOnlyBand {
    pub(crate) fn new(ctx: Arc<EngineContext>, desc: BandDescriptor) -> Self {
        Self { ctx, desc }
    }

    /// The whole raster.
    pub async fn read_all(&self) -> StoreResult<RasterBuffer> {
        let backend = region::band_backend(&self.ctx, &self.desc, Action::Read)?;
        region::read_window(
            &self.ctx,
            &self.desc,
            backend.as_ref(),
            PixelWindow::full(self.desc.shape),
        )
        .await
    }
}

#[async_trait]
impl RasterBand for ReadOnlyBand {
    fn descriptor(&self) -> &BandDescriptor {
        &self.desc
    }

    fn is_writable(&self) -> bool {
        false
    }

    async fn read_region(&self, request: &RegionRequest) -> StoreResult<RasterBuffer> {
        region::read_region(&self.ctx, &self.desc, request).await
    }

    async fn read_point(&self, x: f64, y: f64) -> StoreResult<Option<f64>> {
        region::read_point(&self.ctx, &self.desc, x, y).await
    }
}
