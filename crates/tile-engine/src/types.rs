//! Core types for the tile engine.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use tilestore_common::{Crs, GeoTransform, RasterShape, StoreError};

/// Resampling method used when a request grid differs from the band grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// Nearest neighbor (preserves exact values).
    #[default]
    Nearest,
    /// Bilinear interpolation.
    Bilinear,
    /// Bicubic (Catmull-Rom) interpolation.
    Cubic,
    /// Mean of source pixels whose centres fall inside the target pixel.
    Average,
}

impl FromStr for ResampleMethod {
    type Err = StoreError;

    /// Parse from string (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" | "near" => Ok(Self::Nearest),
            "bilinear" | "linear" => Ok(Self::Bilinear),
            "cubic" | "bicubic" => Ok(Self::Cubic),
            "average" | "mean" => Ok(Self::Average),
            other => Err(StoreError::Config(format!(
                "unknown resampling method '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
            Self::Cubic => write!(f, "cubic"),
            Self::Average => write!(f, "average"),
        }
    }
}

/// A region request: the target grid a read is materialized on.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRequest {
    pub transform: GeoTransform,
    pub shape: RasterShape,
    /// Request CRS; `None` means the band's own CRS.
    pub crs: Option<Crs>,
    pub method: ResampleMethod,
}

impl RegionRequest {
    /// Request on the band's own CRS with nearest-neighbour resampling.
    pub fn new(transform: GeoTransform, shape: RasterShape) -> Self {
        Self {
            transform,
            shape,
            crs: None,
            method: ResampleMethod::Nearest,
        }
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn with_method(mut self, method: ResampleMethod) -> Self {
        self.method = method;
        self
    }
}

/// Statistics about the decoded tile cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_method_parse() {
        assert_eq!("Bilinear".parse::<ResampleMethod>().unwrap(), ResampleMethod::Bilinear);
        assert_eq!("bicubic".parse::<ResampleMethod>().unwrap(), ResampleMethod::Cubic);
        assert_eq!("near".parse::<ResampleMethod>().unwrap(), ResampleMethod::Nearest);
        assert!("lanczos".parse::<ResampleMethod>().is_err());
    }

    #[test]
    fn test_cache_hit_rate() {
        let mut stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);

        stats.hits = 80;
        stats.misses = 20;
        assert!((stats.hit_rate() - 0.8).abs() < f64::EPSILON);
    }
}
