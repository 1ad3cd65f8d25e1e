//! Catalog descriptors for images and bands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tilestore_common::{BoundingBox, Crs, DataType, GeoTransform, LogicalPath, RasterShape};

/// File name of the single blob backing an unsliced band.
pub const RASTER_BLOB: &str = "raster.blob";

/// A catalog entry, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Descriptor {
    Band(BandDescriptor),
    Image(ImageDescriptor),
}

impl Descriptor {
    pub fn path(&self) -> &LogicalPath {
        match self {
            Descriptor::Band(b) => &b.band_path,
            Descriptor::Image(i) => &i.image_path,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Descriptor::Band(_) => "band",
            Descriptor::Image(_) => "image",
        }
    }
}

/// Where a dataset's blobs live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendLocation {
    /// Storage endpoint name.
    pub endpoint: String,
    /// Key prefix of the dataset on that endpoint.
    pub key: String,
}

/// Immutable attributes of one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandDescriptor {
    pub band_path: LogicalPath,
    pub band_name: String,
    pub crs: Crs,
    pub transform: GeoTransform,
    pub shape: RasterShape,
    pub data_type: DataType,
    #[serde(default, with = "nodata_serde")]
    pub nodata: Option<f64>,
    /// Pixels per tile edge. `None` means the band is a single blob.
    #[serde(default)]
    pub tile_size: Option<usize>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub image_path: Option<LogicalPath>,
    pub backend: BackendLocation,
    pub created_at: DateTime<Utc>,
}

impl BandDescriptor {
    /// Tile size when the band is sliced.
    pub fn sliced_tile_size(&self) -> Option<usize> {
        self.tile_size.filter(|t| *t > 0)
    }

    /// Value used for pixels that were never written.
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or(0.0)
    }

    /// Storage key of tile `(tile_x, tile_y)`.
    pub fn tile_key(&self, tile_x: usize, tile_y: usize) -> String {
        format!("{}/{}_{}.tile", self.backend.key, tile_x, tile_y)
    }

    /// Storage key of the whole-raster blob.
    pub fn blob_key(&self) -> String {
        format!("{}/{}", self.backend.key, RASTER_BLOB)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.shape)
    }

    /// Whether `key` is a tile or the raster blob of this band.
    ///
    /// Keys of datasets nested below this band's path share its prefix but
    /// are never owned by it.
    pub fn owns_key(&self, key: &str) -> bool {
        let Some(name) = key
            .strip_prefix(self.backend.key.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return false;
        };
        if name == RASTER_BLOB {
            return true;
        }
        let Some((x, y)) = name.strip_suffix(".tile").and_then(|t| t.split_once('_')) else {
            return false;
        };
        let is_index = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        is_index(x) && is_index(y)
    }
}

/// Reference from an image to one of its bands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRef {
    pub name: String,
    pub path: LogicalPath,
}

/// An ordered collection of co-registered bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub image_path: LogicalPath,
    pub image_name: String,
    pub crs: Crs,
    pub transform: GeoTransform,
    pub shape: RasterShape,
    pub bands: Vec<BandRef>,
    /// Extent in EPSG:4326, when the CRS can be projected there.
    #[serde(default)]
    pub wgs_boundary: Option<BoundingBox>,
    /// Acquisition date as `yyyymmdd`.
    #[serde(default)]
    pub date: Option<u32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub processing_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ImageDescriptor {
    pub fn band(&self, name: &str) -> Option<&BandRef> {
        self.bands.iter().find(|b| b.name == name)
    }
}

/// Nodata is serialized as a number, or as the string `"nan"` so NaN
/// survives JSON.
mod nodata_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_nan() => Some(Repr::Text("nan".to_string())).serialize(s),
            Some(v) if v.is_infinite() => {
                let text = if *v > 0.0 { "inf" } else { "-inf" };
                Some(Repr::Text(text.to_string())).serialize(s)
            }
            Some(v) => Some(Repr::Number(*v)).serialize(s),
            None => None::<Repr>.serialize(s),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(d)? {
            None => Ok(None),
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Text(t)) => match t.to_lowercase().as_str() {
                "nan" => Ok(Some(f64::NAN)),
                "inf" => Ok(Some(f64::INFINITY)),
                "-inf" => Ok(Some(f64::NEG_INFINITY)),
                other => other
                    .parse()
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom(format!("invalid nodata '{}'", other))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_owns_key() {
        let desc = band(None);
        let key = &desc.backend.key;
        assert!(desc.owns_key(&desc.tile_key(3, 12)));
        assert!(desc.owns_key(&desc.blob_key()));

        assert!(!desc.owns_key(&format!("{}/child/0_0.tile", key)));
        assert!(!desc.owns_key(&format!("{}/child/{}", key, RASTER_BLOB)));
        assert!(!desc.owns_key(&format!("{}/0_0.tile.lock", key)));
        assert!(!desc.owns_key(&format!("{}/a_0.tile", key)));
        assert!(!desc.owns_key(&format!("{}2/0_0.tile", key)));
    }

    fn band(nodata: Option<f64>) -> BandDescriptor {
        BandDescriptor {
            band_path: LogicalPath::parse("/store/ls/scene/B01").unwrap(),
            band_name: "B01".to_string(),
            crs: Crs::wgs84(),
            transform: GeoTransform::new([180.0, 1.0, 0.0, 90.0, 0.0, -1.0]),
            shape: RasterShape::new(4, 4),
            data_type: DataType::Float32,
            nodata,
            tile_size: Some(2),
            readonly: false,
            image_path: None,
            backend: BackendLocation {
                endpoint: "local".to_string(),
                key: "ls/scene/B01".to_string(),
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_descriptor_json_shape() {
        let desc = Descriptor::Band(band(Some(-9999.0)));
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["kind"], json!("band"));
        assert_eq!(value["band_path"], json!("/store/ls/scene/B01"));
        assert_eq!(value["shape"], json!([4, 4]));
        assert_eq!(value["transform"], json!([180.0, 1.0, 0.0, 90.0, 0.0, -1.0]));
        assert_eq!(value["nodata"], json!(-9999.0));

        let back: Descriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_nan_nodata_survives_json() {
        let value = serde_json::to_value(band(Some(f64::NAN))).unwrap();
        assert_eq!(value["nodata"], json!("nan"));
        let back: BandDescriptor = serde_json::from_value(value).unwrap();
        assert!(back.nodata.unwrap().is_nan());

        let value = serde_json::to_value(band(None)).unwrap();
        let back: BandDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back.nodata, None);
    }

    #[test]
    fn test_keys() {
        let b = band(None);
        assert_eq!(b.tile_key(1, 0), "ls/scene/B01/1_0.tile");
        assert_eq!(b.blob_key(), "ls/scene/B01/raster.blob");
        assert_eq!(b.sliced_tile_size(), Some(2));
        assert_eq!(b.fill_value(), 0.0);
    }
}
