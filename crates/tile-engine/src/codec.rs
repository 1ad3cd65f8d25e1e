//! Tile codec: pixel buffers to stored bytes and back.
//!
//! The default [`RasterCodec`] writes a fixed 16-byte header followed by
//! little-endian samples in the band's data type, optionally zlib
//! compressed:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "TST1"
//! 4       1     format version (1)
//! 5       1     data type tag
//! 6       1     compression (0 = none, 1 = zlib)
//! 7       1     reserved (0)
//! 8       4     rows, u32 LE
//! 12      4     cols, u32 LE
//! 16      ..    payload
//! ```

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

use tilestore_common::{
    Compression, DataType, EngineSettings, RasterBuffer, RasterShape, StoreError, StoreResult,
};

const MAGIC: &[u8; 4] = b"TST1";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 16;

/// What a stored tile is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSpec {
    pub data_type: DataType,
    pub nodata: Option<f64>,
    pub shape: RasterShape,
}

/// Encodes and decodes tile payloads.
///
/// `key` is only used for error reporting.
pub trait TileCodec: Send + Sync {
    fn encode(&self, key: &str, buffer: &RasterBuffer, spec: &TileSpec) -> StoreResult<Bytes>;

    fn decode(&self, key: &str, data: &[u8], spec: &TileSpec) -> StoreResult<RasterBuffer>;
}

/// Header-plus-samples codec with optional zlib compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterCodec {
    compression: Compression,
    level: u32,
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self {
            compression: Compression::Deflate,
            level: 6,
        }
    }
}

impl RasterCodec {
    pub fn new(compression: Compression, level: u32) -> Self {
        Self {
            compression,
            level: level.min(9),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.compression, settings.compression_level)
    }

    fn write_samples(data_type: DataType, samples: &[f64], out: &mut Vec<u8>) {
        out.reserve(samples.len() * data_type.size_of());
        for &v in samples {
            match data_type {
                DataType::Uint8 => out.push(v as u8),
                DataType::Uint16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
                DataType::Int16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
                DataType::Uint32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
                DataType::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
                DataType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
                DataType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
    }

    fn read_samples(data_type: DataType, raw: &[u8]) -> Vec<f64> {
        let size = data_type.size_of();
        raw.chunks_exact(size)
            .map(|c| match data_type {
                DataType::Uint8 => c[0] as f64,
                DataType::Uint16 => u16::from_le_bytes([c[0], c[1]]) as f64,
                DataType::Int16 => i16::from_le_bytes([c[0], c[1]]) as f64,
                DataType::Uint32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
                DataType::Int32 => i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
                DataType::Float32 => f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
                DataType::Float64 => {
                    f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                }
            })
            .collect()
    }
}

impl TileCodec for RasterCodec {
    fn encode(&self, key: &str, buffer: &RasterBuffer, spec: &TileSpec) -> StoreResult<Bytes> {
        if buffer.shape() != spec.shape {
            return Err(StoreError::codec(
                key,
                format!(
                    "buffer is {}x{}, tile is {}x{}",
                    buffer.shape().rows,
                    buffer.shape().cols,
                    spec.shape.rows,
                    spec.shape.cols
                ),
            ));
        }
        let rows = u32::try_from(spec.shape.rows).map_err(|e| StoreError::codec(key, e))?;
        let cols = u32::try_from(spec.shape.cols).map_err(|e| StoreError::codec(key, e))?;
        let typed = RasterBuffer::from_vec(spec.data_type, buffer.shape(), buffer.data().to_vec())?;
        typed.validate_values(spec.nodata)?;

        let mut payload = Vec::new();
        Self::write_samples(spec.data_type, typed.data(), &mut payload);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(spec.data_type.tag());
        match self.compression {
            Compression::None => {
                out.push(0);
                out.push(0);
                out.extend_from_slice(&rows.to_le_bytes());
                out.extend_from_slice(&cols.to_le_bytes());
                out.extend_from_slice(&payload);
            }
            Compression::Deflate => {
                out.push(1);
                out.push(0);
                out.extend_from_slice(&rows.to_le_bytes());
                out.extend_from_slice(&cols.to_le_bytes());
                let mut encoder = ZlibEncoder::new(out, flate2::Compression::new(self.level));
                encoder
                    .write_all(&payload)
                    .map_err(|e| StoreError::codec(key, e))?;
                out = encoder.finish().map_err(|e| StoreError::codec(key, e))?;
            }
        }
        Ok(Bytes::from(out))
    }

    fn decode(&self, key: &str, data: &[u8], spec: &TileSpec) -> StoreResult<RasterBuffer> {
        if data.len() < HEADER_LEN || &data[0..4] != MAGIC {
            return Err(StoreError::codec(key, "not an encoded tile"));
        }
        if data[4] != VERSION {
            return Err(StoreError::codec(
                key,
                format!("unsupported tile format version {}", data[4]),
            ));
        }
        let data_type = DataType::from_tag(data[5])
            .ok_or_else(|| StoreError::codec(key, format!("unknown data type tag {}", data[5])))?;
        if data_type != spec.data_type {
            return Err(StoreError::codec(
                key,
                format!("tile holds {}, band is {}", data_type, spec.data_type),
            ));
        }
        let rows = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        let cols = u32::from_le_bytes([data[12], data[13], data[14], data[15]]) as usize;
        let shape = RasterShape::new(rows, cols);
        if shape != spec.shape {
            return Err(StoreError::codec(
                key,
                format!(
                    "tile is {}x{}, expected {}x{}",
                    rows, cols, spec.shape.rows, spec.shape.cols
                ),
            ));
        }

        let body = &data[HEADER_LEN..];
        let raw = match data[6] {
            0 => body.to_vec(),
            1 => {
                let mut out = Vec::with_capacity(shape.len() * data_type.size_of());
                ZlibDecoder::new(body)
                    .read_to_end(&mut out)
                    .map_err(|e| StoreError::codec(key, format!("corrupt payload: {}", e)))?;
                out
            }
            other => {
                return Err(StoreError::codec(
                    key,
                    format!("unknown compression flag {}", other),
                ))
            }
        };
        if raw.len() != shape.len() * data_type.size_of() {
            return Err(StoreError::codec(
                key,
                format!(
                    "payload has {} bytes, expected {}",
                    raw.len(),
                    shape.len() * data_type.size_of()
                ),
            ));
        }

        RasterBuffer::from_vec(data_type, shape, Self::read_samples(data_type, &raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestore_common::ErrorKind;

    fn spec(data_type: DataType, rows: usize, cols: usize) -> TileSpec {
        TileSpec {
            data_type,
            nodata: None,
            shape: RasterShape::new(rows, cols),
        }
    }

    fn ramp(data_type: DataType, rows: usize, cols: usize) -> RasterBuffer {
        let data = (0..rows * cols).map(|v| (v % 200) as f64).collect();
        RasterBuffer::from_vec(data_type, RasterShape::new(rows, cols), data).unwrap()
    }

    #[test]
    fn test_encode_decode_every_type() {
        for compression in [Compression::None, Compression::Deflate] {
            let codec = RasterCodec::new(compression, 6);
            for dt in [
                DataType::Uint8,
                DataType::Uint16,
                DataType::Int16,
                DataType::Uint32,
                DataType::Int32,
                DataType::Float32,
                DataType::Float64,
            ] {
                let buf = ramp(dt, 3, 5);
                let s = spec(dt, 3, 5);
                let bytes = codec.encode("k", &buf, &s).unwrap();
                assert_eq!(codec.decode("k", &bytes, &s).unwrap(), buf);
            }
        }
    }

    #[test]
    fn test_header_layout() {
        let codec = RasterCodec::new(Compression::None, 0);
        let bytes = codec
            .encode("k", &ramp(DataType::Int16, 2, 3), &spec(DataType::Int16, 2, 3))
            .unwrap();
        assert_eq!(&bytes[0..4], b"TST1");
        assert_eq!(bytes[5], DataType::Int16.tag());
        assert_eq!(bytes[6], 0);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 2);
        assert_eq!(bytes.len(), 16 + 2 * 3 * 2);
    }

    #[test]
    fn test_nan_nodata_in_float_tile() {
        let codec = RasterCodec::default();
        let buf = RasterBuffer::from_vec(
            DataType::Float32,
            RasterShape::new(1, 2),
            vec![f64::NAN, 1.5],
        )
        .unwrap();
        let s = TileSpec {
            nodata: Some(f64::NAN),
            ..spec(DataType::Float32, 1, 2)
        };
        let out = codec.decode("k", &codec.encode("k", &buf, &s).unwrap(), &s).unwrap();
        assert!(out.data()[0].is_nan());
        assert_eq!(out.data()[1], 1.5);
    }

    #[test]
    fn test_unrepresentable_value_rejected() {
        let buf = RasterBuffer::from_vec(DataType::Uint8, RasterShape::new(1, 1), vec![300.0]).unwrap();
        let err = RasterCodec::default()
            .encode("k", &buf, &spec(DataType::Uint8, 1, 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBuffer);
    }

    #[test]
    fn test_decode_rejects_mismatch() {
        let codec = RasterCodec::default();
        let bytes = codec
            .encode("k", &ramp(DataType::Uint8, 2, 2), &spec(DataType::Uint8, 2, 2))
            .unwrap();

        let err = codec.decode("k", &bytes, &spec(DataType::Uint16, 2, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
        let err = codec.decode("k", &bytes, &spec(DataType::Uint8, 2, 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
        let err = codec.decode("k", &bytes[..10], &spec(DataType::Uint8, 2, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
        assert_eq!(err.subject(), Some("k"));
    }

    #[test]
    fn test_truncated_payload() {
        let codec = RasterCodec::new(Compression::None, 0);
        let bytes = codec
            .encode("k", &ramp(DataType::Int32, 2, 2), &spec(DataType::Int32, 2, 2))
            .unwrap();
        let err = codec
            .decode("k", &bytes[..bytes.len() - 1], &spec(DataType::Int32, 2, 2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }
}
