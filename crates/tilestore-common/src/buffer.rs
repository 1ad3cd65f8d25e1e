//! In-memory pixel buffers and windows.

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::error::{StoreError, StoreResult};

/// Raster dimensions in pixels, stored as `[rows, cols]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct RasterShape {
    pub rows: usize,
    pub cols: usize,
}

impl RasterShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

impl From<[usize; 2]> for RasterShape {
    fn from([rows, cols]: [usize; 2]) -> Self {
        Self { rows, cols }
    }
}

impl From<RasterShape> for [usize; 2] {
    fn from(shape: RasterShape) -> Self {
        [shape.rows, shape.cols]
    }
}

/// Rectangular pixel window, possibly extending beyond a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: i64,
    pub row_off: i64,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    pub fn new(col_off: i64, row_off: i64, cols: usize, rows: usize) -> Self {
        Self {
            col_off,
            row_off,
            cols,
            rows,
        }
    }

    /// The whole raster of `shape`.
    pub fn full(shape: RasterShape) -> Self {
        Self::new(0, 0, shape.cols, shape.rows)
    }

    pub fn shape(&self) -> RasterShape {
        RasterShape::new(self.rows, self.cols)
    }

    pub fn col_end(&self) -> i64 {
        self.col_off + self.cols as i64
    }

    pub fn row_end(&self) -> i64 {
        self.row_off + self.rows as i64
    }

    /// Overlap of two windows, `None` when they share no pixel.
    pub fn intersection(&self, other: &PixelWindow) -> Option<PixelWindow> {
        let col_off = self.col_off.max(other.col_off);
        let row_off = self.row_off.max(other.row_off);
        let col_end = self.col_end().min(other.col_end());
        let row_end = self.row_end().min(other.row_end());
        if col_end <= col_off || row_end <= row_off {
            return None;
        }
        Some(PixelWindow::new(
            col_off,
            row_off,
            (col_end - col_off) as usize,
            (row_end - row_off) as usize,
        ))
    }

    pub fn covers(&self, other: &PixelWindow) -> bool {
        self.col_off <= other.col_off
            && self.row_off <= other.row_off
            && self.col_end() >= other.col_end()
            && self.row_end() >= other.row_end()
    }
}

/// Row-major pixel buffer of one band.
///
/// Samples are held as `f64`, which represents every supported
/// [`DataType`] exactly; the declared type governs encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    data_type: DataType,
    shape: RasterShape,
    data: Vec<f64>,
}

impl RasterBuffer {
    /// Buffer of `shape` with every pixel set to `value`.
    pub fn filled(data_type: DataType, shape: RasterShape, value: f64) -> Self {
        Self {
            data_type,
            shape,
            data: vec![value; shape.len()],
        }
    }

    /// Wrap row-major samples, checking the length against `shape`.
    pub fn from_vec(data_type: DataType, shape: RasterShape, data: Vec<f64>) -> StoreResult<Self> {
        if data.len() != shape.len() {
            return Err(StoreError::InvalidBuffer(format!(
                "{} samples do not fill a {}x{} buffer",
                data.len(),
                shape.rows,
                shape.cols
            )));
        }
        Ok(Self {
            data_type,
            shape,
            data,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> RasterShape {
        self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.shape.rows && col < self.shape.cols {
            Some(self.data[row * self.shape.cols + col])
        } else {
            None
        }
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if row < self.shape.rows && col < self.shape.cols {
            self.data[row * self.shape.cols + col] = value;
        }
    }

    /// Copy out `window`, which must lie within this buffer.
    pub fn window(&self, window: &PixelWindow) -> StoreResult<RasterBuffer> {
        if !PixelWindow::full(self.shape).covers(window) {
            return Err(StoreError::InvalidBuffer(format!(
                "window {:?} exceeds buffer of {}x{}",
                window, self.shape.rows, self.shape.cols
            )));
        }
        let mut out = Vec::with_capacity(window.rows * window.cols);
        let col_off = window.col_off as usize;
        for row in 0..window.rows {
            let start = (window.row_off as usize + row) * self.shape.cols + col_off;
            out.extend_from_slice(&self.data[start..start + window.cols]);
        }
        Ok(RasterBuffer {
            data_type: self.data_type,
            shape: window.shape(),
            data: out,
        })
    }

    /// Copy `src` into this buffer with its top-left pixel at `(col_off, row_off)`.
    ///
    /// Parts of `src` falling outside this buffer are dropped.
    pub fn paste(&mut self, src: &RasterBuffer, col_off: i64, row_off: i64) {
        let target = PixelWindow::new(col_off, row_off, src.shape.cols, src.shape.rows);
        let Some(overlap) = target.intersection(&PixelWindow::full(self.shape)) else {
            return;
        };
        let src_col = (overlap.col_off - col_off) as usize;
        let src_row = (overlap.row_off - row_off) as usize;
        for row in 0..overlap.rows {
            let s = (src_row + row) * src.shape.cols + src_col;
            let d = (overlap.row_off as usize + row) * self.shape.cols + overlap.col_off as usize;
            self.data[d..d + overlap.cols].copy_from_slice(&src.data[s..s + overlap.cols]);
        }
    }

    /// Check that every sample is representable in the declared type
    /// (or equals `nodata`).
    pub fn validate_values(&self, nodata: Option<f64>) -> StoreResult<()> {
        let is_nodata = |v: f64| match nodata {
            Some(nd) => v == nd || (nd.is_nan() && v.is_nan()),
            None => false,
        };
        match self
            .data
            .iter()
            .find(|v| !is_nodata(**v) && !self.data_type.can_represent(**v))
        {
            Some(bad) => Err(StoreError::InvalidBuffer(format!(
                "value {} is not representable as {}",
                bad, self.data_type
            ))),
            None => Ok(()),
        }
    }

    /// True when every pixel equals `value` (NaN matches NaN).
    pub fn is_uniform(&self, value: f64) -> bool {
        self.data
            .iter()
            .all(|v| *v == value || (v.is_nan() && value.is_nan()))
    }
}
