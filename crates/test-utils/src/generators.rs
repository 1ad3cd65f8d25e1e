//! Test data generators for creating synthetic raster data.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

use tilestore_common::{DataType, RasterBuffer, RasterShape};

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// # Returns
///
/// A `Vec<f64>` in row-major order (row 0 first, then row 1, etc.)
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50); // 10 * 5
/// assert_eq!(grid[0], 0.0);   // col=0, row=0 -> 0*1000 + 0
/// assert_eq!(grid[1], 1000.0); // col=1, row=0 -> 1*1000 + 0
/// assert_eq!(grid[10], 1.0);  // col=0, row=1 -> 0*1000 + 1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// A buffer holding the `col * 1000 + row` pattern.
///
/// `data_type` must be wide enough for the pattern (e.g. `Int32`,
/// `Float64`).
pub fn pattern_buffer(data_type: DataType, shape: RasterShape) -> RasterBuffer {
    RasterBuffer::from_vec(data_type, shape, create_test_grid(shape.cols, shape.rows))
        .expect("pattern fits the buffer")
}

/// The `col * 1000 + row` pattern shifted by a pixel offset, so values
/// identify their position in a larger raster.
pub fn offset_pattern_buffer(
    data_type: DataType,
    shape: RasterShape,
    col_off: usize,
    row_off: usize,
) -> RasterBuffer {
    buffer_from_fn(data_type, shape, |row, col| {
        ((col + col_off) * 1000 + row + row_off) as f64
    })
}

/// A buffer where every pixel is `f(row, col)`.
pub fn buffer_from_fn(
    data_type: DataType,
    shape: RasterShape,
    f: impl Fn(usize, usize) -> f64,
) -> RasterBuffer {
    let mut data = Vec::with_capacity(shape.len());
    for row in 0..shape.rows {
        for col in 0..shape.cols {
            data.push(f(row, col));
        }
    }
    RasterBuffer::from_vec(data_type, shape, data).expect("data fits the buffer")
}

/// Creates a buffer filled with a constant value.
pub fn constant_buffer(data_type: DataType, shape: RasterShape, value: f64) -> RasterBuffer {
    RasterBuffer::filled(data_type, shape, value)
}

/// A `Float32` buffer with NaN in a checkerboard.
///
/// Useful for testing nodata handling in resampling.
pub fn create_grid_with_nans(shape: RasterShape, value: f64) -> RasterBuffer {
    buffer_from_fn(DataType::Float32, shape, |row, col| {
        if (row + col) % 2 == 0 {
            value
        } else {
            f64::NAN
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(10, 5);
        assert_eq!(grid.len(), 50);

        // Verify pattern: grid[row * width + col] == col * 1000 + row
        assert_eq!(grid[0], 0.0); // (0, 0)
        assert_eq!(grid[1], 1000.0); // (1, 0)
        assert_eq!(grid[10], 1.0); // (0, 1)
        assert_eq!(grid[11], 1001.0); // (1, 1)
    }

    #[test]
    fn test_pattern_buffer() {
        let buffer = pattern_buffer(DataType::Int32, RasterShape::new(3, 4));
        assert_eq!(buffer.get(2, 3), Some(3002.0));
    }

    #[test]
    fn test_offset_pattern_buffer() {
        let buffer = offset_pattern_buffer(DataType::Int32, RasterShape::new(2, 2), 4, 6);
        assert_eq!(buffer.get(0, 0), Some(4006.0));
        assert_eq!(buffer.get(1, 1), Some(5007.0));
    }

    #[test]
    fn test_create_grid_with_nans() {
        let buffer = create_grid_with_nans(RasterShape::new(2, 2), 5.0);
        assert_eq!(buffer.get(0, 0), Some(5.0));
        assert!(buffer.get(0, 1).is_some_and(f64::is_nan));
    }
}
