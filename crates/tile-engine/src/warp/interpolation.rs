//! Interpolation kernels over a row-major grid.
//!
//! Coordinates are in index space: `(0.0, 0.0)` is the centre of the first
//! pixel, so pixel `i` spans `[i - 0.5, i + 0.5)`. Every kernel returns NaN
//! outside the grid; NaN samples mark missing data.

/// Whether index-space `(x, y)` falls on the grid.
fn on_grid(width: usize, height: usize, x: f64, y: f64) -> bool {
    x >= -0.5 && y >= -0.5 && x < width as f64 - 0.5 && y < height as f64 - 0.5
}

/// Nearest neighbor interpolation.
pub fn nearest_interpolate(data: &[f64], width: usize, height: usize, x: f64, y: f64) -> f64 {
    if !on_grid(width, height, x, y) {
        return f64::NAN;
    }
    let col = ((x + 0.5).floor() as usize).min(width - 1);
    let row = ((y + 0.5).floor() as usize).min(height - 1);
    data[row * width + col]
}

/// Bilinear interpolation between the four surrounding pixel centres.
///
/// Half a pixel at the raster edge is clamped to the outermost centre.
pub fn bilinear_interpolate(data: &[f64], width: usize, height: usize, x: f64, y: f64) -> f64 {
    if !on_grid(width, height, x, y) {
        return f64::NAN;
    }
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = x - x0 as f64;
    let yf = y - y0 as f64;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return nearest_interpolate(data, width, height, x, y);
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

/// Bicubic interpolation over the surrounding 4x4 pixel centres.
pub fn cubic_interpolate(data: &[f64], width: usize, height: usize, x: f64, y: f64) -> f64 {
    if !on_grid(width, height, x, y) {
        return f64::NAN;
    }
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    let xf = x - xi as f64;
    let yf = y - yi as f64;

    let mut values = [[0.0f64; 4]; 4];
    for j in 0..4i64 {
        for i in 0..4i64 {
            let px = (xi + i - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j - 1).clamp(0, height as i64 - 1) as usize;
            let v = data[py * width + px];
            // Any gap in the neighbourhood falls back to bilinear
            if v.is_nan() {
                return bilinear_interpolate(data, width, height, x, y);
            }
            values[j as usize][i as usize] = v;
        }
    }

    let mut row_values = [0.0f64; 4];
    for (j, row) in values.iter().enumerate() {
        row_values[j] = cubic_1d(row[0], row[1], row[2], row[3], xf);
    }
    cubic_1d(row_values[0], row_values[1], row_values[2], row_values[3], yf)
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

/// Mean of the non-NaN pixels whose centres lie in the index-space
/// rectangle `[x0, x1] x [y0, y1]`.
///
/// Falls back to nearest-neighbour at the rectangle centre when no centre
/// is covered (target pixel smaller than source pixel).
pub fn average_interpolate(
    data: &[f64],
    width: usize,
    height: usize,
    (x0, y0): (f64, f64),
    (x1, y1): (f64, f64),
) -> f64 {
    let (xmin, xmax) = (x0.min(x1), x0.max(x1));
    let (ymin, ymax) = (y0.min(y1), y0.max(y1));
    let c0 = xmin.ceil().max(0.0) as i64;
    let c1 = (xmax.ceil() as i64 - 1).min(width as i64 - 1);
    let r0 = ymin.ceil().max(0.0) as i64;
    let r1 = (ymax.ceil() as i64 - 1).min(height as i64 - 1);

    let mut sum = 0.0;
    let mut count = 0usize;
    if c0 <= c1 && r0 <= r1 {
        for row in r0..=r1 {
            for col in c0..=c1 {
                let v = data[row as usize * width + col as usize];
                if !v.is_nan() {
                    sum += v;
                    count += 1;
                }
            }
        }
    }
    if count > 0 {
        sum / count as f64
    } else {
        nearest_interpolate(data, width, height, (xmin + xmax) / 2.0, (ymin + ymax) / 2.0)
    }
}
