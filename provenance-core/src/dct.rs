//! Orthonormal type-II discrete cosine transform.
//!
//! Both the perceptual hash and the watermark work in the DCT domain. The
//! transform is applied separably (rows, then columns) using a precomputed
//! cosine basis, so any length is supported. With orthonormal scaling the
//! inverse (type-III) is the transpose of the forward basis and the
//! transform preserves energy, which keeps watermark magnitudes in pixel
//! units.

use std::sync::OnceLock;

/// Side length of the blocks used by the watermark.
pub const BLOCK_SIZE: usize = 8;

/// Number of samples in one block.
pub const BLOCK_LEN: usize = BLOCK_SIZE * BLOCK_SIZE;

static BLOCK_BASIS: OnceLock<DctBasis> = OnceLock::new();

/// Precomputed scaled cosine basis for a 1-D DCT of a fixed length.
///
/// `basis[k * n + x] = s(k) * cos(PI * (2x + 1) * k / 2n)` where
/// `s(0) = sqrt(1/n)` and `s(k > 0) = sqrt(2/n)`.
#[derive(Debug, Clone)]
pub struct DctBasis {
    n: usize,
    basis: Vec<f64>,
}

impl DctBasis {
    /// Build the basis for length `n`.
    pub fn new(n: usize) -> Self {
        let mut basis = vec![0.0f64; n * n];
        if n == 0 {
            return Self { n, basis };
        }

        let dc_scale = (1.0 / n as f64).sqrt();
        let ac_scale = (2.0 / n as f64).sqrt();
        for k in 0..n {
            let scale = if k == 0 { dc_scale } else { ac_scale };
            for x in 0..n {
                let angle =
                    std::f64::consts::PI * (2 * x + 1) as f64 * k as f64 / (2 * n) as f64;
                basis[k * n + x] = scale * angle.cos();
            }
        }

        Self { n, basis }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Forward DCT-II of `input` into `output` (both of length `n`).
    pub fn forward(&self, input: &[f64], output: &mut [f64]) {
        debug_assert_eq!(input.len(), self.n);
        debug_assert_eq!(output.len(), self.n);
        for (k, out) in output.iter_mut().enumerate() {
            let row = &self.basis[k * self.n..(k + 1) * self.n];
            *out = row.iter().zip(input).map(|(b, x)| b * x).sum();
        }
    }

    /// Inverse transform (DCT-III) of `input` into `output`.
    pub fn inverse(&self, input: &[f64], output: &mut [f64]) {
        debug_assert_eq!(input.len(), self.n);
        debug_assert_eq!(output.len(), self.n);
        for (x, out) in output.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (k, coeff) in input.iter().enumerate() {
                sum += self.basis[k * self.n + x] * coeff;
            }
            *out = sum;
        }
    }
}

/// 2-D DCT-II of a row-major `width x height` buffer.
pub fn dct2(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    let row_basis = DctBasis::new(width);
    let col_basis = if height == width {
        row_basis.clone()
    } else {
        DctBasis::new(height)
    };
    separable(data, width, height, &row_basis, &col_basis, Direction::Forward)
}

/// 2-D inverse DCT (DCT-III) of a row-major `width x height` buffer.
pub fn idct2(coeffs: &[f64], width: usize, height: usize) -> Vec<f64> {
    let row_basis = DctBasis::new(width);
    let col_basis = if height == width {
        row_basis.clone()
    } else {
        DctBasis::new(height)
    };
    separable(coeffs, width, height, &row_basis, &col_basis, Direction::Inverse)
}

/// Forward DCT of one 8x8 block in natural (row-major) order.
pub fn dct_block(pixels: &[f64; BLOCK_LEN]) -> [f64; BLOCK_LEN] {
    let basis = block_basis();
    let out = separable(pixels, BLOCK_SIZE, BLOCK_SIZE, basis, basis, Direction::Forward);
    let mut block = [0.0f64; BLOCK_LEN];
    block.copy_from_slice(&out);
    block
}

/// Inverse DCT of one 8x8 coefficient block.
pub fn idct_block(coeffs: &[f64; BLOCK_LEN]) -> [f64; BLOCK_LEN] {
    let basis = block_basis();
    let out = separable(coeffs, BLOCK_SIZE, BLOCK_SIZE, basis, basis, Direction::Inverse);
    let mut block = [0.0f64; BLOCK_LEN];
    block.copy_from_slice(&out);
    block
}

fn block_basis() -> &'static DctBasis {
    BLOCK_BASIS.get_or_init(|| DctBasis::new(BLOCK_SIZE))
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Inverse,
}

fn separable(
    data: &[f64],
    width: usize,
    height: usize,
    row_basis: &DctBasis,
    col_basis: &DctBasis,
    direction: Direction,
) -> Vec<f64> {
    debug_assert_eq!(data.len(), width * height);

    let apply = |basis: &DctBasis, input: &[f64], output: &mut [f64]| match direction {
        Direction::Forward => basis.forward(input, output),
        Direction::Inverse => basis.inverse(input, output),
    };

    // Rows.
    let mut temp = vec![0.0f64; width * height];
    for y in 0..height {
        let start = y * width;
        apply(row_basis, &data[start..start + width], &mut temp[start..start + width]);
    }

    // Columns, gathered into a scratch buffer.
    let mut out = vec![0.0f64; width * height];
    let mut column = vec![0.0f64; height];
    let mut transformed = vec![0.0f64; height];
    for x in 0..width {
        for y in 0..height {
            column[y] = temp[y * width + x];
        }
        apply(col_basis, &column, &mut transformed);
        for y in 0..height {
            out[y * width + x] = transformed[y];
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_only_block_is_flat() {
        let pixels = [10.0f64; BLOCK_LEN];
        let coeffs = dct_block(&pixels);

        // Orthonormal 8x8: DC = mean * 8
        assert!((coeffs[0] - 80.0).abs() < 1e-9);
        for (i, c) in coeffs.iter().enumerate().skip(1) {
            assert!(c.abs() < 1e-9, "AC coefficient {i} should be zero, got {c}");
        }
    }

    #[test]
    fn test_block_inverse_recovers_pixels() {
        let mut pixels = [0.0f64; BLOCK_LEN];
        for (i, p) in pixels.iter_mut().enumerate() {
            *p = ((i * 37) % 255) as f64;
        }

        let recovered = idct_block(&dct_block(&pixels));
        for i in 0..BLOCK_LEN {
            assert!(
                (pixels[i] - recovered[i]).abs() < 1e-9,
                "Mismatch at {i}: {} vs {}",
                pixels[i],
                recovered[i]
            );
        }
    }

    #[test]
    fn test_single_coefficient_energy_preserved() {
        let mut coeffs = [0.0f64; BLOCK_LEN];
        coeffs[2 * BLOCK_SIZE + 3] = 4.0;

        let pixels = idct_block(&coeffs);
        let energy: f64 = pixels.iter().map(|p| p * p).sum();
        assert!((energy - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_rectangular_roundtrip() {
        let (w, h) = (6, 4);
        let data: Vec<f64> = (0..w * h).map(|i| (i as f64 * 0.3).sin()).collect();

        let recovered = idct2(&dct2(&data, w, h), w, h);
        for (a, b) in data.iter().zip(&recovered) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_basis() {
        let basis = DctBasis::new(0);
        assert!(basis.is_empty());
        assert_eq!(basis.len(), 0);
    }
}
