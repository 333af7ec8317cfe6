//! Imperceptibility metrics.

use image::{DynamicImage, GenericImageView};

use crate::error::{ProvenanceError, Result};

/// Added to the MSE so identical images give a finite PSNR.
const MSE_FLOOR: f64 = 1e-12;

/// Peak signal-to-noise ratio in dB over RGB samples scaled to `[0, 1]`.
///
/// `psnr = 10 * log10(1 / (mse + 1e-12))`
pub fn psnr(reference: &DynamicImage, distorted: &DynamicImage) -> Result<f64> {
    if reference.dimensions() != distorted.dimensions() {
        return Err(ProvenanceError::InvalidArgument(format!(
            "cannot compare {:?} with {:?}",
            reference.dimensions(),
            distorted.dimensions()
        )));
    }

    let a = reference.to_rgb32f();
    let b = distorted.to_rgb32f();
    let count = a.as_raw().len().max(1) as f64;
    let mse = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        / count;

    Ok(10.0 * (1.0 / (mse + MSE_FLOOR)).log10())
}

/// Mean SSIM over sliding square windows of the luma channel.
#[cfg(feature = "ssim")]
#[derive(Debug, Clone, Copy)]
pub struct WindowedSsim {
    pub window: usize,
    pub stride: usize,
}

#[cfg(feature = "ssim")]
impl Default for WindowedSsim {
    fn default() -> Self {
        Self {
            window: 8,
            stride: 4,
        }
    }
}

#[cfg(feature = "ssim")]
impl crate::capability::SsimBackend for WindowedSsim {
    fn ssim(&self, reference: &DynamicImage, distorted: &DynamicImage) -> Option<f64> {
        const C1: f64 = 0.01 * 0.01;
        const C2: f64 = 0.03 * 0.03;

        if reference.dimensions() != distorted.dimensions() {
            return None;
        }
        let (width, height) = (reference.width() as usize, reference.height() as usize);
        if width == 0 || height == 0 || self.window == 0 || self.stride == 0 {
            return None;
        }

        let a = reference.to_luma32f();
        let b = distorted.to_luma32f();
        let (a, b) = (a.as_raw(), b.as_raw());

        let window_w = self.window.min(width);
        let window_h = self.window.min(height);
        let mut total = 0.0;
        let mut windows = 0usize;

        let mut y0 = 0;
        while y0 + window_h <= height {
            let mut x0 = 0;
            while x0 + window_w <= width {
                let n = (window_w * window_h) as f64;
                let (mut sa, mut sb) = (0.0f64, 0.0f64);
                for y in y0..y0 + window_h {
                    for x in x0..x0 + window_w {
                        sa += a[y * width + x] as f64;
                        sb += b[y * width + x] as f64;
                    }
                }
                let (ma, mb) = (sa / n, sb / n);

                let (mut va, mut vb, mut cov) = (0.0f64, 0.0f64, 0.0f64);
                for y in y0..y0 + window_h {
                    for x in x0..x0 + window_w {
                        let da = a[y * width + x] as f64 - ma;
                        let db = b[y * width + x] as f64 - mb;
                        va += da * da;
                        vb += db * db;
                        cov += da * db;
                    }
                }
                let (va, vb, cov) = (va / n, vb / n, cov / n);

                total += ((2.0 * ma * mb + C1) * (2.0 * cov + C2))
                    / ((ma * ma + mb * mb + C1) * (va + vb + C2));
                windows += 1;
                x0 += self.stride;
            }
            y0 += self.stride;
        }

        if windows == 0 {
            return None;
        }
        Some((total / windows as f64).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    #[test]
    fn test_psnr_identical_is_high() {
        let img = gray(16, 16, |x, y| (x * 10 + y) as u8);
        let value = psnr(&img, &img).unwrap();
        assert!((value - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_psnr_known_error() {
        let a = gray(4, 4, |_, _| 0);
        let b = gray(4, 4, |_, _| 255);
        // MSE = 1 in the unit domain.
        assert!(psnr(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_psnr_dimension_mismatch() {
        let a = gray(4, 4, |_, _| 0);
        let b = gray(4, 5, |_, _| 0);
        assert!(psnr(&a, &b).is_err());
    }

    #[cfg(feature = "ssim")]
    #[test]
    fn test_ssim_identical_is_one() {
        use crate::capability::SsimBackend;

        let img = gray(32, 32, |x, y| ((x * 7 + y * 3) % 256) as u8);
        let value = WindowedSsim::default().ssim(&img, &img).unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[cfg(feature = "ssim")]
    #[test]
    fn test_ssim_drops_for_different_content() {
        use crate::capability::SsimBackend;

        let a = gray(32, 32, |x, _| if x % 2 == 0 { 30 } else { 220 });
        let b = gray(32, 32, |_, y| if y % 2 == 0 { 30 } else { 220 });
        let value = WindowedSsim::default().ssim(&a, &b).unwrap();
        assert!(value < 0.5, "ssim = {}", value);
    }
}
