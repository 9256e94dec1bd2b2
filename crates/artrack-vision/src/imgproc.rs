//! Grayscale conversion, Gaussian blur and CLAHE
//!
//! All functions take raw slices plus dimensions and validate shape before
//! touching pixels. Grayscale is 8-bit, row-major, tightly packed.

use crate::error::{Result, VisionError};

fn check_dims(len: usize, width: usize, height: usize, channels: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(VisionError::EmptyImage { width, height });
    }
    let expected = width * height * channels;
    if len != expected {
        return Err(VisionError::Core(artrack_core::CoreError::PixelBufferMismatch {
            expected,
            actual: len,
        }));
    }
    Ok(())
}

/// Convert an interleaved RGB/RGBA (or already-gray) buffer to Gray8
///
/// Uses BT.601 luma weights in fixed point. `out` must be `width * height`
/// bytes.
pub fn to_grayscale(
    pixels: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    out: &mut [u8],
) -> Result<()> {
    check_dims(pixels.len(), width, height, channels)?;
    if out.len() != width * height {
        return Err(VisionError::Core(artrack_core::CoreError::PixelBufferMismatch {
            expected: width * height,
            actual: out.len(),
        }));
    }
    match channels {
        1 => out.copy_from_slice(pixels),
        3 | 4 => {
            for (i, px) in pixels.chunks_exact(channels).enumerate() {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                out[i] = ((77 * r + 150 * g + 29 * b + 128) >> 8) as u8;
            }
        }
        n => return Err(VisionError::Core(artrack_core::CoreError::UnsupportedChannels(n))),
    }
    Ok(())
}

/// Build a normalized 1-D Gaussian kernel
///
/// `sigma <= 0` derives sigma from the kernel size the way OpenCV does.
fn gaussian_kernel(ksize: usize, sigma: f32) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let half = (ksize / 2) as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= sum);
    kernel
}

/// Separable Gaussian blur with edge clamping
pub fn gaussian_blur(
    src: &[u8],
    width: usize,
    height: usize,
    ksize: usize,
    sigma: f32,
    dst: &mut [u8],
) -> Result<()> {
    check_dims(src.len(), width, height, 1)?;
    if ksize < 3 || ksize % 2 == 0 {
        return Err(VisionError::BadKernel(format!(
            "kernel must be odd and >= 3, got {ksize}"
        )));
    }
    if dst.len() != src.len() {
        return Err(VisionError::Core(artrack_core::CoreError::PixelBufferMismatch {
            expected: src.len(),
            actual: dst.len(),
        }));
    }

    let kernel = gaussian_kernel(ksize, sigma);
    let half = (ksize / 2) as isize;
    let mut tmp = vec![0.0f32; width * height];

    // Horizontal pass
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - half).clamp(0, width as isize - 1) as usize;
                acc += w * row[sx] as f32;
            }
            tmp[y * width + x] = acc;
        }
    }

    // Vertical pass
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - half).clamp(0, height as isize - 1) as usize;
                acc += w * tmp[sy * width + x];
            }
            dst[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(())
}

/// Contrast-limited adaptive histogram equalization
///
/// The image is divided into `tile x tile`-pixel tiles; each tile gets a
/// clipped, redistributed histogram mapping, and pixels are remapped by
/// bilinear interpolation between the four surrounding tile mappings.
pub fn clahe(
    src: &[u8],
    width: usize,
    height: usize,
    clip_limit: f32,
    tile: usize,
    dst: &mut [u8],
) -> Result<()> {
    check_dims(src.len(), width, height, 1)?;
    if tile == 0 {
        return Err(VisionError::BadKernel("clahe tile must be > 0".into()));
    }
    if dst.len() != src.len() {
        return Err(VisionError::Core(artrack_core::CoreError::PixelBufferMismatch {
            expected: src.len(),
            actual: dst.len(),
        }));
    }

    let tiles_x = width.div_ceil(tile).max(1);
    let tiles_y = height.div_ceil(tile).max(1);

    // Per-tile cumulative mapping, 256 entries each
    let mut maps = vec![[0u8; 256]; tiles_x * tiles_y];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile;
            let y0 = ty * tile;
            let x1 = (x0 + tile).min(width);
            let y1 = (y0 + tile).min(height);
            let area = (x1 - x0) * (y1 - y0);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[src[y * width + x] as usize] += 1;
                }
            }

            // Clip and redistribute the excess uniformly
            let limit = ((clip_limit * area as f32) / 256.0).max(1.0) as u32;
            let mut excess = 0u32;
            for h in hist.iter_mut() {
                if *h > limit {
                    excess += *h - limit;
                    *h = limit;
                }
            }
            let bonus = excess / 256;
            let mut residual = (excess % 256) as usize;
            for h in hist.iter_mut() {
                *h += bonus;
                if residual > 0 {
                    *h += 1;
                    residual -= 1;
                }
            }

            let map = &mut maps[ty * tiles_x + tx];
            let scale = 255.0 / area as f32;
            let mut cum = 0u32;
            for (v, m) in map.iter_mut().enumerate() {
                cum += hist[v];
                *m = (cum as f32 * scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    // Bilinear interpolation between tile mappings
    let half = tile as f32 / 2.0;
    for y in 0..height {
        let fy = ((y as f32 - half) / tile as f32).max(0.0);
        let ty0 = (fy.floor() as usize).min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = (fy - ty0 as f32).clamp(0.0, 1.0);
        for x in 0..width {
            let fx = ((x as f32 - half) / tile as f32).max(0.0);
            let tx0 = (fx.floor() as usize).min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = src[y * width + x] as usize;
            let m00 = maps[ty0 * tiles_x + tx0][v] as f32;
            let m01 = maps[ty0 * tiles_x + tx1][v] as f32;
            let m10 = maps[ty1 * tiles_x + tx0][v] as f32;
            let m11 = maps[ty1 * tiles_x + tx1][v] as f32;

            let top = m00 * (1.0 - wx) + m01 * wx;
            let bottom = m10 * (1.0 - wx) + m11 * wx;
            dst[y * width + x] = (top * (1.0 - wy) + bottom * wy).round() as u8;
        }
    }
    Ok(())
}

/// Bilinear sample of a Gray8 image at sub-pixel coordinates
///
/// Coordinates are clamped to the valid interpolation area.
#[inline]
pub fn sample_bilinear(img: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (width - 1) as f32 - 1e-3);
    let y = y.clamp(0.0, (height - 1) as f32 - 1e-3);
    let x0 = x as usize;
    let y0 = y as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let p00 = img[y0 * width + x0] as f32;
    let p01 = img[y0 * width + x1] as f32;
    let p10 = img[y1 * width + x0] as f32;
    let p11 = img[y1 * width + x1] as f32;

    let top = p00 * (1.0 - fx) + p01 * fx;
    let bottom = p10 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grayscale_rgba_white() {
        let pixels = vec![255u8; 2 * 2 * 4];
        let mut out = vec![0u8; 4];
        to_grayscale(&pixels, 2, 2, 4, &mut out).unwrap();
        assert!(out.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_grayscale_rgb_weights() {
        // Pure green should weigh more than pure blue
        let mut green = vec![0u8; 3];
        green[1] = 255;
        let mut blue = vec![0u8; 3];
        blue[2] = 255;
        let mut out_g = vec![0u8; 1];
        let mut out_b = vec![0u8; 1];
        to_grayscale(&green, 1, 1, 3, &mut out_g).unwrap();
        to_grayscale(&blue, 1, 1, 3, &mut out_b).unwrap();
        assert!(out_g[0] > out_b[0]);
    }

    #[test]
    fn test_grayscale_passthrough() {
        let pixels = vec![1u8, 2, 3, 4];
        let mut out = vec![0u8; 4];
        to_grayscale(&pixels, 2, 2, 1, &mut out).unwrap();
        assert_eq!(out, pixels);
    }

    #[test]
    fn test_grayscale_bad_channels() {
        let pixels = vec![0u8; 8];
        let mut out = vec![0u8; 4];
        assert!(to_grayscale(&pixels, 2, 2, 2, &mut out).is_err());
    }

    #[test]
    fn test_blur_preserves_flat_image() {
        let src = vec![100u8; 16 * 16];
        let mut dst = vec![0u8; 16 * 16];
        gaussian_blur(&src, 16, 16, 5, 1.0, &mut dst).unwrap();
        assert!(dst.iter().all(|&v| v == 100));
    }

    #[test]
    fn test_blur_smooths_impulse() {
        let mut src = vec![0u8; 9 * 9];
        src[4 * 9 + 4] = 255;
        let mut dst = vec![0u8; 9 * 9];
        gaussian_blur(&src, 9, 9, 3, 1.0, &mut dst).unwrap();
        // Energy spread to neighbors, center reduced
        assert!(dst[4 * 9 + 4] < 255);
        assert!(dst[4 * 9 + 3] > 0);
        assert!(dst[3 * 9 + 4] > 0);
    }

    #[test]
    fn test_blur_rejects_even_kernel() {
        let src = vec![0u8; 16];
        let mut dst = vec![0u8; 16];
        assert!(gaussian_blur(&src, 4, 4, 4, 1.0, &mut dst).is_err());
    }

    #[test]
    fn test_clahe_flat_image_stays_flat_enough() {
        let src = vec![128u8; 32 * 32];
        let mut dst = vec![0u8; 32 * 32];
        clahe(&src, 32, 32, 2.0, 8, &mut dst).unwrap();
        // A constant image maps to a constant image
        let first = dst[0];
        assert!(dst.iter().all(|&v| v == first));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        // Two-level image squeezed into [100, 110]
        let mut src = vec![100u8; 32 * 32];
        for (i, v) in src.iter_mut().enumerate() {
            if i % 2 == 0 {
                *v = 110;
            }
        }
        let mut dst = vec![0u8; 32 * 32];
        clahe(&src, 32, 32, 4.0, 8, &mut dst).unwrap();
        let min = *dst.iter().min().unwrap();
        let max = *dst.iter().max().unwrap();
        assert!(max - min > 10, "contrast not stretched: {min}..{max}");
    }

    #[test]
    fn test_bilinear_center() {
        // 2x2 checkerboard: center is the average
        let img = [0u8, 255, 255, 0];
        let v = sample_bilinear(&img, 2, 2, 0.5, 0.5);
        assert!((v - 127.5).abs() < 1.0);
    }

    #[test]
    fn test_bilinear_exact_pixel() {
        let img = [10u8, 20, 30, 40];
        assert!((sample_bilinear(&img, 2, 2, 0.0, 0.0) - 10.0).abs() < 1e-3);
    }
}
