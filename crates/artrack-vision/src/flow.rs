//! Sparse optical flow: Shi-Tomasi seeding and pyramidal Lucas-Kanade
//!
//! The tracker feeds points detected inside the target quadrilateral into
//! `calc_optical_flow_pyr_lk` each frame, forward and backward. Images are
//! expanded to f32 pyramids internally; gradients use central differences
//! with bilinear sub-pixel sampling.

use crate::error::{Result, VisionError};
use artrack_core::Point2f;

/// Iteration cap per pyramid level
const LK_MAX_ITERS: usize = 30;

/// Convergence threshold on the per-iteration update (pixels)
const LK_EPSILON: f32 = 0.01;

/// Minimum acceptable determinant of the gradient matrix
const LK_MIN_DET: f32 = 1e-6;

struct PyramidLevel {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

/// Gray8 image pyramid with 2x downsampling per level
struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    fn build(gray: &[u8], width: usize, height: usize, max_level: usize) -> Self {
        let mut levels = Vec::with_capacity(max_level + 1);
        levels.push(PyramidLevel {
            data: gray.iter().map(|&v| v as f32).collect(),
            width,
            height,
        });
        for _ in 0..max_level {
            let prev = levels.last().unwrap();
            let w = prev.width / 2;
            let h = prev.height / 2;
            if w < 8 || h < 8 {
                break;
            }
            let mut data = vec![0.0f32; w * h];
            for y in 0..h {
                for x in 0..w {
                    let (px, py) = (2 * x, 2 * y);
                    let sum = prev.data[py * prev.width + px]
                        + prev.data[py * prev.width + px + 1]
                        + prev.data[(py + 1) * prev.width + px]
                        + prev.data[(py + 1) * prev.width + px + 1];
                    data[y * w + x] = sum * 0.25;
                }
            }
            levels.push(PyramidLevel {
                data,
                width: w,
                height: h,
            });
        }
        Self { levels }
    }
}

#[inline]
fn sample_f32(level: &PyramidLevel, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (level.width - 1) as f32 - 1e-3);
    let y = y.clamp(0.0, (level.height - 1) as f32 - 1e-3);
    let x0 = x as usize;
    let y0 = y as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let x1 = (x0 + 1).min(level.width - 1);
    let y1 = (y0 + 1).min(level.height - 1);
    let top = level.data[y0 * level.width + x0] * (1.0 - fx) + level.data[y0 * level.width + x1] * fx;
    let bottom =
        level.data[y1 * level.width + x0] * (1.0 - fx) + level.data[y1 * level.width + x1] * fx;
    top * (1.0 - fy) + bottom * fy
}

#[inline]
fn gradient(level: &PyramidLevel, x: f32, y: f32) -> (f32, f32) {
    let ix = (sample_f32(level, x + 1.0, y) - sample_f32(level, x - 1.0, y)) * 0.5;
    let iy = (sample_f32(level, x, y + 1.0) - sample_f32(level, x, y - 1.0)) * 0.5;
    (ix, iy)
}

/// Pyramidal Lucas-Kanade sparse optical flow
///
/// Tracks `prev_pts` from `prev` into `curr`. Returns the tracked points,
/// a per-point status flag (false when the point left the image or its
/// neighborhood carried no usable gradient), and the mean absolute
/// residual per point as an error measure.
pub fn calc_optical_flow_pyr_lk(
    prev: &[u8],
    curr: &[u8],
    width: usize,
    height: usize,
    prev_pts: &[Point2f],
    win_size: usize,
    max_level: usize,
) -> Result<(Vec<Point2f>, Vec<bool>, Vec<f32>)> {
    if prev.len() != width * height || curr.len() != width * height {
        return Err(VisionError::Core(
            artrack_core::CoreError::PixelBufferMismatch {
                expected: width * height,
                actual: prev.len().min(curr.len()),
            },
        ));
    }
    if win_size < 3 || win_size % 2 == 0 {
        return Err(VisionError::BadKernel(format!(
            "LK window must be odd and >= 3, got {win_size}"
        )));
    }

    let prev_pyr = Pyramid::build(prev, width, height, max_level);
    let curr_pyr = Pyramid::build(curr, width, height, max_level);
    let top = prev_pyr.levels.len().min(curr_pyr.levels.len()) - 1;
    let half = (win_size / 2) as f32;

    let mut out_pts = Vec::with_capacity(prev_pts.len());
    let mut status = Vec::with_capacity(prev_pts.len());
    let mut err = Vec::with_capacity(prev_pts.len());

    for &p in prev_pts {
        let mut ok = true;
        // Flow estimate carried across levels, in level-local coordinates
        let mut flow = (0.0f32, 0.0f32);
        let mut residual = 0.0f32;

        for li in (0..=top).rev() {
            let scale = (1 << li) as f32;
            let lp = Point2f::new(p.x / scale, p.y / scale);
            let plevel = &prev_pyr.levels[li];
            let clevel = &curr_pyr.levels[li];

            if lp.x < half
                || lp.y < half
                || lp.x + half >= plevel.width as f32
                || lp.y + half >= plevel.height as f32
            {
                // Window does not fit at this level; try finer levels with
                // the estimate so far
                if li > 0 {
                    flow = (flow.0 * 2.0, flow.1 * 2.0);
                }
                continue;
            }

            // Spatial gradient matrix over the window (from the previous
            // frame, constant across iterations)
            let mut gxx = 0.0f32;
            let mut gxy = 0.0f32;
            let mut gyy = 0.0f32;
            let n = win_size as i32;
            let mut grads = vec![(0.0f32, 0.0f32); win_size * win_size];
            for wy in 0..n {
                for wx in 0..n {
                    let sx = lp.x + (wx - n / 2) as f32;
                    let sy = lp.y + (wy - n / 2) as f32;
                    let (ix, iy) = gradient(plevel, sx, sy);
                    grads[(wy * n + wx) as usize] = (ix, iy);
                    gxx += ix * ix;
                    gxy += ix * iy;
                    gyy += iy * iy;
                }
            }
            let det = gxx * gyy - gxy * gxy;
            if det < LK_MIN_DET {
                ok = false;
                break;
            }

            // Iterative refinement of the local flow
            let mut v = (0.0f32, 0.0f32);
            for _ in 0..LK_MAX_ITERS {
                let mut bx = 0.0f32;
                let mut by = 0.0f32;
                residual = 0.0;
                for wy in 0..n {
                    for wx in 0..n {
                        let dx = (wx - n / 2) as f32;
                        let dy = (wy - n / 2) as f32;
                        let ip = sample_f32(plevel, lp.x + dx, lp.y + dy);
                        let ic = sample_f32(
                            clevel,
                            lp.x + flow.0 + v.0 + dx,
                            lp.y + flow.1 + v.1 + dy,
                        );
                        let diff = ip - ic;
                        residual += diff.abs();
                        let (gx, gy) = grads[(wy * n + wx) as usize];
                        bx += diff * gx;
                        by += diff * gy;
                    }
                }
                let delta = (
                    (gyy * bx - gxy * by) / det,
                    (gxx * by - gxy * bx) / det,
                );
                v.0 += delta.0;
                v.1 += delta.1;
                if delta.0.abs() < LK_EPSILON && delta.1.abs() < LK_EPSILON {
                    break;
                }
            }
            flow = (flow.0 + v.0, flow.1 + v.1);

            if li > 0 {
                flow = (flow.0 * 2.0, flow.1 * 2.0);
            }
        }

        let tracked = Point2f::new(p.x + flow.0, p.y + flow.1);
        if tracked.x < 0.0
            || tracked.y < 0.0
            || tracked.x >= width as f32
            || tracked.y >= height as f32
        {
            ok = false;
        }

        out_pts.push(tracked);
        status.push(ok);
        err.push(residual / (win_size * win_size) as f32);
    }

    Ok((out_pts, status, err))
}

/// Shi-Tomasi corner seeding
///
/// Returns up to `max_corners` corners ordered by descending minimum
/// eigenvalue, greedily enforcing `min_distance` between accepted corners.
/// `mask` restricts detection to pixels for which it returns true.
pub fn good_features_to_track(
    gray: &[u8],
    width: usize,
    height: usize,
    max_corners: usize,
    quality_level: f32,
    min_distance: f32,
    mask: Option<&dyn Fn(usize, usize) -> bool>,
) -> Result<Vec<Point2f>> {
    if gray.len() != width * height {
        return Err(VisionError::Core(
            artrack_core::CoreError::PixelBufferMismatch {
                expected: width * height,
                actual: gray.len(),
            },
        ));
    }
    if width < 4 || height < 4 || max_corners == 0 {
        return Ok(Vec::new());
    }

    // Central-difference gradients
    let mut ix = vec![0.0f32; width * height];
    let mut iy = vec![0.0f32; width * height];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let i = y * width + x;
            ix[i] = (gray[i + 1] as f32 - gray[i - 1] as f32) * 0.5;
            iy[i] = (gray[i + width] as f32 - gray[i - width] as f32) * 0.5;
        }
    }

    // Minimum eigenvalue of the 3x3-summed structure tensor
    let mut response = vec![0.0f32; width * height];
    let mut max_response = 0.0f32;
    for y in 2..height - 2 {
        for x in 2..width - 2 {
            if let Some(m) = mask {
                if !m(x, y) {
                    continue;
                }
            }
            let mut gxx = 0.0f32;
            let mut gxy = 0.0f32;
            let mut gyy = 0.0f32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let i = (y as i32 + dy) as usize * width + (x as i32 + dx) as usize;
                    gxx += ix[i] * ix[i];
                    gxy += ix[i] * iy[i];
                    gyy += iy[i] * iy[i];
                }
            }
            let trace = gxx + gyy;
            let diff = gxx - gyy;
            let lambda_min = 0.5 * (trace - (diff * diff + 4.0 * gxy * gxy).sqrt());
            response[y * width + x] = lambda_min;
            max_response = max_response.max(lambda_min);
        }
    }
    if max_response <= 0.0 {
        return Ok(Vec::new());
    }

    let threshold = quality_level * max_response;
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for y in 2..height - 2 {
        for x in 2..width - 2 {
            let r = response[y * width + x];
            if r < threshold || r <= 0.0 {
                continue;
            }
            // 3x3 non-maximum suppression
            let mut is_max = true;
            'nms: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    if response[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize] > r {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                candidates.push((r, x, y));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let min_dist_sq = min_distance * min_distance;
    let mut corners: Vec<Point2f> = Vec::new();
    for (_, x, y) in candidates {
        if corners.len() >= max_corners {
            break;
        }
        let p = Point2f::new(x as f32, y as f32);
        let far_enough = corners.iter().all(|c| {
            let dx = c.x - p.x;
            let dy = c.y - p.y;
            dx * dx + dy * dy >= min_dist_sq
        });
        if far_enough {
            corners.push(p);
        }
    }
    Ok(corners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imgproc::gaussian_blur;

    /// Random 4-px blocks, lightly blurred: strong corners, clean
    /// gradients
    fn noise_image(width: usize, height: usize, seed: u64) -> Vec<u8> {
        const BLOCK: usize = 4;
        let bw = width.div_ceil(BLOCK);
        let bh = height.div_ceil(BLOCK);
        let mut state = seed.max(1);
        let blocks: Vec<u8> = (0..bw * bh)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xFF) as u8
            })
            .collect();
        let mut img: Vec<u8> = (0..width * height)
            .map(|i| {
                let bx = (i % width) / BLOCK;
                let by = (i / width) / BLOCK;
                blocks[by * bw + bx]
            })
            .collect();
        let src = img.clone();
        gaussian_blur(&src, width, height, 3, 0.8, &mut img).unwrap();
        img
    }

    /// Shift an image by integer (dx, dy), filling revealed pixels with 0
    fn shift_image(img: &[u8], width: usize, height: usize, dx: i32, dy: i32) -> Vec<u8> {
        let mut out = vec![0u8; width * height];
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let sx = x - dx;
                let sy = y - dy;
                if sx >= 0 && sy >= 0 && (sx as usize) < width && (sy as usize) < height {
                    out[y as usize * width + x as usize] = img[sy as usize * width + sx as usize];
                }
            }
        }
        out
    }

    #[test]
    fn test_good_features_found_on_texture() {
        let img = noise_image(128, 128, 21);
        let corners = good_features_to_track(&img, 128, 128, 50, 0.01, 10.0, None).unwrap();
        assert!(corners.len() >= 10, "only {} corners", corners.len());
    }

    #[test]
    fn test_good_features_min_distance() {
        let img = noise_image(128, 128, 22);
        let corners = good_features_to_track(&img, 128, 128, 100, 0.01, 10.0, None).unwrap();
        for i in 0..corners.len() {
            for j in i + 1..corners.len() {
                assert!(corners[i].distance_to(&corners[j]) >= 10.0);
            }
        }
    }

    #[test]
    fn test_good_features_mask() {
        let img = noise_image(128, 128, 23);
        let mask = |x: usize, _y: usize| x < 64;
        let corners =
            good_features_to_track(&img, 128, 128, 50, 0.01, 5.0, Some(&mask)).unwrap();
        assert!(!corners.is_empty());
        assert!(corners.iter().all(|c| c.x < 64.0));
    }

    #[test]
    fn test_good_features_flat_image() {
        let img = vec![100u8; 64 * 64];
        let corners = good_features_to_track(&img, 64, 64, 50, 0.01, 5.0, None).unwrap();
        assert!(corners.is_empty());
    }

    #[test]
    fn test_lk_tracks_translation() {
        let prev = noise_image(128, 128, 31);
        let curr = shift_image(&prev, 128, 128, 3, 2);
        let pts: Vec<Point2f> = good_features_to_track(&prev, 128, 128, 30, 0.01, 8.0, None)
            .unwrap()
            .into_iter()
            .filter(|p| p.x > 20.0 && p.x < 100.0 && p.y > 20.0 && p.y < 100.0)
            .collect();
        assert!(pts.len() >= 5);

        let (tracked, status, _) =
            calc_optical_flow_pyr_lk(&prev, &curr, 128, 128, &pts, 21, 3).unwrap();
        let mut good = 0;
        for (i, &ok) in status.iter().enumerate() {
            if !ok {
                continue;
            }
            let expect = Point2f::new(pts[i].x + 3.0, pts[i].y + 2.0);
            if tracked[i].distance_to(&expect) < 0.5 {
                good += 1;
            }
        }
        assert!(
            good * 2 > pts.len(),
            "only {good}/{} points tracked accurately",
            pts.len()
        );
    }

    #[test]
    fn test_lk_forward_backward_consistency() {
        let prev = noise_image(128, 128, 33);
        let curr = shift_image(&prev, 128, 128, 2, 1);
        let pts: Vec<Point2f> = good_features_to_track(&prev, 128, 128, 20, 0.01, 10.0, None)
            .unwrap()
            .into_iter()
            .filter(|p| p.x > 20.0 && p.x < 100.0 && p.y > 20.0 && p.y < 100.0)
            .collect();
        assert!(!pts.is_empty());

        let (fwd, st1, _) = calc_optical_flow_pyr_lk(&prev, &curr, 128, 128, &pts, 21, 3).unwrap();
        let (bwd, st2, _) = calc_optical_flow_pyr_lk(&curr, &prev, 128, 128, &fwd, 21, 3).unwrap();
        let mut consistent = 0;
        for i in 0..pts.len() {
            if st1[i] && st2[i] && bwd[i].distance_to(&pts[i]) < 1.0 {
                consistent += 1;
            }
        }
        assert!(consistent * 2 > pts.len());
    }

    #[test]
    fn test_lk_rejects_even_window() {
        let img = vec![0u8; 64 * 64];
        let r = calc_optical_flow_pyr_lk(&img, &img, 64, 64, &[], 20, 3);
        assert!(r.is_err());
    }

    #[test]
    fn test_lk_empty_points() {
        let img = noise_image(64, 64, 1);
        let (pts, status, err) =
            calc_optical_flow_pyr_lk(&img, &img, 64, 64, &[], 21, 3).unwrap();
        assert!(pts.is_empty());
        assert!(status.is_empty());
        assert!(err.is_empty());
    }
}
