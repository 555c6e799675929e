//! Pixel-level image measurements behind the spoof signals.
//!
//! Every function here is pure: a measurement over an owned pixel plane with
//! no I/O and no shared state, so the signal battery can evaluate them in any
//! order. Measurements are `f64` — the reference thresholds were calibrated
//! against double-precision statistics.

use image::{GrayImage, RgbImage};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::frame::DecodedImage;

// --- Edge detection constants (Canny-style double threshold) ---
const EDGE_WEAK_THRESHOLD: f64 = 50.0;
const EDGE_STRONG_THRESHOLD: f64 = 150.0;

/// Half-size of the centered spectrum window measured for moiré detection.
const SPECTRUM_WINDOW_HALF: usize = 50;

/// All per-image measurements, computed once per request and shared by the
/// signal battery and the report diagnostics.
#[derive(Debug, Clone)]
pub struct ImageMetrics {
    pub width: u32,
    pub height: u32,
    /// Laplacian variance — low means blurry.
    pub blur_score: f64,
    /// Mean grayscale intensity.
    pub brightness: f64,
    /// Variance of the HSV value channel — low means flat lighting.
    pub brightness_variance: f64,
    /// Local-binary-pattern variance — low means reproduced surface.
    pub lbp_variance: f64,
    /// Mean stddev of the RGB channel histograms — low means processed image.
    pub histogram_flatness: f64,
    /// Mean log-magnitude of the centered frequency spectrum.
    pub frequency_mean: f64,
}

impl ImageMetrics {
    pub fn measure(image: &DecodedImage) -> Self {
        let gray = image.gray();
        Self {
            width: image.width(),
            height: image.height(),
            blur_score: laplacian_variance(gray),
            brightness: mean_brightness(gray),
            brightness_variance: value_channel_variance(image.rgb()),
            lbp_variance: lbp_variance(gray),
            histogram_flatness: histogram_flatness(image.rgb()),
            frequency_mean: frequency_magnitude_mean(gray),
        }
    }

    /// "WxH" resolution string for report output.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Mean grayscale intensity (0.0–255.0).
pub fn mean_brightness(gray: &GrayImage) -> f64 {
    let data = gray.as_raw();
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|&p| p as f64).sum::<f64>() / data.len() as f64
}

/// Variance of the 4-neighbour Laplacian response, replicate borders.
///
/// A sharp image has strong local intensity transitions and therefore a high
/// response variance; defocused or heavily compressed reproductions score
/// low.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let w = gray.width() as i64;
    let h = gray.height() as i64;
    if w == 0 || h == 0 {
        return 0.0;
    }
    let data = gray.as_raw();
    let at = |x: i64, y: i64| -> f64 {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        data[(y * w + x) as usize] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let response =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }
    let n = (w * h) as f64;
    let mean = sum / n;
    sum_sq / n - mean * mean
}

/// Variance of 8-neighbour local-binary-pattern codes.
///
/// Codes are computed for interior pixels; the one-pixel border stays zero
/// and is included in the variance, matching the reference measurement the
/// thresholds were calibrated against.
pub fn lbp_variance(gray: &GrayImage) -> f64 {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w < 3 || h < 3 {
        return 0.0;
    }
    let data = gray.as_raw();
    let mut codes = vec![0u8; w * h];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = data[y * w + x];
            let mut code = 0u8;
            code |= u8::from(data[(y - 1) * w + (x - 1)] > center) << 7;
            code |= u8::from(data[(y - 1) * w + x] > center) << 6;
            code |= u8::from(data[(y - 1) * w + (x + 1)] > center) << 5;
            code |= u8::from(data[y * w + (x + 1)] > center) << 4;
            code |= u8::from(data[(y + 1) * w + (x + 1)] > center) << 3;
            code |= u8::from(data[(y + 1) * w + x] > center) << 2;
            code |= u8::from(data[(y + 1) * w + (x - 1)] > center) << 1;
            code |= u8::from(data[y * w + (x - 1)] > center);
            codes[y * w + x] = code;
        }
    }

    variance_u8(&codes)
}

/// Mean of the three RGB channels' 256-bin histogram standard deviations.
///
/// Natural captures concentrate intensity in a few bins (high stddev);
/// heavily processed or synthetically equalized images flatten out.
pub fn histogram_flatness(rgb: &RgbImage) -> f64 {
    let mut hists = [[0.0f64; 256]; 3];
    for pixel in rgb.pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            hists[channel][value as usize] += 1.0;
        }
    }
    hists.iter().map(|h| stddev(h)).sum::<f64>() / 3.0
}

/// Variance of the HSV value channel (`max(R, G, B)` per pixel).
///
/// Live skin under real lighting has uneven specular reflection; printed
/// photos and matte reproductions are much flatter.
pub fn value_channel_variance(rgb: &RgbImage) -> f64 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0.0f64;
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let v = r.max(g).max(b) as f64;
        sum += v;
        sum_sq += v * v;
        n += 1.0;
    }
    if n == 0.0 {
        return 0.0;
    }
    let mean = sum / n;
    sum_sq / n - mean * mean
}

/// Mean log-magnitude of the centered 2-D frequency spectrum over the
/// central window (up to 100×100, clamped to image size).
///
/// Periodic interference from photographing a screen concentrates energy
/// into the spectrum in a way natural captures do not; the measurement is
/// `mean(20 · ln(|F| + 1))` over the window around the zero-frequency bin.
pub fn frequency_magnitude_mean(gray: &GrayImage) -> f64 {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w == 0 || h == 0 {
        return 0.0;
    }

    let mut data: Vec<Complex<f64>> = gray
        .as_raw()
        .iter()
        .map(|&p| Complex::new(p as f64, 0.0))
        .collect();

    let mut planner = FftPlanner::<f64>::new();

    // Row pass, then column pass — separable 2-D transform.
    let row_fft = planner.plan_fft_forward(w);
    for row in data.chunks_exact_mut(w) {
        row_fft.process(row);
    }

    let col_fft = planner.plan_fft_forward(h);
    let mut column = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for y in 0..h {
            column[y] = data[y * w + x];
        }
        col_fft.process(&mut column);
        for y in 0..h {
            data[y * w + x] = column[y];
        }
    }

    // The centered spectrum at offset (dy, dx) from its midpoint is the raw
    // spectrum at (dy mod h, dx mod w), so the window can be read without
    // materializing the shifted plane.
    let half = SPECTRUM_WINDOW_HALF as isize;
    let cy = (h / 2) as isize;
    let cx = (w / 2) as isize;
    let dy_range = (-half.min(cy))..(half.min(h as isize - cy));
    let dx_range = (-half.min(cx))..(half.min(w as isize - cx));

    let mut sum = 0.0f64;
    let mut count = 0u64;
    for dy in dy_range {
        let sy = dy.rem_euclid(h as isize) as usize;
        for dx in dx_range.clone() {
            let sx = dx.rem_euclid(w as isize) as usize;
            let magnitude = data[sy * w + sx].norm();
            sum += 20.0 * (magnitude + 1.0).ln();
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// A connected edge component qualifying as a photo-frame border.
#[derive(Debug, Clone)]
pub struct BorderComponent {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area_ratio: f64,
    pub aspect_ratio: f64,
}

/// Scan the edge map for a large rectangular contour anchored at the
/// top-left corner — the telltale border of a photographed photo.
///
/// Edges come from a Sobel gradient with double-threshold hysteresis; the
/// component's bounding box stands in for the contour area. A component
/// qualifies when its box covers more than `area_ratio_floor` of the image,
/// its aspect ratio lies strictly inside (`aspect_min`, `aspect_max`), and
/// it is anchored within `corner_margin` pixels of the top-left corner.
pub fn find_frame_border(
    gray: &GrayImage,
    area_ratio_floor: f64,
    aspect_min: f64,
    aspect_max: f64,
    corner_margin: u32,
) -> Option<BorderComponent> {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    if w < 3 || h < 3 {
        return None;
    }

    let edges = edge_map(gray);
    let image_area = (w * h) as f64;
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();

    for start in 0..w * h {
        if !edges[start] || visited[start] {
            continue;
        }

        // Flood the 8-connected component, tracking its bounding box.
        let (mut min_x, mut min_y) = (w, h);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let x = idx % w;
            let y = idx / w;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let nidx = ny as usize * w + nx as usize;
                    if edges[nidx] && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
        }

        let box_w = (max_x - min_x + 1) as f64;
        let box_h = (max_y - min_y + 1) as f64;
        let area_ratio = box_w * box_h / image_area;
        let aspect_ratio = box_w / box_h;

        if area_ratio > area_ratio_floor
            && aspect_ratio > aspect_min
            && aspect_ratio < aspect_max
            && (min_x as u32) < corner_margin
            && (min_y as u32) < corner_margin
        {
            return Some(BorderComponent {
                x: min_x as u32,
                y: min_y as u32,
                width: box_w as u32,
                height: box_h as u32,
                area_ratio,
                aspect_ratio,
            });
        }
    }

    None
}

/// Sobel gradient + double-threshold hysteresis edge map.
fn edge_map(gray: &GrayImage) -> Vec<bool> {
    let w = gray.width() as usize;
    let h = gray.height() as usize;
    let data = gray.as_raw();
    let at = |x: usize, y: usize| data[y * w + x] as f64;

    // L1 gradient magnitude on interior pixels; border stays non-edge.
    let mut magnitude = vec![0.0f64; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x - 1, y)
                - at(x - 1, y + 1);
            let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x, y - 1)
                - at(x + 1, y - 1);
            magnitude[y * w + x] = gx.abs() + gy.abs();
        }
    }

    // Hysteresis: keep strong edges, then grow through weak neighbours.
    let mut edges = vec![false; w * h];
    let mut stack = Vec::new();
    for idx in 0..w * h {
        if magnitude[idx] >= EDGE_STRONG_THRESHOLD {
            edges[idx] = true;
            stack.push(idx);
        }
    }
    while let Some(idx) = stack.pop() {
        let x = (idx % w) as i64;
        let y = (idx / w) as i64;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let nidx = ny as usize * w + nx as usize;
                if !edges[nidx] && magnitude[nidx] >= EDGE_WEAK_THRESHOLD {
                    edges[nidx] = true;
                    stack.push(nidx);
                }
            }
        }
    }

    edges
}

fn variance_u8(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &v in data {
        let v = v as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    sum_sq / n - mean * mean
}

fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn flat_gray(w: u32, h: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([value]))
    }

    fn noise_gray(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(w, h, |_, _| Luma([rng.gen_range(0..=255u8)]))
    }

    fn checkerboard(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 255 }]))
    }

    #[test]
    fn brightness_of_flat_image() {
        let gray = flat_gray(50, 50, 128);
        assert!((mean_brightness(&gray) - 128.0).abs() < 1e-9);
    }

    #[test]
    fn laplacian_variance_zero_on_flat_image() {
        let gray = flat_gray(64, 64, 90);
        assert_eq!(laplacian_variance(&gray), 0.0);
    }

    #[test]
    fn laplacian_variance_high_on_checkerboard() {
        let gray = checkerboard(64, 64);
        assert!(laplacian_variance(&gray) > 1000.0);
    }

    #[test]
    fn laplacian_detects_noise_over_flat() {
        let flat = laplacian_variance(&flat_gray(64, 64, 128));
        let noisy = laplacian_variance(&noise_gray(64, 64, 7));
        assert!(noisy > flat);
    }

    #[test]
    fn lbp_variance_zero_on_flat_image() {
        // Every interior code is 0 (no neighbour exceeds the center).
        assert_eq!(lbp_variance(&flat_gray(32, 32, 100)), 0.0);
    }

    #[test]
    fn lbp_variance_nonzero_on_texture() {
        assert!(lbp_variance(&checkerboard(32, 32)) > 200.0);
        assert!(lbp_variance(&noise_gray(32, 32, 3)) > 200.0);
    }

    #[test]
    fn lbp_variance_tiny_image_is_zero() {
        assert_eq!(lbp_variance(&flat_gray(2, 2, 10)), 0.0);
    }

    #[test]
    fn histogram_flatness_high_for_single_color() {
        // All pixels in one bin → maximally spiky histogram.
        let rgb = RgbImage::from_pixel(100, 100, Rgb([50, 120, 200]));
        assert!(histogram_flatness(&rgb) > 100.0);
    }

    #[test]
    fn histogram_flatness_low_for_uniform_spread() {
        // Pixel values cycle through all 256 levels evenly → near-flat
        // histogram → stddev close to zero.
        let rgb = RgbImage::from_fn(256, 64, |x, _| {
            let v = x as u8;
            Rgb([v, v, v])
        });
        assert!(histogram_flatness(&rgb) < 20.0);
    }

    #[test]
    fn value_variance_zero_on_flat_image() {
        let rgb = RgbImage::from_pixel(40, 40, Rgb([10, 200, 30]));
        assert!(value_channel_variance(&rgb).abs() < 1e-9);
    }

    #[test]
    fn value_variance_uses_channel_max() {
        // V = max(R,G,B): alternating max 100 / max 200 → variance 2500.
        let rgb = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([100, 20, 30])
            } else {
                Rgb([10, 200, 30])
            }
        });
        assert!((value_channel_variance(&rgb) - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn frequency_mean_small_for_flat_image() {
        // Flat image: all spectral energy in the DC bin; averaged over the
        // whole window the mean stays far below any moiré threshold.
        let mean = frequency_magnitude_mean(&flat_gray(200, 200, 128));
        assert!(mean < 5.0, "flat image spectrum mean {mean}");
    }

    #[test]
    fn frequency_mean_grows_with_broadband_noise() {
        let flat = frequency_magnitude_mean(&flat_gray(128, 128, 128));
        let noisy = frequency_magnitude_mean(&noise_gray(128, 128, 11));
        assert!(noisy > flat + 50.0, "flat={flat}, noisy={noisy}");
    }

    #[test]
    fn frequency_mean_handles_images_smaller_than_window() {
        // Window clamps to image bounds instead of panicking.
        let mean = frequency_magnitude_mean(&noise_gray(20, 14, 5));
        assert!(mean.is_finite());
    }

    #[test]
    fn border_found_for_framed_image() {
        // White canvas with a dark rectangle outline anchored near the
        // top-left corner covering most of the image.
        let mut gray = flat_gray(200, 200, 230);
        for x in 2..=190 {
            for t in 0..2u32 {
                gray.put_pixel(x, 2 + t, Luma([10]));
                gray.put_pixel(x, 189 + t, Luma([10]));
            }
        }
        for y in 2..=190 {
            for t in 0..2u32 {
                gray.put_pixel(2 + t, y, Luma([10]));
                gray.put_pixel(189 + t, y, Luma([10]));
            }
        }

        let border = find_frame_border(&gray, 0.7, 0.8, 1.3, 10).expect("border should be found");
        assert!(border.area_ratio > 0.7);
        assert!(border.x < 10 && border.y < 10);
        assert!((border.aspect_ratio - 1.0).abs() < 0.1);
    }

    #[test]
    fn no_border_on_flat_image() {
        assert!(find_frame_border(&flat_gray(200, 200, 128), 0.7, 0.8, 1.3, 10).is_none());
    }

    #[test]
    fn no_border_when_frame_is_centered() {
        // Same rectangle but anchored away from the corner — must not match.
        let mut gray = flat_gray(400, 400, 230);
        for x in 60..=340 {
            gray.put_pixel(x, 60, Luma([10]));
            gray.put_pixel(x, 340, Luma([10]));
        }
        for y in 60..=340 {
            gray.put_pixel(60, y, Luma([10]));
            gray.put_pixel(340, y, Luma([10]));
        }
        assert!(find_frame_border(&gray, 0.7, 0.8, 1.3, 10).is_none());
    }

    #[test]
    fn metrics_bundle_matches_primitives() {
        let rgb = RgbImage::from_fn(64, 48, |x, y| {
            let v = ((x * 3 + y * 5) % 256) as u8;
            Rgb([v, v.wrapping_add(20), v.wrapping_add(40)])
        });
        let image = crate::frame::DecodedImage::from_rgb(rgb);
        let metrics = ImageMetrics::measure(&image);

        assert_eq!(metrics.width, 64);
        assert_eq!(metrics.height, 48);
        assert_eq!(metrics.resolution(), "64x48");
        assert!((metrics.brightness - mean_brightness(image.gray())).abs() < 1e-9);
        assert!((metrics.blur_score - laplacian_variance(image.gray())).abs() < 1e-9);
    }
}
