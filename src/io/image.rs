//! Color and depth decoding for capture files
//!
//! - YUV 4:2:0 planar color (`.yuv`)
//! - Any `image`-crate format for color (PNG, JPEG)
//! - Raw little-endian `f32` depth (`.raw`)
//! - 16-bit PNG depth in millimeters

use std::path::Path;

use image::ImageReader;

use super::dataset::{DatasetError, Result};
use crate::core::{ColorImage, DepthImage};

/// Decode planar YUV 4:2:0 (Y plane, then U, then V at half resolution).
///
/// Chroma is upsampled bilinearly. Bytes beyond the three planes are ignored.
pub fn yuv420_to_rgb(data: &[u8], width: usize, height: usize) -> Result<ColorImage> {
    let y_size = width * height;
    let (uw, uh) = (width / 2, height / 2);
    let uv_size = uw * uh;
    let expected = y_size + 2 * uv_size;
    if width == 0 || height == 0 || uw == 0 || uh == 0 {
        return Err(DatasetError::Image(format!(
            "invalid YUV dimensions {width}x{height}"
        )));
    }
    if data.len() < expected {
        return Err(DatasetError::Image(format!(
            "YUV data too small: {} bytes, expected at least {} for {}x{}",
            data.len(),
            expected,
            width,
            height
        )));
    }

    let y_plane = &data[..y_size];
    let u_plane = &data[y_size..y_size + uv_size];
    let v_plane = &data[y_size + uv_size..expected];

    let mut rgb = Vec::with_capacity(y_size * 3);
    for y in 0..height {
        let (y0, y1, fy) = bilinear_axis(y, height, uh);
        for x in 0..width {
            let (x0, x1, fx) = bilinear_axis(x, width, uw);
            let sample = |plane: &[u8]| {
                let p = |xx: usize, yy: usize| plane[yy * uw + xx] as f32;
                let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
                let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
                top * (1.0 - fy) + bottom * fy
            };
            let luma = y_plane[y * width + x] as f32;
            let u = sample(u_plane) - 128.0;
            let v = sample(v_plane) - 128.0;

            let r = luma + 1.140 * v;
            let g = luma - 0.395 * u - 0.581 * v;
            let b = luma + 2.032 * u;
            rgb.extend_from_slice(&[to_u8(r), to_u8(g), to_u8(b)]);
        }
    }

    Ok(ColorImage::new(width, height, rgb))
}

/// Source taps and blend factor for resampling `dst_len` samples from `src_len`
/// with pixel-center alignment.
#[inline]
fn bilinear_axis(i: usize, dst_len: usize, src_len: usize) -> (usize, usize, f32) {
    let s = ((i as f32 + 0.5) * src_len as f32 / dst_len as f32 - 0.5).max(0.0);
    let i0 = (s.floor() as usize).min(src_len - 1);
    let i1 = (i0 + 1).min(src_len - 1);
    (i0, i1, s - i0 as f32)
}

#[inline]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Load a `.yuv` file of known dimensions.
pub fn load_yuv420(path: &Path, width: usize, height: usize) -> Result<ColorImage> {
    let data = std::fs::read(path)?;
    yuv420_to_rgb(&data, width, height)
}

/// Load an RGB image in any format the `image` crate recognizes.
pub fn load_color_image(path: &Path) -> Result<ColorImage> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| DatasetError::Image(e.to_string()))?;

    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(ColorImage::new(width as usize, height as usize, rgb.into_raw()))
}

/// Decode raw little-endian `f32` depth. The byte count must match exactly.
pub fn decode_raw_depth(bytes: &[u8], width: usize, height: usize) -> Result<DepthImage> {
    let expected = width * height * 4;
    if bytes.len() != expected {
        return Err(DatasetError::Image(format!(
            "depth size mismatch: {} bytes, expected {} for {}x{}",
            bytes.len(),
            expected,
            width,
            height
        )));
    }

    let data = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .map(|d| if d.is_finite() { d } else { 0.0 })
        .collect();
    Ok(DepthImage::new(width, height, data))
}

pub fn load_raw_depth(path: &Path, width: usize, height: usize) -> Result<DepthImage> {
    let bytes = std::fs::read(path)?;
    decode_raw_depth(&bytes, width, height)
}

/// Load a 16-bit grayscale PNG depth image and convert millimeters to meters.
pub fn load_depth_png(path: &Path) -> Result<DepthImage> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| DatasetError::Image(e.to_string()))?;

    let (width, height) = (img.width() as usize, img.height() as usize);
    let data: Vec<f32> = match img {
        image::DynamicImage::ImageLuma16(luma) => {
            luma.pixels().map(|p| p.0[0] as f32 / 1000.0).collect()
        }
        other => {
            return Err(DatasetError::Image(format!(
                "expected 16-bit grayscale depth, got {:?}",
                other.color()
            )))
        }
    };

    Ok(DepthImage::new(width, height, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn yuv_frame(width: usize, height: usize, y: u8, u: u8, v: u8) -> Vec<u8> {
        let mut data = vec![y; width * height];
        data.extend(std::iter::repeat(u).take((width / 2) * (height / 2)));
        data.extend(std::iter::repeat(v).take((width / 2) * (height / 2)));
        data
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let data = yuv_frame(4, 4, 128, 128, 128);
        let img = yuv420_to_rgb(&data, 4, 4).unwrap();
        assert_eq!(img.width, 4);
        assert_eq!(img.pixel(3, 3), [128, 128, 128]);
    }

    #[test]
    fn test_red_chroma() {
        let data = yuv_frame(4, 2, 76, 85, 255);
        let [r, g, b] = yuv420_to_rgb(&data, 4, 2).unwrap().pixel(1, 1);
        assert!(r > 200, "r = {r}");
        assert!(g < 60 && b < 60, "g = {g}, b = {b}");
    }

    #[test]
    fn test_yuv_size_checks() {
        let mut data = yuv_frame(4, 4, 10, 128, 128);
        data.extend_from_slice(&[0u8; 16]);
        assert!(yuv420_to_rgb(&data, 4, 4).is_ok());

        let short = &data[..20];
        assert!(matches!(yuv420_to_rgb(short, 4, 4), Err(DatasetError::Image(_))));
    }

    #[test]
    fn test_chroma_upsampling_interpolates() {
        // 4x2 image: U plane is 2x1 with a step from 96 to 160
        let mut data = vec![128u8; 8];
        data.extend_from_slice(&[96, 160]);
        data.extend_from_slice(&[128, 128]);
        let img = yuv420_to_rgb(&data, 4, 2).unwrap();
        let blue: Vec<u8> = (0..4).map(|x| img.pixel(x, 0)[2]).collect();
        assert!(blue.windows(2).all(|w| w[0] < w[1]), "blue = {blue:?}");
    }

    #[test]
    fn test_raw_depth_decode() {
        let values = [0.5f32, 1.0, f32::NAN, 0.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let depth = decode_raw_depth(&bytes, 2, 2).unwrap();
        assert_eq!(depth.data, vec![0.5, 1.0, 0.0, 0.0]);

        assert!(decode_raw_depth(&bytes, 3, 2).is_err());
    }

    #[test]
    fn test_color_and_depth_png() {
        let dir = tempdir().unwrap();

        let color_path = dir.path().join("c.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]))
            .save(&color_path)
            .unwrap();
        let color = load_color_image(&color_path).unwrap();
        assert_eq!((color.width, color.height), (3, 2));
        assert_eq!(color.pixel(2, 1), [10, 20, 30]);

        let depth_path = dir.path().join("d.png");
        image::ImageBuffer::<image::Luma<u16>, _>::from_pixel(2, 2, image::Luma([1500u16]))
            .save(&depth_path)
            .unwrap();
        let depth = load_depth_png(&depth_path).unwrap();
        assert!((depth.get(1, 1) - 1.5).abs() < 1e-6);
    }
}
