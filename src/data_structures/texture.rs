//! CPU-side images and the pixel blending used to bake material graphs.
//!
//! This module provides [`Image`], the scene's image resource, and the blend
//! operations a `MixRgb` node performs when a graph is flattened for export.

use anyhow::*;
use image::{Rgba, RgbaImage, imageops::FilterType};

use crate::data_structures::material::BlendMode;

/// A decoded RGBA image held in the scene's image pool.
///
/// `name` is the file stem (or embedded image name) and `source` the path it
/// was read from, when there is one.
#[derive(Clone, Debug)]
pub struct Image {
    pub name: String,
    pub source: Option<std::path::PathBuf>,
    pub pixels: RgbaImage,
}

impl Image {
    /// Decode an image from encoded bytes (PNG, JPEG).
    ///
    /// # Arguments
    ///
    /// * `bytes` is the encoded file content
    /// * `name` is used as the resource name inside the scene
    /// * `mime_type` is an optional hint such as `image/png`
    pub fn from_bytes(bytes: &[u8], name: &str, mime_type: Option<&str>) -> Result<Self> {
        let format = mime_type.and_then(image::ImageFormat::from_mime_type);
        let decoded = match format {
            Some(format) => image::load_from_memory_with_format(bytes, format),
            None => image::load_from_memory(bytes),
        }
        .with_context(|| format!("Could not decode image {name}"))?;
        Ok(Self {
            name: name.to_string(),
            source: None,
            pixels: decoded.to_rgba8(),
        })
    }

    /// A solid colour image, mostly useful for authoring part assets.
    pub fn solid(name: &str, width: u32, height: u32, colour: [u8; 4]) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            pixels: RgbaImage::from_pixel(width.max(1), height.max(1), Rgba(colour)),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Encode as PNG. Encoding is deterministic so exports stay byte-identical.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = std::io::Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut out, image::ImageFormat::Png)
            .with_context(|| format!("Could not encode image {} as png", self.name))?;
        Ok(out.into_inner())
    }
}

/// Blend `b` over `a` per pixel, the factor being taken from `factor`'s alpha channel.
///
/// `b` and `factor` are resized to `a`'s dimensions when they differ. The
/// result keeps `a`'s alpha.
pub fn blend(a: &RgbaImage, b: &RgbaImage, factor: &RgbaImage, mode: BlendMode) -> RgbaImage {
    let (width, height) = a.dimensions();
    let b = fit(b, width, height);
    let factor = fit(factor, width, height);
    RgbaImage::from_fn(width, height, |x, y| {
        let base = a.get_pixel(x, y);
        let over = b.get_pixel(x, y);
        let fac = factor.get_pixel(x, y)[3] as f32 / 255.0;
        let mut out = [0u8; 4];
        for channel in 0..3 {
            let ca = base[channel] as f32 / 255.0;
            let cb = over[channel] as f32 / 255.0;
            let mixed = match mode {
                BlendMode::Mix => ca * (1.0 - fac) + cb * fac,
                // linear light: a + fac * (2b - 1)
                BlendMode::LinearLight => ca + fac * (2.0 * cb - 1.0),
            };
            out[channel] = (mixed.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        out[3] = base[3];
        Rgba(out)
    })
}

fn fit(img: &RgbaImage, width: u32, height: u32) -> std::borrow::Cow<'_, RgbaImage> {
    if img.dimensions() == (width, height) {
        std::borrow::Cow::Borrowed(img)
    } else {
        std::borrow::Cow::Owned(image::imageops::resize(
            img,
            width,
            height,
            FilterType::Triangle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_uses_alpha_of_factor() {
        let a = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let b = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 0]));
        let half = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let out = blend(&a, &b, &half, BlendMode::Mix);
        assert_eq!(out.get_pixel(0, 0)[0], 128);
        assert_eq!(out.get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn transparent_overlay_leaves_base_untouched() {
        let a = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let b = RgbaImage::from_pixel(1, 1, Rgba([200, 200, 200, 0]));
        for mode in [BlendMode::Mix, BlendMode::LinearLight] {
            let out = blend(&a, &b, &b, mode);
            assert_eq!(out.dimensions(), (2, 2));
            assert_eq!(out.get_pixel(1, 1), &Rgba([10, 20, 30, 255]));
        }
    }

    #[test]
    fn linear_light_brightens_with_light_overlay() {
        let a = RgbaImage::from_pixel(1, 1, Rgba([100, 100, 100, 255]));
        let b = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let out = blend(&a, &b, &b, BlendMode::LinearLight);
        assert_eq!(out.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn png_round_trip_keeps_pixels() {
        let img = Image::solid("face", 3, 2, [1, 2, 3, 4]);
        let bytes = img.to_png().unwrap();
        let decoded = Image::from_bytes(&bytes, "face", Some("image/png")).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.pixels.get_pixel(2, 1), &Rgba([1, 2, 3, 4]));
    }
}
