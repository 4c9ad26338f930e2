//! Decode, fit-resize and re-encode images.
//!
//! Everything here is synchronous and CPU-bound; async callers run it on the
//! blocking pool.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::error::PipelineError;
use crate::keys;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Target box for a derived artifact, with the label used in its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailSize {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    /// A size labelled `{width}x{height}`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            label: format!("{width}x{height}"),
            width,
            height,
        }
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Accepts `WxH` or `label:WxH`.
impl FromStr for ThumbnailSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (label, dims) = match s.split_once(':') {
            Some((label, dims)) => (Some(label.trim()), dims.trim()),
            None => (None, s),
        };
        let (w, h) = dims
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("thumbnail size '{s}' must look like WxH"))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in thumbnail size '{s}'"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in thumbnail size '{s}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("thumbnail size '{s}' must have non-zero dimensions"));
        }

        match label {
            Some(label) if label.is_empty() || label.contains('/') => {
                Err(format!("invalid label in thumbnail size '{s}'"))
            }
            Some(label) => Ok(Self {
                label: label.to_string(),
                width,
                height,
            }),
            None => Ok(Self::new(width, height)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl OutputFormat {
    /// PNG for `.png` keys, JPEG otherwise.
    pub fn for_key(key: &str, jpeg_quality: u8) -> Self {
        match keys::artifact_content_type(key) {
            "image/png" => OutputFormat::Png,
            _ => OutputFormat::Jpeg {
                quality: jpeg_quality.clamp(1, 100),
            },
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
}

/// Whether images of this content type can be decoded here.
pub fn can_decode(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    ImageFormat::from_mime_type(essence).is_some_and(|f| f.reading_enabled())
}

pub fn decode(data: &[u8]) -> Result<DynamicImage, PipelineError> {
    image::load_from_memory(data)
        .map_err(|e| PipelineError::invalid_input(format!("Failed to decode image: {e}")))
}

/// Dimensions of `src` scaled to fit inside `max` with the aspect ratio kept.
///
/// The smaller of the two axis scale factors wins, so neither side exceeds
/// the box. Images already inside the box are not enlarged. A zero-sized box
/// axis is treated as one pixel.
pub fn fit_within(src: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = src;
    let (max_w, max_h) = (max.0.max(1), max.1.max(1));
    if src_w == 0 || src_h == 0 || (src_w <= max_w && src_h <= max_h) {
        return src;
    }
    let scale = f64::min(
        f64::from(max_w) / f64::from(src_w),
        f64::from(max_h) / f64::from(src_h),
    );
    let width = (f64::from(src_w) * scale).round() as u32;
    let height = (f64::from(src_h) * scale).round() as u32;
    (width.clamp(1, max_w), height.clamp(1, max_h))
}

pub fn resize_to_fit(img: &DynamicImage, size: &ThumbnailSize) -> DynamicImage {
    let (width, height) = fit_within(img.dimensions(), (size.width, size.height));
    if (width, height) == img.dimensions() {
        return img.clone();
    }
    img.thumbnail_exact(width, height)
}

pub fn encode(img: &DynamicImage, format: OutputFormat) -> Result<Bytes, PipelineError> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Jpeg { quality } => {
            // JPEG has no alpha channel.
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)
        }
        OutputFormat::Png => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
    };
    result.map_err(|e| PipelineError::invalid_input(format!("Failed to encode image: {e}")))?;
    Ok(Bytes::from(buf))
}

/// Resize an already decoded image into `size` and encode it.
pub fn render_image(
    img: &DynamicImage,
    size: &ThumbnailSize,
    format: OutputFormat,
) -> Result<RenderedImage, PipelineError> {
    let resized = resize_to_fit(img, size);
    let data = encode(&resized, format)?;
    Ok(RenderedImage {
        data,
        width: resized.width(),
        height: resized.height(),
        content_type: format.content_type(),
    })
}

/// Decode `data`, resize it into `size` and encode it.
pub fn render(
    data: &[u8],
    size: &ThumbnailSize,
    format: OutputFormat,
) -> Result<RenderedImage, PipelineError> {
    render_image(&decode(data)?, size, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_labelled_sizes() {
        assert_eq!(
            "150x150".parse::<ThumbnailSize>().unwrap(),
            ThumbnailSize::new(150, 150)
        );
        let named: ThumbnailSize = "small: 64X48".parse().unwrap();
        assert_eq!(named.label, "small");
        assert_eq!((named.width, named.height), (64, 48));
    }

    #[test]
    fn rejects_malformed_sizes() {
        for bad in ["", "150", "0x10", "ax10", ":10x10", "a/b:10x10"] {
            assert!(bad.parse::<ThumbnailSize>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn fit_uses_the_smaller_scale_factor() {
        assert_eq!(fit_within((2000, 1000), (150, 150)), (150, 75));
        assert_eq!(fit_within((1000, 2000), (300, 300)), (150, 300));
        assert_eq!(fit_within((100, 50), (150, 150)), (100, 50));
        assert_eq!(fit_within((5000, 1), (100, 100)), (100, 1));
    }
}
