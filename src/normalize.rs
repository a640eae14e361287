//! Shrinks an image into a JPEG data URI small enough for the story model.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::constants::{PAYLOAD_MIME, PAYLOAD_WARN_KB};
use crate::error::PixtaleError;

/// An image ready to embed in a model request.
#[derive(Clone, Debug)]
pub struct NormalizedImage {
    /// Width after resizing
    pub width: u32,
    /// Height after resizing
    pub height: u32,
    /// Size of the encoded JPEG, before base64
    pub encoded_len: usize,
    data_uri: String,
}

impl NormalizedImage {
    /// `data:image/jpeg;base64,...`
    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    /// Approximate payload size in KB, as the provider will see it.
    pub fn payload_kb(&self) -> f64 {
        self.data_uri.len() as f64 / 1024.0
    }
}

/// Loads `path`, flattens transparency onto white, bounds the longer side by
/// `max_dimension` and re-encodes as JPEG at `quality`.
pub fn normalize(
    path: &Path,
    max_dimension: u32,
    quality: u8,
) -> Result<NormalizedImage, PixtaleError> {
    if !path.is_file() {
        return Err(PixtaleError::NotFound(path.display().to_string()));
    }
    let original_len = std::fs::metadata(path)?.len();
    debug!(
        "Original image size: {:.2} KB",
        original_len as f64 / 1024.0
    );

    let image = ImageReader::open(path)
        .map_err(|err| PixtaleError::processing("open", image::ImageError::IoError(err)))?
        .with_guessed_format()
        .map_err(|err| PixtaleError::processing("guess format", image::ImageError::IoError(err)))?
        .decode()
        .map_err(|err| PixtaleError::processing("decode", err))?;
    debug!("Original dimensions: {}x{}", image.width(), image.height());

    let rgb = flatten(&image);
    let (width, height) = bounded_dimensions(rgb.width(), rgb.height(), max_dimension);
    let rgb = if (width, height) == rgb.dimensions() {
        rgb
    } else {
        debug!("Resized to: {}x{}", width, height);
        image::imageops::resize(&rgb, width, height, FilterType::Lanczos3)
    };

    let jpeg = encode_jpeg(&rgb, quality)?;
    debug!("Optimized image size: {:.2} KB", jpeg.len() as f64 / 1024.0);

    let encoded = general_purpose::STANDARD.encode(&jpeg);
    let normalized = NormalizedImage {
        width,
        height,
        encoded_len: jpeg.len(),
        data_uri: format!("data:{PAYLOAD_MIME};base64,{encoded}"),
    };
    debug!("Base64 payload size: {:.2} KB", normalized.payload_kb());
    if normalized.payload_kb() > PAYLOAD_WARN_KB {
        warn!(
            "Image payload is {:.2} KB, this may exceed the model's token limit",
            normalized.payload_kb()
        );
    }
    Ok(normalized)
}

/// Drops the alpha channel by compositing onto opaque white; other colour
/// models are just converted to 8-bit RGB.
fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        rgb.put_pixel(
            x,
            y,
            Rgb([over_white(r, a), over_white(g, a), over_white(b, a)]),
        );
    }
    rgb
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let alpha = u32::from(alpha);
    let blended = (u32::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255;
    u8::try_from(blended).unwrap_or(u8::MAX)
}

/// Proportional size with neither side above `max_dimension`.
pub(crate) fn bounded_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let max_dimension = max_dimension.max(1);
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let scale = |short: u32, long: u32| {
        let scaled = u64::from(short) * u64::from(max_dimension) / u64::from(long);
        u32::try_from(scaled).unwrap_or(max_dimension).max(1)
    };
    if width > height {
        (max_dimension, scale(height, width))
    } else {
        (scale(width, height), max_dimension)
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, PixtaleError> {
    let mut output = Vec::new();
    {
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100));
        encoder
            .encode_image(rgb)
            .map_err(|err| PixtaleError::processing("encode", err))?;
    }
    Ok(output)
}
