//! JPEG encoder and decoder for `DynamicImage`.
//!
//! Only 8-bit grey and RGB images are accepted, JPEG has no alpha channel. Use
//! [`crate::encode_tile`] to flatten RGBA tiles first.

use crate::traits::DynamicImageTraitInfo;
use anyhow::{Context, Result, anyhow, bail};
use chartiles_core::Blob;
use image::{DynamicImage, ImageEncoder, ImageFormat, codecs::jpeg::JpegEncoder, load_from_memory_with_format};

/// Encodes an image as JPEG.
///
/// * `quality`: 0..=100, defaults to **75**. libjpeg has no quality 0, it is encoded as 1.
pub fn encode(image: &DynamicImage, quality: Option<u8>) -> Result<Blob> {
	if image.bits_per_value() != 8 {
		bail!("JPEG only supports 8-bit images");
	}

	let quality = quality.unwrap_or(75);
	if quality > 100 {
		bail!("JPEG quality must be between 0 and 100, got {quality}");
	}
	let quality = quality.max(1);

	if !matches!(image.channel_count(), 1 | 3) {
		bail!("JPEG only supports Grey or RGB images without alpha channel");
	}

	let mut buffer: Vec<u8> = Vec::new();
	JpegEncoder::new_with_quality(&mut buffer, quality)
		.write_image(
			image.as_bytes(),
			image.width(),
			image.height(),
			image.extended_color_type(),
		)
		.with_context(|| format!("encoding {}x{} image as JPEG (q={quality})", image.width(), image.height()))?;

	Ok(Blob::from(buffer))
}

pub fn blob2image(blob: &Blob) -> Result<DynamicImage> {
	load_from_memory_with_format(blob.as_slice(), ImageFormat::Jpeg)
		.map_err(|e| anyhow!("Failed to decode JPEG image: {e}"))
}
