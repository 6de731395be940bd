//! Lossy WebP via libwebp. Unlike JPEG, WebP keeps the alpha channel.

use crate::traits::DynamicImageTraitInfo;
use anyhow::{Result, anyhow, bail};
use chartiles_core::Blob;
use image::{DynamicImage, RgbImage, RgbaImage};

/// Encodes an RGB or RGBA image as lossy WebP.
///
/// * `quality`: 0..=100, defaults to **75**.
pub fn encode(image: &DynamicImage, quality: Option<u8>) -> Result<Blob> {
	if image.bits_per_value() != 8 {
		bail!("webp only supports 8-bit images");
	}

	let (width, height) = (image.width(), image.height());
	let encoder = match image.channel_count() {
		3 => ::webp::Encoder::from_rgb(image.as_bytes(), width, height),
		4 => ::webp::Encoder::from_rgba(image.as_bytes(), width, height),
		_ => bail!("webp only supports RGB or RGBA images"),
	};

	let quality = quality.unwrap_or(75);
	if quality > 100 {
		bail!("webp quality must be between 0 and 100, got {quality}");
	}
	let quality = f32::from(quality);
	let memory = encoder
		.encode_simple(false, quality)
		.map_err(|e| anyhow!("Failed to encode WebP image: {e:?}"))?;
	Ok(Blob::from(memory.to_vec()))
}

pub fn blob2image(blob: &Blob) -> Result<DynamicImage> {
	let Some(decoded) = ::webp::Decoder::new(blob.as_slice()).decode() else {
		bail!("Failed to decode WebP image")
	};
	let (width, height) = (decoded.width(), decoded.height());
	let data = decoded.to_vec();
	let image = if decoded.is_alpha() {
		RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8)
	} else {
		RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8)
	};
	image.ok_or_else(|| anyhow!("WebP buffer does not match {width}x{height}"))
}
