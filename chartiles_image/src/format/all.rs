use super::{jpeg, png, webp};
use anyhow::Result;
use chartiles_core::{Blob, TileFormat};
use image::DynamicImage;

pub fn encode(image: &DynamicImage, format: TileFormat, quality: Option<u8>) -> Result<Blob> {
	match format {
		TileFormat::JPG => jpeg::encode(image, quality),
		TileFormat::PNG => png::encode(image, None),
		TileFormat::WEBP => webp::encode(image, quality),
	}
}

/// Encodes a tile for the container. Formats without transparency get the alpha channel
/// dropped, so transparent areas turn into the color stored underneath (black for no-data).
pub fn encode_tile(image: &DynamicImage, format: TileFormat, quality: Option<u8>) -> Result<Blob> {
	if !format.supports_alpha() && image.color().has_alpha() {
		return encode(&DynamicImage::ImageRgb8(image.to_rgb8()), format, quality);
	}
	encode(image, format, quality)
}

pub fn decode(blob: &Blob, format: TileFormat) -> Result<DynamicImage> {
	match format {
		TileFormat::JPG => jpeg::blob2image(blob),
		TileFormat::PNG => png::blob2image(blob),
		TileFormat::WEBP => webp::blob2image(blob),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{Rgba, RgbaImage};
	use rstest::rstest;

	#[rstest]
	#[case(TileFormat::JPG, false)]
	#[case(TileFormat::PNG, true)]
	#[case(TileFormat::WEBP, true)]
	fn encode_tile_alpha(#[case] format: TileFormat, #[case] keeps_alpha: bool) -> Result<()> {
		let tile = DynamicImage::ImageRgba8(RgbaImage::from_fn(512, 512, |x, _| {
			if x < 256 { Rgba([0, 0, 0, 0]) } else { Rgba([30, 60, 90, 255]) }
		}));
		let decoded = decode(&encode_tile(&tile, format, Some(75))?, format)?;
		assert_eq!((decoded.width(), decoded.height()), (512, 512));
		assert_eq!(decoded.color().has_alpha(), keeps_alpha);
		Ok(())
	}

	#[test]
	fn plain_encode_keeps_jpeg_strict() {
		let tile = DynamicImage::ImageRgba8(RgbaImage::new(8, 8));
		assert!(encode(&tile, TileFormat::JPG, None).is_err());
	}
}
