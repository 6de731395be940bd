//! Image inspection helpers for `DynamicImage`.
//!
//! [`DynamicImageTraitInfo`] answers the questions the pipeline asks about a tile before
//! encoding it: which layout it has, how transparent it is, and how far it differs from another
//! tile after a lossy round trip.

use anyhow::{Result, ensure};
use image::{DynamicImage, ExtendedColorType};

pub trait DynamicImageTraitInfo {
	/// Number of bits per single channel value, e.g. `8` for `Rgb8`.
	fn bits_per_value(&self) -> u8;

	fn channel_count(&self) -> u8;

	fn extended_color_type(&self) -> ExtendedColorType;

	/// Largest alpha value of all pixels, `255` for images without alpha channel.
	fn max_alpha(&self) -> u8;

	/// `true` if no pixel is more opaque than `threshold`.
	fn is_transparent(&self, threshold: u8) -> bool {
		self.max_alpha() <= threshold
	}

	/// `true` if every pixel is fully transparent.
	fn is_empty(&self) -> bool {
		self.max_alpha() == 0
	}

	/// `true` if the image has no alpha channel or every alpha value is `255`.
	fn is_opaque(&self) -> bool;

	/// Mean absolute difference per channel, rounded up to one decimal place.
	///
	/// Errors if the images differ in size or color model.
	fn diff(&self, other: &DynamicImage) -> Result<Vec<f64>>;
}

impl DynamicImageTraitInfo for DynamicImage {
	fn bits_per_value(&self) -> u8 {
		(self.color().bits_per_pixel() / u16::from(self.color().channel_count())) as u8
	}

	fn channel_count(&self) -> u8 {
		self.color().channel_count()
	}

	fn extended_color_type(&self) -> ExtendedColorType {
		self.color().into()
	}

	fn max_alpha(&self) -> u8 {
		if !self.color().has_alpha() {
			return 255;
		}
		let channels = self.channel_count() as usize;
		self.as_bytes()
			.chunks_exact(channels)
			.map(|pixel| pixel[channels - 1])
			.max()
			.unwrap_or(0)
	}

	fn is_opaque(&self) -> bool {
		if !self.color().has_alpha() {
			return true;
		}
		let channels = self.channel_count() as usize;
		self.as_bytes().chunks_exact(channels).all(|pixel| pixel[channels - 1] == 255)
	}

	fn diff(&self, other: &DynamicImage) -> Result<Vec<f64>> {
		ensure!(
			self.width() == other.width() && self.height() == other.height(),
			"image sizes differ: {}x{} vs {}x{}",
			self.width(),
			self.height(),
			other.width(),
			other.height()
		);
		ensure!(
			self.color() == other.color(),
			"color models differ: {:?} vs {:?}",
			self.color(),
			other.color()
		);
		ensure!(self.bits_per_value() == 8, "diff only supports 8-bit images");

		let channels = self.channel_count() as usize;
		let mut sums = vec![0u64; channels];
		for (p1, p2) in self.as_bytes().chunks_exact(channels).zip(other.as_bytes().chunks_exact(channels)) {
			for i in 0..channels {
				sums[i] += u64::from(p1[i].abs_diff(p2[i]));
			}
		}
		let n = f64::from(self.width()) * f64::from(self.height());
		Ok(sums.iter().map(|&s| (10.0 * s as f64 / n).ceil() / 10.0).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{Rgb, RgbImage, Rgba, RgbaImage};

	#[test]
	fn alpha_queries() {
		let mut image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
		let empty = DynamicImage::ImageRgba8(image.clone());
		assert!(empty.is_empty());
		assert!(empty.is_transparent(1));
		assert!(!empty.is_opaque());

		image.put_pixel(1, 1, Rgba([9, 9, 9, 1]));
		let faint = DynamicImage::ImageRgba8(image.clone());
		assert!(!faint.is_empty());
		assert!(faint.is_transparent(1));
		assert!(!faint.is_transparent(0));

		let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])));
		assert_eq!(rgb.max_alpha(), 255);
		assert!(rgb.is_opaque());
		assert_eq!(rgb.channel_count(), 3);
		assert_eq!(rgb.bits_per_value(), 8);
		assert_eq!(rgb.extended_color_type(), ExtendedColorType::Rgb8);
	}

	#[test]
	fn diff() {
		let a = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
		let mut b = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
		b.put_pixel(0, 0, Rgb([14, 20, 29]));
		assert_eq!(a.diff(&DynamicImage::ImageRgb8(b)).unwrap(), vec![1.0, 0.0, 0.3]);

		let small = DynamicImage::ImageRgb8(RgbImage::new(1, 1));
		assert!(a.diff(&small).is_err());
	}
}
