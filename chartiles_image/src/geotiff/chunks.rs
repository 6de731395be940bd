//! Sample bytes of 8-bit single-channel images, read straight from their strips or tiles.
//!
//! The `tiff` decoder refuses `PhotometricInterpretation = RGBPalette`, so palette indices are
//! read here. Supported are uncompressed, LZW, Deflate and PackBits chunks, optionally with
//! horizontal differencing.

use super::classify;
use chartiles_core::ChartError;
use flate2::read::ZlibDecoder;
use std::io::{Read, Seek, SeekFrom};
use tiff::{decoder::Decoder, tags::Tag};

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_PACKBITS: u16 = 32773;
const COMPRESSION_DEFLATE_LEGACY: u16 = 32946;

const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;

/// How the image is cut into chunks. Chunks are numbered row-major.
#[derive(Debug, PartialEq)]
struct Layout {
	chunk_width: usize,
	chunk_height: usize,
	chunks_across: usize,
	offsets: Vec<u64>,
	byte_counts: Vec<u64>,
}

impl Layout {
	fn read<R: Read + Seek>(decoder: &mut Decoder<R>, width: usize, height: usize) -> Result<Layout, ChartError> {
		let tiled = decoder.find_tag(Tag::TileOffsets).map_err(classify)?.is_some();
		let (chunk_width, chunk_height, offsets_tag, counts_tag) = if tiled {
			let tile_width = required_u32(decoder, Tag::TileWidth)? as usize;
			let tile_length = required_u32(decoder, Tag::TileLength)? as usize;
			(tile_width, tile_length, Tag::TileOffsets, Tag::TileByteCounts)
		} else {
			let rows = decoder
				.find_tag_unsigned::<u32>(Tag::RowsPerStrip)
				.map_err(classify)?
				.map_or(height, |rows| rows as usize);
			// RowsPerStrip may be 2^32 - 1 for single strip images
			(width, rows.clamp(1, height.max(1)), Tag::StripOffsets, Tag::StripByteCounts)
		};
		if chunk_width == 0 || chunk_height == 0 {
			return Err(ChartError::unsupported(format!("chunks of {chunk_width}x{chunk_height} pixels")));
		}

		let offsets = u64_values(decoder, offsets_tag)?;
		let byte_counts = u64_values(decoder, counts_tag)?;
		let chunks_across = width.div_ceil(chunk_width);
		let expected = chunks_across * height.div_ceil(chunk_height);
		if offsets.len() != expected || byte_counts.len() != expected {
			return Err(ChartError::unsupported(format!(
				"expected {expected} chunks, found {} offsets and {} byte counts",
				offsets.len(),
				byte_counts.len()
			)));
		}

		Ok(Layout {
			chunk_width,
			chunk_height,
			chunks_across,
			offsets,
			byte_counts,
		})
	}
}

/// Reads all samples of an 8-bit, one sample per pixel image, row-major without padding.
///
/// `file` is a second handle on the file the decoder reads from.
pub(super) fn read_samples_u8<R: Read + Seek, F: Read + Seek>(
	decoder: &mut Decoder<R>,
	mut file: F,
	width: u32,
	height: u32,
) -> Result<Vec<u8>, ChartError> {
	let bits = decoder
		.find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)
		.map_err(classify)?
		.unwrap_or_else(|| vec![1]);
	let samples = decoder
		.find_tag_unsigned::<u16>(Tag::SamplesPerPixel)
		.map_err(classify)?
		.unwrap_or(1);
	if bits != [8] || samples != 1 {
		return Err(ChartError::unsupported(format!(
			"{samples} samples per pixel with {bits:?} bits, expected one 8-bit sample"
		)));
	}

	let compression = decoder
		.find_tag_unsigned::<u16>(Tag::Compression)
		.map_err(classify)?
		.unwrap_or(COMPRESSION_NONE);
	let predictor = decoder
		.find_tag_unsigned::<u16>(Tag::Predictor)
		.map_err(classify)?
		.unwrap_or(PREDICTOR_NONE);
	if !matches!(predictor, PREDICTOR_NONE | PREDICTOR_HORIZONTAL) {
		return Err(ChartError::unsupported(format!("predictor {predictor}")));
	}

	let (width, height) = (width as usize, height as usize);
	let layout = Layout::read(decoder, width, height)?;
	let (chunk_width, chunk_height) = (layout.chunk_width, layout.chunk_height);
	log::trace!(
		"reading {} chunks of {chunk_width}x{chunk_height}, compression {compression}, predictor {predictor}",
		layout.offsets.len()
	);

	let mut samples = vec![0u8; width * height];
	for (index, (&offset, &length)) in layout.offsets.iter().zip(&layout.byte_counts).enumerate() {
		let mut compressed = vec![0u8; usize::try_from(length).map_err(ChartError::unsupported)?];
		file.seek(SeekFrom::Start(offset))
			.and_then(|_| file.read_exact(&mut compressed))
			.map_err(|e| ChartError::io(format!("reading chunk {index} at offset {offset}: {e}")))?;

		let mut chunk = decompress(compression, &compressed, chunk_width * chunk_height)
			.map_err(|reason| ChartError::unsupported(format!("chunk {index}: {reason}")))?;
		// the last strip may be stored without its padding rows
		chunk.resize(chunk_width * chunk_height, 0);

		if predictor == PREDICTOR_HORIZONTAL {
			for row in chunk.chunks_exact_mut(chunk_width) {
				for i in 1..row.len() {
					row[i] = row[i].wrapping_add(row[i - 1]);
				}
			}
		}

		let x0 = (index % layout.chunks_across) * chunk_width;
		let y0 = (index / layout.chunks_across) * chunk_height;
		let visible = chunk_width.min(width - x0);
		for (dy, row) in chunk.chunks_exact(chunk_width).enumerate().take(height.saturating_sub(y0)) {
			let start = (y0 + dy) * width + x0;
			samples[start..start + visible].copy_from_slice(&row[..visible]);
		}
	}
	Ok(samples)
}

fn decompress(compression: u16, data: &[u8], expected: usize) -> Result<Vec<u8>, String> {
	match compression {
		COMPRESSION_NONE => Ok(data.to_vec()),
		COMPRESSION_LZW => weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
			.decode(data)
			.map_err(|e| format!("invalid LZW data: {e}")),
		COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_LEGACY => {
			let mut out = Vec::with_capacity(expected);
			ZlibDecoder::new(data)
				.read_to_end(&mut out)
				.map_err(|e| format!("invalid Deflate data: {e}"))?;
			Ok(out)
		}
		COMPRESSION_PACKBITS => Ok(unpack_bits(data, expected)),
		other => Err(format!("compression {other} is not supported")),
	}
}

/// Decodes Apple PackBits run-length encoding. A truncated run ends the output.
fn unpack_bits(mut data: &[u8], expected: usize) -> Vec<u8> {
	let mut out = Vec::with_capacity(expected);
	while let Some((&header, rest)) = data.split_first() {
		data = rest;
		let header = header as i8;
		match header {
			0..=127 => {
				let count = (header as usize + 1).min(data.len());
				out.extend_from_slice(&data[..count]);
				data = &data[count..];
			}
			-128 => {}
			_ => {
				let Some((&value, rest)) = data.split_first() else { break };
				data = rest;
				out.extend(std::iter::repeat_n(value, (1 - i16::from(header)) as usize));
			}
		}
	}
	out
}

fn required_u32<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<u32, ChartError> {
	decoder
		.find_tag_unsigned::<u32>(tag)
		.map_err(classify)?
		.ok_or_else(|| ChartError::unsupported(format!("missing tag {tag:?}")))
}

fn u64_values<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Vec<u64>, ChartError> {
	decoder
		.find_tag(tag)
		.map_err(classify)?
		.ok_or_else(|| ChartError::unsupported(format!("missing tag {tag:?}")))?
		.into_u64_vec()
		.map_err(classify)
}
