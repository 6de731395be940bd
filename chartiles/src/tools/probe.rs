use anyhow::{Context, Result};
use chartiles_container::MBTilesReader;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// MBTiles container you want to probe
	#[arg(required = true)]
	filename: PathBuf,

	/// also check that the metadata matches the stored tiles
	#[arg(long, short)]
	deep: bool,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	eprintln!("probe {:?}", arguments.filename);

	let path = std::path::absolute(&arguments.filename)?;
	let reader = MBTilesReader::open_path(&path)?;
	print!("{}", describe(&reader)?);

	if arguments.deep {
		reader.verify().with_context(|| format!("verifying {path:?}"))?;
		println!("container is consistent");
	}
	Ok(())
}

fn describe(reader: &MBTilesReader) -> Result<String> {
	let mut text = String::from("metadata:\n");
	for (key, value) in reader.metadata() {
		text.push_str(&format!("  {key}: {value}\n"));
	}
	text.push_str("tiles per zoom level:\n");
	for (level, count) in reader.level_counts()? {
		text.push_str(&format!("  {level}: {count}\n"));
	}
	text.push_str(&format!("total tiles: {}\n", reader.tile_count()?));
	Ok(text)
}

#[cfg(test)]
mod tests {
	use crate::tests::run_command;

	#[test]
	fn missing_file() {
		let err = run_command(vec!["chartiles", "probe", "/does/not/exist.mbtiles"]).unwrap_err();
		assert!(format!("{err:#}").contains("exist.mbtiles"), "{err:#}");
	}
}
