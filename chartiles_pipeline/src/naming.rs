//! File and layer names of published charts.
//!
//! ```
//! use chartiles_pipeline::{layer_name_from_stem, output_filename};
//!
//! let file = output_filename("Anchorage SEC", "sectional");
//! assert_eq!(file, "S_Anchorage_SEC.mbtiles");
//! assert_eq!(layer_name_from_stem("S_Anchorage_SEC"), "Anchorage_SEC");
//! ```

/// Characters that are not allowed in file names on common file systems.
const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Makes `name` safe to use as a file name.
///
/// Invalid characters become `_`, every run of whitespace becomes a single `_`, and leading or
/// trailing `_` are removed.
pub fn sanitize_filename(name: &str) -> String {
	let replaced: String = name
		.chars()
		.map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
		.collect();
	replaced.split_whitespace().collect::<Vec<_>>().join("_").trim_matches('_').to_string()
}

/// Container file name for a chart: `T_` for terminal charts, `S_` for sectional charts, and
/// the upper-cased first letter of `chart_type` otherwise.
pub fn output_filename(chart_name: &str, chart_type: &str) -> String {
	let prefix = match chart_type {
		"terminal" => "T".to_string(),
		"sectional" => "S".to_string(),
		other => other.chars().take(1).flat_map(char::to_uppercase).collect(),
	};
	format!("{prefix}_{}.mbtiles", sanitize_filename(chart_name))
}

/// Layer name stored in a container, derived from its file stem.
///
/// The chart type markers `T_`, `S_`, `terminal_` and `sectional_` are removed wherever they
/// occur.
pub fn layer_name_from_stem(stem: &str) -> String {
	["T_", "S_", "terminal_", "sectional_"]
		.iter()
		.fold(stem.to_string(), |name, marker| name.replace(marker, ""))
}
