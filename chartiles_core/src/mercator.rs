//! Spherical Web Mercator (EPSG:3857) conversions.
//!
//! Three coordinate spaces are used throughout the crates:
//! - geographic `(lon, lat)` in degrees (EPSG:4326),
//! - projected `(x, y)` in metres (EPSG:3857),
//! - normalized world coordinates `(u, v)` in `[0, 1]`, with `v = 0` at the northern edge.
//!
//! A pixel of a tile at zoom `z` with edge length `size` covers `1 / (size · 2^z)` world units.

use std::f64::consts::PI;

/// Latitude at which the Web Mercator square ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the circumference of the earth in metres, the extent of EPSG:3857 on each axis.
pub const HALF_CIRCUMFERENCE: f64 = PI * EARTH_RADIUS;

pub fn lon_to_x(lon: f64) -> f64 {
	lon.to_radians() * EARTH_RADIUS
}

pub fn lat_to_y(lat: f64) -> f64 {
	(PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS
}

pub fn x_to_lon(x: f64) -> f64 {
	(x / EARTH_RADIUS).to_degrees()
}

pub fn y_to_lat(y: f64) -> f64 {
	(2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees()
}

/// Geographic coordinates to normalized world coordinates.
pub fn lonlat_to_world(lon: f64, lat: f64) -> (f64, f64) {
	let u = lon / 360.0 + 0.5;
	let v = 0.5 - (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() / (2.0 * PI);
	(u, v)
}

/// Normalized world coordinates to geographic coordinates.
pub fn world_to_lonlat(u: f64, v: f64) -> (f64, f64) {
	let lon = (u - 0.5) * 360.0;
	let lat = (PI * (1.0 - 2.0 * v)).sinh().atan().to_degrees();
	(lon, lat)
}

/// `true` if the point lies inside the square covered by the tile pyramid.
pub fn is_projectable(lon: f64, lat: f64) -> bool {
	lon.is_finite() && lat.is_finite() && (-180.0..=180.0).contains(&lon) && lat.abs() <= MAX_LATITUDE
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;
	use rstest::rstest;

	#[rstest]
	#[case(0.0, 0.0)]
	#[case(-170.0, 62.0)]
	#[case(13.404954, 52.520008)]
	#[case(179.9, -84.9)]
	fn world_round_trip(#[case] lon: f64, #[case] lat: f64) {
		let (u, v) = lonlat_to_world(lon, lat);
		let (lon2, lat2) = world_to_lonlat(u, v);
		assert_relative_eq!(lon, lon2, epsilon = 1e-9);
		assert_relative_eq!(lat, lat2, epsilon = 1e-9);
	}

	#[test]
	fn metres_round_trip() {
		assert_relative_eq!(lon_to_x(180.0), HALF_CIRCUMFERENCE, epsilon = 1e-6);
		assert_relative_eq!(lat_to_y(MAX_LATITUDE), HALF_CIRCUMFERENCE, epsilon = 1e-3);
		assert_relative_eq!(x_to_lon(lon_to_x(-122.5)), -122.5, epsilon = 1e-9);
		assert_relative_eq!(y_to_lat(lat_to_y(47.25)), 47.25, epsilon = 1e-9);
	}

	#[test]
	fn world_corners() {
		assert_eq!(lonlat_to_world(-180.0, 0.0).0, 0.0);
		assert_relative_eq!(lonlat_to_world(0.0, MAX_LATITUDE).1, 0.0, epsilon = 1e-9);
		assert_relative_eq!(lonlat_to_world(0.0, -MAX_LATITUDE).1, 1.0, epsilon = 1e-9);
	}

	#[test]
	fn projectable() {
		assert!(is_projectable(-180.0, 85.0));
		assert!(!is_projectable(-180.1, 0.0));
		assert!(!is_projectable(0.0, 86.0));
		assert!(!is_projectable(f64::NAN, 0.0));
	}
}
