//! Worker pool sizing.
//!
//! Tile rendering and re-encoding are CPU-bound, every in-flight tile holds a decoded pixel
//! buffer, so the pool is bounded to the number of logical CPUs. The queue towards the single
//! container writer may hold more items, because encoded tiles are small.
//!
//! ```
//! use chartiles_core::ConcurrencyLimits;
//!
//! let limits = ConcurrencyLimits::default();
//! assert!(limits.queue_capacity >= limits.cpu_bound);
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
	/// Maximum number of tiles decoded, resampled or encoded at the same time.
	pub cpu_bound: usize,

	/// Capacity of the channel feeding encoded tiles to the container writer.
	pub queue_capacity: usize,
}

impl ConcurrencyLimits {
	pub fn new(cpu_bound: usize, queue_capacity: usize) -> Self {
		Self {
			cpu_bound: cpu_bound.max(1),
			queue_capacity: queue_capacity.max(1),
		}
	}

	/// Limits for a fixed number of workers, with a queue four times as deep.
	pub fn with_workers(workers: usize) -> Self {
		Self::new(workers, workers * 4)
	}

	pub fn cpu_count() -> usize {
		num_cpus::get()
	}
}

impl Default for ConcurrencyLimits {
	fn default() -> Self {
		Self::with_workers(num_cpus::get())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_limits() {
		let limits = ConcurrencyLimits::default();
		assert_eq!(limits.cpu_bound, num_cpus::get());
		assert_eq!(limits.queue_capacity, num_cpus::get() * 4);
	}

	#[test]
	fn minimum_one() {
		let limits = ConcurrencyLimits::new(0, 0);
		assert_eq!(limits, ConcurrencyLimits::new(1, 1));
		assert_eq!(ConcurrencyLimits::with_workers(0).cpu_bound, 1);
	}
}
