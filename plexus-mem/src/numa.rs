//! Flat-to-NUMA page frame allocator mode switch.
//!
//! Before topology discovery completes, a domain kernel allocates pages from
//! a single flat free list populated from whatever memory the machine
//! master handed it. Once the domain's own NUMA-local memory ranges have
//! been planned and carved up, allocation switches to per-domain free
//! lists so that a domain never silently steals pages that belong to
//! another domain's local memory.
//!
//! The switch is one-way and is published with a release fence: once
//! [`NumaPageAllocator::activate`] returns, every hart in the domain that
//! observes `numa_ready == true` is guaranteed to also observe the fully
//! populated per-domain free lists, because the domains were seeded before
//! the flag was raised.

use core::sync::atomic::{AtomicBool, Ordering::Acquire, Ordering::Release};

use crate::pfa::{Alloc, FiloPageFrameAllocator};

/// A page frame allocator that starts out flat and switches to per-domain
/// free lists once topology discovery has assigned free pages to each
/// domain.
pub struct NumaPageAllocator<const MAX_DOMAINS: usize> {
	/// The flat free list used before NUMA assignment.
	flat: FiloPageFrameAllocator,
	/// Per-domain free lists, indexed by domain ID.
	domains: [FiloPageFrameAllocator; MAX_DOMAINS],
	/// Once `true`, [`Self::allocate`]/[`Self::free`] use `domains` instead of `flat`.
	numa_ready: AtomicBool,
}

impl<const MAX_DOMAINS: usize> NumaPageAllocator<MAX_DOMAINS> {
	/// Creates a new allocator in flat mode, with every per-domain free
	/// list empty.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			flat: FiloPageFrameAllocator::new(),
			domains: [const { FiloPageFrameAllocator::new() }; MAX_DOMAINS],
			numa_ready: AtomicBool::new(false),
		}
	}

	/// Returns whether the allocator has switched to per-domain mode.
	#[must_use]
	pub fn is_numa_ready(&self) -> bool {
		self.numa_ready.load(Acquire)
	}

	/// Seeds the flat free list with a page, for use before topology
	/// discovery runs.
	///
	/// # Safety
	/// See [`Alloc::free`].
	pub unsafe fn seed_flat(&self, frame: u64) {
		unsafe { self.flat.seed(frame) };
	}

	/// Seeds one domain's free list with a page frame, to be called while
	/// partitioning a discovered memory range across domains (see the
	/// memory-range planner).
	///
	/// # Safety
	/// See [`Alloc::free`]. The caller must also ensure `domain` is in
	/// bounds and that [`Self::activate`] has not yet been called.
	pub unsafe fn seed_domain(&self, domain: usize, frame: u64) {
		unsafe { self.domains[domain].seed(frame) };
	}

	/// Publishes the per-domain free lists and switches the allocator into
	/// NUMA mode. Irreversible.
	pub fn activate(&self) {
		self.numa_ready.store(true, Release);
	}

	/// Allocates a page frame local to `domain` if NUMA mode is active, or
	/// from the flat free list otherwise.
	///
	/// In NUMA mode, a domain with no free pages of its own does not fail
	/// the allocation outright: every other domain is scanned in ascending
	/// order and the first page found anywhere is returned. A page served
	/// from a remote domain this way is still a perfectly valid allocation;
	/// the caller has no obligation to free it back to the same domain.
	#[must_use]
	pub fn allocate(&self, domain: usize) -> Option<u64> {
		if self.numa_ready.load(Acquire) {
			if let Some(frame) = self.domains[domain].allocate() {
				return Some(frame);
			}

			self.domains
				.iter()
				.enumerate()
				.filter(|&(other, _)| other != domain)
				.find_map(|(_, list)| list.allocate())
		} else {
			self.flat.allocate()
		}
	}

	/// Frees a page frame back to `domain`'s free list if NUMA mode is
	/// active, or to the flat free list otherwise.
	///
	/// # Safety
	/// See [`Alloc::free`].
	pub unsafe fn free(&self, domain: usize, frame: u64) {
		if self.numa_ready.load(Acquire) {
			unsafe { self.domains[domain].free(frame) };
		} else {
			unsafe { self.flat.free(frame) };
		}
	}
}

impl<const MAX_DOMAINS: usize> Default for NumaPageAllocator<MAX_DOMAINS> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flat_mode_before_activation() {
		let alloc: NumaPageAllocator<4> = NumaPageAllocator::new();
		assert!(!alloc.is_numa_ready());

		let mut page = [0u8; 4096];
		let frame = page.as_mut_ptr() as u64 & !4095;
		unsafe { alloc.seed_flat(frame) };

		assert_eq!(alloc.allocate(0), Some(frame));
		assert_eq!(alloc.allocate(0), None);
	}

	#[test]
	fn switches_to_domain_lists_on_activate() {
		let alloc: NumaPageAllocator<2> = NumaPageAllocator::new();

		let mut pages = [[0u8; 4096 * 2]; 2];
		let frame0 = (pages[0].as_mut_ptr() as u64 + 4095) & !4095;
		let frame1 = (pages[1].as_mut_ptr() as u64 + 4095) & !4095;

		unsafe { alloc.seed_domain(0, frame0) };
		unsafe { alloc.seed_domain(1, frame1) };
		alloc.activate();

		assert!(alloc.is_numa_ready());
		assert_eq!(alloc.allocate(0), Some(frame0));
		assert_eq!(alloc.allocate(1), Some(frame1));
		assert_eq!(alloc.allocate(0), None);
	}

	#[test]
	fn falls_back_to_remote_domain_when_local_is_empty() {
		let alloc: NumaPageAllocator<3> = NumaPageAllocator::new();

		let mut page = [0u8; 4096 * 2];
		let frame = (page.as_mut_ptr() as u64 + 4095) & !4095;

		// Only domain 2 has a free page; domains 0 and 1 are empty.
		unsafe { alloc.seed_domain(2, frame) };
		alloc.activate();

		assert_eq!(alloc.allocate(0), Some(frame));
		assert_eq!(alloc.allocate(0), None);
		assert_eq!(alloc.allocate(1), None);
	}
}
