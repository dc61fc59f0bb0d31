//! Cross-domain barrier, built entirely on the IPI ring (see
//! [`crate::ring`]).
//!
//! The owner (the hart that created the barrier) decrements `remaining`
//! on each arrival and, once it hits zero, releases every waiter it has
//! recorded.

use core::sync::atomic::{
	AtomicUsize,
	Ordering::{AcqRel, Acquire, Relaxed},
};

use crate::ring::{self, CommRing};

/// Maximum number of waiters a single barrier can track.
///
/// Bounded so `Barrier` itself can be a plain fixed-size struct; real
/// barriers in this kernel synchronize one hart per domain, so this is
/// generous.
const MAX_WAITERS: usize = 64;

/// A cross-domain barrier. Created by one hart (the "owner"); every other
/// participant calls [`Barrier::wait`], which blocks until the owner has
/// observed every arrival.
pub struct Barrier {
	/// Hart ids that have not yet arrived.
	remaining: AtomicUsize,
	/// Addresses of each waiter's local spin flag, so the owner can clear
	/// them on release. `0` marks an unused slot.
	waiters: [AtomicUsize; MAX_WAITERS],
	/// Domain of the barrier's owner, used to route `on_arrive` messages.
	owner_domain: u16,
	/// Hart id of the barrier's owner, within `owner_domain`.
	owner_hartid: u32,
}

impl Barrier {
	/// Creates a barrier that expects `n` arrivals, owned by the calling
	/// hart.
	#[must_use]
	pub fn new(n: usize, owner_domain: u16, owner_hartid: u32) -> Self {
		Self {
			remaining: AtomicUsize::new(n),
			waiters: [const { AtomicUsize::new(0) }; MAX_WAITERS],
			owner_domain,
			owner_hartid,
		}
	}

	/// Runs on the owner hart in response to an arrival message: records
	/// the waiter's flag address and decrements the remaining count. Once
	/// it reaches zero, every recorded waiter is released.
	fn on_arrive(&self, wait_flag_addr: usize) {
		let mut slot = 0;
		while slot < MAX_WAITERS
			&& self.waiters[slot]
				.compare_exchange(0, wait_flag_addr, AcqRel, Relaxed)
				.is_err()
		{
			slot += 1;
		}
		debug_assert!(slot < MAX_WAITERS, "barrier has more waiters than MAX_WAITERS");

		if self.remaining.fetch_sub(1, AcqRel) == 1 {
			self.release_all();
		}
	}

	/// Clears every recorded waiter's spin flag, in any order.
	fn release_all(&self) {
		for waiter in &self.waiters {
			let addr = waiter.swap(0, AcqRel);
			if addr != 0 {
				// SAFETY: `addr` was published by a live `wait` call still
				// SAFETY: spinning on its local `go` flag below.
				unsafe { (addr as *mut u8).write(0) };
			}
		}
	}

	/// Blocks the calling hart until every expected participant (this one
	/// included) has called `wait`.
	pub fn wait(&self, combuf: &CommRing) {
		let mut go: u8 = 1;
		let flag_addr = core::ptr::from_mut(&mut go) as usize;

		let _ = ring::send(
			combuf,
			self.owner_hartid,
			on_arrive_handler,
			core::ptr::from_ref(self) as usize,
			flag_addr,
		);

		while unsafe { core::ptr::read_volatile(&go) } != 0 {
			core::hint::spin_loop();
		}
	}

	/// Reads the number of arrivals still outstanding, for diagnostics.
	#[must_use]
	pub fn remaining(&self) -> usize {
		self.remaining.load(Acquire)
	}
}

/// The ring handler wired up for barrier arrival messages: `a1` is the
/// barrier's address, `a2` is the arriving hart's local flag address.
fn on_arrive_handler(a1: usize, a2: usize) {
	// SAFETY: `a1` is a `Barrier` reference published by `Barrier::wait`,
	// SAFETY: which outlives the round trip since it blocks on `go`.
	let barrier = unsafe { &*(a1 as *const Barrier) };
	barrier.on_arrive(a2);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ring::Ring;

	#[test]
	fn single_waiter_barrier_releases_immediately() {
		let barrier = Barrier::new(1, 0, 0);
		assert_eq!(barrier.remaining(), 1);
		barrier.on_arrive(0);
		assert_eq!(barrier.remaining(), 0);
	}

	#[test]
	fn release_all_clears_recorded_flags() {
		let barrier = Barrier::new(2, 0, 0);
		let mut flag_a: u8 = 1;
		let mut flag_b: u8 = 1;

		barrier.on_arrive(core::ptr::from_mut(&mut flag_a) as usize);
		assert_eq!(flag_a, 1);
		barrier.on_arrive(core::ptr::from_mut(&mut flag_b) as usize);

		assert_eq!(flag_a, 0);
		assert_eq!(flag_b, 0);
	}

	#[test]
	fn ring_is_unused_placeholder_for_type_check() {
		let _: Ring<4> = Ring::new();
	}
}
