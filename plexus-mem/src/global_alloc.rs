//! Provides the main global allocator for the Plexus kernel.
//!
//! This module is what allows for the use of `alloc`.

use core::{alloc::GlobalAlloc, ptr::NonNull};

use plexus_sync::{Lock, TicketMutex};

use crate::pfa::{Alloc, FiloPageFrameAllocator, PAGE_SIZE};

/// Alias for a [`buddy_system_allocator::Heap`] with a pre-defined order.
type Heap = buddy_system_allocator::Heap<64>;

/// The flat page frame allocator backing the kernel heap.
///
/// We instead use the global `ALLOCATOR` mutex to synchronize access to the
/// heap in order to avoid double-mutex deadlocking.
static PFA: FiloPageFrameAllocator = FiloPageFrameAllocator::new();

/// The global heap allocator for the Plexus kernel.
#[cfg_attr(all(not(feature = "std-alloc"), not(test)), global_allocator)]
static ALLOCATOR: GlobalLockedHeap<TicketMutex<Heap>> =
	GlobalLockedHeap(TicketMutex::new(Heap::empty()));

/// Newtype wrapper for the global allocator.
struct GlobalLockedHeap<L>(L)
where
	L: Lock<Target = Heap>;

unsafe impl<L> GlobalAlloc for GlobalLockedHeap<L>
where
	L: Lock<Target = Heap>,
{
	unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
		debug_assert!(
			layout.size() as u64 <= PAGE_SIZE,
			"allocation size too large: {}",
			layout.size()
		);

		let mut heap = self.0.lock();
		if let Ok(ptr) = heap.alloc(layout) {
			ptr.as_ptr()
		} else {
			try_rescue_heap::<L>(&mut heap);

			heap.alloc(layout)
				.map(core::ptr::NonNull::as_ptr)
				.unwrap_or(core::ptr::null_mut())
		}
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: core::alloc::Layout) {
		if let Some(ptr) = NonNull::new(ptr) {
			self.0.lock().dealloc(ptr, layout);
		}
	}
}

/// Attempts to rescue the heap by allocating a new page frame and adding it
/// to the heap.
fn try_rescue_heap<L>(heap: &mut <L as Lock>::Guard<'_>)
where
	L: Lock<Target = Heap>,
{
	let Some(page) = PFA.allocate() else {
		return;
	};

	plexus_macro::assert::aligns_to::<usize, 4096>();
	unsafe {
		heap.add_to_heap(page as usize, (page + PAGE_SIZE) as usize);
	}
}

/// Global page frame allocator proxy type.
///
/// A unit value of this type can be used in all places where a page frame
/// allocator is required in order to safely allocate pages from the global,
/// pre-NUMA heap page frame allocator.
pub struct GlobalPfa;

impl GlobalPfa {
	/// Exposes a physical address range to the global page frame allocator.
	///
	/// Equivalent to calling [`Alloc::free()`] on the `GlobalPfa` for each
	/// aligned page within the range, but is more efficient, especially on
	/// debug builds.
	///
	/// # Safety
	/// The caller **must** ensure that the range is valid, unused, not
	/// concurrently accessed by anything else, and directly addressable
	/// (identity-mapped) from the current hart.
	pub unsafe fn expose_phys_range(base: u64, length: u64) {
		// Synthesize a lock from the global allocator, effectively
		// synchronizing access to the PFA without a second mutex that
		// could deadlock against the global allocator.
		let lock = ALLOCATOR.0.lock();

		let aligned_base = (base + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
		let length = length.saturating_sub(aligned_base - base);

		debug_assert_eq!(aligned_base % PAGE_SIZE, 0);
		debug_assert_eq!(length % PAGE_SIZE, 0);

		#[cfg(debug_assertions)]
		::plexus_dbgutil::__plexus_dbgutil_pfa_will_mass_free(1);
		#[cfg(debug_assertions)]
		::plexus_dbgutil::__plexus_dbgutil_pfa_mass_free(aligned_base, aligned_base + length);

		for page in (aligned_base..(aligned_base + length)).step_by(PAGE_SIZE as usize) {
			// SAFETY: We're exposing a previously unknown range; safety
			// SAFETY: requirements are offloaded to the caller.
			unsafe {
				PFA.free(page);
			}
		}

		#[cfg(debug_assertions)]
		::plexus_dbgutil::__plexus_dbgutil_pfa_finished_mass_free();

		drop(lock);
	}
}

unsafe impl Alloc for GlobalPfa {
	fn allocate(&self) -> Option<u64> {
		PFA.allocate()
	}

	unsafe fn free(&self, frame: u64) {
		unsafe {
			PFA.free(frame);
		}
	}
}
