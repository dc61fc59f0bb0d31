//! Page frame allocator traits and implementations.

use core::sync::atomic::{
	AtomicU64,
	Ordering::{Acquire, Relaxed, Release},
};

/// A page frame allocator allocates physical memory in units of "page frames".
/// A page frame is a contiguous block of physical memory that is a multiple of
/// the requested page size (e.g. 4 KiB).
///
/// Consumers of this trait must ensure proper synchronization if the allocator
/// is shared between multiple processors. Implementations **should not** provide any
/// thread safety.
///
/// # Safety
/// Implementations **must** ensure that the returned frame address
///
/// - is page-aligned.
/// - is not already in use.
/// - is not in a reserved, bad, or unusable memory region.
/// - not overlapping with any other allocated frame.
///
/// Any and all bookkeeping operations must be safe and **MUST NOT panic**.
pub unsafe trait Alloc {
	/// Allocates a new page frame, returning the physical address of the page frame
	/// that was allocated. If `None` is returned, the domain is out of memory.
	fn allocate(&self) -> Option<u64>;

	/// Frees a page frame.
	///
	/// # Safety
	/// The following **must absolutely remain true**:
	///
	/// 1. Callers **must** ensure the passed frame address is valid and allocated, not in active
	///    use, and is not already freed. Implementors are under no obligation to ensure this.
	///
	/// 2. Callers **must** ensure the passed frame address is not in a reserved or unusable
	///    memory region.
	///
	/// 3. Callers **must** ensure the frame is page-aligned.
	unsafe fn free(&self, frame: u64);
}

/// The page size, in bytes, assumed by every allocator in this module.
pub const PAGE_SIZE: u64 = 4096;

/// Byte pattern written across a page when it is handed out by
/// [`Alloc::allocate`], so that a caller reading the page before
/// initializing it sees obviously-wrong data rather than whatever the
/// previous owner left behind.
#[cfg(debug_assertions)]
const ALLOC_JUNK: u8 = 0xAA;

/// Byte pattern written across a page when it is pushed onto a free list
/// by [`Alloc::free`]. Distinct from [`ALLOC_JUNK`] so that a page still
/// showing this pattern when `free` is called again can only mean it was
/// never reallocated in between — i.e. a double free.
#[cfg(debug_assertions)]
const FREE_JUNK: u8 = 0xFE;

/// First in, last out (FILO) page frame allocator.
///
/// Since each domain kernel boots with a flat (identity) mapping of its own
/// local memory, page frame addresses are dereferenced directly with no
/// translation step. The last-freed page's physical address is stored in
/// the allocator; freeing a page writes the previous last-free value into
/// the page's first eight bytes and advances the pointer, forming a FILO
/// stack of free pages with no external bookkeeping structure.
pub struct FiloPageFrameAllocator {
	/// The last-free page frame address.
	last_free: AtomicU64,
}

impl FiloPageFrameAllocator {
	/// Creates a new, empty FILO page frame allocator.
	#[inline]
	#[must_use]
	pub const fn new() -> Self {
		Self {
			last_free: AtomicU64::new(u64::MAX),
		}
	}

	/// Creates a new FILO page frame allocator with the given
	/// last-free page frame address.
	#[inline]
	#[must_use]
	pub fn with_last_free(last_free: u64) -> Self {
		Self {
			last_free: AtomicU64::new(last_free),
		}
	}

	/// Pushes a single page frame onto the free list without going through
	/// the standard `free` double-free bookkeeping. Used to seed the
	/// allocator from a discovered memory range at boot.
	///
	/// # Safety
	/// The caller must ensure `frame` is page-aligned, unused, and not
	/// already present in the free list.
	pub unsafe fn seed(&self, frame: u64) {
		unsafe { self.free(frame) };
	}
}

impl Default for FiloPageFrameAllocator {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl Alloc for FiloPageFrameAllocator {
	fn allocate(&self) -> Option<u64> {
		let mut loaded = self.last_free.load(Acquire);
		loop {
			if loaded == u64::MAX {
				return None;
			}

			// SAFETY: This might read garbage data if a racing allocation won the
			// SAFETY: CAS below; in that case the read is discarded and we retry.
			let new_free = unsafe { (loaded as *const u64).read_volatile() };

			if let Err(err) = self
				.last_free
				.compare_exchange(loaded, new_free, Release, Relaxed)
			{
				loaded = err;
			} else {
				#[cfg(debug_assertions)]
				{
					// SAFETY: we just won exclusive ownership of this
					// SAFETY: frame via the CAS above.
					unsafe { (loaded as *mut u8).write_bytes(ALLOC_JUNK, PAGE_SIZE as usize) };
					::plexus_dbgutil::__plexus_dbgutil_pfa_alloc(loaded);
				}
				return Some(loaded);
			}
		}
	}

	unsafe fn free(&self, frame: u64) {
		assert_eq!(frame % PAGE_SIZE, 0, "frame is not page-aligned");

		#[cfg(debug_assertions)]
		{
			// SAFETY: forwarded from the caller; reading back what we are
			// SAFETY: about to overwrite is always sound.
			let already_free = unsafe {
				core::slice::from_raw_parts(frame as *const u8, PAGE_SIZE as usize)
					.iter()
					.all(|&b| b == FREE_JUNK)
			};
			assert!(
				!already_free,
				"double free detected: frame {frame:#x} is already on a free list"
			);
		}

		let mut loaded = self.last_free.load(Acquire);
		loop {
			// SAFETY: We assume control of this frame; the caller must ensure that's the case.
			unsafe {
				#[cfg(debug_assertions)]
				(frame as *mut u8).write_bytes(FREE_JUNK, PAGE_SIZE as usize);
				(frame as *mut u64).write_volatile(loaded);
			}

			if let Err(err) = self
				.last_free
				.compare_exchange(loaded, frame, Release, Relaxed)
			{
				loaded = err;
			} else {
				#[cfg(debug_assertions)]
				::plexus_dbgutil::__plexus_dbgutil_pfa_free(frame);
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Returns a page-aligned address inside a leaked buffer, large enough
	/// that alignment never runs off the end.
	fn aligned_page() -> u64 {
		let buf = Box::leak(Box::new([0u8; PAGE_SIZE as usize * 2]));
		(buf.as_mut_ptr() as u64 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
	}

	#[test]
	fn round_trips_a_single_frame() {
		let pfa = FiloPageFrameAllocator::new();
		let frame = aligned_page();

		unsafe { pfa.seed(frame) };
		assert_eq!(pfa.allocate(), Some(frame));
		assert_eq!(pfa.allocate(), None);

		unsafe { pfa.free(frame) };
		assert_eq!(pfa.allocate(), Some(frame));
	}

	#[test]
	fn filo_order() {
		let pfa = FiloPageFrameAllocator::new();
		let a = aligned_page();
		let b = aligned_page();

		unsafe {
			pfa.seed(a);
			pfa.seed(b);
		}

		// Last seeded, first allocated.
		assert_eq!(pfa.allocate(), Some(b));
		assert_eq!(pfa.allocate(), Some(a));
		assert_eq!(pfa.allocate(), None);
	}

	#[test]
	#[cfg(debug_assertions)]
	fn allocate_junk_fills_the_page() {
		let pfa = FiloPageFrameAllocator::new();
		let frame = aligned_page();

		unsafe { pfa.seed(frame) };
		let got = pfa.allocate().unwrap();

		let bytes = unsafe { core::slice::from_raw_parts(got as *const u8, PAGE_SIZE as usize) };
		assert!(bytes.iter().all(|&b| b == ALLOC_JUNK));
	}

	#[test]
	#[cfg(debug_assertions)]
	#[should_panic(expected = "double free")]
	fn double_free_is_detected() {
		let pfa = FiloPageFrameAllocator::new();
		let frame = aligned_page();

		unsafe {
			pfa.free(frame);
			pfa.free(frame);
		}
	}
}
