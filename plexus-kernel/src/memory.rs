//! Glue between the topology model and the NUMA-aware page frame
//! allocator: seeding each domain's free list from its planned memory
//! ranges, and answering "which domain owns this physical page" queries.

use plexus_mem::{numa::NumaPageAllocator, pfa::Alloc};

use crate::{
	limits::MAX_DOMAINS,
	topology::{DomainId, Machine, RangeKind},
};

/// The kernel's page frame allocator, sized for [`MAX_DOMAINS`] NUMA
/// domains. Starts in flat mode; [`assign_freepages`] seeds the
/// per-domain lists and [`NumaPageAllocator::activate`] publishes them.
pub static PFA: NumaPageAllocator<MAX_DOMAINS> = NumaPageAllocator::new();

/// Walks every non-reserved range of every domain in `machine`, seeding
/// [`PFA`]'s per-domain free list with each page. Does not activate NUMA
/// mode; the caller does that once every domain's ranges (including
/// remote ones loaded from the DTB) have been seeded.
///
/// # Safety
/// Every non-reserved range in `machine` must describe physical memory
/// that is otherwise unused and safe to hand out as free pages.
pub unsafe fn assign_freepages(machine: &Machine) {
	machine.for_each_domain(|domain| {
		machine.for_each_memrange_in_domain(domain.id, |range| {
			if range.kind != RangeKind::Normal || range.reserved {
				return;
			}

			let mut page = range.start.next_multiple_of(plexus_mem::pfa::PAGE_SIZE);
			while page + plexus_mem::pfa::PAGE_SIZE <= range.end {
				// SAFETY: forwarded from the caller.
				unsafe { PFA.seed_domain(domain.id.0 as usize, page) };
				page += plexus_mem::pfa::PAGE_SIZE;
			}
		});
	});
}

/// Allocates a page local to `domain`, falling back to a remote domain
/// if `domain` has none free (see [`NumaPageAllocator::allocate`]).
#[must_use]
pub fn kalloc(domain: DomainId) -> Option<u64> {
	PFA.allocate(domain.0 as usize)
}

/// Frees page `pa` back to its owning domain's free list, resolving the
/// owner from `machine`'s planned ranges rather than trusting the caller.
///
/// # Panics
/// Panics if `pa` falls outside every planned range: a page this kernel
/// handed out must belong to some domain's memory, so the lookup failing
/// means topology and the allocator have diverged.
///
/// # Safety
/// See [`Alloc::free`].
pub unsafe fn kfree(machine: &Machine, pa: u64) {
	let domain = owning_domain(machine, pa).expect("freed page is not owned by any planned range");
	// SAFETY: forwarded from the caller.
	unsafe { PFA.free(domain.0 as usize, pa) };
}

/// Looks up which domain owns the memory range containing `addr`.
#[must_use]
pub fn owning_domain(machine: &Machine, addr: u64) -> Option<DomainId> {
	machine
		.find_memrange(addr)
		.map(|id| machine.range(id).domain)
}

#[cfg(test)]
mod tests {
	use plexus_mem::pfa::FiloPageFrameAllocator;

	use super::*;
	use crate::topology::RangeKind;

	fn seeded_pfa(pages: usize) -> (&'static FiloPageFrameAllocator, Vec<Box<[u8; 4096]>>) {
		let pfa: &'static FiloPageFrameAllocator = Box::leak(Box::new(FiloPageFrameAllocator::new()));
		let mut backing = Vec::new();
		for _ in 0..pages {
			let mut page = Box::new([0u8; 4096]);
			let addr = page.as_mut_ptr() as u64;
			unsafe { pfa.seed(addr) };
			backing.push(page);
		}
		(pfa, backing)
	}

	#[test]
	fn owning_domain_matches_planned_range() {
		let (pfa, _backing) = seeded_pfa(4);
		let machine = Machine::init(DomainId(0), pfa).unwrap();
		let d0 = machine.add_domain(0).unwrap();
		machine
			.add_memrange(d0, 0x8000_0000, 0x1000, false, RangeKind::Normal)
			.unwrap();

		assert_eq!(owning_domain(machine, 0x8000_0500), Some(d0));
		assert_eq!(owning_domain(machine, 0x9000_0000), None);
	}

	#[test]
	fn kfree_resolves_owner_from_topology() {
		let (pfa, _backing) = seeded_pfa(4);
		let machine = Machine::init(DomainId(0), pfa).unwrap();
		let d0 = machine.add_domain(0).unwrap();

		// A real, page-aligned backing page: `free` writes to it directly,
		// so the literal addresses used elsewhere in this module's tests
		// (e.g. `0x8000_0000`) aren't safe to hand to it.
		let mut page = Box::new([0u8; 4096]);
		let frame = page.as_mut_ptr() as u64;
		assert_eq!(frame % 4096, 0, "Box<[u8; 4096]> should be page-aligned");
		machine
			.add_memrange(d0, frame, 0x1000, false, RangeKind::Normal)
			.unwrap();

		// SAFETY: `frame` is page-aligned, owned exclusively by this test,
		// and falls within the range just added for `d0`.
		unsafe { kfree(machine, frame) };
		assert_eq!(PFA.allocate(d0.0 as usize), Some(frame));
	}

	#[test]
	#[should_panic(expected = "not owned by any planned range")]
	fn kfree_panics_on_unowned_page() {
		let (pfa, _backing) = seeded_pfa(4);
		let machine = Machine::init(DomainId(0), pfa).unwrap();
		machine.add_domain(0).unwrap();

		// SAFETY: panics before reaching the free list.
		unsafe { kfree(machine, 0x9000_0000) };
	}
}
