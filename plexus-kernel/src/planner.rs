//! Memory-range planner: carves a domain's discovered RAM into usable,
//! firmware/DTB/kernel/combuf-reserved ranges.
//!
//! Every exclusion (firmware reservation, the DTB blob, a kernel image, a
//! communication buffer) goes through the same pure interval operation,
//! [`separate_memrange`], so the splitting logic only has to be correct
//! once.

use crate::{
	limits::COMM_BUF_SZ,
	topology::{DomainId, Machine, RangeId, RangeKind, TopologyError},
};

/// Rounds `addr` up to the next multiple of the page size.
fn page_round_up(addr: u64) -> u64 {
	(addr + (plexus_mem::pfa::PAGE_SIZE - 1)) & !(plexus_mem::pfa::PAGE_SIZE - 1)
}

/// The result of splitting `[a, a+len)` against an exclusion mask
/// `[mask_start, mask_start+mask_len)`.
///
/// Each field is `Some((start, len))` only if that piece is nonempty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Split {
	/// The portion of the input strictly before the mask.
	pub prefix: Option<(u64, u64)>,
	/// The portion of the input that overlaps the mask.
	pub overlap: Option<(u64, u64)>,
	/// The portion of the input strictly after the mask.
	pub suffix: Option<(u64, u64)>,
}

/// Splits the interval `[start, start+len)` against the exclusion mask
/// `[mask_start, mask_start+mask_len)`, producing up to three
/// non-overlapping pieces: whatever lies before the mask, whatever
/// overlaps it, and whatever lies after.
///
/// A pure function with no topology side effects; every exclusion step in
/// [`plan_domain_memory`] calls this once per mask and re-adds whichever
/// pieces come back non-empty.
#[must_use]
pub fn separate_memrange(start: u64, len: u64, mask_start: u64, mask_len: u64) -> Split {
	let end = start + len;
	let mask_end = mask_start + mask_len;

	if mask_end <= start || mask_start >= end {
		// No overlap at all: the whole input is either prefix or suffix
		// relative to the mask, but since there's no overlap we report it
		// as a single prefix piece to keep exactly one non-empty field.
		return Split {
			prefix: Some((start, len)),
			..Default::default()
		};
	}

	let overlap_start = start.max(mask_start);
	let overlap_end = end.min(mask_end);

	let prefix = (overlap_start > start).then_some((start, overlap_start - start));
	let overlap = Some((overlap_start, overlap_end - overlap_start));
	let suffix = (end > overlap_end).then_some((overlap_end, end - overlap_end));

	Split {
		prefix,
		overlap,
		suffix,
	}
}

/// One discovered `(addr, length)` memory region from a `memory@...` DTB
/// node, and the masks to exclude from it before it becomes usable RAM.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredRange {
	/// Base physical address.
	pub start: u64,
	/// Length in bytes.
	pub len: u64,
}

/// One exclusion to carve out of a discovered range: a physical extent
/// and what kind of range it should become once excluded.
#[derive(Debug, Clone, Copy)]
pub struct Exclusion {
	/// Base physical address of the exclusion.
	pub start: u64,
	/// Length in bytes.
	pub len: u64,
	/// What the excluded range becomes once carved out.
	pub kind: RangeKind,
}

/// Applies `exclusions` to `discovered` in order, adding every resulting
/// piece (excluded or not) to `domain`'s memory ranges in `machine`.
///
/// This implements steps 1-3 of the planner: extracting usable
/// sub-ranges by excluding firmware reservations, the DTB blob, and the
/// kernel image, in that order. Selecting `kernelmr`/`combuf` (steps 4-5)
/// happens afterwards, once every domain's usable ranges exist; see
/// [`select_kernelmr`] and [`select_combuf`].
pub fn plan_domain_memory(
	machine: &mut Machine,
	domain: DomainId,
	discovered: &DiscoveredRange,
	exclusions: &[Exclusion],
) -> Result<(), TopologyError> {
	let mut pieces = alloc_stack_ranges(discovered.start, discovered.len);

	for exclusion in exclusions {
		let mut next = RangeStack::new();
		for (start, len, kind) in pieces.drain() {
			if kind != RangeKind::Normal {
				// Already excluded by an earlier mask; don't re-split it.
				next.push(start, len, kind)?;
				continue;
			}

			let split = separate_memrange(start, len, exclusion.start, exclusion.len);
			if let Some((s, l)) = split.prefix {
				next.push(s, l, RangeKind::Normal)?;
			}
			if let Some((s, l)) = split.overlap {
				next.push(s, l, exclusion.kind)?;
			}
			if let Some((s, l)) = split.suffix {
				next.push(s, l, RangeKind::Normal)?;
			}
		}
		pieces = next;
	}

	for (start, len, kind) in pieces.drain() {
		if len == 0 {
			continue;
		}
		machine.add_memrange(domain, start, len, kind != RangeKind::Normal, kind)?;
	}

	Ok(())
}

/// Fixed-capacity scratch stack used while iteratively excluding masks
/// from a discovered range; large enough for the handful of exclusions
/// the planner applies (firmware reservations, DTB, kernel image).
struct RangeStack {
	items: [(u64, u64, RangeKind); 16],
	len:   usize,
}

impl RangeStack {
	fn new() -> Self {
		Self {
			items: [(0, 0, RangeKind::Normal); 16],
			len:   0,
		}
	}

	fn push(&mut self, start: u64, len: u64, kind: RangeKind) -> Result<(), TopologyError> {
		if self.len >= self.items.len() {
			return Err(TopologyError::CapacityExhausted);
		}
		self.items[self.len] = (start, len, kind);
		self.len += 1;
		Ok(())
	}

	fn drain(&mut self) -> impl Iterator<Item = (u64, u64, RangeKind)> + '_ {
		let len = self.len;
		self.len = 0;
		self.items[..len].iter().copied()
	}
}

/// Seeds a [`RangeStack`] with the single, unexcluded discovered range.
fn alloc_stack_ranges(start: u64, len: u64) -> RangeStack {
	let mut stack = RangeStack::new();
	stack.items[0] = (start, len, RangeKind::Normal);
	stack.len = 1;
	stack
}

/// Selects `domain`'s `kernelmr`: the lowest-address non-reserved range
/// with length at least `page_round_up(ksize)`. Splits it into a
/// kernel-sized slot (re-tagged [`RangeKind::KernelImage`]) and a
/// remainder range re-added as [`RangeKind::Normal`].
pub fn select_kernelmr(
	machine: &mut Machine,
	domain: DomainId,
	ksize: u64,
) -> Result<RangeId, SelectionError> {
	let needed = page_round_up(ksize);

	let mut candidate = None;
	machine.for_each_memrange_in_domain(domain, |r| {
		if !r.reserved && r.len() >= needed && candidate.map(|(s, _)| r.start < s).unwrap_or(true) {
			candidate = Some((r.start, r.id));
		}
	});

	let (start, id) = candidate.ok_or(SelectionError::NoRangeLargeEnough)?;
	let remainder_len = machine.range(id).len() - needed;

	let range = machine.range_mut(id);
	range.end = start + needed;
	range.kind = RangeKind::KernelImage;
	range.reserved = true;

	if remainder_len > 0 {
		machine
			.add_memrange(domain, start + needed, remainder_len, false, RangeKind::Normal)
			.map_err(SelectionError::Topology)?;
	}

	Ok(id)
}

/// Selects and carves out `domain`'s `combuf` range.
///
/// `is_local` distinguishes the asymmetric placement rule: the current
/// ("my") domain's combuf is the range immediately following its own
/// `kernelmr`; every other domain's combuf is carved from the top of its
/// highest-address non-reserved range large enough to hold it.
pub fn select_combuf(
	machine: &mut Machine,
	domain: DomainId,
	kernelmr: RangeId,
	is_local: bool,
) -> Result<RangeId, SelectionError> {
	if is_local {
		let kernel_end = machine.range(kernelmr).end;

		let mut found = None;
		machine.for_each_memrange_in_domain(domain, |r| {
			if !r.reserved && r.start == kernel_end && r.len() >= COMM_BUF_SZ {
				found = Some(r.id);
			}
		});

		let id = found.ok_or(SelectionError::NoRangeLargeEnough)?;
		carve_combuf_from(machine, domain, id, kernel_end, kernel_end + COMM_BUF_SZ)
	} else {
		let mut candidate = None;
		machine.for_each_memrange_in_domain(domain, |r| {
			if !r.reserved
				&& r.len() >= COMM_BUF_SZ
				&& candidate.map(|(s, _)| r.start > s).unwrap_or(true)
			{
				candidate = Some((r.start, r.id));
			}
		});

		let (_, id) = candidate.ok_or(SelectionError::NoRangeLargeEnough)?;
		let end = machine.range(id).end;
		carve_combuf_from(machine, domain, id, end - COMM_BUF_SZ, end)
	}
}

/// Carves `[combuf_start, combuf_end)` out of range `id`, adding whatever
/// remains on either side back as normal ranges. The local branch of
/// [`select_combuf`] carves off the low end of the range following its
/// kernelmr (no low-side remainder); the remote branch carves off the top
/// of its chosen range (no high-side remainder).
fn carve_combuf_from(
	machine: &mut Machine,
	domain: DomainId,
	id: RangeId,
	combuf_start: u64,
	combuf_end: u64,
) -> Result<RangeId, SelectionError> {
	let range = machine.range(id);
	let (start, end) = (range.start, range.end);
	let prefix_len = combuf_start - start;
	let suffix_len = end - combuf_end;

	let range = machine.range_mut(id);
	range.start = combuf_start;
	range.end = combuf_end;
	range.kind = RangeKind::CombufRange;
	range.reserved = true;

	if prefix_len > 0 {
		machine
			.add_memrange(domain, start, prefix_len, false, RangeKind::Normal)
			.map_err(SelectionError::Topology)?;
	}
	if suffix_len > 0 {
		machine
			.add_memrange(domain, combuf_end, suffix_len, false, RangeKind::Normal)
			.map_err(SelectionError::Topology)?;
	}

	Ok(id)
}

/// Failure selecting a `kernelmr` or `combuf` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
	/// No non-reserved range in the domain was large enough.
	NoRangeLargeEnough,
	/// The topology's fixed-capacity tables were exhausted while adding a
	/// remainder range.
	Topology(TopologyError),
}

#[cfg(test)]
mod tests {
	use plexus_mem::pfa::FiloPageFrameAllocator;

	use super::*;
	use crate::topology::DomainId;

	#[test]
	fn separate_memrange_handles_no_overlap() {
		let split = separate_memrange(0x1000, 0x1000, 0x4000, 0x1000);
		assert_eq!(split.prefix, Some((0x1000, 0x1000)));
		assert_eq!(split.overlap, None);
		assert_eq!(split.suffix, None);
	}

	#[test]
	fn separate_memrange_handles_interior_overlap() {
		let split = separate_memrange(0x1000, 0x3000, 0x2000, 0x1000);
		assert_eq!(split.prefix, Some((0x1000, 0x1000)));
		assert_eq!(split.overlap, Some((0x2000, 0x1000)));
		assert_eq!(split.suffix, Some((0x3000, 0x1000)));
	}

	#[test]
	fn separate_memrange_handles_full_consumption() {
		let split = separate_memrange(0x1000, 0x1000, 0x0, 0x10000);
		assert_eq!(split.prefix, None);
		assert_eq!(split.overlap, Some((0x1000, 0x1000)));
		assert_eq!(split.suffix, None);
	}

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
	fn plan_domain_memory_excludes_dtb_and_firmware() {
		let (pfa, _backing) = seeded_pfa(4);
		let machine = Machine::init(DomainId(0), pfa).unwrap();
		let d0 = machine.add_domain(0).unwrap();

		plan_domain_memory(
			machine,
			d0,
			&DiscoveredRange {
				start: 0x8000_0000,
				len:   0x0400_0000,
			},
			&[
				Exclusion {
					start: 0x8000_0000,
					len:   0x0020_0000,
					kind:  RangeKind::Firmware,
				},
				Exclusion {
					start: 0x8300_0000,
					len:   0x0010_0000,
					kind:  RangeKind::Dtb,
				},
			],
		)
		.unwrap();

		let mut kinds = Vec::new();
		machine.for_each_memrange_in_domain(d0, |r| kinds.push((r.start, r.len(), r.kind)));
		kinds.sort_by_key(|(start, ..)| *start);

		assert_eq!(kinds[0], (0x8000_0000, 0x0020_0000, RangeKind::Firmware));
		assert_eq!(kinds[1].2, RangeKind::Normal);
		assert_eq!(kinds[2], (0x8300_0000, 0x0010_0000, RangeKind::Dtb));
		assert_eq!(kinds[3].2, RangeKind::Normal);
	}

	#[test]
	fn select_kernelmr_splits_lowest_range() {
		let (pfa, _backing) = seeded_pfa(4);
		let machine = Machine::init(DomainId(0), pfa).unwrap();
		let d0 = machine.add_domain(0).unwrap();
		machine
			.add_memrange(d0, 0x8000_0000, 0x0100_0000, false, RangeKind::Normal)
			.unwrap();

		let kernelmr = select_kernelmr(machine, d0, 0x0010_0000).unwrap();
		let range = machine.range(kernelmr);
		assert_eq!(range.start, 0x8000_0000);
		assert_eq!(range.kind, RangeKind::KernelImage);
		assert!(range.reserved);

		let mut remainder_found = false;
		machine.for_each_memrange_in_domain(d0, |r| {
			if r.kind == RangeKind::Normal && r.start == range.end {
				remainder_found = true;
			}
		});
		assert!(remainder_found);
	}

	#[test]
	fn select_combuf_local_branch_only_carves_comm_buf_sz() {
		let (pfa, _backing) = seeded_pfa(4);
		let machine = Machine::init(DomainId(0), pfa).unwrap();
		let d0 = machine.add_domain(0).unwrap();
		machine
			.add_memrange(d0, 0x8020_0000, 0x03e0_0000, false, RangeKind::Normal)
			.unwrap();

		let kernelmr = select_kernelmr(machine, d0, 0x0080_0000).unwrap();
		let combuf = select_combuf(machine, d0, kernelmr, true).unwrap();

		let range = machine.range(combuf);
		assert_eq!(range.len(), COMM_BUF_SZ);
		assert_eq!(range.kind, RangeKind::CombufRange);
		assert!(range.reserved);

		// The range doesn't end where the combuf does: there must be a
		// free remainder left over for the domain's own allocator.
		let mut remainder_len = 0;
		machine.for_each_memrange_in_domain(d0, |r| {
			if r.kind == RangeKind::Normal && r.start == range.end {
				remainder_len = r.len();
			}
		});
		assert!(remainder_len > 0, "local combuf carve must leave a free remainder");
	}
}
