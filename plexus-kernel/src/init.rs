//! Topology bring-up: turns the raw FDT blob the boot hart is handed
//! into a fully planned [`Machine`] — domains, CPUs, memory ranges
//! (kernelmr/combuf already carved out), and devices.
//!
//! Kept separate from [`crate::boot`]'s entry points the way the
//! teacher's architecture crates keep `init` (subsystem bring-up)
//! distinct from `boot` (entry-point sequencing).

use plexus_dtb::{CellSizes, FdtHeader, FdtToken, RegIter};
use plexus_mem::global_alloc::GlobalPfa;

use crate::{
	boot::BootError,
	devices,
	limits::{KERNEL_IMAGE_MAX_SIZE, MAX_CPUS_TOTAL, MAX_DOMAINS, MAX_RANGES_TOTAL},
	planner::{self, DiscoveredRange, Exclusion},
	topology::{DomainId, Machine, RangeKind},
};

/// Upper bound on firmware `reserved-memory` children a single DTB is
/// expected to name (QEMU's `virt` machine ships one or two).
const MAX_RESERVATIONS: usize = 16;

/// Everything [`scan_dtb`] pulls out of the tree in a single pass, before
/// any domain exists to own it.
struct DtbScan {
	cpus:           [(u32, u16); MAX_CPUS_TOTAL],
	cpu_count:      usize,
	mem:            [(u16, u64, u64); MAX_RANGES_TOTAL],
	mem_count:      usize,
	reserved:       [(u64, u64); MAX_RESERVATIONS],
	reserved_count: usize,
}

impl DtbScan {
	fn new() -> Self {
		Self {
			cpus:           [(0, 0); MAX_CPUS_TOTAL],
			cpu_count:      0,
			mem:            [(0, 0, 0); MAX_RANGES_TOTAL],
			mem_count:      0,
			reserved:       [(0, 0); MAX_RESERVATIONS],
			reserved_count: 0,
		}
	}

	fn push_cpu(&mut self, hartid: u32, numa: u16) {
		if self.cpu_count < self.cpus.len() {
			self.cpus[self.cpu_count] = (hartid, numa);
			self.cpu_count += 1;
		}
	}

	fn push_mem(&mut self, numa: u16, start: u64, len: u64) {
		if len > 0 && self.mem_count < self.mem.len() {
			self.mem[self.mem_count] = (numa, start, len);
			self.mem_count += 1;
		}
	}

	fn push_reserved(&mut self, start: u64, len: u64) {
		if len > 0 && self.reserved_count < self.reserved.len() {
			self.reserved[self.reserved_count] = (start, len);
			self.reserved_count += 1;
		}
	}
}

type Tokens<'a, I> = core::iter::Peekable<I>;

/// Walks the `reserved-memory` node's children, collecting each one's
/// `reg` extent as a firmware exclusion. Called right after the
/// `reserved-memory` node token itself, so depth starts at one open node.
fn take_reserved_memory<'a>(
	tokens: &mut Tokens<'a, impl Iterator<Item = (FdtToken<'a>, CellSizes)>>,
	scan: &mut DtbScan,
) {
	let mut depth = 1usize;
	while depth > 0 {
		let Some((token, _)) = tokens.next() else {
			break;
		};
		match token {
			FdtToken::Node { .. } => {
				depth += 1;
				let mut start = 0u64;
				let mut len = 0u64;
				while let Some((FdtToken::Property { .. }, _)) = tokens.peek() {
					let Some((FdtToken::Property { name, value }, cells)) = tokens.next() else {
						unreachable!()
					};
					if name.to_bytes() == b"reg" {
						if let Some((s, l)) = RegIter::new(value, cells).next() {
							start = s;
							len = l;
						}
					}
				}
				scan.push_reserved(start, len);
			}
			FdtToken::EndNode => depth -= 1,
			_ => {}
		}
	}
}

/// Walks the whole FDT once, collecting every `cpu@`, `memory@`, and
/// `reserved-memory` child node.
fn scan_dtb(header: &FdtHeader) -> DtbScan {
	let mut tokens = header.iter_with_cells().peekable();
	let mut scan = DtbScan::new();

	while let Some((token, _)) = tokens.next() {
		let FdtToken::Node { name } = token else {
			continue;
		};

		if plexus_dtb::starts_with_prefix(name, "cpu@") {
			let mut hartid = 0u32;
			let mut numa = 0u16;
			while let Some((FdtToken::Property { .. }, _)) = tokens.peek() {
				let Some((FdtToken::Property { name, value }, cells)) = tokens.next() else {
					unreachable!()
				};
				match name.to_bytes() {
					b"reg" => {
						if let Some((addr, _)) = RegIter::new(value, cells).next() {
							hartid = addr as u32;
						}
					}
					b"numa-node-id" => {
						numa = plexus_dtb::first_u32(value).unwrap_or(0) as u16;
					}
					_ => {}
				}
			}
			scan.push_cpu(hartid, numa);
		} else if plexus_dtb::starts_with_prefix(name, "memory@") {
			let mut numa = 0u16;
			while let Some((FdtToken::Property { .. }, _)) = tokens.peek() {
				let Some((FdtToken::Property { name, value }, cells)) = tokens.next() else {
					unreachable!()
				};
				match name.to_bytes() {
					b"numa-node-id" => numa = plexus_dtb::first_u32(value).unwrap_or(0) as u16,
					b"reg" => {
						for (start, len) in RegIter::new(value, cells) {
							scan.push_mem(numa, start, len);
						}
					}
					_ => {}
				}
			}
		} else if name.to_bytes() == b"reserved-memory" {
			take_reserved_memory(&mut tokens, &mut scan);
		}
	}

	scan
}

/// Builds and fully plans this kernel instance's [`Machine`] from the FDT
/// blob at `dtb_pa`: topology discovery (§4.2), memory planning (§4.4),
/// and device mapping (§4.5).
///
/// `boot_hartid` names the hart running this call; the domain it belongs
/// to becomes `machine.current_domain`.
pub fn build_topology(dtb_pa: u64, boot_hartid: u32) -> Result<&'static mut Machine, BootError> {
	let header = FdtHeader::from(dtb_pa as *const u8, None)?;
	let scan = scan_dtb(header);

	let current_domain = scan.cpus[..scan.cpu_count]
		.iter()
		.find(|&&(hartid, _)| hartid == boot_hartid)
		.map_or(0, |&(_, numa)| numa);

	let machine = Machine::init(DomainId(current_domain), &GlobalPfa)?;

	for &(hartid, numa) in &scan.cpus[..scan.cpu_count] {
		let domain = machine.find_domain(numa, true)?.expect("just created above");
		let cpu = machine.add_cpu(domain, hartid)?;
		if machine.domain_master(domain).is_none() {
			machine.set_master(domain, cpu);
		}
	}

	// Exclusions applied to every discovered range, in the order §4.4
	// requires: firmware reservations, then the DTB blob itself. A
	// reservation or the DTB that doesn't overlap a given range is a
	// no-op split (see `separate_memrange`), so applying the whole set
	// uniformly to every domain's ranges is safe.
	let mut exclusions = [Exclusion {
		start: 0,
		len:   0,
		kind:  RangeKind::Firmware,
	}; MAX_RESERVATIONS + 1];
	let mut exclusion_count = 0;
	for &(start, len) in &scan.reserved[..scan.reserved_count] {
		exclusions[exclusion_count] = Exclusion {
			start,
			len,
			kind: RangeKind::Firmware,
		};
		exclusion_count += 1;
	}
	exclusions[exclusion_count] = Exclusion {
		start: dtb_pa,
		len:   u64::from(header.total_size()),
		kind:  RangeKind::Dtb,
	};
	exclusion_count += 1;

	for &(numa, start, len) in &scan.mem[..scan.mem_count] {
		let domain = machine.find_domain(numa, true)?.expect("just created above");
		planner::plan_domain_memory(
			machine,
			domain,
			&DiscoveredRange { start, len },
			&exclusions[..exclusion_count],
		)?;
	}

	let mut domain_ids = [0u16; MAX_DOMAINS];
	let mut domain_count = 0;
	machine.for_each_domain(|d| {
		if domain_count < domain_ids.len() {
			domain_ids[domain_count] = d.id.0;
			domain_count += 1;
		}
	});

	let current_domain_id = machine.current_domain;
	for &numa in &domain_ids[..domain_count] {
		let domain = DomainId(numa);
		let kernelmr = planner::select_kernelmr(machine, domain, KERNEL_IMAGE_MAX_SIZE)?;
		planner::select_combuf(machine, domain, kernelmr, domain == current_domain_id)?;
	}

	devices::init_singletons();
	let current_domain = machine.current_domain;
	devices::map_devices(machine, current_domain, header.iter_with_cells())?;

	crate::set_machine(machine);
	Ok(machine)
}

/// Number of domains discovered in `machine`, for boot-path logging.
#[must_use]
pub fn domain_count(machine: &Machine) -> usize {
	let mut count = 0;
	machine.for_each_domain(|_| count += 1);
	count
}
