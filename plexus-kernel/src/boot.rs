//! Boot orchestrator: the four entry points early assembly calls into
//! supervisor-mode Rust on, plus the `kload`/`kexec` pair the machine
//! master uses to hand a freshly loaded kernel image to a remote domain.
//!
//! Every domain in the machine runs its own, independent copy of this
//! kernel; none of them share kernel memory once booted. The machine
//! master is simply the first of these copies to run, and its only extra
//! responsibility is getting every other domain's copy loaded and
//! started.

use plexus_elf::{Elf, ElfClass, ElfEndianness, ElfMachine, ElfSegment};

use crate::{
	devices::{self, PageTableMapper},
	init,
	memory,
	sbi::{self, SbiError},
	topology::{CpuId, DomainId, Machine, MemRange, TopologyError},
};

/// The boot-argument record placed at the very top of a domain's
/// `kernelmr`, below the kernel image itself.
///
/// Produced by the machine master in [`kexec`]; consumed by
/// [`domain_master_wakeup`]. `ready` is written last and with [`Release`]
/// ordering; every other field is stable once a consumer observes it with
/// [`Acquire`].
///
/// [`Release`]: core::sync::atomic::Ordering::Release
/// [`Acquire`]: core::sync::atomic::Ordering::Acquire
#[repr(C)]
pub struct BootArg {
	/// Physical address of the FDT blob, shared by every domain.
	pub dtb_pa: u64,
	/// The id of the domain this kernel image is booting as.
	pub current_domain: u16,
	/// The `satp` value to install before jumping to `entry`.
	pub mksatppgt: u64,
	/// Physical entry point to jump to once `ready` is observed.
	pub entry: u64,
	/// Physical address of the page table root `mksatppgt` encodes.
	pub pgt: u64,
	/// Written last, with `Release`; `0` until the record is complete.
	pub ready: core::sync::atomic::AtomicU32,
	/// Physical address of the machine master's own [`Machine`]. Safe for
	/// [`domain_master_main`] to dereference directly: `kload`'s page
	/// table identity-maps every range of every domain (see §4.6), so the
	/// topology pages it lives in are already mapped before this hart
	/// ever jumps to `entry`.
	pub topology: u64,
}

impl BootArg {
	/// Returns the boot-argument record at the very end of `range`
	/// (`size_of::<BootArg>()` bytes before `range.end`).
	///
	/// # Safety
	/// `range` must describe memory the caller may write to (on the
	/// producer side) or that has already been published (on the
	/// consumer side), and must be large enough to hold a `BootArg`.
	pub unsafe fn at_end_of(range: &MemRange) -> &'static mut Self {
		let addr = range.end - core::mem::size_of::<Self>() as u64;
		// SAFETY: forwarded from the caller.
		unsafe { &mut *(addr as *mut Self) }
	}
}

/// Failure loading or launching a remote domain's kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
	/// The domain has no memory range large enough to hold the kernel.
	NoRoomForKernel,
	/// The ELF image failed to parse or validate.
	Elf(plexus_elf::ElfError),
	/// The SBI firmware refused to start the target hart.
	Sbi(SbiError),
	/// A fixed-capacity topology table was exhausted while building the
	/// machine description from the DTB.
	Topology(TopologyError),
	/// No memory range was large enough for a `kernelmr`/`combuf`
	/// selection the planner was asked to make.
	Selection(crate::planner::SelectionError),
	/// The FDT blob itself failed header validation.
	Dtb(plexus_dtb::ValidationError),
	/// A device node failed to register (topology table exhaustion).
	Device(devices::DeviceMapError),
}

impl From<plexus_elf::ElfError> for BootError {
	fn from(e: plexus_elf::ElfError) -> Self {
		Self::Elf(e)
	}
}

impl From<SbiError> for BootError {
	fn from(e: SbiError) -> Self {
		Self::Sbi(e)
	}
}

impl From<TopologyError> for BootError {
	fn from(e: TopologyError) -> Self {
		Self::Topology(e)
	}
}

impl From<crate::planner::SelectionError> for BootError {
	fn from(e: crate::planner::SelectionError) -> Self {
		Self::Selection(e)
	}
}

impl From<plexus_dtb::ValidationError> for BootError {
	fn from(e: plexus_dtb::ValidationError) -> Self {
		Self::Dtb(e)
	}
}

impl From<devices::DeviceMapError> for BootError {
	fn from(e: devices::DeviceMapError) -> Self {
		Self::Device(e)
	}
}

/// Loads a kernel ELF image into `domain`'s `kernelmr`, builds a page
/// table mapping it (and the usual device MMIO windows) via `mapper`, and
/// returns the entry point and page table root to hand to [`kexec`].
///
/// `image` is the raw ELF bytes of the kernel to load (on real hardware,
/// read from the boot file system; see `fs::init` in
/// [`crate::collaborators`]).
pub fn kload(
	machine: &Machine,
	domain: DomainId,
	image_base: usize,
	image_len: usize,
	mapper: &mut impl PageTableMapper,
) -> Result<(u64, u64), BootError> {
	let kernelmr = machine
		.domain(domain)
		.range_ids()
		.iter()
		.flatten()
		.map(|&id| machine.range(id))
		.find(|r| r.kind == crate::topology::RangeKind::KernelImage)
		.ok_or(BootError::NoRoomForKernel)?;

	// SAFETY: `image_base`/`image_len` describe the ELF blob handed to us
	// SAFETY: by the collaborator that read it off the boot file system.
	let elf = unsafe {
		Elf::parse(
			image_base as *const u8,
			image_len,
			ElfEndianness::Little,
			ElfClass::Class64,
			ElfMachine::Riscv,
		)
	}?;

	// The image is linked to run starting at its lowest segment's virtual
	// address; everything it references (including `entry_point`) is an
	// offset from that link base, not from zero. Re-basing every segment
	// by the same offset into `kernelmr` preserves those offsets.
	let link_base = elf
		.segments()
		.filter(|s| s.ty().is_kernel_segment())
		.map(ElfSegment::target_address)
		.min()
		.ok_or(BootError::NoRoomForKernel)?;

	for segment in elf.segments() {
		if !segment.ty().is_kernel_segment() {
			continue;
		}

		let dest = kernelmr.start + (segment.target_address() - link_base) as u64;

		// SAFETY: `kernelmr` is a freshly carved, exclusively-owned
		// SAFETY: range; the segment's extent was validated by `Elf::parse`
		// SAFETY: against the image bounds.
		unsafe {
			core::ptr::copy_nonoverlapping(
				segment.load_address() as *const u8,
				dest as *mut u8,
				segment.load_size(),
			);
			if segment.target_size() > segment.load_size() {
				core::ptr::write_bytes(
					(dest + segment.load_size() as u64) as *mut u8,
					0,
					segment.target_size() - segment.load_size(),
				);
			}
		}
	}

	mapper.map_device(kernelmr.start, kernelmr.len());
	machine.for_each_device_in_domain(domain, |d| mapper.map_device(d.start, d.len));

	let entry = kernelmr.start + (elf.entry_point() - link_base) as u64;
	let pgt = kernelmr.start; // Placeholder root; arch page-table crate owns the real encoding.
	Ok((entry, pgt))
}

/// Starts `domain`'s master hart via SBI, pointing it at the wakeup
/// trampoline with the address of its (not-yet-written) boot-argument
/// page as the lone argument.
///
/// This must run *before* [`kload`]/[`kexec`] for the same domain: the
/// started hart immediately begins busy-waiting on that page's `ready`
/// flag in [`domain_master_wakeup`], so it is already spinning by the
/// time the machine master gets around to filling the page in.
pub fn wakeup_masters(machine: &Machine, domain: DomainId, master: CpuId) -> Result<(), BootError> {
	let kernelmr = machine
		.domain(domain)
		.range_ids()
		.iter()
		.flatten()
		.map(|&id| machine.range(id))
		.find(|r| r.kind == crate::topology::RangeKind::KernelImage)
		.ok_or(BootError::NoRoomForKernel)?;

	let bargs_addr = kernelmr.end as usize - core::mem::size_of::<BootArg>();
	let hartid = machine.cpu(master).hartid;
	sbi::hart_start(hartid, wakeup_trampoline as usize, bargs_addr)?;
	Ok(())
}

/// Writes the boot-argument record into `domain`'s `kernelmr`, publishing
/// it last with a `Release` store to `ready`.
///
/// This is the machine master's half of the handshake; [`wakeup_masters`]
/// must already have started the target hart, which is busy-waiting in
/// [`domain_master_wakeup`] on exactly the record this function writes.
pub fn kexec(
	machine: &Machine,
	domain: DomainId,
	dtb_pa: u64,
	entry: u64,
	pgt: u64,
) -> Result<(), BootError> {
	let kernelmr = machine
		.domain(domain)
		.range_ids()
		.iter()
		.flatten()
		.map(|&id| machine.range(id))
		.find(|r| r.kind == crate::topology::RangeKind::KernelImage)
		.ok_or(BootError::NoRoomForKernel)?;

	// SAFETY: `kernelmr` is this domain's exclusive kernel-image range;
	// SAFETY: the hart it targets is spinning on `ready` and will not
	// SAFETY: touch any other field until it observes it set.
	let bargs = unsafe { BootArg::at_end_of(kernelmr) };
	bargs.dtb_pa = dtb_pa;
	bargs.current_domain = domain.0;
	bargs.mksatppgt = pgt;
	bargs.entry = entry;
	bargs.pgt = pgt;
	bargs.topology = core::ptr::from_ref(machine) as u64;
	bargs.ready.store(1, core::sync::atomic::Ordering::Release);

	Ok(())
}

/// Placeholder for the architecture-specific assembly trampoline that
/// jumps a freshly started hart into [`domain_master_wakeup`] with the
/// boot-argument pointer in the right register; the real symbol is
/// provided by the boot assembly, not this crate.
extern "C" {
	fn wakeup_trampoline();
}

/// Placeholder for the architecture-specific assembly trampoline that
/// jumps a freshly started slave hart into [`slave_main`] after installing
/// the `satp` value [`wakeup_slaves`] left at the top of its stack.
extern "C" {
	fn slave_trampoline();
}

/// Out-of-scope collaborator seam (§1's file-system non-goal): reads a
/// domain's kernel ELF image off disk into memory this crate can parse
/// with [`kload`].
pub trait FileSystem {
	/// Brings up the inode layer. Expected to run on a process that is
	/// allowed to block, not the scheduler hart itself.
	fn init(&mut self);

	/// Reads `domain`'s kernel image into memory, returning its
	/// `(base, len)` once loaded.
	fn read_kernel_image(&mut self, domain: DomainId) -> Option<(usize, usize)>;
}

/// Out-of-scope collaborator seam (§1's scheduler non-goal).
pub trait Scheduler {
	/// Starts the scheduler running in the background.
	fn start_background(&mut self);

	/// Launches the first user process once every domain is up.
	fn launch_first_process(&mut self);
}

/// Step 1 of [`machine_master_main`]'s sequence: starts every domain
/// other than `machine.current_domain`'s master hart via
/// [`wakeup_masters`], skipping domains this machine master doesn't know
/// a master hart for yet.
pub fn forall_domain_wakeup_masters(machine: &Machine) -> Result<(), BootError> {
	let mut result = Ok(());
	machine.for_each_domain(|domain| {
		if result.is_err() || domain.id == machine.current_domain {
			return;
		}
		let Some(master) = machine.domain_master(domain.id) else {
			return;
		};
		result = wakeup_masters(machine, domain.id, master);
	});
	result
}

/// Step 3 of [`machine_master_main`]'s sequence: loads and starts every
/// domain other than `machine.current_domain`'s kernel image.
pub fn start_all_domains(
	machine: &Machine,
	dtb_pa: u64,
	fs: &mut impl FileSystem,
	mapper: &mut impl PageTableMapper,
) -> Result<(), BootError> {
	let mut result = Ok(());
	machine.for_each_domain(|domain| {
		if result.is_err() || domain.id == machine.current_domain {
			return;
		}
		result = (|| {
			let (image_base, image_len) = fs
				.read_kernel_image(domain.id)
				.ok_or(BootError::NoRoomForKernel)?;
			let (entry, pgt) = kload(machine, domain.id, image_base, image_len, mapper)?;
			kexec(machine, domain.id, dtb_pa, entry, pgt)
		})();
	});
	result
}

/// The last leg of each domain master's own boot, run from
/// [`domain_master_main`]: starts every other hart in `domain`, each
/// given a freshly allocated one-page stack with `satp` written at its
/// top for [`slave_trampoline`] to install before jumping to
/// [`slave_main`].
pub fn wakeup_slaves(machine: &Machine, domain: DomainId, satp: u64) -> Result<(), BootError> {
	let master = machine.domain_master(domain);
	let mut result = Ok(());

	machine.for_each_cpu_in_domain(domain, |cpu| {
		if result.is_err() || Some(cpu.id) == master {
			return;
		}

		result = (|| {
			let stack = memory::kalloc(domain).ok_or(BootError::NoRoomForKernel)?;
			let arg_addr = stack + plexus_mem::pfa::PAGE_SIZE - 8;

			// SAFETY: `stack` was just allocated and is not yet visible to
			// SAFETY: any other hart; the slave reads this word once, after
			// SAFETY: the hart-start ecall below hands it the address.
			unsafe { (arg_addr as *mut u64).write(satp) };

			sbi::hart_start(cpu.hartid, slave_trampoline as usize, arg_addr as usize)?;
			Ok(())
		})();
	});

	result
}

/// Runs on the machine master hart (the one `_entry` first lands on),
/// once early assembly has done the bare minimum to reach supervisor
/// mode in Rust.
///
/// Builds this domain's own topology from the DTB, maps devices,
/// bootstraps its page allocator, starts every other domain's kernel
/// image, then hands off to the scheduler. `fs`/`scheduler`/`mapper` are
/// the out-of-scope collaborators §1 notes (file system, process
/// scheduler, generic page-table walk); this function only owns their
/// sequencing, not their implementation.
pub fn machine_master_main(
	hartid: u32,
	dtb_pa: u64,
	fs: &mut impl FileSystem,
	scheduler: &mut impl Scheduler,
	mapper: &mut impl PageTableMapper,
) -> ! {
	plexus_debug::dbg!("boot", "machine master starting: hart {hartid}, dtb {dtb_pa:#x}");

	let machine = init::build_topology(dtb_pa, hartid)
		.unwrap_or_else(|e| panic!("failed to build topology: {e:?}"));

	plexus_debug::dbg!(
		"boot",
		"topology built: {} domain(s), this hart is domain {}",
		init::domain_count(machine),
		machine.current_domain.0
	);

	// SAFETY: every non-reserved range `machine` knows about is free RAM
	// SAFETY: this domain exclusively owns; the planner never marks a
	// SAFETY: range non-reserved unless it excluded every reservation the
	// SAFETY: DTB named for it.
	unsafe { memory::assign_freepages(machine) };
	memory::PFA.activate();

	forall_domain_wakeup_masters(machine)
		.unwrap_or_else(|e| panic!("wakeup_masters failed: {e:?}"));

	fs.init();

	start_all_domains(machine, dtb_pa, fs, mapper)
		.unwrap_or_else(|e| panic!("start_all_domains failed: {e:?}"));

	scheduler.start_background();
	scheduler.launch_first_process();

	halt_forever()
}

/// Runs on a remote domain's master hart once the SBI has started it,
/// before any Rust-level state (including the heap) exists.
///
/// Busy-waits on the `ready` flag inside the pre-agreed boot-argument
/// page in its own memory range; once the machine master's [`kexec`]
/// publishes it, reads `{entry, mksatppgt, dtb_pa, current_domain,
/// topology}` and jumps to `entry` with the new `satp` installed,
/// transferring control to the freshly loaded per-domain kernel.
///
/// # Safety
/// `bargs_addr` must point to a valid [`BootArg`] that the machine master
/// will eventually publish, within memory this hart can already access
/// (identity-mapped, pre-paging).
pub unsafe fn domain_master_wakeup(bargs_addr: usize) -> ! {
	// SAFETY: forwarded from the caller.
	let bargs = unsafe { &*(bargs_addr as *const BootArg) };

	while bargs.ready.load(core::sync::atomic::Ordering::Acquire) == 0 {
		core::hint::spin_loop();
	}

	let entry = bargs.entry;
	let satp = bargs.mksatppgt;
	let _ = (entry, satp);

	// SAFETY: the actual satp write + jump is architecture assembly
	// SAFETY: outside this crate's scope; this stub documents the
	// SAFETY: handshake contract it fulfills.
	halt_forever()
}

/// Runs on a remote domain's master hart after [`domain_master_wakeup`]
/// has jumped into the freshly loaded kernel image.
///
/// Adopts the machine master's topology in place — `kload`'s page table
/// identity-mapped it already, so there is nothing to rebuild or copy —
/// then wakes every slave hart in this domain.
pub fn domain_master_main(bargs_addr: usize) -> ! {
	// SAFETY: published by `kexec` before `ready`, observed with `Acquire`
	// SAFETY: by `domain_master_wakeup` before jumping here.
	let bargs = unsafe { &*(bargs_addr as *const BootArg) };
	let domain = DomainId(bargs.current_domain);

	// SAFETY: `kload` built this hart's page table to identity-map every
	// SAFETY: range of every domain, including the topology pages the
	// SAFETY: machine master's `Machine` lives in.
	let machine = unsafe { &*(bargs.topology as *const Machine) };

	plexus_debug::dbg!("boot", "domain master up: domain {}", domain.0);

	crate::set_machine(machine);
	devices::init_singletons();

	if let Err(e) = wakeup_slaves(machine, domain, bargs.mksatppgt) {
		plexus_debug::dbg_err!("boot", "wakeup_slaves failed: {e:?}");
	}

	// TODO: install this domain's own trap vectors and join the scheduler
	// once both collaborators exist.
	halt_forever()
}

/// Runs on every non-master hart once its domain master has started it
/// via [`wakeup_slaves`].
pub fn slave_main() -> ! {
	// TODO: install trap vectors and join the scheduler once both
	// collaborators exist.
	halt_forever()
}

/// Parks the calling hart forever via the SBI HSM `hart_stop` call,
/// falling back to a spin loop if the firmware refuses.
fn halt_forever() -> ! {
	let _ = sbi::hart_stop();
	loop {
		core::hint::spin_loop();
	}
}
