//! Device mapper: turns FDT device nodes into [`crate::topology::Device`]
//! entries, and publishes the system's single UART and disk as `uart0`/
//! `virtio0` for the console and block driver to use.

use core::sync::atomic::{AtomicU32, Ordering::Relaxed};

use plexus_dtb::{CellSizes, FdtToken, RegIter};

use crate::topology::{DeviceId, DeviceKind, DomainId, Machine, TopologyError};

/// `"virt"`, little-endian, as read from a virtio-mmio `MagicValue`
/// register.
const VIRTIO_MAGIC: u32 = 0x7472_6976;
/// Only virtio-mmio version 1 (the legacy register layout) is supported.
const VIRTIO_VERSION: u32 = 1;
/// `"QEMU"`, little-endian, as read from a virtio-mmio `VendorID` register.
const VIRTIO_VENDOR: u32 = 0x554d_4551;
/// Virtio device-id for a block device.
const VIRTIO_BLOCK_DEVICE_ID: u32 = 2;

/// The MMIO registers a virtio-mmio device exposes at its base address,
/// used only to validate the handshake before trusting the device.
#[repr(C)]
struct VirtioMmioHeader {
	magic:      u32,
	version:    u32,
	device_id:  u32,
	vendor_id:  u32,
}

/// Reads and validates a virtio-mmio device's handshake registers.
///
/// # Safety
/// `base` must point to a live, readable virtio-mmio register bank.
unsafe fn virtio_handshake_ok(base: u64) -> bool {
	// SAFETY: forwarded from the caller.
	let header = unsafe { &*(base as *const VirtioMmioHeader) };
	header.magic == VIRTIO_MAGIC
		&& header.version == VIRTIO_VERSION
		&& header.vendor_id == VIRTIO_VENDOR
		&& header.device_id == VIRTIO_BLOCK_DEVICE_ID
}

/// Failure mapping a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMapError {
	/// The topology's device table is full.
	Topology(TopologyError),
}

impl From<TopologyError> for DeviceMapError {
	fn from(e: TopologyError) -> Self {
		Self::Topology(e)
	}
}

/// Classifies a device node's name against the known FDT prefixes,
/// returning `None` for nodes that aren't devices this mapper handles.
fn classify(name: &core::ffi::CStr) -> Option<DeviceKind> {
	let bytes = name.to_bytes();
	if plexus_dtb::starts_with_prefix(name, "uart@") {
		Some(DeviceKind::Uart)
	} else if plexus_dtb::starts_with_prefix(name, "virtio_mmio@") {
		Some(DeviceKind::Disk)
	} else if plexus_dtb::starts_with_prefix(name, "plic@") {
		Some(DeviceKind::Plic)
	} else if plexus_dtb::starts_with_prefix(name, "clint@") {
		Some(DeviceKind::Clint)
	} else {
		let _ = bytes;
		None
	}
}

/// Published MMIO base of the system's single UART, once discovered.
static UART0: AtomicU32 = AtomicU32::new(0);
/// Published MMIO base of the system's single virtio disk, once
/// discovered.
static VIRTIO0: AtomicU32 = AtomicU32::new(0);

/// A singleton that has not yet been published.
const UNSET: u32 = u32::MAX;

/// Returns the published UART device id, if [`map_devices`] has found one.
#[must_use]
pub fn uart0() -> Option<DeviceId> {
	decode_singleton(UART0.load(Relaxed))
}

/// Returns the published virtio disk device id, if [`map_devices`] has
/// found one.
#[must_use]
pub fn virtio0() -> Option<DeviceId> {
	decode_singleton(VIRTIO0.load(Relaxed))
}

fn decode_singleton(raw: u32) -> Option<DeviceId> {
	(raw != UNSET).then_some(DeviceId(raw))
}

/// Walks every node yielded by `tokens` (typically the whole `/soc`
/// subtree, via [`plexus_dtb::FdtHeader::iter_with_cells`]), classifying
/// and registering each recognized device.
pub fn map_devices<'a>(
	machine: &mut Machine,
	domain: DomainId,
	tokens: impl Iterator<Item = (FdtToken<'a>, CellSizes)>,
) -> Result<(), DeviceMapError> {
	let mut tokens = tokens.peekable();

	while let Some((token, _)) = tokens.next() {
		let FdtToken::Node { name } = token else {
			continue;
		};

		let Some(kind) = classify(name) else {
			continue;
		};

		let mut start = 0u64;
		let mut len = 0u64;
		let mut irq = 0u32;

		while let Some((FdtToken::Property { .. }, _)) = tokens.peek() {
			let Some((FdtToken::Property { name, value }, cells)) = tokens.next() else {
				unreachable!()
			};
			match name.to_bytes() {
				b"reg" => {
					if let Some((s, l)) = RegIter::new(value, cells).next() {
						start = s;
						len = l;
					}
				}
				b"interrupts" => irq = plexus_dtb::first_u32(value).unwrap_or(0),
				_ => {}
			}
		}

		if kind == DeviceKind::Disk {
			// SAFETY: `start` was just read out of a `reg` property
			// SAFETY: naming a live virtio-mmio device's MMIO base.
			if !unsafe { virtio_handshake_ok(start) } {
				continue;
			}
		}

		let id = machine.add_device(kind, domain, irq, start, len)?;

		match kind {
			DeviceKind::Uart => {
				let _ = UART0.compare_exchange(UNSET, id.0, Relaxed, Relaxed);
			}
			DeviceKind::Disk => {
				let _ = VIRTIO0.compare_exchange(UNSET, id.0, Relaxed, Relaxed);
			}
			DeviceKind::Plic | DeviceKind::Clint => {}
		}
	}

	Ok(())
}

/// Initializes the UART0/VIRTIO0 singleton slots to "unset".
///
/// Must run once before the first call to [`map_devices`] in a fresh
/// process image; a kernel re-entering `main` (there is no such path
/// today) would need to call this again first.
pub fn init_singletons() {
	UART0.store(UNSET, Relaxed);
	VIRTIO0.store(UNSET, Relaxed);
}

/// A minimal page-table mapper seam: the boot orchestrator asks a
/// [`PageTableMapper`] to map each device's MMIO range `R|W` into a
/// kernel's page table, without the device mapper needing to know
/// anything about Sv39 PTE encoding itself.
pub trait PageTableMapper {
	/// Maps `len` bytes starting at physical `start` as read/write,
	/// non-executable, into this page table at the same virtual address
	/// (devices are always identity-mapped).
	fn map_device(&mut self, start: u64, len: u64);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classify_matches_known_prefixes() {
		assert_eq!(
			classify(core::ffi::CStr::from_bytes_with_nul(b"uart@10000000\0").unwrap()),
			Some(DeviceKind::Uart)
		);
		assert_eq!(
			classify(core::ffi::CStr::from_bytes_with_nul(b"virtio_mmio@10001000\0").unwrap()),
			Some(DeviceKind::Disk)
		);
		assert_eq!(
			classify(core::ffi::CStr::from_bytes_with_nul(b"memory@80000000\0").unwrap()),
			None
		);
	}
}
