//! Early-stage debugging support for an MMIO-mapped 16550 UART.
//!
//! QEMU's `virt` machine (and most real RISC-V platforms) expose a
//! 16550-compatible UART as a devicetree `uart@...` node; the base
//! address is discovered during boot and handed to [`init`].
#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Write};

use plexus_sync::{Lock, TicketMutex};
use uart_16550::MmioSerialPort;

/// The shared serial port for the system.
///
/// Left unset until [`init`] is called with the devicetree-discovered
/// MMIO base; logging before that point is silently dropped.
static SERIAL: TicketMutex<Option<MmioSerialPort>> = TicketMutex::new(None);

/// Initializes the UART at the given MMIO base address.
///
/// # Safety
/// `mmio_base` must be the address of a valid, currently-mapped
/// 16550-compatible UART. Calling this more than once simply
/// re-initializes the port.
pub fn init(mmio_base: usize) {
	// SAFETY: caller (boot orchestration) guarantees `mmio_base` names
	// a mapped 16550 UART for the lifetime of the kernel image.
	let mut port = unsafe { MmioSerialPort::new(mmio_base) };
	port.init();
	*SERIAL.lock() = Some(port);
}

/// Logs a message to the UART.
pub fn log(message: fmt::Arguments<'_>) {
	if let Some(serial) = SERIAL.lock().as_mut() {
		let _ = writeln!(serial, "{message}");
	}
}
