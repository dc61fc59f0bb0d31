//! Lock-free, single-producer-per-core, single-consumer message ring used
//! for inter-domain communication.
//!
//! Each domain owns one [`Ring`] in its communication buffer (`combuf`,
//! see [`crate::planner`]). Any hart in any domain may *produce* into a
//! remote domain's ring (protected only by a compare-and-swap on the
//! producer index plus a preemption-disable bracket, so a hart is never
//! rescheduled mid-publish); only the domain's own master hart *consumes*
//! from it, in response to the IPI [`Ring::send`] raises after publishing.
//!
//! A slot's `func` field doubles as its presence flag: a non-null value
//! means "this slot holds an unconsumed message". Writing `func` uses
//! [`Release`] ordering so a consumer that observes it non-null via
//! [`Acquire`] also observes the fully-written `a1`/`a2` fields.

use core::sync::atomic::{
	AtomicUsize,
	Ordering::{Acquire, Relaxed, Release},
};

use crate::sbi;

/// Runs `f` with preemption disabled, on targets where that is meaningful.
///
/// Host unit tests run single-threaded with no interrupt controller to
/// speak of, so the `riscv64`-only preemption bracket is skipped there;
/// the CAS loop inside `f` is still correct without it.
#[cfg(target_arch = "riscv64")]
fn with_preemption_disabled<R>(f: impl FnOnce() -> R) -> R {
	// SAFETY: `f` never panics.
	unsafe { plexus_macro::critical_section!({ f() }) }
}

#[cfg(not(target_arch = "riscv64"))]
fn with_preemption_disabled<R>(f: impl FnOnce() -> R) -> R {
	f()
}

/// A message handler: takes the two word-sized arguments stored alongside
/// it in the ring.
pub type Handler = fn(usize, usize);

/// One cache-line-aligned message slot.
///
/// Aligning to 64 bytes keeps two cores publishing into adjacent slots
/// from ever sharing a cache line, which would otherwise serialize their
/// stores through cache coherency traffic.
#[repr(align(64))]
struct Slot {
	/// The handler to invoke, encoded as a `usize`; `0` means empty.
	func: AtomicUsize,
	/// First argument.
	a1: AtomicUsize,
	/// Second argument.
	a2: AtomicUsize,
}

impl Slot {
	/// An empty slot.
	const fn empty() -> Self {
		Self {
			func: AtomicUsize::new(0),
			a1:   AtomicUsize::new(0),
			a2:   AtomicUsize::new(0),
		}
	}
}

/// Number of message slots that fit in one [`crate::limits::COMM_BUF_SZ`]
/// communication buffer, after the two cache-line-aligned producer/
/// consumer indices.
pub const NMESSAGES: usize =
	(crate::limits::COMM_BUF_SZ as usize - 2 * 64) / core::mem::size_of::<Slot>();

/// The ring type every domain's communication buffer actually holds.
pub type CommRing = Ring<NMESSAGES>;

/// A fixed-capacity MPSC message ring, sized for `N` messages.
///
/// `N` is chosen by the caller so that `size_of::<Ring<N>>()` fits the
/// communication buffer's layout; [`CommRing`] is the concrete instance
/// used by the communication buffer.
#[repr(align(64))]
pub struct Ring<const N: usize> {
	messages: [Slot; N],
	/// Next slot a producer will claim.
	iprod: AtomicUsize,
	/// Next slot the consumer will read.
	icons: AtomicUsize,
}

/// Raised when [`Ring::send`] cannot identify a destination hart to
/// interrupt after publishing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoDestinationHart;

impl<const N: usize> Ring<N> {
	/// Creates a new, empty ring.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			messages: [const { Slot::empty() }; N],
			iprod:    AtomicUsize::new(0),
			icons:    AtomicUsize::new(0),
		}
	}

	/// Resets the ring's cursors. Called once by a domain master during
	/// `initcomm`-equivalent setup, before any other hart can observe the
	/// ring.
	pub fn reset(&self) {
		self.iprod.store(0, Relaxed);
		self.icons.store(0, Relaxed);
	}

	/// Publishes a message into this ring, spinning until a free slot is
	/// available.
	///
	/// Does not itself raise the IPI that wakes the consumer; see
	/// [`Ring::send`] for the full produce-then-interrupt sequence.
	fn publish(&self, func: Handler, a1: usize, a2: usize) {
		with_preemption_disabled(|| loop {
			let iprod = self.iprod.load(Acquire);
			let next = (iprod + 1) % N;

			if next == self.icons.load(Acquire) {
				core::hint::spin_loop();
				continue;
			}

			if self
				.iprod
				.compare_exchange(iprod, next, Relaxed, Relaxed)
				.is_err()
			{
				continue;
			}

			let slot = &self.messages[iprod];
			slot.a1.store(a1, Relaxed);
			slot.a2.store(a2, Relaxed);
			slot.func.store(func as usize, Release);
			break;
		});
	}

	/// Drains every published message, invoking each handler in FIFO
	/// order.
	///
	/// Called by a domain's master hart from its IPI trap handler.
	pub fn process(&self) {
		let mut icons = self.icons.load(Relaxed);
		loop {
			let slot = &self.messages[icons];
			let raw = slot.func.load(Acquire);
			let Some(func) = decode(raw) else {
				break;
			};

			func(slot.a1.load(Relaxed), slot.a2.load(Relaxed));
			slot.func.store(0, Release);
			icons = (icons + 1) % N;
		}
		self.icons.store(icons, Relaxed);
	}
}

impl<const N: usize> Default for Ring<N> {
	fn default() -> Self {
		Self::new()
	}
}

/// Decodes a slot's raw `func` word back into a callable handler.
fn decode(raw: usize) -> Option<Handler> {
	if raw == 0 {
		return None;
	}
	// SAFETY: the only nonzero values ever stored came from `func as
	// SAFETY: usize` for some `Handler`, via `publish`.
	Some(unsafe { core::mem::transmute::<usize, Handler>(raw) })
}

/// Publishes a message into `hartid`'s domain ring and raises an IPI so
/// its master hart processes it promptly.
///
/// This mirrors the original `send()`'s two-step protocol: publish first,
/// interrupt second, so the consumer never spins on an IPI that beat the
/// store that justified it.
pub fn send<const N: usize>(
	ring: &Ring<N>,
	dest_hartid: u32,
	func: Handler,
	a1: usize,
	a2: usize,
) -> Result<(), NoDestinationHart> {
	ring.publish(func, a1, a2);

	let hart_mask = 1usize
		.checked_shl(dest_hartid)
		.ok_or(NoDestinationHart)?;
	sbi::send_ipi(hart_mask, 0).map_err(|_| NoDestinationHart)
}

/// Remote-procedure handler that prints a message originating from
/// another domain; wired up as the handler for cross-domain `printf`
/// requests (`a1` is a pointer to a NUL-terminated string, `a2` unused).
pub fn remote_printf(a1: usize, _a2: usize) {
	// SAFETY: the sender is required to keep the string alive until this
	// SAFETY: handler runs, since the message is processed synchronously
	// SAFETY: with respect to the sender's later reuse of any transient
	// SAFETY: buffer.
	let msg = unsafe { core::ffi::CStr::from_ptr(a1 as *const core::ffi::c_char) };
	if let Ok(msg) = msg.to_str() {
		plexus_debug::log(format_args!("{msg}"));
	}
}

#[cfg(test)]
mod tests {
	use core::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering};

	use super::*;

	static SEEN: StdAtomicUsize = StdAtomicUsize::new(0);

	fn record(a1: usize, _a2: usize) {
		SEEN.store(a1, Ordering::Relaxed);
	}

	#[test]
	fn publish_then_process_dispatches_in_order() {
		let ring: Ring<4> = Ring::new();
		ring.publish(record, 11, 0);
		ring.publish(record, 22, 0);

		ring.process();
		assert_eq!(SEEN.load(Ordering::Relaxed), 22);
	}

	#[test]
	fn full_ring_rejects_publish_past_capacity() {
		let ring: Ring<2> = Ring::new();
		ring.publish(record, 1, 0);
		assert_eq!(ring.iprod.load(Ordering::Relaxed), 1);
		assert_eq!((ring.iprod.load(Ordering::Relaxed) + 1) % 2, ring.icons.load(Ordering::Relaxed));
	}
}
