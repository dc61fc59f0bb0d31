//! Debugger hook stubs for the Plexus kernel.
//!
//! These are force-kept, no-op (in terms of observable behavior) functions
//! that a debugger can set breakpoints on to track page frame allocator
//! and lock activity without instrumenting the kernel itself.
#![cfg_attr(not(test), no_std)]
#![cfg(debug_assertions)]

use core::arch::asm;

/// Tells the dbgutil page frame tracker that a page frame
/// has been allocated. Assumes a 4KiB page size.
#[no_mangle]
#[link_section = ".text.force_keep"]
pub extern "C" fn __plexus_dbgutil_pfa_alloc(address_do_not_change_this_parameter_name: u64) {
	unsafe {
		asm!(
			"/*{}*/",
			"nop",
			in(reg) address_do_not_change_this_parameter_name,
			options(nostack, nomem, preserves_flags)
		);
	}
}

/// Tells the dbgutil page frame tracker that a page frame
/// has been freed. Assumes a 4KiB page size.
#[no_mangle]
#[link_section = ".text.force_keep"]
pub extern "C" fn __plexus_dbgutil_pfa_free(address_do_not_change_this_parameter_name: u64) {
	unsafe {
		asm!(
			"/*{}*/",
			"nop",
			in(reg) address_do_not_change_this_parameter_name,
			options(nostack, nomem, preserves_flags)
		);
	}
}

/// Tells the dbgutil page frame tracker that a mass-free event
/// is about to occur. It will disable the page frame tracker's
/// `free` breakpoint, if present, to speed up the process.
///
/// `__plexus_dbgutil_pfa_finished_mass_free` MUST be called
/// when finished.
///
/// If this mass free event is the result of populating
/// the PFA with initial free pages, set `is_pfa_populating_do_not_change_this_parameter`
/// to non-zero. Otherwise, set it to `0`.
///
/// # Safety
/// This function is NOT thread-safe. Mass-free events must only
/// occur when no other threads are running.
#[no_mangle]
#[link_section = ".text.force_keep"]
pub unsafe extern "C" fn __plexus_dbgutil_pfa_will_mass_free(
	is_pfa_populating_do_not_change_this_parameter: u64,
) {
	unsafe {
		asm!(
			"/*{}*/",
			"nop",
			in(reg) is_pfa_populating_do_not_change_this_parameter,
			options(nostack, nomem, preserves_flags)
		);
	}
}

/// Tells the dbgutil page frame tracker that a mass-free event
/// just finished. It will re-enable the page frame tracker's
/// `free` breakpoint, if present.
///
/// # Safety
/// This function is NOT thread-safe. Mass-free events must only
/// occur when no other threads are running.
#[no_mangle]
#[link_section = ".text.force_keep"]
pub unsafe extern "C" fn __plexus_dbgutil_pfa_finished_mass_free() {
	unsafe {
		asm!("nop", options(nostack, nomem, preserves_flags));
	}
}

/// Tells the PFA tracker that a region of memory is now free.
///
/// This is a much more efficient way to free memory than
/// calling `__plexus_dbgutil_pfa_free` multiple times, and can be
/// used to free large regions of memory at once in lieu of
/// that function (e.g. when populating the freelist from a
/// discovered memory range).
#[no_mangle]
#[link_section = ".text.force_keep"]
pub extern "C" fn __plexus_dbgutil_pfa_mass_free(
	start_do_not_change_this_parameter: u64,
	end_exclusive_do_not_change_this_parameter: u64,
) {
	unsafe {
		asm!(
			"/*{} {}*/",
			"nop",
			in(reg) start_do_not_change_this_parameter,
			in(reg) end_exclusive_do_not_change_this_parameter,
			options(nostack, nomem, preserves_flags)
		);
	}
}

/// Tells the lock tracker that a lock is about to be acquired.
#[no_mangle]
#[link_section = ".text.force_keep"]
pub extern "C" fn __plexus_dbgutil_lock_acquire(
	lock_self_addr_do_not_change_this_parameter: usize,
) {
	unsafe {
		asm!(
			"/*{}*/",
			"nop",
			in(reg) lock_self_addr_do_not_change_this_parameter,
			options(nostack, nomem, preserves_flags)
		);
	}
}

/// Tells the lock tracker that a lock has been released.
///
/// `this` must be the same value as passed to [`__plexus_dbgutil_lock_acquire`].
#[no_mangle]
#[link_section = ".text.force_keep"]
pub extern "C" fn __plexus_dbgutil_lock_release(
	lock_self_addr_do_not_change_this_parameter: usize,
) {
	unsafe {
		asm!(
			"/*{}*/",
			"nop",
			in(reg) lock_self_addr_do_not_change_this_parameter,
			options(nostack, nomem, preserves_flags)
		);
	}
}
