//! Debugging utilities for the Plexus kernel.
//!
//! Implements a wrapper around the early-stage serial output
//! mechanism used for boot and topology tracing.
//!
//! **IMPORTANT:** This crate is not very robust, and is
//! not intended to be used in production (release builds).
//! Namely, it's not interrupt-safe and may cause deadlocks
//! if used improperly.
#![cfg_attr(not(test), no_std)]

/// Initializes the debug logger, if one is enabled.
///
/// `mmio_base` is the physical (identity-mapped at this point in boot)
/// address of the UART discovered via the devicetree.
#[cfg(debug_assertions)]
#[allow(unused_variables)]
pub fn init(mmio_base: usize) {
	#[cfg(feature = "uart16550")]
	plexus_debug_uart16550::init(mmio_base);
}

/// Logs a message to the debug logger.
///
/// Shouldn't be used directly; use the `dbg!` macros instead.
#[allow(unused_variables)]
pub fn log(message: core::fmt::Arguments) {
	#[cfg(feature = "uart16550")]
	plexus_debug_uart16550::log(message);
}

/// Sends a general debug message to the UART.
#[macro_export]
macro_rules! dbg {
	($tag:literal, $($arg:tt)*) => {{
		$crate::log(format_args!("{}:I:{}", $tag, format_args!($($arg)*)));
	}};
}

/// Sends an error debug message to the UART.
#[macro_export]
macro_rules! dbg_err {
	($tag:literal, $($arg:tt)*) => {{
		$crate::log(format_args!("{}:E:{}", $tag, format_args!($($arg)*)));
	}};
}

/// Sends a warning debug message to the UART.
#[macro_export]
macro_rules! dbg_warn {
	($tag:literal, $($arg:tt)*) => {{
		$crate::log(format_args!("{}:W:{}", $tag, format_args!($($arg)*)));
	}};
}
