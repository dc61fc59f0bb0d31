//! Supervisor Binary Interface (SBI) ecall bindings.
//!
//! Every function here issues a single `ecall` trap into the firmware
//! (OpenSBI, in practice) and decodes the `(error, value)` pair the SBI
//! calling convention returns in `a0`/`a1`. Extension and function IDs are
//! the ones defined by the SBI specification; only the subset the boot
//! orchestrator and IPI ring actually need is bound.

/// `SBI_EXT_BASE`: base extension, used here only for the spec version probe.
const EXT_BASE: usize = 0x10;
/// `SBI_EXT_BASE_GET_SPEC_VERSION`.
const FID_BASE_GET_SPEC_VERSION: usize = 0x0;

/// `SBI_EXT_HSM`: hart state management.
const EXT_HSM: usize = 0x48534D;
/// `SBI_EXT_HSM_HART_START`.
const FID_HSM_HART_START: usize = 0;
/// `SBI_EXT_HSM_HART_STOP`.
const FID_HSM_HART_STOP: usize = 1;

/// `SBI_EXT_SEND_IPI`.
const EXT_SEND_IPI: usize = 0x4;

/// `SBI_EXT_TIMER`.
const EXT_TIMER: usize = 0x54494D45;
/// `SBI_EXT_TIMER_SET_TIMER`.
const FID_TIMER_SET_TIMER: usize = 0x0;

/// An SBI call failure, carrying the firmware's error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbiError {
	/// Generic failure for unspecified or unknown reasons.
	Failed,
	/// The requested SBI extension or function is not implemented.
	NotSupported,
	/// One or more parameters are invalid.
	InvalidParam,
	/// The request was denied.
	Denied,
	/// An address parameter is invalid (misaligned, out of range, ...).
	InvalidAddress,
	/// The resource is already available (e.g. hart already started).
	AlreadyAvailable,
	/// The hart is already started.
	AlreadyStarted,
	/// The hart is already stopped.
	AlreadyStopped,
	/// The firmware returned an error code this binding does not recognize.
	Unknown(i64),
}

impl SbiError {
	/// Maps a raw SBI error code (always negative on failure) to an
	/// [`SbiError`].
	fn from_code(code: i64) -> Self {
		match code {
			-1 => Self::Failed,
			-2 => Self::NotSupported,
			-3 => Self::InvalidParam,
			-4 => Self::Denied,
			-5 => Self::InvalidAddress,
			-6 => Self::AlreadyAvailable,
			-7 => Self::AlreadyStarted,
			-8 => Self::AlreadyStopped,
			other => Self::Unknown(other),
		}
	}
}

/// The raw `(error, value)` pair every `ecall` returns.
struct SbiRet {
	error: i64,
	value: i64,
}

/// Issues a raw `ecall` with the given extension/function id and up to six
/// argument registers.
///
/// # Safety
/// The caller must ensure `ext`/`fid` name an SBI call that is safe to
/// issue with the given arguments; an incorrect address argument to e.g.
/// `HART_START` can start a hart executing garbage.
#[cfg(target_arch = "riscv64")]
unsafe fn ecall(ext: usize, fid: usize, a0: usize, a1: usize, a2: usize) -> SbiRet {
	let (error, value): (i64, i64);
	// SAFETY: forwarded from the caller.
	unsafe {
		core::arch::asm!(
			"ecall",
			inlateout("a0") a0 => error,
			inlateout("a1") a1 => value,
			in("a2") a2,
			in("a6") fid,
			in("a7") ext,
			options(nostack),
		);
	}
	SbiRet { error, value }
}

#[cfg(not(target_arch = "riscv64"))]
unsafe fn ecall(_ext: usize, _fid: usize, _a0: usize, _a1: usize, _a2: usize) -> SbiRet {
	unimplemented!("SBI ecalls are only available on riscv64")
}

/// Wraps a raw `ecall` result, turning a nonzero error code into an
/// [`SbiError`].
fn call(ext: usize, fid: usize, a0: usize, a1: usize, a2: usize) -> Result<i64, SbiError> {
	// SAFETY: every call site below passes arguments matching the
	// SAFETY: extension/function being invoked.
	let ret = unsafe { ecall(ext, fid, a0, a1, a2) };
	if ret.error == 0 {
		Ok(ret.value)
	} else {
		Err(SbiError::from_code(ret.error))
	}
}

/// The SBI implementation's specification version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecVersion {
	/// Major version number.
	pub major: u32,
	/// Minor version number.
	pub minor: u32,
}

/// Queries the SBI specification version implemented by the firmware.
pub fn get_spec_version() -> Result<SpecVersion, SbiError> {
	let value = call(EXT_BASE, FID_BASE_GET_SPEC_VERSION, 0, 0, 0)? as u64;
	Ok(SpecVersion {
		major: ((value >> 24) & 0x7f) as u32,
		minor: (value & !(0x7f << 24)) as u32,
	})
}

/// Starts `hartid` executing at `start_addr` in S-mode, with `opaque`
/// passed through in `a1` (conventionally a pointer to the boot-argument
/// record; see `plexus-kernel::boot`).
pub fn hart_start(hartid: u32, start_addr: usize, opaque: usize) -> Result<(), SbiError> {
	call(EXT_HSM, FID_HSM_HART_START, hartid as usize, start_addr, opaque).map(drop)
}

/// Stops the calling hart. Does not return on success.
pub fn hart_stop() -> Result<(), SbiError> {
	call(EXT_HSM, FID_HSM_HART_STOP, 0, 0, 0).map(drop)
}

/// Sends an inter-processor interrupt to every hart named in `hart_mask`
/// (a bitmask starting at hart `hart_mask_base`).
pub fn send_ipi(hart_mask: usize, hart_mask_base: usize) -> Result<(), SbiError> {
	call(EXT_SEND_IPI, 0, hart_mask, hart_mask_base, 0).map(drop)
}

/// Arms the local hart's timer to fire at absolute time `stime_value`.
pub fn set_timer(stime_value: u64) -> Result<(), SbiError> {
	call(EXT_TIMER, FID_TIMER_SET_TIMER, stime_value as usize, 0, 0).map(drop)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_codes_match_spec() {
		assert_eq!(SbiError::from_code(-1), SbiError::Failed);
		assert_eq!(SbiError::from_code(-8), SbiError::AlreadyStopped);
		assert_eq!(SbiError::from_code(-42), SbiError::Unknown(-42));
	}
}
