//! Compile-time capacity bounds for the topology model.
//!
//! Topology descriptors are bump-allocated out of pages fed by the page
//! frame allocator (see [`crate::topology`]), which runs before the general
//! heap exists. That rules out a growable `Vec`-backed arena for the
//! root [`crate::topology::Machine`] struct itself, since `Machine` is a
//! single fixed-size allocation carved from one topology page. These
//! constants size that struct's lookup tables; they are generous for the
//! handful of sockets/harts/ranges/devices a real NUMA machine exposes.

/// Maximum number of NUMA domains known to a single kernel instance.
pub const MAX_DOMAINS: usize = 8;

/// Maximum number of CPUs within a single domain.
pub const MAX_CPUS_PER_DOMAIN: usize = 16;

/// Maximum number of memory ranges within a single domain (including
/// reserved/kernel-image/combuf carve-outs).
pub const MAX_RANGES_PER_DOMAIN: usize = 16;

/// Maximum number of devices within a single domain.
pub const MAX_DEVICES_PER_DOMAIN: usize = 8;

/// Maximum number of CPUs tracked machine-wide.
pub const MAX_CPUS_TOTAL: usize = MAX_DOMAINS * MAX_CPUS_PER_DOMAIN;

/// Maximum number of memory ranges tracked machine-wide.
pub const MAX_RANGES_TOTAL: usize = MAX_DOMAINS * MAX_RANGES_PER_DOMAIN;

/// Maximum number of devices tracked machine-wide.
pub const MAX_DEVICES_TOTAL: usize = MAX_DOMAINS * MAX_DEVICES_PER_DOMAIN;

/// Size of a domain's communication buffer: `1 << 21`, 2 MiB.
pub const COMM_BUF_SZ: u64 = 1 << 21;

/// Upper bound on a per-domain kernel ELF image's in-memory footprint.
///
/// `kernelmr` is selected before the image itself is read off disk (see
/// `planner::select_kernelmr`), so this stands in for the real size; 8
/// MiB is generous for this kernel's own image.
pub const KERNEL_IMAGE_MAX_SIZE: u64 = 8 * 1024 * 1024;
