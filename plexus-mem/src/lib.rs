//! Common memory types and functions for the Plexus kernel.
//!
//! Each domain kernel manages its own physical memory directly: there is no
//! shared address space and, during early boot, no page tables at all, so
//! frame addresses are ordinary pointers rather than values that must be
//! translated through a linear mapping.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg, doc_auto_cfg))]

pub extern crate alloc;

pub mod global_alloc;
pub mod numa;
pub mod pfa;
