//! Macros and compile-time assertion helpers used throughout the
//! Plexus kernel.
//!
//! Everything here is `macro_rules!` or const-generic trait trickery;
//! no proc-macro crate is needed since the kernel has no derive-style
//! boilerplate to generate.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(doc, feature(doc_cfg))]

pub mod assert;
pub mod likely;
pub mod unsafe_macros;
