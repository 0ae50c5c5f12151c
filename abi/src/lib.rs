//! Kestrel kernel/userland ABI types for the network core.
//!
//! Canonical definitions shared between the kernel and userland socket
//! wrappers.  All structs are `#[repr(C)]` for ABI stability.

#![no_std]
#![forbid(unsafe_code)]

pub mod net;

pub use net::*;
