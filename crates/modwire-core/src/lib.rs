//! Modbus PDU codec and MBAP framing.
//!
//! `modwire-core` holds everything that does not touch I/O: typed request and
//! response bodies, the coil bit-packing rules, and the TCP (MBAP) envelope
//! together with a reassembly buffer for fragmented streams. It builds without
//! `std` (an allocator is still required).

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod bits;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;

pub use error::{DecodeError, EncodeError, ValidationError};
