#![forbid(unsafe_code)]
#![no_std]

//! Compiles visual block scripts into Lua for a WhiteCat board and keeps a live link with it.
//!
//! The pipeline is: [`ast`] block chains are lowered by the [`compiler`] into [`scheduler::CompiledUnit`]s,
//! which [`scheduler::build_program`] combines into a single cooperative program.
//! The [`upload::UploadChannel`] transfers that program over the serial link in acknowledged chunks,
//! and every line the board sends back is decoded by [`protocol::parse`] and routed by the [`session::Session`]
//! to the visual element it belongs to.

#[macro_use] extern crate alloc;
#[cfg(any(test, feature = "std"))] extern crate std;

pub use compact_str;

pub(crate) mod meta {
    include!(concat!(env!("OUT_DIR"), "/meta.rs"));
}

pub mod vecmap;
pub mod ast;
pub mod value;
pub mod board;
pub mod compiler;
pub mod scheduler;
pub mod protocol;
pub mod registry;
pub mod upload;
pub mod runtime;
pub mod session;

#[cfg(feature = "std-system")]
pub mod std_system;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(all(test, feature = "serde"))]
mod test;

/// A short hex digest identifying the compiler build that generated a program.
pub fn fingerprint() -> compact_str::CompactString {
    compact_str::format_compact!("{:08x}", (meta::FINGERPRINT >> 96) as u32)
}
