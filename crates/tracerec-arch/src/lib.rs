//! Debuggee architecture descriptions.
//!
//! This crate only knows about word width and the order in which registers are
//! laid out in a snapshot. Decoding and register access live with the debugger.

mod registers;
mod xlen;

pub use registers::*;
pub use xlen::*;
