//! # Code
//!
//! Instruction-level helpers: detour jump encoding and relocation of
//! displaced function prologues.

pub mod x64;
