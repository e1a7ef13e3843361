//! A small toolchain for a register-less tape machine: a high-level
//! source language ([`lang`]), a symbolic assembly language ([`asm`]),
//! and a virtual machine ([`vm`]) that executes the flat integer
//! encoding with suspend-on-I/O semantics.
//!
//! The pipeline is pure and deterministic: loading, parsing,
//! generation, and encoding produce byte-identical output from
//! byte-identical input.

pub mod asm;
pub mod lang;
pub mod scan;
pub mod vm;
