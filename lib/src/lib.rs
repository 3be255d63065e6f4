//! # Unified firmware utility
//!
//! A single multi-call binary standing in for the collection of
//! standalone firmware tools. Invoked under the name of one of those
//! tools it either implements it directly, or executes the original
//! binary kept alongside it.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]

mod builtins;
pub mod cli;
pub mod config;
pub mod registry;
pub mod selfpath;
mod usagelog;
