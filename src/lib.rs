//! Native extension compatibility bridge
//!
//! Lets extensions written against the reference engine's C interface run
//! on a managed engine. The library is built as a `cdylib` that extensions
//! link against, and as an `rlib` for embedders that install their engine
//! with `runtime::context::install`.
//!
//! `host` is a small in-process engine used to exercise the bridge.

#![cfg_attr(feature = "c-variadic", feature(c_variadic))]

pub mod host;
pub mod runtime;

pub use runtime::*;
