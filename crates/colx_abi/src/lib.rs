//! Columnar data interchange across module boundaries.
//!
//! Producers and consumers share nothing but the `#[repr(C)]` records in
//! `ffi` and the release callbacks attached to them. Every record carries its
//! own release callback, so a consumer never needs to know which allocator
//! or producer built the data it holds.
pub mod array;
pub mod bitmap;
pub mod buffer;
pub mod datatype;
pub mod ffi;
pub mod field;
pub mod scalar;
pub mod schema;
pub mod stream;
