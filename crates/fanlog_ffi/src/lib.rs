//! # fanlog FFI
//!
//! Stable C ABI for the fanlog journal.
//!
//! This crate provides:
//! - An opaque `FanlogCtx` handle with the errno-style last-error surface
//!   (`fanlog_ctx_err`, `fanlog_ctx_err_string`, `fanlog_ctx_errno`)
//! - `FanlogId` as a `#[repr(C)]` pair of epoch and sequence
//! - Buffer and string types owned by Rust, with matching free functions
//!
//! Every function returns a [`FanlogResult`]. `Error` means the operation
//! itself failed and the handle's last error tells why; `NullPointer` and
//! `InvalidArgument` mean the call was malformed and are described by
//! `fanlog_get_last_error`.

#![warn(missing_docs)]

mod buffer;
mod context;
mod error;
mod types;

pub use buffer::{
    fanlog_free_buffer, fanlog_free_string, fanlog_free_string_list, FanlogBuffer, FanlogString,
    FanlogStringList,
};
pub use context::*;
pub use error::{fanlog_clear_error, fanlog_get_last_error, FanlogResult};
pub use types::{FanlogCtx, FanlogId, FanlogMessage, FANLOG_BEGIN, FANLOG_END};
