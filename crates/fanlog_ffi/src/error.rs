//! Result codes and the thread-local error for malformed calls.

use std::cell::RefCell;
use std::ffi::CString;

/// Result code for FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanlogResult {
    /// Operation succeeded.
    Ok = 0,
    /// The operation failed; see `fanlog_ctx_err`.
    Error = 1,
    /// A required pointer was null.
    NullPointer = 2,
    /// An argument was malformed (bad UTF-8, unknown enum value).
    InvalidArgument = 3,
}

impl FanlogResult {
    /// Returns true if the result indicates success.
    pub fn is_ok(self) -> bool {
        self == FanlogResult::Ok
    }

    /// Returns true if the result indicates an error.
    pub fn is_err(self) -> bool {
        self != FanlogResult::Ok
    }
}

// Thread-local storage for the last argument error
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub(crate) fn set_last_error(message: impl Into<String>) {
    let msg = message.into();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the last error.
pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Records a null argument and returns the matching code.
pub(crate) fn null_pointer() -> FanlogResult {
    set_last_error("null pointer argument");
    FanlogResult::NullPointer
}

/// Records a malformed argument and returns the matching code.
pub(crate) fn invalid_argument(message: impl Into<String>) -> FanlogResult {
    set_last_error(message);
    FanlogResult::InvalidArgument
}

/// Gets the last argument error as a C string.
///
/// Returns null if no error is set.
///
/// # Safety
///
/// The returned pointer is valid until the next FFI call on this thread.
#[no_mangle]
pub extern "C" fn fanlog_get_last_error() -> *const std::ffi::c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clears the last argument error.
#[no_mangle]
pub extern "C" fn fanlog_clear_error() {
    clear_last_error();
}
