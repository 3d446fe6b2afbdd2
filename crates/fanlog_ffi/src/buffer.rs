//! Rust-owned memory handed across the ABI.

use std::ffi::CString;

/// A byte buffer for FFI.
///
/// Memory is owned by Rust. Call `fanlog_free_buffer` to release.
#[repr(C)]
pub struct FanlogBuffer {
    /// Pointer to data.
    pub data: *mut u8,
    /// Length in bytes.
    pub len: usize,
    /// Capacity (for internal use).
    pub capacity: usize,
}

impl FanlogBuffer {
    /// Creates a new buffer from a Vec.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let mut vec = vec.into_boxed_slice();
        let data = vec.as_mut_ptr();
        let len = vec.len();
        std::mem::forget(vec);

        Self {
            data,
            len,
            capacity: len,
        }
    }

    /// Creates an empty buffer.
    pub fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            capacity: 0,
        }
    }

    /// Returns true if the buffer is null.
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Returns the bytes without taking ownership.
    ///
    /// # Safety
    ///
    /// The buffer must have been created by [`FanlogBuffer::from_vec`] and
    /// not yet freed.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.data.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.len)
    }
}

/// Frees a buffer allocated by fanlog.
///
/// # Safety
///
/// The buffer must have been allocated by fanlog FFI functions.
#[no_mangle]
pub unsafe extern "C" fn fanlog_free_buffer(buffer: FanlogBuffer) {
    if !buffer.data.is_null() {
        drop(Vec::from_raw_parts(buffer.data, buffer.len, buffer.capacity));
    }
}

/// A string for FFI.
///
/// Null-terminated UTF-8 string. Memory owned by Rust.
/// Call `fanlog_free_string` to release.
#[repr(C)]
pub struct FanlogString {
    /// Pointer to null-terminated string.
    pub ptr: *mut std::ffi::c_char,
    /// Length (not including null terminator).
    pub len: usize,
}

impl FanlogString {
    /// Creates a new FFI string from a Rust string.
    pub fn new(s: &str) -> Option<Self> {
        let cstring = CString::new(s).ok()?;
        let len = cstring.as_bytes().len();
        let ptr = cstring.into_raw();

        Some(Self { ptr, len })
    }

    /// Converts to a Rust string slice.
    ///
    /// # Safety
    ///
    /// The pointer must be valid.
    pub unsafe fn as_str(&self) -> Option<&str> {
        if self.ptr.is_null() {
            return None;
        }
        let cstr = std::ffi::CStr::from_ptr(self.ptr);
        cstr.to_str().ok()
    }
}

/// Frees a string allocated by fanlog.
///
/// # Safety
///
/// The string must have been allocated by fanlog FFI functions.
#[no_mangle]
pub unsafe extern "C" fn fanlog_free_string(string: FanlogString) {
    if !string.ptr.is_null() {
        drop(CString::from_raw(string.ptr));
    }
}

/// A list of strings, such as subscriber names.
///
/// Call `fanlog_free_string_list` to release.
#[repr(C)]
pub struct FanlogStringList {
    /// Pointer to the first string.
    pub items: *mut FanlogString,
    /// Number of strings.
    pub len: usize,
}

impl FanlogStringList {
    /// Builds a list; names containing a NUL byte are skipped.
    pub fn from_strings(names: &[String]) -> Self {
        let items: Vec<FanlogString> = names.iter().filter_map(|n| FanlogString::new(n)).collect();
        let mut items = items.into_boxed_slice();
        let ptr = items.as_mut_ptr();
        let len = items.len();
        std::mem::forget(items);
        Self { items: ptr, len }
    }
}

/// Frees a string list allocated by fanlog.
///
/// # Safety
///
/// The list must have been allocated by fanlog FFI functions.
#[no_mangle]
pub unsafe extern "C" fn fanlog_free_string_list(list: FanlogStringList) {
    if list.items.is_null() {
        return;
    }
    let items = Vec::from_raw_parts(list.items, list.len, list.len);
    for item in items {
        fanlog_free_string(item);
    }
}
