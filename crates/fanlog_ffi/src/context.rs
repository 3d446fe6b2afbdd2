//! Journal handle FFI functions.

use crate::buffer::{fanlog_free_buffer, FanlogStringList};
use crate::error::{clear_last_error, invalid_argument, null_pointer, FanlogResult};
use crate::types::{position_from, FanlogCtx, FanlogId, FanlogMessage};
use fanlog_core::{Context, JournalResult, LogId, Safety};
use std::ffi::{c_char, CStr, CString};
use std::time::{Duration, UNIX_EPOCH};

/// What a `FanlogCtx` points to.
struct Handle {
    ctx: Context,
    /// Backing storage for `fanlog_ctx_err_string`.
    err: Option<CString>,
}

unsafe fn handle<'a>(ctx: *mut FanlogCtx) -> Option<&'a mut Handle> {
    ctx.cast::<Handle>().as_mut()
}

unsafe fn str_arg<'a>(ptr: *const c_char) -> Result<&'a str, FanlogResult> {
    if ptr.is_null() {
        return Err(null_pointer());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| invalid_argument("invalid UTF-8 in string argument"))
}

unsafe fn bytes_arg<'a>(data: *const u8, len: usize) -> Result<&'a [u8], FanlogResult> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(null_pointer());
    }
    Ok(std::slice::from_raw_parts(data, len))
}

/// Converts an engine result; the error itself is kept by the `Context`.
fn finish<T>(result: JournalResult<T>, on_ok: impl FnOnce(T)) -> FanlogResult {
    match result {
        Ok(value) => {
            on_ok(value);
            FanlogResult::Ok
        }
        Err(_) => FanlogResult::Error,
    }
}

macro_rules! try_arg {
    ($e:expr) => {
        match $e {
            Ok(value) => value,
            Err(code) => return code,
        }
    };
}

macro_rules! ctx_arg {
    ($ctx:expr) => {
        match handle($ctx) {
            Some(handle) => handle,
            None => return null_pointer(),
        }
    };
}

/// Creates a handle for the journal at `path`.
///
/// Nothing is touched on disk until the handle is initialized or opened.
///
/// # Safety
///
/// - `path` must be a valid null-terminated UTF-8 string
/// - `out_ctx` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_new(
    path: *const c_char,
    out_ctx: *mut *mut FanlogCtx,
) -> FanlogResult {
    clear_last_error();
    let path = try_arg!(str_arg(path));
    if out_ctx.is_null() {
        return null_pointer();
    }
    let boxed = Box::new(Handle {
        ctx: Context::new(path),
        err: None,
    });
    *out_ctx = Box::into_raw(boxed).cast::<FanlogCtx>();
    FanlogResult::Ok
}

/// Closes a handle and frees it.
///
/// A writer is synced; a reader releases its subscriber.
///
/// # Safety
///
/// The handle must have been returned by `fanlog_new` and must not be used
/// after this call.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_close(ctx: *mut FanlogCtx) -> FanlogResult {
    clear_last_error();
    if ctx.is_null() {
        return null_pointer();
    }
    let mut handle = Box::from_raw(ctx.cast::<Handle>());
    finish(handle.ctx.close(), |()| {})
}

/// Creates the journal on disk.
///
/// # Safety
///
/// `ctx` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_init(ctx: *mut FanlogCtx) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    finish(handle.ctx.init(), |_| {})
}

/// Sets the file mode used at initialization.
///
/// # Safety
///
/// `ctx` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_alter_mode(ctx: *mut FanlogCtx, mode: u32) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    finish(handle.ctx.alter_mode(mode), |()| {})
}

/// Sets the segment capacity used at initialization.
///
/// # Safety
///
/// `ctx` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_alter_journal_size(
    ctx: *mut FanlogCtx,
    size: u64,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    finish(handle.ctx.alter_journal_size(size), |()| {})
}

/// Sets the durability level used at initialization: 0 unsafe, 1 almost
/// safe, 2 safe.
///
/// # Safety
///
/// `ctx` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_alter_safety(ctx: *mut FanlogCtx, safety: u8) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let Some(safety) = Safety::from_u8(safety) else {
        return invalid_argument(format!("unknown safety level {safety}"));
    };
    finish(handle.ctx.alter_safety(safety), |()| {})
}

/// Opens the handle for writing.
///
/// # Safety
///
/// `ctx` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_open_writer(ctx: *mut FanlogCtx) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    finish(handle.ctx.open_writer(), |()| {})
}

/// Opens the handle as the reader of `subscriber`.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `subscriber` must be a valid null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_open_reader(
    ctx: *mut FanlogCtx,
    subscriber: *const c_char,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let subscriber = try_arg!(str_arg(subscriber));
    finish(handle.ctx.open_reader(subscriber), |()| {})
}

/// Registers a subscriber at `FANLOG_BEGIN` or `FANLOG_END`.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `subscriber` must be a valid null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_add_subscriber(
    ctx: *mut FanlogCtx,
    subscriber: *const c_char,
    whence: i32,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let subscriber = try_arg!(str_arg(subscriber));
    let Some(position) = position_from(whence) else {
        return invalid_argument(format!("unknown whence {whence}"));
    };
    finish(handle.ctx.add_subscriber(subscriber, position), |_| {})
}

/// Removes a subscriber.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `subscriber` must be a valid null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_remove_subscriber(
    ctx: *mut FanlogCtx,
    subscriber: *const c_char,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let subscriber = try_arg!(str_arg(subscriber));
    finish(handle.ctx.remove_subscriber(subscriber), |()| {})
}

/// Lists subscribers. Release the list with `fanlog_free_string_list`.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `out_list` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_list_subscribers(
    ctx: *mut FanlogCtx,
    out_list: *mut FanlogStringList,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_list.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.list_subscribers(), |names| {
        *out_list = FanlogStringList::from_strings(&names);
    })
}

/// Gets the durable checkpoint of any subscriber.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `subscriber` must be a valid null-terminated UTF-8 string
/// - `out_id` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_get_checkpoint(
    ctx: *mut FanlogCtx,
    subscriber: *const c_char,
    out_id: *mut FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let subscriber = try_arg!(str_arg(subscriber));
    if out_id.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.get_checkpoint(subscriber), |id| {
        *out_id = id.into();
    })
}

/// Appends a message.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `data` must point to `len` readable bytes (may be null when `len` is 0)
/// - `out_id` must be a valid pointer or null
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_write(
    ctx: *mut FanlogCtx,
    data: *const u8,
    len: usize,
    out_id: *mut FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let payload = try_arg!(bytes_arg(data, len));
    finish(handle.ctx.write(payload), |id| {
        if !out_id.is_null() {
            *out_id = id.into();
        }
    })
}

/// Appends a message with an explicit timestamp.
///
/// # Safety
///
/// Same as `fanlog_ctx_write`.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_write_message(
    ctx: *mut FanlogCtx,
    data: *const u8,
    len: usize,
    tv_sec: u32,
    tv_usec: u32,
    out_id: *mut FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    let payload = try_arg!(bytes_arg(data, len));
    let at = UNIX_EPOCH + Duration::from_secs(u64::from(tv_sec)) + Duration::from_micros(u64::from(tv_usec));
    finish(handle.ctx.write_message(payload, at), |id| {
        if !out_id.is_null() {
            *out_id = id.into();
        }
    })
}

/// Gets the next batch of unread messages.
///
/// On success `out_first..=out_last` bounds the batch and `out_count` is
/// its size; a count of 0 means the subscriber is caught up.
///
/// # Safety
///
/// - `ctx` must be a valid reader handle
/// - the out pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_read_interval(
    ctx: *mut FanlogCtx,
    out_first: *mut FanlogId,
    out_last: *mut FanlogId,
    out_count: *mut u32,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_first.is_null() || out_last.is_null() || out_count.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.read_interval(), |interval| {
        *out_first = interval.first.into();
        *out_last = interval.last.into();
        *out_count = interval.count;
    })
}

/// Reads one message. Release it with `fanlog_free_message`.
///
/// # Safety
///
/// - `ctx` must be a valid reader handle
/// - `out_message` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_read_message(
    ctx: *mut FanlogCtx,
    id: FanlogId,
    out_message: *mut FanlogMessage,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_message.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.read_message(id.into()), |message| {
        *out_message = message.into();
    })
}

/// Frees a message returned by `fanlog_ctx_read_message`.
///
/// # Safety
///
/// The message must have been filled in by fanlog.
#[no_mangle]
pub unsafe extern "C" fn fanlog_free_message(message: FanlogMessage) {
    fanlog_free_buffer(message.payload);
}

/// Durably moves the reader's checkpoint to `id`.
///
/// # Safety
///
/// `ctx` must be a valid reader handle.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_read_checkpoint(
    ctx: *mut FanlogCtx,
    id: FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    finish(handle.ctx.read_checkpoint(id.into()), |()| {})
}

/// Gets the oldest retained message id.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `out_id` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_first_log_id(
    ctx: *mut FanlogCtx,
    out_id: *mut FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_id.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.first_log_id(), |id| *out_id = id.into())
}

/// Gets the newest message id.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `out_id` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_last_log_id(
    ctx: *mut FanlogCtx,
    out_id: *mut FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_id.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.last_log_id(), |id| *out_id = id.into())
}

/// Moves `current` to the next message id within `[start, finish]`.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `current` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_advance_id(
    ctx: *mut FanlogCtx,
    current: *mut FanlogId,
    start: FanlogId,
    finish_id: FanlogId,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if current.is_null() {
        return null_pointer();
    }
    let result = handle
        .ctx
        .advance_id((*current).into(), start.into(), finish_id.into());
    finish(result, |id| *current = id.into())
}

/// Counts subscribers that may still need `epoch`.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `out_count` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_pending_readers(
    ctx: *mut FanlogCtx,
    epoch: u32,
    out_count: *mut u32,
) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_count.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.pending_readers(epoch), |count| {
        *out_count = u32::try_from(count).unwrap_or(u32::MAX);
    })
}

/// Gets the total size of segment data files.
///
/// # Safety
///
/// - `ctx` must be a valid handle
/// - `out_size` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_raw_size(ctx: *mut FanlogCtx, out_size: *mut u64) -> FanlogResult {
    clear_last_error();
    let handle = ctx_arg!(ctx);
    if out_size.is_null() {
        return null_pointer();
    }
    finish(handle.ctx.raw_size(), |size| *out_size = size)
}

/// Returns the error code of the handle's last operation, 0 on success.
///
/// Codes follow `fanlog_core::ErrorKind`.
///
/// # Safety
///
/// `ctx` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_err(ctx: *mut FanlogCtx) -> i32 {
    handle(ctx).map_or(0, |handle| handle.ctx.err().code())
}

/// Describes the handle's last error.
///
/// The string stays valid until the next call on the same handle.
///
/// # Safety
///
/// `ctx` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_err_string(ctx: *mut FanlogCtx) -> *const c_char {
    let Some(handle) = handle(ctx) else {
        return std::ptr::null();
    };
    let message = handle.ctx.err_string().replace('\0', " ");
    let err = handle.err.insert(CString::new(message).unwrap_or_default());
    err.as_ptr()
}

/// Returns the OS error code behind the handle's last error, or 0.
///
/// # Safety
///
/// `ctx` must be a valid handle or null.
#[no_mangle]
pub unsafe extern "C" fn fanlog_ctx_errno(ctx: *mut FanlogCtx) -> i32 {
    handle(ctx).map_or(0, |handle| handle.ctx.errno())
}

/// Formats `id` as `eeeeeeee:ssssssss` into `buffer`, NUL-terminated and
/// truncated to `len`. Returns the length of the full text.
///
/// # Safety
///
/// `buffer` must point to `len` writable bytes, or be null with `len` 0.
#[no_mangle]
pub unsafe extern "C" fn fanlog_snprint_log_id(
    buffer: *mut c_char,
    len: usize,
    id: FanlogId,
) -> usize {
    let text = LogId::from(id).to_string();
    if !buffer.is_null() && len > 0 {
        let copied = text.len().min(len - 1);
        std::ptr::copy_nonoverlapping(text.as_ptr().cast::<c_char>(), buffer, copied);
        *buffer.add(copied) = 0;
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::fanlog_free_string_list;
    use crate::types::FANLOG_BEGIN;
    use fanlog_core::ErrorKind;
    use tempfile::tempdir;

    unsafe fn new_ctx(path: &std::path::Path) -> *mut FanlogCtx {
        let path = CString::new(path.to_str().unwrap()).unwrap();
        let mut ctx = std::ptr::null_mut();
        assert_eq!(fanlog_new(path.as_ptr(), &mut ctx), FanlogResult::Ok);
        ctx
    }

    #[test]
    fn write_read_checkpoint() {
        let temp = tempdir().unwrap();
        let name = CString::new("consumer").unwrap();
        unsafe {
            let ctx = new_ctx(temp.path());
            assert_eq!(fanlog_ctx_alter_journal_size(ctx, 1 << 16), FanlogResult::Ok);
            assert_eq!(fanlog_ctx_init(ctx), FanlogResult::Ok);
            assert_eq!(
                fanlog_ctx_add_subscriber(ctx, name.as_ptr(), FANLOG_BEGIN),
                FanlogResult::Ok
            );
            let mut list = FanlogStringList {
                items: std::ptr::null_mut(),
                len: 0,
            };
            assert_eq!(fanlog_ctx_list_subscribers(ctx, &mut list), FanlogResult::Ok);
            assert_eq!(list.len, 1);
            fanlog_free_string_list(list);
            assert_eq!(fanlog_ctx_close(ctx), FanlogResult::Ok);

            let writer = new_ctx(temp.path());
            assert_eq!(fanlog_ctx_open_writer(writer), FanlogResult::Ok);
            let mut id = FanlogId::default();
            let payload = b"over the wall";
            assert_eq!(
                fanlog_ctx_write(writer, payload.as_ptr(), payload.len(), &mut id),
                FanlogResult::Ok
            );
            assert_eq!(id, FanlogId { epoch: 0, sequence: 1 });
            assert_eq!(fanlog_ctx_close(writer), FanlogResult::Ok);

            let reader = new_ctx(temp.path());
            assert_eq!(fanlog_ctx_open_reader(reader, name.as_ptr()), FanlogResult::Ok);
            let (mut first, mut last, mut count) = (FanlogId::default(), FanlogId::default(), 0u32);
            assert_eq!(
                fanlog_ctx_read_interval(reader, &mut first, &mut last, &mut count),
                FanlogResult::Ok
            );
            assert_eq!((count, first, last), (1, id, id));

            let mut message = FanlogMessage {
                tv_sec: 0,
                tv_usec: 0,
                payload: crate::buffer::FanlogBuffer::empty(),
            };
            assert_eq!(fanlog_ctx_read_message(reader, first, &mut message), FanlogResult::Ok);
            assert_eq!(message.payload.as_slice(), payload);
            fanlog_free_message(message);

            assert_eq!(fanlog_ctx_read_checkpoint(reader, last), FanlogResult::Ok);
            let mut checkpoint = FanlogId::default();
            assert_eq!(
                fanlog_ctx_get_checkpoint(reader, name.as_ptr(), &mut checkpoint),
                FanlogResult::Ok
            );
            assert_eq!(checkpoint, last);
            assert_eq!(fanlog_ctx_close(reader), FanlogResult::Ok);
        }
    }

    #[test]
    fn failures_are_kept_on_the_handle() {
        let temp = tempdir().unwrap();
        unsafe {
            let ctx = new_ctx(temp.path());
            assert_eq!(fanlog_ctx_init(ctx), FanlogResult::Ok);
            assert_eq!(fanlog_ctx_write(ctx, b"x".as_ptr(), 1, std::ptr::null_mut()), FanlogResult::Error);
            assert_eq!(fanlog_ctx_err(ctx), ErrorKind::IllegalWrite.code());
            let message = CStr::from_ptr(fanlog_ctx_err_string(ctx));
            assert!(!message.to_bytes().is_empty());
            assert_eq!(fanlog_ctx_errno(ctx), 0);
            fanlog_ctx_close(ctx);
        }
    }

    #[test]
    fn malformed_calls_rejected() {
        unsafe {
            let mut ctx = std::ptr::null_mut();
            assert_eq!(fanlog_new(std::ptr::null(), &mut ctx), FanlogResult::NullPointer);
            assert_eq!(fanlog_ctx_init(std::ptr::null_mut()), FanlogResult::NullPointer);
            assert_eq!(fanlog_ctx_err(std::ptr::null_mut()), 0);

            let temp = tempdir().unwrap();
            let ctx = new_ctx(temp.path());
            assert_eq!(fanlog_ctx_alter_safety(ctx, 9), FanlogResult::InvalidArgument);
            fanlog_ctx_close(ctx);
        }
    }

    #[test]
    fn snprint_formats_and_truncates() {
        let id = FanlogId { epoch: 1, sequence: 0x2a };
        let mut buf = [0 as c_char; 32];
        unsafe {
            let n = fanlog_snprint_log_id(buf.as_mut_ptr(), buf.len(), id);
            assert_eq!(n, 17);
            assert_eq!(CStr::from_ptr(buf.as_ptr()).to_str().unwrap(), "00000001:0000002a");

            let mut small = [0 as c_char; 5];
            assert_eq!(fanlog_snprint_log_id(small.as_mut_ptr(), small.len(), id), 17);
            assert_eq!(CStr::from_ptr(small.as_ptr()).to_str().unwrap(), "0000");
        }
    }
}
