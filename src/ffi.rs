//! FFI bindings for SleepSense
//!
//! This module provides C-compatible functions for calling SleepSense from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `sleepsense_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::DetectorConfig;
use crate::detector::SleepDetector;
use crate::error::SleepError;
use crate::pipeline::{calibrate_json, score_session_json};
use crate::types::SensorSample;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Return the JSON result as a C string, or record the error and return NULL
fn result_to_cstr(result: Result<String, SleepError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score a completed session and return the score breakdown JSON.
///
/// # Safety
/// - `session_json` must be a valid null-terminated C string.
/// - `baseline_json` must be a valid null-terminated C string or NULL.
/// - Returns a newly allocated string that must be freed with `sleepsense_free_string`.
/// - Returns NULL on error; call `sleepsense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_score_session(
    session_json: *const c_char,
    baseline_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let session = match cstr_to_string(session_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid session string pointer");
            return ptr::null_mut();
        }
    };
    let baseline = cstr_to_string(baseline_json);

    result_to_cstr(score_session_json(&session, baseline.as_deref()))
}

/// Compute a baseline from session and sample JSON arrays.
///
/// # Safety
/// - `user_id`, `sessions_json` and `samples_json` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `sleepsense_free_string`.
/// - Returns NULL on error; call `sleepsense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_calibrate(
    user_id: *const c_char,
    sessions_json: *const c_char,
    samples_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let user = match cstr_to_string(user_id) {
        Some(s) => s,
        None => {
            set_last_error("Invalid user_id string pointer");
            return ptr::null_mut();
        }
    };

    let sessions = match cstr_to_string(sessions_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid sessions string pointer");
            return ptr::null_mut();
        }
    };

    let samples = match cstr_to_string(samples_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid samples string pointer");
            return ptr::null_mut();
        }
    };

    result_to_cstr(calibrate_json(&user, &sessions, &samples))
}

// ============================================================================
// Stateful Detector API
// ============================================================================

/// Opaque handle to a SleepDetector
pub struct SleepDetectorHandle {
    detector: SleepDetector,
}

/// Create a new detector.
///
/// # Safety
/// - `config_json` must be a valid null-terminated `DetectorConfig` JSON string,
///   or NULL for defaults.
/// - Returns a pointer that must be freed with `sleepsense_detector_free`.
/// - Returns NULL on error; call `sleepsense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_detector_new(
    config_json: *const c_char,
) -> *mut SleepDetectorHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json) {
        Some(json) => match serde_json::from_str::<DetectorConfig>(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&SleepError::from(e).to_string());
                return ptr::null_mut();
            }
        },
        None => DetectorConfig::default(),
    };

    let handle = Box::new(SleepDetectorHandle {
        detector: SleepDetector::new(config),
    });
    Box::into_raw(handle)
}

/// Free a detector.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `sleepsense_detector_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_detector_free(detector: *mut SleepDetectorHandle) {
    if !detector.is_null() {
        drop(Box::from_raw(detector));
    }
}

/// Process a JSON array of samples and return the resulting sleep state JSON.
///
/// Returns the string `null` when the batch contributed no usable sample.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `sleepsense_detector_new`.
/// - `samples_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sleepsense_free_string`.
/// - Returns NULL on error; call `sleepsense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_detector_process_json(
    detector: *mut SleepDetectorHandle,
    samples_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return ptr::null_mut();
    }

    let handle = &mut *detector;

    let json = match cstr_to_string(samples_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid samples string pointer");
            return ptr::null_mut();
        }
    };

    let result = serde_json::from_str::<Vec<SensorSample>>(&json)
        .map_err(SleepError::from)
        .and_then(|samples| {
            let state = handle
                .detector
                .process_batch(&samples)
                .map(|outcome| outcome.state);
            Ok(serde_json::to_string(&state)?)
        });

    result_to_cstr(result)
}

/// Reset a detector's counters and buffer.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `sleepsense_detector_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_detector_reset(detector: *mut SleepDetectorHandle) -> i32 {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return -1;
    }

    (*detector).detector.reset();
    0
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by SleepSense functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a SleepSense function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next SleepSense function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the SleepSense library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn sleepsense_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
