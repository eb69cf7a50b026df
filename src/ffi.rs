//! FFI bindings for Edgeflow
//!
//! This module provides C-compatible functions for calling Edgeflow from
//! other languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using
//! `edgeflow_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use crate::calibration::{CalibrationEngine, MemoryCalibrationStore};
use crate::encoder::RunExporter;
use crate::session::{IngestRecord, SessionAggregator, SessionConfig};
use crate::types::{SensorSample, SensorSide};

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

/// Opaque session handle passed across the FFI boundary.
pub struct EdgeflowSession {
    aggregator: SessionAggregator,
}

// ============================================================================
// Calibration
// ============================================================================

/// Run the full two-phase calibration from three JSON sample batches and
/// return the calibration state as JSON.
///
/// Each argument is a JSON array of samples:
/// `[{"ax":0.0,"ay":0.0,"az":1.0,"gx":0.0,"gy":0.0,"gz":0.0}, ...]`
///
/// # Safety
/// - `stationary`, `edge_one`, and `edge_two` must be valid null-terminated
///   C strings.
/// - Returns a newly allocated string that must be freed with
///   `edgeflow_free_string`.
/// - Returns NULL on error; call `edgeflow_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn edgeflow_calibrate(
    stationary: *const c_char,
    edge_one: *const c_char,
    edge_two: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let mut batches: Vec<Vec<SensorSample>> = Vec::with_capacity(3);
    for batch_ptr in [stationary, edge_one, edge_two] {
        let json = match cstr_to_string(batch_ptr) {
            Some(s) => s,
            None => {
                set_last_error("invalid batch string pointer");
                return ptr::null_mut();
            }
        };
        match serde_json::from_str::<Vec<SensorSample>>(&json) {
            Ok(batch) => batches.push(batch),
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    }

    let mut engine = CalibrationEngine::new(MemoryCalibrationStore::default());
    let side = SensorSide::Left;
    if let Err(e) = engine.capture_stationary(side, &batches[0]) {
        set_last_error(&e.to_string());
        return ptr::null_mut();
    }
    if let Err(e) = engine.capture_forward_edges(side, &batches[1], &batches[2]) {
        set_last_error(&e.to_string());
        return ptr::null_mut();
    }

    match engine.calibration(side).to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Create a new session.
///
/// `mode` is 0 for single-sensor, 1 for dual-sensor. `record_raw` is nonzero
/// to keep the full raw-sample log.
///
/// # Safety
/// - The returned pointer must be released with `edgeflow_session_finish` or
///   `edgeflow_session_free`.
#[no_mangle]
pub unsafe extern "C" fn edgeflow_session_new(mode: c_int, record_raw: c_int) -> *mut EdgeflowSession {
    clear_last_error();

    let mut config = match mode {
        0 => SessionConfig::single(),
        1 => SessionConfig::dual(),
        _ => {
            set_last_error("mode must be 0 (single) or 1 (dual)");
            return ptr::null_mut();
        }
    };
    config.record_raw_samples = record_raw != 0;

    Box::into_raw(Box::new(EdgeflowSession {
        aggregator: SessionAggregator::new(config),
    }))
}

/// Ingest one JSON record into a session.
///
/// The record format matches [`IngestRecord`]:
/// `{"timestamp":"2024-02-01T12:00:00.000Z","side":"left","sample":{...}}`
///
/// Returns the number of completed turn windows, or -1 on error.
///
/// # Safety
/// - `session` must be a pointer returned by `edgeflow_session_new` that has
///   not been finished or freed.
/// - `record` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn edgeflow_session_ingest(
    session: *mut EdgeflowSession,
    record: *const c_char,
) -> c_int {
    clear_last_error();

    let Some(session) = session.as_mut() else {
        set_last_error("null session pointer");
        return -1;
    };
    let Some(json) = cstr_to_string(record) else {
        set_last_error("invalid record string pointer");
        return -1;
    };

    let record: IngestRecord = match serde_json::from_str(&json) {
        Ok(r) => r,
        Err(e) => {
            set_last_error(&e.to_string());
            return -1;
        }
    };

    session.aggregator.ingest_record(&record);
    session.aggregator.windows().len() as c_int
}

/// Current live telemetry for a session, as JSON.
///
/// # Safety
/// - `session` must be a live session pointer.
/// - The returned string must be freed with `edgeflow_free_string`; NULL on
///   error.
#[no_mangle]
pub unsafe extern "C" fn edgeflow_session_telemetry(session: *mut EdgeflowSession) -> *mut c_char {
    clear_last_error();

    let Some(session) = session.as_ref() else {
        set_last_error("null session pointer");
        return ptr::null_mut();
    };

    match serde_json::to_string(&session.aggregator.telemetry()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Finish a session: consumes the handle and returns the versioned run
/// export as JSON.
///
/// # Safety
/// - `session` must be a live session pointer; it is freed by this call and
///   must not be used again.
/// - The returned string must be freed with `edgeflow_free_string`; NULL on
///   error (the session is still freed).
#[no_mangle]
pub unsafe extern "C" fn edgeflow_session_finish(session: *mut EdgeflowSession) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("null session pointer");
        return ptr::null_mut();
    }
    let session = Box::from_raw(session);
    let record = session.aggregator.finish();

    match RunExporter::new().encode_to_json(record) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session without producing a run export.
///
/// # Safety
/// - `session` must be a pointer returned by `edgeflow_session_new`, or
///   NULL (a no-op).
#[no_mangle]
pub unsafe extern "C" fn edgeflow_session_free(session: *mut EdgeflowSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

// ============================================================================
// Errors and memory
// ============================================================================

/// Last error message for the current thread, or NULL if none.
///
/// # Safety
/// - The returned pointer is valid until the next Edgeflow call on this
///   thread; do not free it.
#[no_mangle]
pub unsafe extern "C" fn edgeflow_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|c| c.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Free a string returned by an Edgeflow function.
///
/// # Safety
/// - `ptr` must be a pointer returned by an Edgeflow function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn edgeflow_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
