//! Status-code rendering and classification.
//!
//! The port APIs report `HRESULT`s. Most of them wrap a Win32 error
//! (`0x8007xxxx`), a few wrap an `NTSTATUS` (`FACILITY_NT_BIT`). Text is
//! best-effort: on Windows the system message table is consulted first, then
//! a small built-in table; anything else renders as bare hex.

pub const S_OK: u32 = 0x0000_0000;
pub const E_ACCESSDENIED: u32 = 0x8007_0005;
pub const E_HANDLE: u32 = 0x8007_0006;
pub const E_INVALIDARG: u32 = 0x8007_0057;
pub const E_FILE_NOT_FOUND: u32 = 0x8007_0002;
pub const E_BROKEN_PIPE: u32 = 0x8007_006D;
pub const E_INSUFFICIENT_BUFFER: u32 = 0x8007_007A;
pub const E_WAIT_TIMEOUT: u32 = 0x8007_0102;
pub const E_SEM_TIMEOUT: u32 = 0x8007_0079;
pub const E_OPERATION_ABORTED: u32 = 0x8007_03E3;
pub const E_IO_PENDING: u32 = 0x8007_03E5;
/// `HRESULT_FROM_NT(STATUS_PORT_DISCONNECTED)`
pub const E_PORT_DISCONNECTED: u32 = 0xD000_0037;

const FACILITY_WIN32_MASK: u32 = 0xFFFF_0000;
const FACILITY_WIN32: u32 = 0x8007_0000;

/// `HRESULT_FROM_WIN32`
pub const fn hresult_from_win32(code: u32) -> u32 {
    if code as i32 <= 0 { code } else { (code & 0xFFFF) | FACILITY_WIN32 }
}

/// Inverse of [`hresult_from_win32`]; other facilities pass through unchanged.
pub const fn win32_code(hr: u32) -> u32 {
    if hr & FACILITY_WIN32_MASK == FACILITY_WIN32 { hr & 0xFFFF } else { hr }
}

const KNOWN: &[(u32, &str)] = &[
    (S_OK, "The operation completed successfully."),
    (E_FILE_NOT_FOUND, "The system cannot find the file specified."),
    (E_ACCESSDENIED, "Access is denied."),
    (E_HANDLE, "The handle is invalid."),
    (E_INVALIDARG, "The parameter is incorrect."),
    (E_BROKEN_PIPE, "The pipe has been ended."),
    (E_SEM_TIMEOUT, "The semaphore timeout period has expired."),
    (E_INSUFFICIENT_BUFFER, "The data area passed to a system call is too small."),
    (E_WAIT_TIMEOUT, "The wait operation timed out."),
    (
        E_OPERATION_ABORTED,
        "The I/O operation has been aborted because of either a thread exit or an application request.",
    ),
    (E_IO_PENDING, "Overlapped I/O operation is in progress."),
    (E_PORT_DISCONNECTED, "The communication port is disconnected."),
];

/// Human-readable text for `status`, if any is known.
pub fn status_text(status: u32) -> Option<String> {
    #[cfg(windows)]
    if let Some(text) = system_message(win32_code(status)) {
        return Some(text);
    }
    KNOWN
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, text)| (*text).to_owned())
}

/// `0x80070005 (Access is denied.)`, or just the hex when no text is known.
pub fn describe(status: u32) -> String {
    match status_text(status) {
        Some(text) => format!("0x{status:08X} ({text})"),
        None => format!("0x{status:08X}"),
    }
}

/// How the receive loop should react to a failed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveClass {
    /// Nothing arrived within the configured wait; try again.
    Timeout,
    /// This receive failed but the port is still usable.
    Transient,
    /// The handle is gone or was cancelled; stop receiving.
    Fatal,
}

pub fn classify_receive_status(status: u32) -> ReceiveClass {
    match status {
        E_WAIT_TIMEOUT | E_SEM_TIMEOUT => ReceiveClass::Timeout,
        E_HANDLE | E_OPERATION_ABORTED | E_ACCESSDENIED | E_BROKEN_PIPE
        | E_PORT_DISCONNECTED => ReceiveClass::Fatal,
        _ => ReceiveClass::Transient,
    }
}

#[cfg(windows)]
fn system_message(code: u32) -> Option<String> {
    use windows_sys::Win32::System::Diagnostics::Debug::{
        FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, FormatMessageW,
    };

    let mut buf = [0u16; 512];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            std::ptr::null(),
            code,
            0,
            buf.as_mut_ptr(),
            buf.len() as u32,
            std::ptr::null(),
        )
    } as usize;
    if len == 0 {
        return None;
    }
    let text = String::from_utf16_lossy(&buf[..len.min(buf.len())]);
    let text = text.trim_end();
    (!text.is_empty()).then(|| text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_facility_round_trips() {
        assert_eq!(hresult_from_win32(5), E_ACCESSDENIED);
        assert_eq!(win32_code(E_ACCESSDENIED), 5);
        assert_eq!(hresult_from_win32(0), S_OK);
        assert_eq!(win32_code(E_PORT_DISCONNECTED), E_PORT_DISCONNECTED);
    }

    #[test]
    fn known_codes_render_with_text() {
        let line = describe(E_ACCESSDENIED);
        assert!(line.starts_with("0x80070005 ("), "{line}");
        assert!(line.ends_with(')'), "{line}");
    }

    #[cfg(not(windows))]
    #[test]
    fn unknown_codes_render_as_bare_hex() {
        assert_eq!(describe(0x1234_ABCD), "0x1234ABCD");
        assert_eq!(status_text(0x1234_ABCD), None);
    }

    #[test]
    fn receive_statuses_are_classified() {
        assert_eq!(classify_receive_status(E_WAIT_TIMEOUT), ReceiveClass::Timeout);
        assert_eq!(classify_receive_status(E_OPERATION_ABORTED), ReceiveClass::Fatal);
        assert_eq!(classify_receive_status(E_HANDLE), ReceiveClass::Fatal);
        assert_eq!(classify_receive_status(E_PORT_DISCONNECTED), ReceiveClass::Fatal);
        assert_eq!(classify_receive_status(E_INSUFFICIENT_BUFFER), ReceiveClass::Transient);
    }
}
