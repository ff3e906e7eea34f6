//! Byte offsets of every payload layout, measured from the start of the
//! payload (i.e. right after the message header).
//!
//! All integers are native-endian `int`/`unsigned int`; text fields are
//! NUL-padded `wchar_t` arrays.

use crate::constants::*;

/// Size in bytes of a UTF-16 field holding `cch` code units.
pub const fn wide_len(cch: usize) -> usize {
    cch * 2
}

/// `CreateProcessNotifyRoutineEvent`
pub mod process {
    use super::*;

    pub const TAG: usize = 0;
    pub const IS_CREATE: usize = 4;
    pub const PROCESS_ID: usize = 8;
    pub const IMAGE_FILE_NAME: usize = 12;
    pub const COMMAND_LINE: usize = IMAGE_FILE_NAME + wide_len(IMAGE_FILE_NAME_CCH);
    pub const SIZE: usize = COMMAND_LINE + wide_len(COMMAND_LINE_CCH);
}

/// `FLT_PREOP_CALLBACK_Event`
pub mod file {
    use super::*;

    pub const TAG: usize = 0;
    pub const OPERATION: usize = 4;
    pub const PROCESS_ID: usize = 8;
    pub const FILE_NAME: usize = 12;
    pub const SIZE: usize = FILE_NAME + wide_len(FILE_NAME_CCH);
}

/// `OB_OPERATION_HANDLE_Event`
pub mod handle {
    pub const TAG: usize = 0;
    pub const OPERATION: usize = 4;
    pub const PROCESS_ID: usize = 8;
    pub const CALLER_PID: usize = 12;
    pub const SIZE: usize = 16;
}

/// `USER_TO_FLT` (free-form text) and `FLT_TO_USER` (path awaiting a verdict)
/// share the same untagged, page-wide shape.
pub mod legacy {
    use super::*;

    pub const TEXT: usize = 0;
    pub const SIZE: usize = wide_len(LEGACY_TEXT_CCH);
}

/// Largest tagged layout; sizes the receive buffer for the tagged protocol.
pub const MAX_TAGGED_SIZE: usize = max(process::SIZE, max(file::SIZE, handle::SIZE));

const fn max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}
