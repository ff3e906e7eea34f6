//! Event model for everything the minifilter pushes through its port.
//!
//! The canonical (tagged) protocol prefixes each payload with a 4-byte
//! discriminator selecting one of the fixed C layouts in `shared::layout`.
//! Two older single-kind channels carry an untagged, page-wide UTF-16 field:
//! free-form diagnostic text, or a file path awaiting an allow/deny verdict.
//! Which of those a port speaks is configuration, never guessed from bytes.
//!
//! Decoding validates the delivered length before any field is read and
//! returns a typed error (`TooShort`, `UnknownKind`) instead of a partially
//! populated event.

use serde::Serialize;
use shared::constants::*;
use shared::layout;
use std::fmt;
use thiserror::Error;

use crate::comms::reader::{FieldReader, put_wide_str};

/// Decoded payload of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    Process(ProcessEvent),
    File(FileEvent),
    Handle(HandleEvent),
    Text(TextEvent),
    Access(AccessNotification),
}

/// Process creation or exit (`PsSetCreateProcessNotifyRoutineEx`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEvent {
    pub is_create: bool,
    pub pid: i32,
    /// Empty on exit notifications.
    pub image: String,
    pub command_line: Option<String>,
}

/// Pre-operation callback seen by the minifilter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    pub operation: FileOperation,
    pub pid: i32,
    pub file_name: String,
}

/// Handle opened or duplicated to a protected process (`ObRegisterCallbacks`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleEvent {
    pub operation: HandleOperation,
    pub pid: i32,
    pub caller_pid: i32,
}

/// Free-form diagnostic line (legacy `USER_TO_FLT`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextEvent {
    pub message: String,
}

/// File access awaiting a verdict (legacy `FLT_TO_USER`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessNotification {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Process,
    File,
    Handle,
    Text,
    Access,
}

impl EventKind {
    /// Discriminator value, for kinds that carry one.
    pub fn tag(self) -> Option<u32> {
        match self {
            EventKind::Process => Some(PROC_TAG),
            EventKind::File => Some(FLT_TAG),
            EventKind::Handle => Some(OB_TAG),
            EventKind::Text | EventKind::Access => None,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            PROC_TAG => Some(EventKind::Process),
            FLT_TAG => Some(EventKind::File),
            OB_TAG => Some(EventKind::Handle),
            _ => None,
        }
    }

    /// Payload bytes the layout occupies, discriminator included.
    pub fn wire_size(self) -> usize {
        match self {
            EventKind::Process => layout::process::SIZE,
            EventKind::File => layout::file::SIZE,
            EventKind::Handle => layout::handle::SIZE,
            EventKind::Text | EventKind::Access => layout::legacy::SIZE,
        }
    }

    /// The sender blocks on a reply for these.
    pub fn requires_reply(self) -> bool {
        matches!(self, EventKind::Access)
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Process(_) => EventKind::Process,
            Event::File(_) => EventKind::File,
            Event::Handle(_) => EventKind::Handle,
            Event::Text(_) => EventKind::Text,
            Event::Access(_) => EventKind::Access,
        }
    }

    /// Serialize into the exact payload layout the driver produces.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.kind().wire_size()];
        if let Some(tag) = self.kind().tag() {
            out[0..TAG_SIZE].copy_from_slice(&tag.to_ne_bytes());
        }
        match self {
            Event::Process(p) => {
                put_u32(&mut out, layout::process::IS_CREATE, p.is_create as u32);
                put_u32(&mut out, layout::process::PROCESS_ID, p.pid as u32);
                put_wide_str(&mut out, layout::process::IMAGE_FILE_NAME, IMAGE_FILE_NAME_CCH, &p.image);
                if let Some(cmd) = &p.command_line {
                    put_wide_str(&mut out, layout::process::COMMAND_LINE, COMMAND_LINE_CCH, cmd);
                }
            }
            Event::File(f) => {
                put_u32(&mut out, layout::file::OPERATION, f.operation.code());
                put_u32(&mut out, layout::file::PROCESS_ID, f.pid as u32);
                put_wide_str(&mut out, layout::file::FILE_NAME, FILE_NAME_CCH, &f.file_name);
            }
            Event::Handle(h) => {
                put_u32(&mut out, layout::handle::OPERATION, h.operation.code());
                put_u32(&mut out, layout::handle::PROCESS_ID, h.pid as u32);
                put_u32(&mut out, layout::handle::CALLER_PID, h.caller_pid as u32);
            }
            Event::Text(t) => {
                put_wide_str(&mut out, layout::legacy::TEXT, LEGACY_TEXT_CCH, &t.message)
            }
            Event::Access(a) => {
                put_wide_str(&mut out, layout::legacy::TEXT, LEGACY_TEXT_CCH, &a.path)
            }
        }
        out
    }
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

/*──────────────────────────── operation codes ───────────────────────────*/

/// IRP major function names, indexed by code.
const IRP_MJ_NAMES: [&str; 28] = [
    "CREATE",
    "CREATE_NAMED_PIPE",
    "CLOSE",
    "READ",
    "WRITE",
    "QUERY_INFORMATION",
    "SET_INFORMATION",
    "QUERY_EA",
    "SET_EA",
    "FLUSH_BUFFERS",
    "QUERY_VOLUME_INFORMATION",
    "SET_VOLUME_INFORMATION",
    "DIRECTORY_CONTROL",
    "FILE_SYSTEM_CONTROL",
    "DEVICE_CONTROL",
    "INTERNAL_DEVICE_CONTROL",
    "SHUTDOWN",
    "LOCK_CONTROL",
    "CLEANUP",
    "CREATE_MAILSLOT",
    "QUERY_SECURITY",
    "SET_SECURITY",
    "POWER",
    "SYSTEM_CONTROL",
    "DEVICE_CHANGE",
    "QUERY_QUOTA",
    "SET_QUOTA",
    "PNP",
];

/// Filesystem operation (IRP major function) a file event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileOperation(u32);

impl FileOperation {
    pub const CREATE: Self = Self(0x00);
    pub const CLOSE: Self = Self(0x02);
    pub const READ: Self = Self(0x03);
    pub const WRITE: Self = Self(0x04);
    pub const SET_INFORMATION: Self = Self(0x06);
    pub const CLEANUP: Self = Self(0x12);

    pub fn from_code(code: u32) -> Self {
        Self(code)
    }

    pub fn code(self) -> u32 {
        self.0
    }

    /// `None` for codes outside the IRP major function table.
    pub fn name(self) -> Option<&'static str> {
        IRP_MJ_NAMES.get(self.0 as usize).copied()
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "OP(0x{:02X})", self.0),
        }
    }
}

impl Serialize for FileOperation {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOperation {
    Create,
    Duplicate,
    Other(u32),
}

impl HandleOperation {
    pub fn from_code(code: u32) -> Self {
        match code {
            OB_OPERATION_HANDLE_CREATE => HandleOperation::Create,
            OB_OPERATION_HANDLE_DUPLICATE => HandleOperation::Duplicate,
            other => HandleOperation::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            HandleOperation::Create => OB_OPERATION_HANDLE_CREATE,
            HandleOperation::Duplicate => OB_OPERATION_HANDLE_DUPLICATE,
            HandleOperation::Other(code) => code,
        }
    }
}

impl fmt::Display for HandleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleOperation::Create => f.write_str("CREATE"),
            HandleOperation::Duplicate => f.write_str("DUPLICATE"),
            HandleOperation::Other(code) => write!(f, "OP({code})"),
        }
    }
}

impl Serialize for HandleOperation {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/*──────────────────────────────── decoding ──────────────────────────────*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("unknown event kind {0}")]
    UnknownKind(u32),
}

/// Wire dialect spoken by a port; parsed from config by `FromStr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Discriminator-prefixed layouts (canonical).
    #[default]
    Tagged,
    /// Untagged free-form text on every message.
    LegacyText,
    /// Untagged file path on every message; each one awaits a reply.
    LegacyAccess,
}

impl Protocol {
    /// Largest payload a message of this dialect carries.
    pub fn max_payload(self) -> usize {
        match self {
            Protocol::Tagged => layout::MAX_TAGGED_SIZE,
            Protocol::LegacyText | Protocol::LegacyAccess => layout::legacy::SIZE,
        }
    }
}

/// Decode a tagged payload (everything after the message header).
pub fn decode_event(payload: &[u8]) -> Result<Event, DecodeError> {
    decode_payload(Protocol::Tagged, payload)
}

pub fn decode_payload(protocol: Protocol, payload: &[u8]) -> Result<Event, DecodeError> {
    let reader = FieldReader::new(payload);
    reader.require(TAG_SIZE)?;

    let kind = match protocol {
        Protocol::Tagged => {
            let tag = reader.u32_at(0)?;
            EventKind::from_tag(tag).ok_or(DecodeError::UnknownKind(tag))?
        }
        Protocol::LegacyText => EventKind::Text,
        Protocol::LegacyAccess => EventKind::Access,
    };
    reader.require(kind.wire_size())?;

    Ok(match kind {
        EventKind::Process => {
            let command_line = reader.wide_str_at(layout::process::COMMAND_LINE, COMMAND_LINE_CCH)?;
            Event::Process(ProcessEvent {
                is_create: reader.u32_at(layout::process::IS_CREATE)? != 0,
                pid: reader.i32_at(layout::process::PROCESS_ID)?,
                image: reader.wide_str_at(layout::process::IMAGE_FILE_NAME, IMAGE_FILE_NAME_CCH)?,
                command_line: (!command_line.is_empty()).then_some(command_line),
            })
        }
        EventKind::File => Event::File(FileEvent {
            operation: FileOperation::from_code(reader.u32_at(layout::file::OPERATION)?),
            pid: reader.i32_at(layout::file::PROCESS_ID)?,
            file_name: reader.wide_str_at(layout::file::FILE_NAME, FILE_NAME_CCH)?,
        }),
        EventKind::Handle => Event::Handle(HandleEvent {
            operation: HandleOperation::from_code(reader.u32_at(layout::handle::OPERATION)?),
            pid: reader.i32_at(layout::handle::PROCESS_ID)?,
            caller_pid: reader.i32_at(layout::handle::CALLER_PID)?,
        }),
        EventKind::Text => Event::Text(TextEvent {
            message: reader.wide_str_at(layout::legacy::TEXT, LEGACY_TEXT_CCH)?,
        }),
        EventKind::Access => Event::Access(AccessNotification {
            path: reader.wide_str_at(layout::legacy::TEXT, LEGACY_TEXT_CCH)?,
        }),
    })
}
