/// Communication port created by the minifilter (`FltCreateCommunicationPort`).
pub const PORT_NAME: &str = r"\MedusaComPort";

/// One memory page; the legacy message structures are exactly this wide.
pub const PAGE_SIZE: usize = 4096;

/// Default receive buffer: room for the header plus the largest legacy layout.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2 * PAGE_SIZE;

/// `replyCapacity: u32` + `messageId: u64`, packed.
pub const HEADER_SIZE: usize = 12;

/// Width of the leading event discriminator.
pub const TAG_SIZE: usize = 4;

pub const PROC_TAG: u32 = 0;
pub const FLT_TAG: u32 = 1;
pub const OB_TAG: u32 = 2;

/// Capacities of the bounded UTF-16 text fields, in code units.
pub const IMAGE_FILE_NAME_CCH: usize = 260;
pub const COMMAND_LINE_CCH: usize = 1024;
pub const FILE_NAME_CCH: usize = 260;
pub const LEGACY_TEXT_CCH: usize = PAGE_SIZE / 2;

/// `FLT_TO_USER_REPLY { u32 block }`.
pub const REPLY_SIZE: usize = 4;

pub const OB_OPERATION_HANDLE_CREATE: u32 = 0;
pub const OB_OPERATION_HANDLE_DUPLICATE: u32 = 1;
