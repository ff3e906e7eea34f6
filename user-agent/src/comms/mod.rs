//! Everything between the minifilter's communication port and the observer:
//! transports, wire decoding, classification and replies.

pub mod channel;
pub mod classify;
pub mod dispatch;
pub mod events;
pub mod fltport;
pub mod header;
pub mod memory;
pub mod observe;
pub(crate) mod reader;
pub mod reply;
pub mod simulate;
pub mod status;
