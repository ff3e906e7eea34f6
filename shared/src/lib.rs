#![cfg_attr(feature = "kernel", no_std)]

//! Wire layout shared by the minifilter and the user agent.
//!
//! Everything here is plain constants: the driver fills fixed-size C
//! structures and the agent decodes them by offset, so both sides must agree
//! on these numbers and nothing else.

pub mod constants;
pub mod layout;
