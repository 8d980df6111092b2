//! Domain types for Replygate reply automation.

#![forbid(unsafe_code)]

mod action;

pub use action::{ActionKind, ReplyAction};
