#![cfg_attr(not(test), no_std)]
//! # Common types
//!
//! Types shared between the logger firmware and host side tools.

pub mod lpp;

pub use lpp::{LoggerRecord, PayloadError, MAX_RECORD_LEN};
