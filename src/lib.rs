//! Challenge-response client for YubiKey slots.
//!
//! Talks the slot protocol over USB HID feature reports (`manager`), wraps
//! one opened key as a [`token::Token`], and backs the `ykchallenge`
//! binary. A challenge goes in, the first 20 response bytes come back as
//! lowercase hex.

pub mod config;
pub mod manager;
pub mod token;
pub mod yubicoerror;

pub use crate::config::{Config, Mode, Slot};
pub use crate::token::{Token, UsbDriver};
pub use crate::yubicoerror::YubicoError;

pub type Result<T> = std::result::Result<T, YubicoError>;

/// Derives the bytes submitted to the key from the configured challenge
/// string: either its raw bytes, or the decoded bytes when the challenge is
/// hex-encoded text. Truncation to the 64-byte slot payload happens later,
/// at the submission boundary.
pub fn challenge_bytes(challenge: &str, hex_input: bool) -> Result<Vec<u8>> {
    if hex_input {
        Ok(hex::decode(challenge)?)
    } else {
        Ok(challenge.as_bytes().to_vec())
    }
}
