use std::fmt;
use std::str::FromStr;

use crate::yubicoerror::YubicoError;

/// Maximum number of raw challenge characters accepted on the command line
/// or from standard input.
pub const MAX_CHALLENGE_CHARS: usize = 128;

/// One of the two independent configuration slots on the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Slot1,
    Slot2,
}

impl FromStr for Slot {
    type Err = YubicoError;

    fn from_str(s: &str) -> Result<Slot, YubicoError> {
        match s.trim() {
            "1" => Ok(Slot::Slot1),
            "2" => Ok(Slot::Slot2),
            _ => Err(YubicoError::InvalidSlot),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Slot::Slot1 => write!(f, "1"),
            Slot::Slot2 => write!(f, "2"),
        }
    }
}

/// Challenge-response flavor stored in the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// HMAC-SHA1 over the challenge.
    Sha1,
    /// Proprietary Yubico OTP response.
    Otp,
}

/// Parsed program configuration. Built once from the command line and
/// immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub slot: Slot,
    pub mode: Mode,
    pub hex_input: bool,
    pub verbose: bool,
    pub challenge: String,
}

#[allow(dead_code)]
impl Config {
    pub fn default() -> Config {
        Config {
            slot: Slot::Slot1,
            mode: Mode::Sha1,
            hex_input: false,
            verbose: false,
            challenge: String::new(),
        }
    }

    pub fn set_slot(mut self, slot: Slot) -> Self {
        self.slot = slot;
        self
    }

    pub fn set_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_hex_input(mut self, hex_input: bool) -> Self {
        self.hex_input = hex_input;
        self
    }

    pub fn set_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn set_challenge<S: Into<String>>(mut self, challenge: S) -> Self {
        self.challenge = challenge.into();
        self
    }
}
