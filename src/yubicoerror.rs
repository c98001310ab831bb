use std::error;
use std::fmt;
use std::io::Error as ioError;

use hex::FromHexError as hexError;
use libusb::Error as usbError;

/// Usage errors (bad flags, bad slot, oversized challenge) exit with this
/// code; operational failures exit with [`EXIT_FAILURE`].
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug)]
pub enum YubicoError {
    IOError(ioError),
    DecodeError(hexError),
    UsbError(usbError),
    InvalidSlot,
    ChallengeTooLong,
    DeviceNotFound,
    OpenDeviceError,
    CanNotWriteToDevice,
    WrongCRC,
    InvalidResponse,
}

impl YubicoError {
    /// Process exit code for this error under the fixed policy:
    /// usage/validation problems are 2, everything operational is 1.
    pub fn exit_code(&self) -> i32 {
        match *self {
            YubicoError::InvalidSlot | YubicoError::ChallengeTooLong => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for YubicoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            YubicoError::IOError(ref err) => write!(f, "IO error: {}", err),
            YubicoError::DecodeError(ref err) => write!(f, "Hex decode error: {}", err),
            YubicoError::UsbError(ref err) => write!(f, "USB error: {}", err),
            YubicoError::InvalidSlot => write!(f, "Invalid slot, must be 1 or 2"),
            YubicoError::ChallengeTooLong => write!(f, "Challenge should be max 128 characters"),
            YubicoError::DeviceNotFound => write!(f, "Device not found"),
            YubicoError::OpenDeviceError => write!(f, "Can not open device"),
            YubicoError::CanNotWriteToDevice => write!(f, "Can not write to device"),
            YubicoError::WrongCRC => write!(f, "Wrong CRC"),
            YubicoError::InvalidResponse => write!(f, "Response from device is too short"),
        }
    }
}

impl error::Error for YubicoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            YubicoError::IOError(ref err) => Some(err),
            YubicoError::DecodeError(ref err) => Some(err),
            YubicoError::UsbError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<ioError> for YubicoError {
    fn from(err: ioError) -> YubicoError {
        YubicoError::IOError(err)
    }
}

impl From<hexError> for YubicoError {
    fn from(err: hexError) -> YubicoError {
        YubicoError::DecodeError(err)
    }
}

impl From<usbError> for YubicoError {
    fn from(err: usbError) -> YubicoError {
        YubicoError::UsbError(err)
    }
}
