use std::time::Duration;
use std::{slice, thread};

use bitflags::bitflags;
use libusb::{request_type, Context, DeviceHandle, Direction, Recipient, RequestType};
use log::debug;

use crate::config::{Mode, Slot};
use crate::yubicoerror::YubicoError;
use crate::Result;

/// Slot payload size; challenges are truncated to this before submission.
pub const DATA_SIZE: usize = 64;
/// Size of the zero-initialized response buffer handed to the driver.
pub const RESPONSE_SIZE: usize = 64;
/// Length of the semantically valid (HMAC-SHA1) portion of a response.
pub const HMAC_RESPONSE_LEN: usize = 20;

pub const YUBICO_VENDOR_ID: u16 = 0x1050;

const PRESET_VALUE: u16 = 0xFFFF;
const POLYNOMIAL: u16 = 0x8408;
const CRC_RESIDUAL_OK: u16 = 0xf0b8;
const HID_GET_REPORT: u8 = 0x01;
const HID_SET_REPORT: u8 = 0x09;
const REPORT_TYPE_FEATURE: u16 = 0x03;
const FEATURE_RPT_SIZE: usize = 8;

bitflags! {
    pub struct Flags: u8 {
        const SLOT_WRITE_FLAG = 0x80;
        const RESP_PENDING_FLAG = 0x40;
    }
}

/// Slot command codes as written into the frame's command byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    DeviceSerial = 0x10,
    ChallengeOtp1 = 0x20,
    ChallengeOtp2 = 0x28,
    ChallengeHmac1 = 0x30,
    ChallengeHmac2 = 0x38,
}

impl Command {
    /// Maps a (slot, mode) pair to its fixed challenge command code.
    pub fn challenge(slot: Slot, mode: Mode) -> Command {
        match (slot, mode) {
            (Slot::Slot1, Mode::Sha1) => Command::ChallengeHmac1,
            (Slot::Slot2, Mode::Sha1) => Command::ChallengeHmac2,
            (Slot::Slot1, Mode::Otp) => Command::ChallengeOtp1,
            (Slot::Slot2, Mode::Otp) => Command::ChallengeOtp2,
        }
    }

    /// Number of response bytes covered by the trailing CRC.
    pub fn response_len(self) -> usize {
        match self {
            Command::ChallengeHmac1 | Command::ChallengeHmac2 => 20,
            Command::ChallengeOtp1 | Command::ChallengeOtp2 => 16,
            Command::DeviceSerial => 4,
        }
    }
}

/// Scans the bus for the first device with the Yubico vendor id and returns
/// its (vendor, product) pair without opening it.
pub fn find_yubikey(context: &mut Context) -> Result<(u16, u16)> {
    for device in context.devices()?.iter() {
        let descr = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descr.vendor_id() == YUBICO_VENDOR_ID {
            debug!(
                "found yubikey, vendor id {:04x} product id {:04x}",
                descr.vendor_id(),
                descr.product_id()
            );
            return Ok((descr.vendor_id(), descr.product_id()));
        }
    }
    Err(YubicoError::DeviceNotFound)
}

pub fn open_device<'a>(context: &'a mut Context, vid: u16, pid: u16) -> Result<DeviceHandle<'a>> {
    for device in context.devices()?.iter() {
        let descr = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descr.vendor_id() != vid || descr.product_id() != pid {
            continue;
        }

        let mut handle = device.open().map_err(|_| YubicoError::OpenDeviceError)?;
        let config = device.config_descriptor(0)?;
        let interface = config
            .interfaces()
            .next()
            .and_then(|interface| interface.descriptors().next())
            .ok_or(YubicoError::OpenDeviceError)?;

        if handle.kernel_driver_active(interface.interface_number())? {
            handle.detach_kernel_driver(interface.interface_number())?;
        }
        // Some firmwares report the configuration as unsupported; ignore.
        let _ = handle.set_active_configuration(1);
        handle.claim_interface(interface.interface_number())?;
        return Ok(handle);
    }

    Err(YubicoError::DeviceNotFound)
}

pub fn wait<F: Fn(Flags) -> bool>(
    handle: &mut DeviceHandle,
    f: F,
    buf: &mut [u8],
) -> Result<()> {
    loop {
        read(handle, buf)?;
        let flags = Flags::from_bits_truncate(buf[7]);
        if f(flags) {
            return Ok(());
        }
        thread::sleep(Duration::new(0, 1_000_000));
    }
}

pub fn read(handle: &mut DeviceHandle, buf: &mut [u8]) -> Result<usize> {
    assert_eq!(buf.len(), FEATURE_RPT_SIZE);
    let reqtype = request_type(Direction::In, RequestType::Class, Recipient::Interface);
    let value = REPORT_TYPE_FEATURE << 8;
    let read = handle.read_control(reqtype, HID_GET_REPORT, value, 0, buf, Duration::new(2, 0))?;
    Ok(read)
}

pub fn write_frame(handle: &mut DeviceHandle, frame: &Frame) -> Result<()> {
    let mut data = unsafe { slice::from_raw_parts(frame as *const Frame as *const u8, 70) };

    let mut seq = 0;
    let mut buf = [0; FEATURE_RPT_SIZE];
    while !data.is_empty() {
        let (a, b) = data.split_at(7);

        // All-zero interior packets are skipped; the key treats them as
        // already written.
        if seq == 0 || b.is_empty() || a.iter().any(|&x| x != 0) {
            let mut packet = [0; FEATURE_RPT_SIZE];
            packet[..7].copy_from_slice(a);

            packet[7] = Flags::SLOT_WRITE_FLAG.bits() + seq;
            wait(handle, |x| !x.contains(Flags::SLOT_WRITE_FLAG), &mut buf)?;
            raw_write(handle, &packet)?
        }
        data = b;
        seq += 1
    }
    Ok(())
}

pub fn raw_write(handle: &mut DeviceHandle, packet: &[u8]) -> Result<()> {
    let reqtype = request_type(Direction::Out, RequestType::Class, Recipient::Interface);
    let value = REPORT_TYPE_FEATURE << 8;
    if handle.write_control(reqtype, HID_SET_REPORT, value, 0, packet, Duration::new(2, 0))?
        != FEATURE_RPT_SIZE
    {
        Err(YubicoError::CanNotWriteToDevice)
    } else {
        Ok(())
    }
}

/// Reset the write state after a read.
pub fn write_reset(handle: &mut DeviceHandle) -> Result<()> {
    raw_write(handle, &[0, 0, 0, 0, 0, 0, 0, 0x8f])?;
    let mut buf = [0; FEATURE_RPT_SIZE];
    wait(handle, |x| !x.contains(Flags::SLOT_WRITE_FLAG), &mut buf)?;
    Ok(())
}

/// Accumulates the response 7 bytes at a time until the sequence number
/// wraps or the buffer is full, then resets the slot write state.
pub fn read_response(handle: &mut DeviceHandle, response: &mut [u8]) -> Result<usize> {
    let mut r0 = 0;
    wait(
        handle,
        |f| f.contains(Flags::RESP_PENDING_FLAG),
        &mut response[..FEATURE_RPT_SIZE],
    )?;
    r0 += 7;
    loop {
        if r0 + FEATURE_RPT_SIZE > response.len() {
            break;
        }
        if read(handle, &mut response[r0..r0 + FEATURE_RPT_SIZE])? < FEATURE_RPT_SIZE {
            break;
        }
        let flags = Flags::from_bits_truncate(response[r0 + 7]);
        if flags.contains(Flags::RESP_PENDING_FLAG) {
            let seq = response[r0 + 7] & 0b0001_1111;
            if r0 > 0 && seq == 0 {
                // Sequence wrapped back to 0 after at least one packet.
                break;
            }
        } else {
            break;
        }
        r0 += 7;
    }
    write_reset(handle)?;
    Ok(r0)
}

pub fn crc16(data: &[u8]) -> u16 {
    let mut crc_value = PRESET_VALUE;
    for &b in data {
        crc_value ^= b as u16;
        for _ in 0..8 {
            let j = crc_value & 1;
            crc_value >>= 1;
            if j != 0 {
                crc_value ^= POLYNOMIAL
            }
        }
    }
    crc_value
}

/// True when `data` (payload plus its trailing little-endian CRC) leaves
/// the expected CRC16 residual.
pub fn check_crc(data: &[u8]) -> bool {
    crc16(data) == CRC_RESIDUAL_OK
}

#[repr(C)]
#[repr(packed)]
pub struct Frame {
    pub payload: [u8; DATA_SIZE],
    command: Command,
    crc: u16,
    filler: [u8; 3],
}

impl Frame {
    pub fn new(payload: [u8; DATA_SIZE], command: Command) -> Self {
        let mut f = Frame {
            payload,
            command,
            crc: 0,
            filler: [0; 3],
        };
        f.crc = crc16(&f.payload).to_le();
        f
    }
}
