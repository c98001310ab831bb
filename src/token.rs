use libusb::Context;
use log::debug;

use crate::config::{Mode, Slot};
use crate::manager::{self, Command, Frame, DATA_SIZE, HMAC_RESPONSE_LEN, RESPONSE_SIZE};
use crate::yubicoerror::YubicoError;
use crate::Result;

/// Status block read from the key on open. The first six bytes of the HID
/// feature report; the touch level is little-endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    pub pgm_seq: u8,
    pub touch_level: u16,
}

impl Status {
    pub fn from_feature_report(report: &[u8; 8]) -> Status {
        Status {
            version_major: report[0],
            version_minor: report[1],
            version_build: report[2],
            pgm_seq: report[3],
            touch_level: u16::from_le_bytes([report[4], report[5]]),
        }
    }

    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_build
        )
    }

    /// Whether the firmware major revision is one this tool knows about.
    pub fn firmware_supported(&self) -> bool {
        (1..=5).contains(&self.version_major)
    }
}

/// Blocking single-transaction access to one key. `UsbDriver` is the real
/// thing; tests substitute stubs.
pub trait Driver {
    fn status(&mut self) -> Result<Status>;
    fn read_serial(&mut self) -> Result<u32>;
    fn transact(
        &mut self,
        command: Command,
        challenge: &[u8],
        response: &mut [u8; RESPONSE_SIZE],
    ) -> Result<()>;
}

/// Driver over the libusb HID transport. Owns the libusb context (the
/// process-wide library lifecycle) and reopens the device handle for each
/// transaction, so the handle never outlives an operation.
pub struct UsbDriver {
    context: Context,
    vendor_id: u16,
    product_id: u16,
}

impl UsbDriver {
    /// Finds the first attached Yubico device without opening it; opening
    /// happens per transaction.
    pub fn open_first() -> Result<UsbDriver> {
        let mut context = Context::new()?;
        let (vendor_id, product_id) = manager::find_yubikey(&mut context)?;
        Ok(UsbDriver {
            context,
            vendor_id,
            product_id,
        })
    }
}

impl Driver for UsbDriver {
    fn status(&mut self) -> Result<Status> {
        let mut handle = manager::open_device(&mut self.context, self.vendor_id, self.product_id)?;
        let mut report = [0u8; 8];
        manager::read(&mut handle, &mut report)?;
        Ok(Status::from_feature_report(&report))
    }

    fn read_serial(&mut self) -> Result<u32> {
        let mut response = [0u8; RESPONSE_SIZE];
        self.transact(Command::DeviceSerial, &[], &mut response)?;
        Ok(u32::from_be_bytes([
            response[0],
            response[1],
            response[2],
            response[3],
        ]))
    }

    fn transact(
        &mut self,
        command: Command,
        challenge: &[u8],
        response: &mut [u8; RESPONSE_SIZE],
    ) -> Result<()> {
        let mut handle = manager::open_device(&mut self.context, self.vendor_id, self.product_id)?;

        let mut payload = [0u8; DATA_SIZE];
        let n = challenge.len().min(DATA_SIZE);
        payload[..n].copy_from_slice(&challenge[..n]);

        manager::write_frame(&mut handle, &Frame::new(payload, command))?;

        // Slack beyond RESPONSE_SIZE: the last 7-byte packet may run past
        // the payload proper.
        let mut buf = [0u8; RESPONSE_SIZE + 16];
        let read = manager::read_response(&mut handle, &mut buf)?;

        let expected = command.response_len();
        if read < expected + 2 {
            return Err(YubicoError::InvalidResponse);
        }
        if !manager::check_crc(&buf[..expected + 2]) {
            return Err(YubicoError::WrongCRC);
        }

        response.copy_from_slice(&buf[..RESPONSE_SIZE]);
        Ok(())
    }
}

/// An opened key: a driver plus the status block cached at open time.
pub struct Token<D: Driver> {
    driver: D,
    status: Status,
    serial: u32,
}

impl Token<UsbDriver> {
    /// Opens the first attached key; fails fast with `DeviceNotFound` when
    /// none is present.
    pub fn open_first() -> Result<Token<UsbDriver>> {
        Token::with_driver(UsbDriver::open_first()?)
    }
}

impl<D: Driver> Token<D> {
    pub fn with_driver(mut driver: D) -> Result<Token<D>> {
        let status = driver.status()?;
        debug!(
            "status: pgm_seq {}, touch_level {}",
            status.pgm_seq, status.touch_level
        );
        // Devices below major 2 have no readable serial; report 0 there
        // and on a failed read.
        let serial = if status.version_major >= 2 {
            match driver.read_serial() {
                Ok(serial) => serial,
                Err(err) => {
                    debug!("serial read failed: {}", err);
                    0
                }
            }
        } else {
            0
        };
        debug!("opened key: {}", serial);
        Ok(Token {
            driver,
            status,
            serial,
        })
    }

    pub fn version(&self) -> String {
        self.status.version()
    }

    pub fn version_major(&self) -> u8 {
        self.status.version_major
    }

    pub fn firmware_supported(&self) -> bool {
        self.status.firmware_supported()
    }

    pub fn serial_number(&self) -> u32 {
        self.serial
    }

    /// Submits one challenge against the given slot and returns the first
    /// 20 response bytes as lowercase hex. Challenges longer than 64 bytes
    /// are truncated here as a final guard; the caller is expected to have
    /// truncated (and warned) already.
    pub fn challenge_response(
        &mut self,
        challenge: &[u8],
        slot: Slot,
        mode: Mode,
    ) -> Result<String> {
        let command = Command::challenge(slot, mode);
        let challenge = &challenge[..challenge.len().min(DATA_SIZE)];

        let mut response = [0u8; RESPONSE_SIZE];
        self.driver.transact(command, challenge, &mut response)?;

        Ok(hex::encode(&response[..HMAC_RESPONSE_LEN]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use hmac::{Hmac, Mac};
    use sha1::Sha1;

    /// Records what reaches the driver and answers with a canned response.
    struct StubDriver {
        status: Status,
        response: [u8; RESPONSE_SIZE],
        seen_command: Option<Command>,
        seen_challenge: Vec<u8>,
        serial_reads: usize,
    }

    impl StubDriver {
        fn with_version(major: u8) -> StubDriver {
            StubDriver {
                status: Status {
                    version_major: major,
                    version_minor: 4,
                    version_build: 3,
                    pgm_seq: 1,
                    touch_level: 0,
                },
                response: [0u8; RESPONSE_SIZE],
                seen_command: None,
                seen_challenge: Vec::new(),
                serial_reads: 0,
            }
        }
    }

    impl Driver for StubDriver {
        fn status(&mut self) -> Result<Status> {
            Ok(self.status)
        }

        fn read_serial(&mut self) -> Result<u32> {
            self.serial_reads += 1;
            Ok(5_397_298)
        }

        fn transact(
            &mut self,
            command: Command,
            challenge: &[u8],
            response: &mut [u8; RESPONSE_SIZE],
        ) -> Result<()> {
            self.seen_command = Some(command);
            self.seen_challenge = challenge.to_vec();
            response.copy_from_slice(&self.response);
            Ok(())
        }
    }

    /// Behaves like a key provisioned for HMAC-SHA1 with a fixed secret.
    struct HmacStub {
        key: Vec<u8>,
    }

    impl Driver for HmacStub {
        fn status(&mut self) -> Result<Status> {
            Ok(Status {
                version_major: 4,
                ..Status::default()
            })
        }

        fn read_serial(&mut self) -> Result<u32> {
            Ok(0)
        }

        fn transact(
            &mut self,
            _command: Command,
            challenge: &[u8],
            response: &mut [u8; RESPONSE_SIZE],
        ) -> Result<()> {
            let mut mac = Hmac::<Sha1>::new_from_slice(&self.key).unwrap();
            mac.update(challenge);
            response[..20].copy_from_slice(&mac.finalize().into_bytes());
            Ok(())
        }
    }

    struct AbsentDriver;

    impl Driver for AbsentDriver {
        fn status(&mut self) -> Result<Status> {
            Err(YubicoError::DeviceNotFound)
        }

        fn read_serial(&mut self) -> Result<u32> {
            Err(YubicoError::DeviceNotFound)
        }

        fn transact(&mut self, _: Command, _: &[u8], _: &mut [u8; RESPONSE_SIZE]) -> Result<()> {
            Err(YubicoError::DeviceNotFound)
        }
    }

    #[test]
    fn status_decodes_the_first_six_report_bytes() {
        let status = Status::from_feature_report(&[4, 3, 7, 9, 0x34, 0x12, 0xff, 0xff]);
        assert_eq!(status.version_major, 4);
        assert_eq!(status.version_minor, 3);
        assert_eq!(status.version_build, 7);
        assert_eq!(status.pgm_seq, 9);
        assert_eq!(status.touch_level, 0x1234);
    }

    #[test]
    fn version_formats_as_triple() {
        let token = Token::with_driver(StubDriver::with_version(2)).unwrap();
        assert_eq!(token.version(), "2.4.3");
        assert_eq!(token.version_major(), 2);
        assert!(token.firmware_supported());
    }

    #[test]
    fn serial_is_read_from_major_two_onwards() {
        let token = Token::with_driver(StubDriver::with_version(2)).unwrap();
        assert_eq!(token.serial_number(), 5_397_298);
    }

    #[test]
    fn serial_is_gated_below_major_two() {
        let token = Token::with_driver(StubDriver::with_version(1)).unwrap();
        assert_eq!(token.serial_number(), 0);
        assert_eq!(token.driver.serial_reads, 0);
    }

    #[test]
    fn no_device_surfaces_at_open() {
        assert_matches!(
            Token::with_driver(AbsentDriver).map(|_| ()),
            Err(YubicoError::DeviceNotFound)
        );
    }

    #[test]
    fn response_is_first_twenty_bytes_in_lowercase_hex() {
        let mut stub = StubDriver::with_version(2);
        for (i, b) in stub.response.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut token = Token::with_driver(stub).unwrap();
        let out = token
            .challenge_response(b"abc", Slot::Slot1, Mode::Sha1)
            .unwrap();
        assert_eq!(out, "000102030405060708090a0b0c0d0e0f10111213");
        assert_eq!(token.driver.seen_command, Some(Command::ChallengeHmac1));
        assert_eq!(token.driver.seen_challenge, b"abc".to_vec());
    }

    #[test]
    fn slot_and_mode_select_the_command_code() {
        let mut token = Token::with_driver(StubDriver::with_version(2)).unwrap();
        token
            .challenge_response(b"x", Slot::Slot2, Mode::Otp)
            .unwrap();
        assert_eq!(token.driver.seen_command, Some(Command::ChallengeOtp2));
    }

    #[test]
    fn oversized_challenge_is_cut_to_sixty_four_bytes() {
        let mut token = Token::with_driver(StubDriver::with_version(2)).unwrap();
        let long = vec![0xaau8; 100];
        token
            .challenge_response(&long, Slot::Slot1, Mode::Sha1)
            .unwrap();
        assert_eq!(token.driver.seen_challenge.len(), 64);
        assert_eq!(token.driver.seen_challenge, vec![0xaau8; 64]);
    }

    // RFC 2202 test case 2 for HMAC-SHA1.
    #[test]
    fn hmac_stub_matches_known_vector() {
        let stub = HmacStub {
            key: b"Jefe".to_vec(),
        };
        let mut token = Token::with_driver(stub).unwrap();
        let out = token
            .challenge_response(b"what do ya want for nothing?", Slot::Slot1, Mode::Sha1)
            .unwrap();
        assert_eq!(out, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }
}
