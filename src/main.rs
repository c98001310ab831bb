use std::io::{self, Read};
use std::process;

use clap::{App, Arg, ErrorKind};
use log::{debug, error, warn, LevelFilter};

use ykchallenge::config::{Config, Mode, Slot, MAX_CHALLENGE_CHARS};
use ykchallenge::manager::DATA_SIZE;
use ykchallenge::token::{Driver, Token};
use ykchallenge::yubicoerror::{YubicoError, EXIT_USAGE};
use ykchallenge::{challenge_bytes, Result};

fn main() {
    let config = match parse_args() {
        Ok(Some(config)) => config,
        // Help requested; usage already printed.
        Ok(None) => process::exit(0),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(err.exit_code());
        }
    };

    // All diagnostics are silenced unless --verbose is given; stdout
    // carries nothing but the response line.
    env_logger::Builder::new()
        .filter_level(if config.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Off
        })
        .init();

    match run(&config) {
        Ok(response) => println!("{}", response),
        Err(err) => {
            error!("{}", err);
            process::exit(err.exit_code());
        }
    }
}

fn run(config: &Config) -> Result<String> {
    respond(Token::open_first()?, config)
}

/// Everything after the device is open: diagnostics, challenge-byte
/// derivation, truncation, one transaction.
fn respond<D: Driver>(mut token: Token<D>, config: &Config) -> Result<String> {
    debug!("version: {}", token.version());
    debug!("firmware supported: {}", token.firmware_supported());
    debug!("serial number: {}", token.serial_number());
    debug!("challenge: {}", config.challenge);

    let challenge = challenge_bytes(&config.challenge, config.hex_input)?;
    debug!("length: {}", challenge.len());
    let challenge = if challenge.len() > DATA_SIZE {
        warn!("challenge longer than {} bytes, truncating", DATA_SIZE);
        &challenge[..DATA_SIZE]
    } else {
        &challenge[..]
    };

    token.challenge_response(challenge, config.slot, config.mode)
}

/// Parses the command line into a [`Config`]. `Ok(None)` means help was
/// requested and printed; usage problems come back as errors mapping to
/// exit code 2.
fn parse_args() -> Result<Option<Config>> {
    let app = App::new("ykchallenge")
        .about("Performs a challenge-response exchange against a YubiKey slot")
        .arg(
            Arg::with_name("slot")
                .short("s")
                .long("slot")
                .takes_value(true)
                .default_value("1")
                .help("yubikey slot (1 or 2)"),
        )
        .arg(
            Arg::with_name("hmac")
                .long("hmac")
                .takes_value(true)
                .default_value("true")
                .possible_values(&["true", "false"])
                .help("true=HMAC-SHA1; false=Yubico OTP"),
        )
        .arg(
            Arg::with_name("hex")
                .short("x")
                .long("hex")
                .help("challenge is hex encoded text"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("diagnostic output on stderr"),
        )
        .arg(
            Arg::with_name("challenge")
                .index(1)
                .help("the challenge; \"-\" reads it from stdin"),
        );

    let matches = match app.get_matches_safe() {
        Ok(matches) => matches,
        Err(err)
            if err.kind == ErrorKind::HelpDisplayed
                || err.kind == ErrorKind::VersionDisplayed =>
        {
            println!("{}", err.message);
            return Ok(None);
        }
        Err(err) => {
            eprintln!("{}", err.message);
            process::exit(EXIT_USAGE);
        }
    };

    // Slot is validated before the challenge is even looked at, so a bad
    // slot fails regardless of what stdin would have provided.
    let slot: Slot = matches.value_of("slot").unwrap_or("1").parse()?;
    let mode = if matches.value_of("hmac").unwrap_or("true") == "true" {
        Mode::Sha1
    } else {
        Mode::Otp
    };

    let mut challenge = matches.value_of("challenge").unwrap_or("").to_string();
    if challenge == "-" {
        challenge = read_challenge_from_stdin()?;
    }
    if challenge.len() > MAX_CHALLENGE_CHARS {
        return Err(YubicoError::ChallengeTooLong);
    }

    Ok(Some(
        Config::default()
            .set_slot(slot)
            .set_mode(mode)
            .set_hex_input(matches.is_present("hex"))
            .set_verbose(matches.is_present("verbose"))
            .set_challenge(challenge),
    ))
}

/// Bounded stdin read for a `"-"` challenge: at most [`MAX_CHALLENGE_CHARS`]
/// bytes are consumed and the first whitespace-delimited token is used.
fn read_challenge_from_stdin() -> Result<String> {
    let mut buf = Vec::new();
    io::stdin()
        .lock()
        .take(MAX_CHALLENGE_CHARS as u64)
        .read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    Ok(text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string())
}
