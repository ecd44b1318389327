use std::io;

use thiserror::Error;

pub const DIAL_TIMEOUT: u8 = 0x01;
pub const DIAL_FAILED: u8 = 0x02;
pub const BAD_REQUEST: u8 = 0x04;
pub const DECODE_FAILED: u8 = 0x05;
pub const CIPHER_INIT_FAILED: u8 = 0x06;
pub const CIPHERTEXT_TOO_SHORT: u8 = 0x07;
pub const PAYLOAD_TOO_SHORT: u8 = 0x08;
pub const SALT_MISMATCH: u8 = 0x09;

/// Everything that can end a connection before the tunnel is established.
///
/// Each variant maps to the single byte written back to the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad request line: {0}")]
    BadRequest(&'static str),

    #[error("request read failed: {0}")]
    Read(#[source] io::Error),

    #[error("token decode failed: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key size {0}")]
    CipherInit(usize),

    #[error("ciphertext too short ({0} bytes)")]
    CiphertextTooShort(usize),

    #[error("salt check failed")]
    PayloadTooShort,

    #[error("salt not match")]
    SaltMismatch,

    #[error("dial {0} timed out")]
    DialTimeout(String),

    #[error("dial {0} failed: {1}")]
    Dial(String, #[source] io::Error),
}

impl Error {
    // code returns the protocol error byte.
    pub fn code(&self) -> u8 {
        match self {
            Error::BadRequest(_) | Error::Read(_) => BAD_REQUEST,
            Error::Decode(_) => DECODE_FAILED,
            Error::CipherInit(_) => CIPHER_INIT_FAILED,
            Error::CiphertextTooShort(_) => CIPHERTEXT_TOO_SHORT,
            Error::PayloadTooShort => PAYLOAD_TOO_SHORT,
            Error::SaltMismatch => SALT_MISMATCH,
            Error::DialTimeout(_) => DIAL_TIMEOUT,
            Error::Dial(_, _) => DIAL_FAILED,
        }
    }

    // dial classifies a failed connect, keeping timeouts apart.
    pub fn dial(addr: &str, err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::TimedOut {
            Error::DialTimeout(addr.to_string())
        } else {
            Error::Dial(addr.to_string(), err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
