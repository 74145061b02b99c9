//! Message signatures and the AES-256-CBC frame used by the callback protocol.
//!
//! Plain frame layout before padding:
//!
//! ```text
//! random(16) | message length (u32, big endian) | message | receive id
//! ```
//!
//! The frame is encrypted with the 32-byte key, using the key's first 16 bytes
//! as the IV, and transported as standard base64.

use std::fmt;

use aes::Aes256;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha1::{Digest, Sha1};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const PREFIX_LEN: usize = 16;
const LENGTH_FIELD: usize = 4;
/// The platform pads to 32-byte blocks, so pads up to 32 are legal.
const MAX_PAD: usize = 32;

/// The EncodingAESKey is 43 base64 chars with the padding stripped, and its
/// last symbol may carry non-zero trailing bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Errors raised while opening or sealing a frame.
#[derive(Debug)]
pub enum CryptoError {
    /// Cipher text or key is not valid base64.
    Base64(base64::DecodeError),
    /// Key material does not decode to 32 bytes.
    InvalidKey(usize),
    /// Cipher text is empty or not a whole number of blocks.
    BlockSize(usize),
    /// PKCS#7 padding is malformed.
    Padding,
    /// Frame is too short to hold the random prefix and length field.
    Truncated(usize),
    /// Declared message length runs past the end of the frame.
    Length { declared: usize, available: usize },
    /// Message or receive id is not UTF-8.
    Utf8(std::string::FromUtf8Error),
    /// Frame was sealed for a different receiver.
    ReceiverMismatch { expected: String, actual: String },
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64(e) => write!(f, "invalid base64: {e}"),
            Self::InvalidKey(len) => write!(f, "aes key must decode to {KEY_LEN} bytes, got {len}"),
            Self::BlockSize(len) => write!(f, "cipher text length {len} is not a positive multiple of {BLOCK_LEN}"),
            Self::Padding => write!(f, "invalid padding"),
            Self::Truncated(len) => write!(f, "frame of {len} bytes is too short"),
            Self::Length { declared, available } => write!(
                f,
                "declared message length {declared} exceeds the {available} bytes available"
            ),
            Self::Utf8(e) => write!(f, "frame is not valid UTF-8: {e}"),
            Self::ReceiverMismatch { expected, actual } => {
                write!(f, "frame addressed to '{actual}', expected '{expected}'")
            }
        }
    }
}

impl std::error::Error for CryptoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Base64(e) => Some(e),
            Self::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

/// SHA-1 over the four inputs sorted as raw strings and concatenated, in lowercase hex.
pub fn signature(token: &str, timestamp: &str, nonce: &str, encrypted: &str) -> String {
    let mut parts = [token, timestamp, nonce, encrypted];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Checks `signature` against the four inputs. Never fails: any missing input
/// or mismatch is simply `false`.
pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    encrypted: &str,
    signature: &str,
) -> bool {
    if [token, timestamp, nonce, encrypted, signature]
        .iter()
        .any(|s| s.is_empty())
    {
        return false;
    }
    self::signature(token, timestamp, nonce, encrypted).eq_ignore_ascii_case(signature)
}

/// A decoded 32-byte EncodingAESKey.
#[derive(Clone)]
pub struct AesKey([u8; KEY_LEN]);

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(<redacted>)")
    }
}

/// A decrypted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: String,
    pub receive_id: String,
}

impl AesKey {
    pub fn from_encoding(encoding_aes_key: &str) -> Result<Self, CryptoError> {
        let raw = KEY_ENGINE
            .decode(encoding_aes_key.trim().trim_end_matches('='))
            .map_err(CryptoError::Base64)?;
        let key: [u8; KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(raw.len()))?;
        Ok(Self(key))
    }

    fn iv(&self) -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&self.0[..IV_LEN]);
        iv
    }

    /// Decodes, decrypts and unframes `cipher_text`.
    pub fn open(&self, cipher_text: &str) -> Result<Frame, CryptoError> {
        let raw = STANDARD
            .decode(cipher_text.trim())
            .map_err(CryptoError::Base64)?;
        if raw.is_empty() || raw.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::BlockSize(raw.len()));
        }

        let mut plain = Aes256CbcDec::new(&self.0.into(), &self.iv().into())
            .decrypt_padded_vec_mut::<NoPadding>(&raw)
            .map_err(|_| CryptoError::BlockSize(raw.len()))?;
        strip_padding(&mut plain)?;

        let header = PREFIX_LEN + LENGTH_FIELD;
        if plain.len() < header {
            return Err(CryptoError::Truncated(plain.len()));
        }
        let mut length = [0u8; LENGTH_FIELD];
        length.copy_from_slice(&plain[PREFIX_LEN..header]);
        let declared = u32::from_be_bytes(length) as usize;
        let available = plain.len() - header;
        if declared > available {
            return Err(CryptoError::Length { declared, available });
        }

        let receive_id = plain.split_off(header + declared);
        let message = plain.split_off(header);
        Ok(Frame {
            message: String::from_utf8(message).map_err(CryptoError::Utf8)?,
            receive_id: String::from_utf8(receive_id).map_err(CryptoError::Utf8)?,
        })
    }

    /// Frames `message` for `receive_id` with a fresh random prefix, encrypts and encodes it.
    pub fn seal(&self, message: &str, receive_id: &str) -> String {
        let mut prefix = [0u8; PREFIX_LEN];
        rand::thread_rng().fill_bytes(&mut prefix);

        let mut frame = Vec::with_capacity(PREFIX_LEN + LENGTH_FIELD + message.len() + receive_id.len());
        frame.extend_from_slice(&prefix);
        frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
        frame.extend_from_slice(message.as_bytes());
        frame.extend_from_slice(receive_id.as_bytes());

        let cipher = Aes256CbcEnc::new(&self.0.into(), &self.iv().into())
            .encrypt_padded_vec_mut::<Pkcs7>(&frame);
        STANDARD.encode(cipher)
    }
}

fn strip_padding(plain: &mut Vec<u8>) -> Result<(), CryptoError> {
    let pad = *plain.last().ok_or(CryptoError::Padding)? as usize;
    if pad == 0 || pad > MAX_PAD || pad > plain.len() {
        return Err(CryptoError::Padding);
    }
    if !plain[plain.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(CryptoError::Padding);
    }
    plain.truncate(plain.len() - pad);
    Ok(())
}

/// Decrypts a base64 cipher text with a base64 EncodingAESKey, returning the message only.
/// The server holds a parsed [`AesKey`] and goes through [`AesKey::open`] instead.
#[allow(dead_code)]
pub fn decrypt(cipher_text: &str, encoding_aes_key: &str) -> Result<String, CryptoError> {
    AesKey::from_encoding(encoding_aes_key)?
        .open(cipher_text)
        .map(|frame| frame.message)
}

/// Inverse of [`decrypt`]; the frame carries no receive id. Callbacks are
/// answered through the push API, so nothing in the server seals frames.
#[allow(dead_code)]
pub fn encrypt(plain_text: &str, encoding_aes_key: &str) -> Result<String, CryptoError> {
    Ok(AesKey::from_encoding(encoding_aes_key)?.seal(plain_text, ""))
}
