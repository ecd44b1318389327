mod cfb;

use rand::RngCore;

use crate::error::{Error, Result};

pub use cfb::{Cfb, BLOCK_SIZE};

/// Codec turns tokens into backend addresses and back.
///
/// A token is `base64(iv || aes_cfb(address || salt))`. The salt is a fixed
/// suffix checked after decryption; it only detects tampering and garbage.
#[derive(Clone)]
pub struct Codec {
    secret: Vec<u8>,
    salt: Vec<u8>,
}

impl Codec {
    pub fn new(secret: &[u8], salt: &[u8]) -> Codec {
        Codec {
            secret: secret.to_vec(),
            salt: salt.to_vec(),
        }
    }

    // resolve decodes, decrypts and checks a token, returning the address.
    pub fn resolve(&self, token: &str) -> Result<String> {
        // standard encoding is padded; reject what a strict decoder would
        if token.len() % 4 != 0 {
            return Err(Error::Decode(base64::DecodeError::InvalidLength));
        }
        let mut data = base64::decode(token)?;

        let block = cfb::new_block(&self.secret)?;
        if data.len() < BLOCK_SIZE {
            return Err(Error::CiphertextTooShort(data.len()));
        }
        let (iv, text) = data.split_at_mut(BLOCK_SIZE);
        Cfb::new_decrypter(block, iv).xor_key_stream(text);

        if text.len() < self.salt.len() {
            return Err(Error::PayloadTooShort);
        }
        let addr_len = text.len() - self.salt.len();
        if text[addr_len..] != self.salt[..] {
            return Err(Error::SaltMismatch);
        }

        Ok(String::from_utf8_lossy(&text[..addr_len]).into_owned())
    }

    // encode mints a token for addr under a fresh random iv.
    pub fn encode(&self, addr: &str) -> Result<String> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encode_with_iv(addr, &iv)
    }

    pub fn encode_with_iv(&self, addr: &str, iv: &[u8; BLOCK_SIZE]) -> Result<String> {
        let block = cfb::new_block(&self.secret)?;

        let mut data = Vec::with_capacity(BLOCK_SIZE + addr.len() + self.salt.len());
        data.extend_from_slice(iv);
        data.extend_from_slice(addr.as_bytes());
        data.extend_from_slice(&self.salt);
        Cfb::new_encrypter(block, iv).xor_key_stream(&mut data[BLOCK_SIZE..]);

        Ok(base64::encode(&data))
    }

    pub fn key_valid(&self) -> bool {
        cfb::new_block(&self.secret).is_ok()
    }
}
