use ::crypto::aessafe::{AesSafe128Encryptor, AesSafe192Encryptor, AesSafe256Encryptor};
use ::crypto::symmetriccipher::BlockEncryptor;

use crate::error::{Error, Result};

pub const BLOCK_SIZE: usize = 16;

type Block = Box<dyn BlockEncryptor + Send + Sync>;

// new_block picks AES-128/192/256 from the key length.
pub fn new_block(key: &[u8]) -> Result<Block> {
    let block: Block = match key.len() {
        16 => Box::new(AesSafe128Encryptor::new(key)),
        24 => Box::new(AesSafe192Encryptor::new(key)),
        32 => Box::new(AesSafe256Encryptor::new(key)),
        n => return Err(Error::CipherInit(n)),
    };
    Ok(block)
}

/// Cipher feedback mode with a full block segment.
///
/// The shift register always holds the last ciphertext block, so a stream
/// may be fed in chunks of any size.
pub struct Cfb {
    block: Block,
    next: [u8; BLOCK_SIZE],
    out: [u8; BLOCK_SIZE],
    out_used: usize,
    decrypt: bool,
}

impl Cfb {
    pub fn new_encrypter(block: Block, iv: &[u8]) -> Cfb {
        Cfb::new(block, iv, false)
    }

    pub fn new_decrypter(block: Block, iv: &[u8]) -> Cfb {
        Cfb::new(block, iv, true)
    }

    fn new(block: Block, iv: &[u8], decrypt: bool) -> Cfb {
        let mut next = [0u8; BLOCK_SIZE];
        next.copy_from_slice(&iv[..BLOCK_SIZE]);
        Cfb {
            block,
            next,
            out: [0u8; BLOCK_SIZE],
            out_used: BLOCK_SIZE,
            decrypt,
        }
    }

    pub fn xor_key_stream(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            if self.out_used == BLOCK_SIZE {
                self.block.encrypt_block(&self.next, &mut self.out);
                self.out_used = 0;
            }

            let c = if self.decrypt {
                let c = *b;
                *b ^= self.out[self.out_used];
                c
            } else {
                *b ^= self.out[self.out_used];
                *b
            };
            self.next[self.out_used] = c;
            self.out_used += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38A, F.3.13 CFB128-AES128.
    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const IV: &str = "000102030405060708090a0b0c0d0e0f";
    const PLAIN: &str = "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51";
    const CIPHER: &str = "3b3fd92eb72dad20333449f8e83cfb4ac8a64537a0b3a93fcde3cdad9f1ce58b";

    #[test]
    fn test_encrypt_vector() {
        let key = hex::decode(KEY).unwrap();
        let iv = hex::decode(IV).unwrap();
        let mut buf = hex::decode(PLAIN).unwrap();

        let mut cfb = Cfb::new_encrypter(new_block(&key).unwrap(), &iv);
        cfb.xor_key_stream(&mut buf);
        assert_eq!(hex::encode(&buf), CIPHER);
    }

    #[test]
    fn test_decrypt_in_odd_chunks() {
        let key = hex::decode(KEY).unwrap();
        let iv = hex::decode(IV).unwrap();
        let mut buf = hex::decode(CIPHER).unwrap();

        let mut cfb = Cfb::new_decrypter(new_block(&key).unwrap(), &iv);
        let (head, tail) = buf.split_at_mut(7);
        cfb.xor_key_stream(head);
        let (mid, tail) = tail.split_at_mut(13);
        cfb.xor_key_stream(mid);
        cfb.xor_key_stream(tail);
        assert_eq!(hex::encode(&buf), PLAIN);
    }

    #[test]
    fn test_bad_key_size() {
        match new_block(b"short") {
            Err(Error::CipherInit(5)) => {}
            _ => panic!("expected cipher init failure"),
        }
    }
}
