//! ARC4 (RC4-compatible) stream cipher
//!
//! Only legacy encrypted blocks use ARC4. It has known weaknesses and exists
//! here for reading such blocks, not for protecting new content.

use crate::error::CryptoError;

/// ARC4 keystream generator
pub struct Arc4Cipher {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Arc4Cipher {
    /// Create a cipher from 1 to 256 bytes of key material
    ///
    /// ```
    /// use tactkit_crypto::Arc4Cipher;
    ///
    /// let mut data = b"Hello!".to_vec();
    /// Arc4Cipher::new(b"secret").unwrap().apply_keystream(&mut data);
    /// Arc4Cipher::new(b"secret").unwrap().apply_keystream(&mut data);
    /// assert_eq!(data, b"Hello!");
    /// ```
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() || key.len() > 256 {
            return Err(CryptoError::InvalidKeySize {
                expected: 16,
                actual: key.len(),
            });
        }

        let mut s = [0u8; 256];
        for (i, slot) in s.iter_mut().enumerate() {
            *slot = i as u8;
        }

        // Key-scheduling algorithm
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }

        Ok(Self { s, i: 0, j: 0 })
    }

    fn next_keystream_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);

        let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[k as usize]
    }

    /// XOR the keystream into `data` in place
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_keystream_byte();
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 6229 style check: key "Key", plaintext "Plaintext"
        let mut data = b"Plaintext".to_vec();
        Arc4Cipher::new(b"Key").unwrap().apply_keystream(&mut data);
        assert_eq!(hex::encode_upper(&data), "BBF316E8D940AF0AD3");
    }

    #[test]
    fn test_invalid_key_lengths() {
        assert!(Arc4Cipher::new(&[]).is_err());
        assert!(Arc4Cipher::new(&[0u8; 257]).is_err());
        assert!(Arc4Cipher::new(&[0u8; 256]).is_ok());
    }
}
