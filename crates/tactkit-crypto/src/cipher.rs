//! Cipher selection for encrypted blocks

use crate::arc4::Arc4Cipher;
use crate::error::CryptoError;
use crate::salsa20::Salsa20Cipher;

/// Stream cipher named by the type byte of an encrypted block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionType {
    /// Salsa20 (`'S'`)
    Salsa20 = b'S',
    /// ARC4 (`'A'`)
    Arc4 = b'A',
}

impl EncryptionType {
    /// Parse from the on-disk type byte
    pub fn from_byte(byte: u8) -> Result<Self, CryptoError> {
        match byte {
            b'S' => Ok(Self::Salsa20),
            b'A' => Ok(Self::Arc4),
            other => Err(CryptoError::UnknownEncryptionType(other)),
        }
    }

    /// On-disk type byte
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Encrypt or decrypt `data` in place
///
/// `iv` is the IV exactly as it should feed the cipher, with any block index
/// already mixed in. ARC4 is keyed with the key bytes followed by the IV.
pub fn apply_cipher(
    kind: EncryptionType,
    key: &[u8; 16],
    iv: &[u8],
    data: &mut [u8],
) -> Result<(), CryptoError> {
    match kind {
        EncryptionType::Salsa20 => Salsa20Cipher::new(key, iv)?.apply_keystream(data),
        EncryptionType::Arc4 => {
            let mut material = Vec::with_capacity(key.len() + iv.len());
            material.extend_from_slice(key);
            material.extend_from_slice(iv);
            Arc4Cipher::new(&material)?.apply_keystream(data);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_bytes() {
        assert_eq!(EncryptionType::from_byte(b'S').unwrap(), EncryptionType::Salsa20);
        assert_eq!(EncryptionType::from_byte(b'A').unwrap(), EncryptionType::Arc4);
        assert!(matches!(
            EncryptionType::from_byte(b'X'),
            Err(CryptoError::UnknownEncryptionType(b'X'))
        ));
        assert_eq!(EncryptionType::Salsa20.as_byte(), 0x53);
    }

    #[test]
    fn test_ciphers_are_symmetric() {
        let key = [0x5Au8; 16];
        let iv = [9, 8, 7, 6];
        let mut rng = fastrand::Rng::with_seed(0x5EED);
        let plain: Vec<u8> = std::iter::repeat_with(|| rng.u8(..)).take(1000).collect();

        for kind in [EncryptionType::Salsa20, EncryptionType::Arc4] {
            let mut data = plain.clone();
            apply_cipher(kind, &key, &iv, &mut data).unwrap();
            assert_ne!(data, plain);
            apply_cipher(kind, &key, &iv, &mut data).unwrap();
            assert_eq!(data, plain);
        }
    }
}
