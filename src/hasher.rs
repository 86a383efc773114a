//! Content hashing for dedup and carve identity.
//!
//! A [`Hasher`] pairs an algorithm name with a digest function producing a
//! lowercase hex string. The algorithm is chosen once, at recorder-set
//! construction, by a case- and hyphen-insensitive name lookup; everything
//! downstream (seen-set, carve cache, carve records) uses the same instance.

use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

use crate::errors::RecorderError;

/// Digest function: buffer in, lowercase hex digest out.
pub type HashFn = fn(&[u8]) -> String;

/// A named hash algorithm.
#[derive(Clone, Copy)]
pub struct Hasher {
    name: &'static str,
    func: HashFn,
}

impl Hasher {
    /// MD5 (16-byte digest).
    pub fn md5() -> Self {
        Self { name: "md5", func: md5_hex }
    }

    /// SHA-1 (20-byte digest). The default for sbuf dedup.
    pub fn sha1() -> Self {
        Self { name: "sha1", func: sha1_hex }
    }

    /// SHA-256 (32-byte digest).
    pub fn sha256() -> Self {
        Self { name: "sha256", func: sha256_hex }
    }

    /// Looks up an algorithm by name.
    ///
    /// Names are matched case-insensitively with hyphens ignored, so
    /// `SHA-1`, `sha1`, and `Sha-1` all select SHA-1.
    pub fn from_name(name: &str) -> Result<Self, RecorderError> {
        let norm: String = name
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match norm.as_str() {
            "md5" => Ok(Self::md5()),
            "sha1" => Ok(Self::sha1()),
            "sha256" => Ok(Self::sha256()),
            _ => Err(RecorderError::InvalidHashName(name.to_string())),
        }
    }

    /// The canonical algorithm name, as recorded in carve `hashdigest` tags.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Hashes `bytes` and returns the lowercase hex digest.
    pub fn hex(&self, bytes: &[u8]) -> String {
        (self.func)(bytes)
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher").field("name", &self.name).finish()
    }
}

fn to_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap());
        out.push(char::from_digit((b & 0xf) as u32, 16).unwrap());
    }
    out
}

fn md5_hex(bytes: &[u8]) -> String {
    to_hex(&Md5::digest(bytes))
}

fn sha1_hex(bytes: &[u8]) -> String {
    to_hex(&Sha1::digest(bytes))
}

fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_lookup_is_forgiving() {
        for name in ["sha1", "SHA1", "sha-1", "SHA-1", "Sha-1"] {
            assert_eq!(Hasher::from_name(name).unwrap().name(), "sha1");
        }
        assert_eq!(Hasher::from_name("MD5").unwrap().name(), "md5");
        assert_eq!(Hasher::from_name("sha-256").unwrap().name(), "sha256");
        assert!(Hasher::from_name("crc32").is_err());
    }

    #[test]
    fn known_digests() {
        // Standard test vectors for the empty string.
        assert_eq!(Hasher::md5().hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(Hasher::sha1().hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            Hasher::sha256().hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
