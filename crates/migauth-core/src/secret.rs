//! A presented secret (password) that never shows up in logs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use std::fmt;
use zeroize::Zeroizing;

/// The secret a user presented during login.
///
/// `Display` and `Debug` never reveal the content and the backing buffer is wiped on drop.
#[derive(PartialEq, Eq, Clone)]
pub struct Secret {
    bytes: Zeroizing<Vec<u8>>,
}

impl Secret {
    /// Wraps the given bytes.
    pub fn new<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Secret {
            bytes: Zeroizing::new(bytes.into()),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing was presented.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A debug-safe rendition keeping only the first and last character.
    ///
    /// Secrets of one or two characters are masked completely.
    pub fn masked(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        let chars: Vec<char> = text.chars().collect();
        match chars.len() {
            0 => String::new(),
            n if n <= 2 => "*".repeat(n),
            n => {
                let mut masked = String::with_capacity(n);
                masked.push(chars[0]);
                masked.push_str(&"*".repeat(n - 2));
                masked.push(chars[n - 1]);
                masked
            }
        }
    }

    /// Hex md5 over the base64 encoded secret.
    ///
    /// This is what gets handed to the audit collaborator instead of the secret itself. Base64
    /// first so that the digest input is quoting-safe regardless of the secret content.
    pub fn report_digest(&self) -> String {
        let encoded = Zeroizing::new(STANDARD.encode(self.as_bytes()));
        Md5::digest(encoded.as_bytes()).iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*******")
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret {{ bytes: ******* }}")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SECRET: &str = "supersecret";

    #[test]
    fn secret_obscures_display() {
        assert_eq!("*******", format!("{}", secret()));
    }

    #[test]
    fn secret_obscures_debug() {
        assert_eq!("Secret { bytes: ******* }", format!("{:?}", secret()));
    }

    #[test]
    fn secret_retrievable_as_ref() {
        assert_eq!(SECRET.as_bytes(), secret().as_ref())
    }

    #[test]
    fn masked_keeps_first_and_last() {
        assert_eq!("s*********t", secret().masked());
        assert_eq!("a*c", Secret::from("abc").masked());
    }

    #[test]
    fn masked_hides_short_secrets_completely() {
        assert_eq!("", Secret::from("").masked());
        assert_eq!("*", Secret::from("x").masked());
        assert_eq!("**", Secret::from("xy").masked());
    }

    #[test]
    fn report_digest_is_md5_of_base64() {
        // md5("c3VwZXJzZWNyZXQ=")
        let digest = secret().report_digest();
        assert_eq!("ccb10f733cb0cffee598e99bbcd32a66", digest);
        assert_eq!(digest, Secret::from(SECRET).report_digest());
        assert_ne!(digest, Secret::from("supersecreT").report_digest());
    }

    fn secret() -> Secret {
        Secret::from(SECRET)
    }
}
