use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// A secret value held in a mutable byte buffer so it can be overwritten
/// before the allocation is returned. Wiping is best-effort: the runtime may
/// have copied the bytes elsewhere before the buffer was constructed.
pub struct SecretBuf {
    bytes: Zeroizing<Vec<u8>>,
}

impl SecretBuf {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(value.into()),
        }
    }

    /// Copies the secret out as a `String`. Non-UTF-8 bytes are replaced;
    /// backends only ever store UTF-8 values.
    pub fn reveal(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrites the buffer with zeros and truncates it. Also happens on
    /// drop; callers invoke this when the wipe must occur before the value
    /// goes out of scope.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }

    /// Constant-time equality against raw bytes.
    pub fn ct_eq(&self, other: &[u8]) -> bool {
        self.bytes.len() == other.len() && bool::from(self.bytes.ct_eq(other))
    }
}

impl From<String> for SecretBuf {
    fn from(value: String) -> Self {
        SecretBuf::new(value.into_bytes())
    }
}

impl From<&str> for SecretBuf {
    fn from(value: &str) -> Self {
        SecretBuf::new(value.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for SecretBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBuf({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_round_trips() {
        let buf = SecretBuf::from("hunter2");
        assert_eq!(buf.reveal(), "hunter2");
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn wipe_clears_contents() {
        let mut buf = SecretBuf::from("hunter2");
        buf.wipe();
        assert!(buf.is_empty());
        assert_eq!(buf.reveal(), "");
    }

    #[test]
    fn ct_eq_matches_exact_bytes() {
        let buf = SecretBuf::from("tok");
        assert!(buf.ct_eq(b"tok"));
        assert!(!buf.ct_eq(b"tak"));
        assert!(!buf.ct_eq(b"tokk"));
    }

    #[test]
    fn debug_does_not_print_value() {
        let buf = SecretBuf::from("hunter2");
        assert_eq!(format!("{buf:?}"), "SecretBuf(7 bytes)");
    }
}
