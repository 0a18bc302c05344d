//! SHA-256 hashing helpers.

/// Calculate the SHA-256 hash of one or more byte slices concatenated.
#[macro_export]
macro_rules! sha256 {
    ( $( $x:expr ),+ ) => {{
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        $( h.update($x); )+
        let out: [u8; 32] = h.finalize().into();
        out
    }};
}

/// Convenience wrapper: `SHA-256(data)`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256!(data)
}
