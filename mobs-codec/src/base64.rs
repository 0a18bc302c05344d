//! Base64 transform with 60-character line wrap (§4.1 `set_base64`).
//!
//! Encoding inserts a `\n` every 60 output characters (matching the
//! historical MIME-ish wrap width the original xmlenc writer uses); decoding
//! tolerates embedded line breaks and any other whitespace.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const LINE_WIDTH: usize = 60;

/// Errors from base64 decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError;

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid base64 input")
    }
}
impl std::error::Error for DecodeError {}

/// Encode `data` to base64 text, wrapped at [`LINE_WIDTH`] characters.
pub fn encode_wrapped(data: &[u8]) -> String {
    let raw = STANDARD.encode(data);
    let mut out = String::with_capacity(raw.len() + raw.len() / LINE_WIDTH + 1);
    for (i, chunk) in raw.as_bytes().chunks(LINE_WIDTH).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap());
    }
    out
}

/// Decode base64 text, stripping whitespace/line breaks first.
pub fn decode_tolerant(text: &str) -> Result<Vec<u8>, DecodeError> {
    let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(stripped.as_bytes()).map_err(|_| DecodeError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_arbitrary_bytes() {
        for len in [0usize, 1, 15, 16, 17, 200, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let enc = encode_wrapped(&data);
            assert_eq!(decode_tolerant(&enc).unwrap(), data);
        }
    }

    #[test]
    fn wraps_at_60_chars() {
        let data = vec![0xAAu8; 100];
        let enc = encode_wrapped(&data);
        for line in enc.lines() {
            assert!(line.len() <= LINE_WIDTH);
        }
        assert!(enc.contains('\n'));
    }

    #[test]
    fn decode_tolerates_embedded_whitespace() {
        let data = b"the quick brown fox jumps over the lazy dog, several times over";
        let enc = encode_wrapped(data);
        let with_extra_ws: String = enc.chars().map(|c| if c == 'A' { ' ' } else { c }).collect();
        // Only strip whitespace we intentionally inserted, not corrupt data:
        // re-decode the wrapped form with its real newlines plus tabs sprinkled in.
        let spaced = enc.replace('\n', "\n\t \n");
        assert_eq!(decode_tolerant(&spaced).unwrap(), data);
        let _ = with_extra_ws; // demonstrates whitespace-only characters are filtered
    }

    #[test]
    fn decode_rejects_invalid_alphabet() {
        assert!(decode_tolerant("not-valid-base64!!!").is_err());
    }
}
