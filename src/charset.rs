//! Character encodings for text fields.

use crate::errors::{Error, Result};

/// Named character encoding used for text I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    /// Every byte must be in `0..=0x7F`.
    Ascii,
    /// Latin-1: bytes map one-to-one onto the first 256 code points.
    Iso8859_1,
}

impl Charset {
    /// Resolves a conventional charset name (`"UTF-8"`, `"US-ASCII"`,
    /// `"ISO-8859-1"`). Used by the JSON schema layer.
    pub fn from_name(name: &str) -> Option<Charset> {
        match name.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Charset::Utf8),
            "US-ASCII" | "ASCII" => Some(Charset::Ascii),
            "ISO-8859-1" | "LATIN-1" | "LATIN1" => Some(Charset::Iso8859_1),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Ascii => "US-ASCII",
            Charset::Iso8859_1 => "ISO-8859-1",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Converter("text is not valid UTF-8".into())),
            Charset::Ascii => {
                if bytes.iter().any(|b| *b > 0x7F) {
                    return Err(Error::Converter("text is not valid US-ASCII".into()));
                }
                Ok(bytes.iter().map(|b| *b as char).collect())
            }
            Charset::Iso8859_1 => Ok(bytes.iter().map(|b| *b as char).collect()),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Ascii => text
                .chars()
                .map(|c| {
                    u8::try_from(c as u32)
                        .ok()
                        .filter(|b| *b <= 0x7F)
                        .ok_or_else(|| {
                            Error::Converter(format!("`{c}` is not representable in US-ASCII"))
                        })
                })
                .collect(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|c| {
                    u8::try_from(c as u32).map_err(|_| {
                        Error::Converter(format!("`{c}` is not representable in ISO-8859-1"))
                    })
                })
                .collect(),
        }
    }

    /// Truncates `bytes` to at most `max` bytes without splitting a
    /// character. Only UTF-8 has multi-byte characters.
    pub(crate) fn truncate(&self, bytes: &mut Vec<u8>, max: usize) {
        if bytes.len() <= max {
            return;
        }

        let mut cut = max;
        if *self == Charset::Utf8 {
            while cut > 0 && bytes[cut] & 0xC0 == 0x80 {
                cut -= 1;
            }
        }
        bytes.truncate(cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_rejects_high_bytes() {
        assert!(Charset::Ascii.decode(&[0x41, 0x80]).is_err());
        assert_eq!(Charset::Ascii.decode(b"OK").unwrap(), "OK");
    }

    #[test]
    fn test_latin1_round_trip() {
        let bytes = [0x41, 0xE9, 0xFF];
        let text = Charset::Iso8859_1.decode(&bytes).unwrap();
        assert_eq!(text, "Aéÿ");
        assert_eq!(Charset::Iso8859_1.encode(&text).unwrap(), bytes);
    }

    #[test]
    fn test_utf8_truncate_on_char_boundary() {
        let mut bytes = "aé".as_bytes().to_vec();
        Charset::Utf8.truncate(&mut bytes, 2);
        assert_eq!(bytes, b"a");
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Charset::from_name("utf-8"), Some(Charset::Utf8));
        assert_eq!(Charset::from_name("ISO-8859-1"), Some(Charset::Iso8859_1));
        assert_eq!(Charset::from_name("EBCDIC"), None);
    }
}
