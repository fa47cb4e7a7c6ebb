use percent_encoding::percent_decode_str;
use std::fmt;
use thiserror::Error;

/// One immutable journal record: whole-second unix timestamp plus text.
///
/// The text is stored already decoded; construction rejects anything
/// that would corrupt the newline-delimited wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    timestamp: u64,
    text: String,
}

impl Entry {
    pub fn new(timestamp: u64, text: impl Into<String>) -> Result<Self, TextError> {
        let text = text.into();
        validate_text(&text)?;
        Ok(Self { timestamp, text })
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Serializes the entry as one journal line, trailing newline included.
    pub fn to_line(&self) -> String {
        format!("{},{}\n", self.timestamp, self.text)
    }

    /// Parses one journal line (trailing newline optional).
    pub fn parse_line(line: &str) -> Result<Self, LineError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let (timestamp, text) = line
            .split_once(',')
            .ok_or(LineError::MissingSeparator)?;
        let timestamp = timestamp
            .parse::<u64>()
            .map_err(|_| LineError::BadTimestamp {
                field: timestamp.to_string(),
            })?;
        Entry::new(timestamp, text).map_err(LineError::Text)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.timestamp, self.text)
    }
}

/// Client-supplied text that cannot be stored without corrupting the format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
    #[error("invalid percent escape at byte {position}")]
    InvalidEscape { position: usize },
    #[error("decoded text is not valid UTF-8")]
    InvalidUtf8,
    #[error("text contains an embedded newline")]
    EmbeddedNewline,
    #[error("text contains control character {codepoint:#x}")]
    ControlCharacter { codepoint: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("journal line missing `,` separator")]
    MissingSeparator,
    #[error("journal line has non-integer timestamp `{field}`")]
    BadTimestamp { field: String },
    #[error(transparent)]
    Text(TextError),
}

/// Strict percent-decoding: every `%` must introduce a two-digit hex
/// escape and the decoded bytes must be valid UTF-8. Lenient pass-through
/// of stray `%` would silently store text the client never sent.
pub fn decode_percent_text(raw: &str) -> Result<String, TextError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() >= i + 3
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(TextError::InvalidEscape { position: i });
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(raw)
        .decode_utf8()
        .map(|text| text.into_owned())
        .map_err(|_| TextError::InvalidUtf8)
}

fn validate_text(text: &str) -> Result<(), TextError> {
    for ch in text.chars() {
        if ch == '\n' || ch == '\r' {
            return Err(TextError::EmbeddedNewline);
        }
        if ch.is_control() {
            return Err(TextError::ControlCharacter {
                codepoint: ch as u32,
            });
        }
    }
    Ok(())
}
