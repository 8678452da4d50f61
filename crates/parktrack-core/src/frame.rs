//! Parsing of individual location-characteristic notifications.
//!
//! The beacon streams one field per notification as a short text line: a
//! four-character tag (`Lon:`, `Lat:`, `Alt:`) followed by a decimal number.
//! Latitude and longitude are fixed-point integers scaled by 10^7; altitude is
//! plain meters. Parsing is pure and keeps no state between calls.

use std::fmt;

use thiserror::Error;

/// Length of the field tag prefix, including the colon.
pub const TAG_LEN: usize = 4;

/// Which location component a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldTag {
    /// `Lon:` longitude, ×10^7 degrees.
    Longitude,
    /// `Lat:` latitude, ×10^7 degrees.
    Latitude,
    /// `Alt:` altitude in meters.
    Altitude,
}

impl FieldTag {
    /// All tags, in wire order.
    pub const ALL: [Self; 3] = [Self::Longitude, Self::Latitude, Self::Altitude];

    /// The wire prefix for this tag.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Longitude => "Lon:",
            Self::Latitude => "Lat:",
            Self::Altitude => "Alt:",
        }
    }

    /// Classify a line by its prefix.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| line.starts_with(tag.prefix()))
    }
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches(':'))
    }
}

/// One parsed notification: a tag and its raw (still scaled) value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Which component this frame carries.
    pub tag: FieldTag,
    /// The raw numeric value as transmitted.
    pub value: f64,
}

/// Why a notification payload did not yield a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The payload is not UTF-8 text.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// The payload is shorter than a tag.
    #[error("payload has {len} characters, shorter than a 4-character tag")]
    TooShort {
        /// Character count of the payload.
        len: usize,
    },

    /// The payload does not start with a known tag.
    #[error("unrecognized tag in payload '{0}'")]
    UnknownTag(String),

    /// The text after the tag is not a number.
    #[error("invalid number in {tag} frame: '{text}'")]
    InvalidNumber {
        /// Tag of the frame.
        tag: FieldTag,
        /// Offending payload text.
        text: String,
    },
}

/// Parse one raw notification payload into a [`Frame`].
///
/// # Errors
///
/// Returns a [`FrameError`] describing why the payload was rejected. Callers
/// in the link treat every error as "no value" and drop the payload.
pub fn parse_frame(payload: &[u8]) -> Result<Frame, FrameError> {
    let line = std::str::from_utf8(payload).map_err(|_| FrameError::NotUtf8)?;

    let len = line.chars().count();
    if len < TAG_LEN {
        return Err(FrameError::TooShort { len });
    }

    let tag = FieldTag::from_line(line).ok_or_else(|| FrameError::UnknownTag(line.to_string()))?;

    let value = parse_value(line).ok_or_else(|| FrameError::InvalidNumber {
        tag,
        text: line.to_string(),
    })?;

    Ok(Frame { tag, value })
}

/// Parse the numeric part of a tagged line.
///
/// Lines long enough to hold a tag and at least one digit are parsed from the
/// first character after the tag. Shorter lines are parsed whole. Surrounding
/// whitespace is ignored.
#[must_use]
pub fn parse_value(line: &str) -> Option<f64> {
    let text = match line.char_indices().nth(TAG_LEN) {
        Some((offset, _)) => &line[offset..],
        None => line,
    };
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
