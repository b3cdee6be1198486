use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Text that is not a valid `H:MM` / `HH:MM` wall-clock time.
    Malformed(String),
    /// `start >= end`: zero-length or inverted window.
    Inverted { start: ClockTime, end: ClockTime },
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowError::Malformed(text) => write!(f, "malformed time {text:?}: expected HH:MM"),
            WindowError::Inverted { start, end } => {
                write!(f, "window end {end} must be after start {start}")
            }
        }
    }
}

impl std::error::Error for WindowError {}

/// Wall-clock time of day at minute precision, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self(hour * 60 + minute))
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub const fn minutes(self) -> u16 {
        self.0
    }

    pub const fn hour(self) -> u16 {
        self.0 / 60
    }

    pub const fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl FromStr for ClockTime {
    type Err = WindowError;

    /// Accepts `H:MM` or `HH:MM` with hour 0-23 and minute 00-59.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || WindowError::Malformed(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(malformed)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(malformed());
        }
        let hour: u16 = h.parse().map_err(|_| malformed())?;
        let minute: u16 = m.parse().map_err(|_| malformed())?;
        Self::from_hm(hour, minute).ok_or_else(malformed)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

pub fn validate_order(start: ClockTime, end: ClockTime) -> Result<(), WindowError> {
    if start >= end {
        return Err(WindowError::Inverted { start, end });
    }
    Ok(())
}

/// Half-open interval `[start, end)` within one day. Always `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct Window {
    start: ClockTime,
    end: ClockTime,
}

#[derive(Deserialize)]
struct RawWindow {
    start: ClockTime,
    end: ClockTime,
}

impl TryFrom<RawWindow> for Window {
    type Error = WindowError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Window::new(raw.start, raw.end)
    }
}

impl Window {
    pub fn new(start: ClockTime, end: ClockTime) -> Result<Self, WindowError> {
        validate_order(start, end)?;
        Ok(Self { start, end })
    }

    /// Parse both ends, then check ordering. Malformed text wins over ordering.
    pub fn parse(start: &str, end: &str) -> Result<Self, WindowError> {
        Self::new(start.parse()?, end.parse()?)
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn end(&self) -> ClockTime {
        self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// A window ending at 10:00 does not overlap one starting at 10:00.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
