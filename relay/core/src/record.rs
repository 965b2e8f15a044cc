//! Update Record Model
//!
//! Typed telemetry updates and their textual line encoding.
//!
//! # Line Format
//!
//! ```text
//! <channel-name>/<value>
//! ```
//!
//! The channel name is one of `laptime`, `lapcompare`, `currentzone`,
//! `accelx` or `accely`. Everything after the first `/` is the value: raw text
//! for the text channels, a decimal number for the axis channels.
//!
//! A batch is the ordered list of records parsed from one upstream delivery.
//! On the viewer wire it is re-encoded as the newline-joined lines it was
//! parsed from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between channel name and value
pub const FIELD_DELIMITER: char = '/';

/// Separator between lines in a delivery and in an encoded batch
pub const LINE_DELIMITER: char = '\n';

/// Errors produced while parsing a single update line
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The line has no `/` separating channel from value
    #[error("missing '/' delimiter in line {0:?}")]
    MissingDelimiter(String),

    /// The channel name is not one of the known tags
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    /// An axis channel carried a value that is not a finite number
    #[error("invalid value {value:?} for axis channel {channel}")]
    InvalidAxisValue {
        /// The axis channel
        channel: Channel,
        /// The raw value text
        value: String,
    },
}

// ============================================================================
// Channel
// ============================================================================

/// One of the five named telemetry feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Current lap time (text)
    LapTime,
    /// Delta against the reference lap (text)
    LapCompare,
    /// Name of the track zone the car is in (text)
    CurrentZone,
    /// Lateral accelerometer deflection (axis)
    AccelX,
    /// Longitudinal accelerometer deflection (axis)
    AccelY,
}

impl Channel {
    /// All channels, in display order
    pub const ALL: [Channel; 5] = [
        Channel::LapTime,
        Channel::LapCompare,
        Channel::CurrentZone,
        Channel::AccelX,
        Channel::AccelY,
    ];

    /// Name used on the upstream and viewer line protocol
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::LapTime => "laptime",
            Self::LapCompare => "lapcompare",
            Self::CurrentZone => "currentzone",
            Self::AccelX => "accelx",
            Self::AccelY => "accely",
        }
    }

    /// Look up a channel by its wire name
    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.wire_name() == name)
    }

    /// Whether this channel carries a numeric axis value
    #[must_use]
    pub const fn is_axis(self) -> bool {
        matches!(self, Self::AccelX | Self::AccelY)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Channel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_name(s).ok_or_else(|| ParseError::UnknownChannel(s.to_string()))
    }
}

// ============================================================================
// Update Record
// ============================================================================

/// Value carried by an update record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateValue {
    /// Raw text for lap time, lap compare and zone channels
    Text(String),
    /// Normalized deflection, roughly in [-1.0, 1.0]
    Axis(f64),
}

impl UpdateValue {
    /// Text payload, if this is a text value
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Axis(_) => None,
        }
    }

    /// Numeric payload, if this is an axis value
    #[must_use]
    pub fn as_axis(&self) -> Option<f64> {
        match self {
            Self::Axis(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for UpdateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Axis(v) => write!(f, "{v}"),
        }
    }
}

/// One typed telemetry value tagged by channel
///
/// Text channels always hold [`UpdateValue::Text`] and axis channels always
/// hold [`UpdateValue::Axis`]; the constructors are the only way in.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    channel: Channel,
    value: UpdateValue,
}

impl UpdateRecord {
    /// Lap time update
    pub fn lap_time(text: impl Into<String>) -> Self {
        Self::text_unchecked(Channel::LapTime, text)
    }

    /// Lap compare update
    pub fn lap_compare(text: impl Into<String>) -> Self {
        Self::text_unchecked(Channel::LapCompare, text)
    }

    /// Current zone update
    pub fn current_zone(text: impl Into<String>) -> Self {
        Self::text_unchecked(Channel::CurrentZone, text)
    }

    /// Horizontal accelerometer update
    #[must_use]
    pub fn accel_x(value: f64) -> Self {
        Self {
            channel: Channel::AccelX,
            value: UpdateValue::Axis(value),
        }
    }

    /// Vertical accelerometer update
    #[must_use]
    pub fn accel_y(value: f64) -> Self {
        Self {
            channel: Channel::AccelY,
            value: UpdateValue::Axis(value),
        }
    }

    fn text_unchecked(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            value: UpdateValue::Text(text.into()),
        }
    }

    /// Parse one `<channel>/<value>` line
    ///
    /// The line must not contain the line terminator. Everything after the
    /// first `/` is the value.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when the delimiter is missing, the channel is
    /// unknown, or an axis value is not a finite number.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let (name, raw) = line
            .split_once(FIELD_DELIMITER)
            .ok_or_else(|| ParseError::MissingDelimiter(line.to_string()))?;

        let channel: Channel = name.parse()?;

        if channel.is_axis() {
            let value = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ParseError::InvalidAxisValue {
                    channel,
                    value: raw.to_string(),
                })?;
            Ok(Self {
                channel,
                value: UpdateValue::Axis(value),
            })
        } else {
            Ok(Self::text_unchecked(channel, raw))
        }
    }

    /// The channel this record updates
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// The carried value
    #[must_use]
    pub fn value(&self) -> &UpdateValue {
        &self.value
    }

    /// Encode back to a `<channel>/<value>` line (no terminator)
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UpdateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.channel, FIELD_DELIMITER, self.value)
    }
}

impl FromStr for UpdateRecord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

// ============================================================================
// Update Batch
// ============================================================================

/// Ordered group of records parsed from a single upstream delivery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    records: Vec<UpdateRecord>,
}

impl UpdateBatch {
    /// Create an empty batch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, keeping arrival order
    pub fn push(&mut self, record: UpdateRecord) {
        self.records.push(record);
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in arrival order
    #[must_use]
    pub fn records(&self) -> &[UpdateRecord] {
        &self.records
    }

    /// Iterate records in arrival order
    pub fn iter(&self) -> std::slice::Iter<'_, UpdateRecord> {
        self.records.iter()
    }

    /// The record that wins for `channel` (last write in arrival order)
    #[must_use]
    pub fn latest(&self, channel: Channel) -> Option<&UpdateRecord> {
        self.records.iter().rev().find(|r| r.channel == channel)
    }

    /// Encode as newline-joined lines
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                out.push(LINE_DELIMITER);
            }
            out.push_str(&record.encode());
        }
        out
    }

    /// Parse newline-joined lines, dropping lines that do not parse
    ///
    /// Blank lines and a trailing `\r` on each line are tolerated.
    #[must_use]
    pub fn parse_lines(text: &str) -> Self {
        let mut batch = Self::new();
        for line in text.split(LINE_DELIMITER) {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            match UpdateRecord::parse_line(line) {
                Ok(record) => batch.push(record),
                Err(e) => tracing::debug!(error = %e, "Dropping malformed update line"),
            }
        }
        batch
    }
}

impl FromIterator<UpdateRecord> for UpdateBatch {
    fn from_iter<I: IntoIterator<Item = UpdateRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for UpdateBatch {
    type Item = UpdateRecord;
    type IntoIter = std::vec::IntoIter<UpdateRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a UpdateBatch {
    type Item = &'a UpdateRecord;
    type IntoIter = std::slice::Iter<'a, UpdateRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_text_channels() {
        assert_eq!(
            UpdateRecord::parse_line("laptime/00:12.3").unwrap(),
            UpdateRecord::lap_time("00:12.3")
        );
        assert_eq!(
            UpdateRecord::parse_line("lapcompare/+01.2").unwrap(),
            UpdateRecord::lap_compare("+01.2")
        );
        assert_eq!(
            UpdateRecord::parse_line("currentzone/Hairpin").unwrap(),
            UpdateRecord::current_zone("Hairpin")
        );
    }

    #[test]
    fn test_parse_axis_channels() {
        let x = UpdateRecord::parse_line("accelx/0.5").unwrap();
        assert_eq!(x.channel(), Channel::AccelX);
        assert_eq!(x.value().as_axis(), Some(0.5));

        let y = UpdateRecord::parse_line("accely/ -0.25 ").unwrap();
        assert_eq!(y.value().as_axis(), Some(-0.25));
    }

    #[test]
    fn test_value_keeps_everything_after_first_delimiter() {
        let record = UpdateRecord::parse_line("currentzone/T1/T2").unwrap();
        assert_eq!(record.value().as_text(), Some("T1/T2"));
        assert_eq!(record.encode(), "currentzone/T1/T2");
    }

    #[test]
    fn test_text_value_may_be_empty() {
        let record = UpdateRecord::parse_line("laptime/").unwrap();
        assert_eq!(record.value().as_text(), Some(""));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            UpdateRecord::parse_line("laptime"),
            Err(ParseError::MissingDelimiter("laptime".into()))
        );
        assert_eq!(
            UpdateRecord::parse_line("boost/1.2"),
            Err(ParseError::UnknownChannel("boost".into()))
        );
        assert!(matches!(
            UpdateRecord::parse_line("accelx/fast"),
            Err(ParseError::InvalidAxisValue {
                channel: Channel::AccelX,
                ..
            })
        ));
        assert!(UpdateRecord::parse_line("accely/NaN").is_err());
        assert!(UpdateRecord::parse_line("accely/inf").is_err());
        // Channel names are matched exactly
        assert!(UpdateRecord::parse_line("LapTime/00:01.0").is_err());
    }

    #[test]
    fn test_well_formed_lines_round_trip() {
        let lines = [
            "laptime/01:23.4",
            "lapcompare/-00.7",
            "currentzone/Turn 3",
            "accelx/0.5",
            "accelx/-0.2",
            "accely/1",
            "accely/0.125",
        ];
        for line in lines {
            let record = UpdateRecord::parse_line(line).unwrap();
            let reparsed = UpdateRecord::parse_line(&record.encode()).unwrap();
            assert_eq!(record, reparsed, "line {line:?} did not round-trip");
        }
    }

    #[test]
    fn test_axis_encoding_is_canonical() {
        // Trailing zeros are not preserved, the value is
        let record = UpdateRecord::parse_line("accelx/-0.20").unwrap();
        assert_eq!(record.encode(), "accelx/-0.2");
    }

    #[test]
    fn test_channel_wire_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_wire_name(channel.wire_name()), Some(channel));
        }
        assert!(Channel::AccelX.is_axis());
        assert!(!Channel::CurrentZone.is_axis());
    }

    #[test]
    fn test_batch_encode_joins_lines() {
        let batch: UpdateBatch = vec![
            UpdateRecord::lap_time("00:12.3"),
            UpdateRecord::lap_compare("+01.2"),
        ]
        .into_iter()
        .collect();

        assert_eq!(batch.encode(), "laptime/00:12.3\nlapcompare/+01.2");
        assert_eq!(UpdateBatch::parse_lines(&batch.encode()), batch);
    }

    #[test]
    fn test_batch_parse_lines_drops_malformed() {
        let batch = UpdateBatch::parse_lines("laptime/1\r\nbogus\n\nwheelspin/3\naccelx/0.1\n");
        assert_eq!(
            batch.records(),
            &[UpdateRecord::lap_time("1"), UpdateRecord::accel_x(0.1)]
        );
    }

    #[test]
    fn test_batch_latest_is_last_write() {
        let batch: UpdateBatch = vec![
            UpdateRecord::accel_x(0.1),
            UpdateRecord::lap_time("a"),
            UpdateRecord::accel_x(0.3),
        ]
        .into_iter()
        .collect();

        assert_eq!(batch.latest(Channel::AccelX), Some(&UpdateRecord::accel_x(0.3)));
        assert_eq!(batch.latest(Channel::AccelY), None);
    }
}
