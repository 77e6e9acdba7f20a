//! Telemetry Messages
//!
//! Every publish is a single line in an InfluxDB line protocol style:
//!
//! ```text
//! <category>,deviceId=<id>,deviceType=<type>,deviceVersion=<version> <field>=<value>,...
//! ```
//!
//! Text fields are double quoted, numeric fields carry exactly one fractional
//! digit. Formatting is a pure function of its inputs, so the same record
//! always renders to the same bytes, and [`LineMessage::parse`] reads a
//! rendered message back.

use core::fmt::Write;
use core::net::Ipv4Addr;

use heapless::{String, Vec};

use crate::system::context::MacAddress;
use crate::system::error::FormatError;
use crate::system::uptime::Uptime;
use crate::task::sensor::Measurements;

/// Buffer size for one rendered message
pub const MESSAGE_CAPACITY: usize = 320;

/// Most fields a parsed message can carry
const MAX_FIELDS: usize = 8;

/// Most tags a parsed message can carry
const MAX_TAGS: usize = 4;

/// A rendered message
pub type MessageBuffer = String<MESSAGE_CAPACITY>;

/// Message categories, the leading token of every line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Category {
    /// Node self report: uptime, internal temperature, addresses
    Telemetry,
    /// Environmental temperature and humidity
    Measurement,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Telemetry => "telemetry",
            Category::Measurement => "measurement",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "telemetry" => Some(Category::Telemetry),
            "measurement" => Some(Category::Measurement),
            _ => None,
        }
    }
}

/// Identity tags stamped onto every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity<'a> {
    pub client_id: &'a str,
    pub device_type: &'a str,
    pub version: &'a str,
}

/// One record, built fresh for every publish
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryRecord {
    /// Node self report
    Node {
        uptime: Uptime,
        internal_temperature: f32,
        mac: MacAddress,
        ip: Ipv4Addr,
    },
    /// Environmental reading
    Measurement(Measurements),
}

impl TelemetryRecord {
    pub fn category(&self) -> Category {
        match self {
            TelemetryRecord::Node { .. } => Category::Telemetry,
            TelemetryRecord::Measurement(_) => Category::Measurement,
        }
    }

    fn write_fields(&self, out: &mut MessageBuffer) -> Result<(), FormatError> {
        match self {
            TelemetryRecord::Node {
                uptime,
                internal_temperature,
                mac,
                ip,
            } => {
                write!(out, "uptime=\"{uptime}\",internal_temperature=")?;
                write_decimal(out, *internal_temperature, "internal_temperature")?;
                write!(out, ",MAC_address=\"{mac}\",IP_address=\"{ip}\"")?;
            }
            TelemetryRecord::Measurement(m) => {
                out.push_str("temperature=").map_err(|_| FormatError::Capacity)?;
                write_decimal(out, m.temperature, "temperature")?;
                out.push_str(",humidity=").map_err(|_| FormatError::Capacity)?;
                write_decimal(out, m.humidity, "humidity")?;
            }
        }
        Ok(())
    }
}

/// Renders `record` with the identity tags into a fresh buffer
pub fn format_message(
    identity: &DeviceIdentity<'_>,
    record: &TelemetryRecord,
) -> Result<MessageBuffer, FormatError> {
    let mut out = MessageBuffer::new();
    write!(
        out,
        "{},deviceId={},deviceType={},deviceVersion={} ",
        record.category().as_str(),
        identity.client_id,
        identity.device_type,
        identity.version
    )?;
    record.write_fields(&mut out)?;
    Ok(out)
}

/// Writes `value` rounded half away from zero to one fractional digit
///
/// Goes through integer tenths so the output never depends on float
/// formatting details and never renders a negative zero.
fn write_decimal(out: &mut MessageBuffer, value: f32, field: &'static str) -> Result<(), FormatError> {
    if !value.is_finite() {
        return Err(FormatError::NonFinite(field));
    }
    let tenths = libm::roundf(value * 10.0) as i64;
    let sign = if tenths < 0 { "-" } else { "" };
    let magnitude = tenths.unsigned_abs();
    write!(out, "{sign}{}.{}", magnitude / 10, magnitude % 10)?;
    Ok(())
}

/// Value of a parsed field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    /// Quoted text, without the quotes
    Text(&'a str),
    Number(f32),
}

/// Reasons a line does not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// No space between the tag set and the field set
    MissingFieldSet,
    UnknownCategory,
    /// A tag or field without `=`
    MalformedPair,
    /// Unquoted value that is not a number
    InvalidNumber,
    /// More tags or fields than a node message carries
    TooManyEntries,
}

/// A message read back from its line form
#[derive(Debug, Clone, PartialEq)]
pub struct LineMessage<'a> {
    pub category: Category,
    tags: Vec<(&'a str, &'a str), MAX_TAGS>,
    fields: Vec<(&'a str, FieldValue<'a>), MAX_FIELDS>,
}

impl<'a> LineMessage<'a> {
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        let (head, field_set) = line.split_once(' ').ok_or(ParseError::MissingFieldSet)?;

        let mut head_parts = head.split(',');
        let category = head_parts
            .next()
            .and_then(Category::from_name)
            .ok_or(ParseError::UnknownCategory)?;

        let mut tags = Vec::new();
        for part in head_parts {
            let pair = part.split_once('=').ok_or(ParseError::MalformedPair)?;
            tags.push(pair).map_err(|_| ParseError::TooManyEntries)?;
        }

        let mut fields = Vec::new();
        for part in field_set.split(',') {
            let (key, raw) = part.split_once('=').ok_or(ParseError::MalformedPair)?;
            let value = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                Some(text) => FieldValue::Text(text),
                None => FieldValue::Number(raw.parse().map_err(|_| ParseError::InvalidNumber)?),
            };
            fields.push((key, value)).map_err(|_| ParseError::TooManyEntries)?;
        }

        Ok(Self { category, tags, fields })
    }

    /// Value of tag `name`
    pub fn tag(&self, name: &str) -> Option<&'a str> {
        self.tags.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }

    pub fn field(&self, name: &str) -> Option<FieldValue<'a>> {
        self.fields.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }

    /// Numeric field `name`, `None` if missing or quoted
    pub fn number(&self, name: &str) -> Option<f32> {
        match self.field(name)? {
            FieldValue::Number(n) => Some(n),
            FieldValue::Text(_) => None,
        }
    }

    /// Text field `name`, `None` if missing or numeric
    pub fn text(&self, name: &str) -> Option<&'a str> {
        match self.field(name)? {
            FieldValue::Text(t) => Some(t),
            FieldValue::Number(_) => None,
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}
