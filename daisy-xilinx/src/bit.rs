//! Xilinx BIT container format.
//!
//! A BIT file carries a short TLV header (design name, part, build date and
//! time) in front of the raw configuration data. Field lengths are
//! big-endian, two bytes everywhere except the data field's four; string
//! fields end in a NUL that is stripped on decode. The file stores
//! configuration bytes MSB-first while JTAG shifts LSB-first, so the
//! decoder also derives a bit-reversed copy ready for the wire.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nom::{IResult, Parser, multi::length_data, number::complete::{be_u16, be_u32}};
use thiserror::Error;
use tracing::debug;

/// Decoded BIT container. Immutable once parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct Bitstream {
    /// Leading length-prefixed bytes, kept verbatim and not interpreted.
    pub preamble: Vec<u8>,
    /// The whole `a` field: design file name plus `key=value` options.
    pub info: String,
    /// Design file name, the info text before the first `;`.
    pub filename: String,
    /// Hex text of a `UserID=0x…` info option, when present.
    pub usercode: Option<String>,
    /// Target part, e.g. `3s250ecp132`.
    pub part: String,
    /// Build date exactly as stored, `YYYY/MM/DD`.
    pub date: String,
    /// Build time exactly as stored, `HH:MM:SS`.
    pub time: String,
    /// Date and time composed into a calendar timestamp.
    pub built_at: NaiveDateTime,
    /// Configuration bytes as stored in the file, MSB-first.
    pub data: Vec<u8>,
    /// Configuration bytes with every byte bit-reversed, ready for the
    /// LSB-first shift pipeline.
    pub wire_data: Vec<u8>,
}

/// Which container field a decode failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Preamble,
    Info,
    Part,
    Date,
    Time,
    Data,
}

impl Field {
    const fn marker(self) -> u8 {
        match self {
            // the preamble carries no marker byte
            Field::Preamble => 0,
            Field::Info => b'a',
            Field::Part => b'b',
            Field::Date => b'c',
            Field::Time => b'd',
            Field::Data => b'e',
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Field::Preamble => "preamble",
            Field::Info => "info",
            Field::Part => "part",
            Field::Date => "date",
            Field::Time => "time",
            Field::Data => "data",
        })
    }
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("container truncated inside the {0} field")]
    Truncated(Field),
    #[error("expected the {expected} field marker, found {found:#04x}")]
    UnexpectedTag { expected: Field, found: u8 },
    #[error("the {0} field is not valid text")]
    Text(Field),
    #[error("unparsable build timestamp {date:?} {time:?}")]
    Timestamp { date: String, time: String },
    #[error("failed to read container")]
    Io(#[from] std::io::Error),
}

impl Bitstream {
    /// Decode a BIT container. A failure never yields a partial result;
    /// bytes past the data field's declared length are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let (rest, preamble) = sized(bytes, Field::Preamble)?;
        // the first marker byte is itself carried in a length-prefixed field
        let (rest, marker) = sized(rest, Field::Info)?;
        if marker != [Field::Info.marker()].as_slice() {
            return Err(FormatError::UnexpectedTag {
                expected: Field::Info,
                found: marker.first().copied().unwrap_or_default(),
            });
        }
        let (rest, info) = sized(rest, Field::Info)?;
        let (rest, part) = tagged(rest, Field::Part)?;
        let (rest, date) = tagged(rest, Field::Date)?;
        let (rest, time) = tagged(rest, Field::Time)?;
        let (_trailer, data) = tagged(rest, Field::Data)?;

        let info = text(info, Field::Info)?;
        let part = text(part, Field::Part)?;
        let date = text(date, Field::Date)?;
        let time = text(time, Field::Time)?;
        let built_at = timestamp(&date, &time)?;
        let (filename, usercode) = split_info(&info);
        let wire_data = data.iter().map(|byte| byte.reverse_bits()).collect();

        debug!(%part, filename, bytes = data.len(), "decoded container");

        Ok(Self {
            preamble: preamble.to_vec(),
            info,
            filename,
            usercode,
            part,
            date,
            time,
            built_at,
            data: data.to_vec(),
            wire_data,
        })
    }

    /// Read and decode a container from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        Self::decode(&std::fs::read(path)?)
    }
}

fn block16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u16).parse(input)
}

fn block32(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(be_u32).parse(input)
}

fn sized(input: &[u8], field: Field) -> Result<(&[u8], &[u8]), FormatError> {
    block16(input).map_err(|_| FormatError::Truncated(field))
}

/// `b` through `e` fields open with a raw marker byte.
fn tagged(input: &[u8], field: Field) -> Result<(&[u8], &[u8]), FormatError> {
    let (&found, rest) = input.split_first().ok_or(FormatError::Truncated(field))?;
    if found != field.marker() {
        return Err(FormatError::UnexpectedTag { expected: field, found });
    }
    let block = if field == Field::Data { block32 } else { block16 };
    block(rest).map_err(|_| FormatError::Truncated(field))
}

fn text(bytes: &[u8], field: Field) -> Result<String, FormatError> {
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| FormatError::Text(field))
}

fn timestamp(date: &str, time: &str) -> Result<NaiveDateTime, FormatError> {
    let bad = || FormatError::Timestamp {
        date: date.to_owned(),
        time: time.to_owned(),
    };
    let day = NaiveDate::parse_from_str(date, "%Y/%m/%d").map_err(|_| bad())?;
    let tod = NaiveTime::parse_from_str(time, "%H:%M:%S").map_err(|_| bad())?;
    Ok(day.and_time(tod))
}

/// The info field is `;`-separated: the design file name first, then
/// `key=value` options.
fn split_info(info: &str) -> (String, Option<String>) {
    let mut segments = info.split(';');
    let filename = segments.next().unwrap_or_default().to_owned();
    let usercode = segments
        .find_map(|segment| segment.strip_prefix("UserID=0x"))
        .map(str::to_owned);
    (filename, usercode)
}
