//! Compiled strptime style time formats.
//!
//! A format string is compiled once into a sequence of [`Field`]s. Parsing
//! walks the fields against the input; trailing input after the last field is
//! ignored. Matching does not depend on the process locale.

use smallvec::{smallvec, SmallVec};
use thiserror::Error;

mod field;

pub use field::Field;
use field::Fields;

#[derive(Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("unknown conversion specifier %{0}")]
    UnknownSpecifier(char),
    #[error("format ends with a dangling %")]
    DanglingPercent,
    #[error("invalid time zone {0:?}, expected GMT+HH:MM or GMT-HH:MM")]
    InvalidTimezone(String),
}

/// Result of matching a format against an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTime {
    pub secs: i64,
    pub nanos: u32,
    /// The value came from epoch seconds and is already UTC
    pub is_epoch: bool,
    /// Number of input bytes consumed
    pub consumed: usize,
}

/// Remembers the bytes in front of the seconds field of the last successful
/// parse, along with the epoch of second zero of that minute.
#[derive(Debug, Clone, Default)]
pub struct SecondCache {
    prefix: Vec<u8>,
    base: i64,
    year: i32,
    valid: bool,
}

impl SecondCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.prefix.clear();
        self.valid = false;
    }

    /// The cached prefix, if any.
    pub fn prefix(&self) -> Option<&[u8]> {
        if self.valid {
            Some(&self.prefix)
        } else {
            None
        }
    }

    fn hit(&self, input: &[u8], default_year: i32) -> bool {
        self.valid
            && self.year == default_year
            && input.starts_with(&self.prefix)
            && input
                .get(self.prefix.len())
                .map_or(false, |c| c.is_ascii_digit())
    }

    fn store(&mut self, prefix: &[u8], base: i64, year: i32) {
        self.prefix.clear();
        self.prefix.extend_from_slice(prefix);
        self.base = base;
        self.year = year;
        self.valid = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeFormat {
    fields: SmallVec<[Field; 16]>,
    second_at: Option<usize>,
}

impl TimeFormat {
    pub fn compile(format: &str) -> Result<Self, FormatError> {
        let mut fields = SmallVec::new();
        compile_into(format.as_bytes(), &mut fields)?;

        // Cacheable only if everything before %S is plain date/time, a
        // separator ends the prefix, and nothing after %S can move the epoch.
        let second_at = fields
            .iter()
            .position(|f| *f == Field::Second)
            .filter(|&at| {
                at > 0
                    && matches!(fields[at - 1], Field::Literal(_) | Field::Whitespace)
                    && !fields[..at]
                        .iter()
                        .any(|f| matches!(f, Field::EpochSeconds | Field::Fraction))
                    && !fields[at + 1..].iter().any(Field::affects_epoch)
            });

        Ok(TimeFormat { fields, second_at })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_cacheable(&self) -> bool {
        self.second_at.is_some()
    }

    /// Parse `input`. The wall clock is interpreted as UTC; `default_year`
    /// is used when the format carries no year.
    pub fn parse(&self, input: &[u8], default_year: i32) -> Option<ParsedTime> {
        let mut fields = Fields::default();
        let consumed = run(&self.fields, input, 0, &mut fields)?;
        if let Some((secs, nanos)) = fields.epoch {
            return Some(ParsedTime {
                secs,
                nanos: nanos.unwrap_or(fields.nanos),
                is_epoch: true,
                consumed,
            });
        }
        let base = fields.minute_base(default_year)?;
        Some(ParsedTime {
            secs: base + i64::from(fields.second.unwrap_or(0)),
            nanos: fields.nanos,
            is_epoch: false,
            consumed,
        })
    }

    /// Like [`parse`](TimeFormat::parse), reusing the minute computed for a
    /// previous input when this input shares the same bytes up to the seconds
    /// field. Formats which are not cacheable fall back to a full parse.
    pub fn parse_cached(
        &self,
        input: &[u8],
        default_year: i32,
        cache: &mut SecondCache,
    ) -> Option<ParsedTime> {
        let at = match self.second_at {
            Some(at) => at,
            None => return self.parse(input, default_year),
        };
        let (head, tail) = self.fields.split_at(at);

        let mut fields = Fields::default();
        if cache.hit(input, default_year) {
            let consumed = run(tail, input, cache.prefix.len(), &mut fields)?;
            return Some(ParsedTime {
                secs: cache.base + i64::from(fields.second.unwrap_or(0)),
                nanos: fields.nanos,
                is_epoch: false,
                consumed,
            });
        }

        let split = run(head, input, 0, &mut fields)?;
        let consumed = run(tail, input, split, &mut fields)?;
        let base = fields.minute_base(default_year)?;
        cache.store(&input[..split], base, default_year);
        Some(ParsedTime {
            secs: base + i64::from(fields.second.unwrap_or(0)),
            nanos: fields.nanos,
            is_epoch: false,
            consumed,
        })
    }
}

fn run(fields: &[Field], input: &[u8], start: usize, out: &mut Fields) -> Option<usize> {
    fields
        .iter()
        .try_fold(start, |pos, field| field.apply(input, pos, out))
}

fn push_literal(out: &mut SmallVec<[Field; 16]>, c: u8) {
    if let Some(Field::Literal(lit)) = out.last_mut() {
        lit.push(c);
    } else {
        out.push(Field::Literal(smallvec![c]));
    }
}

fn push_whitespace(out: &mut SmallVec<[Field; 16]>) {
    if out.last() != Some(&Field::Whitespace) {
        out.push(Field::Whitespace);
    }
}

fn compile_into(format: &[u8], out: &mut SmallVec<[Field; 16]>) -> Result<(), FormatError> {
    let mut i = 0;
    while i < format.len() {
        let c = format[i];
        i += 1;
        if c.is_ascii_whitespace() {
            push_whitespace(out);
            continue;
        }
        if c != b'%' {
            push_literal(out, c);
            continue;
        }

        let mut spec = *format.get(i).ok_or(FormatError::DanglingPercent)?;
        i += 1;
        if spec == b'E' || spec == b'O' {
            spec = *format.get(i).ok_or(FormatError::DanglingPercent)?;
            i += 1;
        }
        match spec {
            b'Y' => out.push(Field::Year),
            b'y' => out.push(Field::YearOfCentury),
            b'C' => out.push(Field::Century),
            b'm' => out.push(Field::Month),
            b'b' | b'B' | b'h' => out.push(Field::MonthName),
            b'd' | b'e' => out.push(Field::Day),
            b'H' => out.push(Field::Hour),
            b'I' => out.push(Field::Hour12),
            b'p' => out.push(Field::Meridiem),
            b'M' => out.push(Field::Minute),
            b'S' => out.push(Field::Second),
            b'f' => out.push(Field::Fraction),
            b'z' => out.push(Field::ZoneOffset),
            b'Z' => out.push(Field::ZoneName),
            b'a' | b'A' => out.push(Field::WeekdayName),
            b'u' | b'w' => out.push(Field::WeekdayNumber),
            b'j' => out.push(Field::DayOfYear),
            b'U' | b'W' | b'V' => out.push(Field::WeekOfYear),
            b's' => out.push(Field::EpochSeconds),
            b'n' | b't' => push_whitespace(out),
            b'%' => push_literal(out, b'%'),
            b'c' => compile_into(b"%a %b %e %H:%M:%S %Y", out)?,
            b'D' | b'x' => compile_into(b"%m/%d/%y", out)?,
            b'F' => compile_into(b"%Y-%m-%d", out)?,
            b'T' | b'X' => compile_into(b"%H:%M:%S", out)?,
            b'r' => compile_into(b"%I:%M:%S %p", out)?,
            b'R' => compile_into(b"%H:%M", out)?,
            other => return Err(FormatError::UnknownSpecifier(char::from(other))),
        }
    }
    Ok(())
}

/// Parse a `GMT+HH:MM` / `GMT-HH:MM` zone into seconds east of UTC. An empty
/// zone is UTC.
pub fn parse_gmt_offset(zone: &str) -> Result<i64, FormatError> {
    let invalid = || FormatError::InvalidTimezone(zone.to_owned());
    if zone.is_empty() {
        return Ok(0);
    }
    let rest = zone.strip_prefix("GMT").ok_or_else(invalid)?.as_bytes();
    if rest.len() != 6 || rest[3] != b':' {
        return Err(invalid());
    }
    let sign = match rest[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err(invalid()),
    };
    let two = |s: &[u8]| -> Option<i64> {
        if s.iter().all(u8::is_ascii_digit) {
            Some(i64::from(s[0] - b'0') * 10 + i64::from(s[1] - b'0'))
        } else {
            None
        }
    };
    let hours = two(&rest[1..3]).ok_or_else(invalid)?;
    let minutes = two(&rest[4..6]).ok_or_else(invalid)?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    Ok(sign * (hours * 3600 + minutes * 60))
}
