use chrono::NaiveDate;
use smallvec::SmallVec;

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

const NANOS_DIGITS: usize = 9;
const EPOCH_SECONDS_DIGITS: usize = 10;
const EPOCH_MAX_DIGITS: usize = EPOCH_SECONDS_DIGITS + NANOS_DIGITS;

/// One compiled conversion of a time format. Each field knows how to match
/// itself against the input at a position and where matching ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Literal(SmallVec<[u8; 8]>),
    /// Zero or more whitespace bytes
    Whitespace,
    Year,
    YearOfCentury,
    Century,
    Month,
    MonthName,
    Day,
    Hour,
    Hour12,
    Meridiem,
    Minute,
    Second,
    /// Variable width sub-second digits, normalized to nanoseconds
    Fraction,
    ZoneOffset,
    ZoneName,
    WeekdayName,
    WeekdayNumber,
    DayOfYear,
    WeekOfYear,
    /// Seconds since the epoch, optionally followed by sub-second digits
    EpochSeconds,
}

/// Values collected while matching a format. Weekday, day of year, week and
/// zone values are validated and kept, but do not take part in computing the
/// epoch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Fields {
    pub year: Option<i32>,
    pub year_of_century: Option<i32>,
    pub century: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub hour12: Option<u32>,
    pub pm: Option<bool>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
    pub nanos: u32,
    pub zone_offset: Option<i32>,
    pub weekday: Option<u32>,
    pub day_of_year: Option<u32>,
    pub week: Option<u32>,
    pub epoch: Option<(i64, Option<u32>)>,
}

impl Fields {
    fn resolve_year(&self, default_year: i32) -> i32 {
        match (self.year, self.year_of_century, self.century) {
            (Some(year), _, _) => year,
            (None, Some(yy), Some(cc)) => cc * 100 + yy,
            (None, Some(yy), None) if yy < 69 => 2000 + yy,
            (None, Some(yy), None) => 1900 + yy,
            (None, None, Some(cc)) => cc * 100,
            (None, None, None) => default_year,
        }
    }

    fn resolve_hour(&self) -> u32 {
        match self.hour12 {
            Some(h) if self.pm == Some(true) => h % 12 + 12,
            Some(h) => h % 12,
            None => self.hour.unwrap_or(0),
        }
    }

    /// Epoch seconds of second zero of the matched minute, treating the wall
    /// clock as UTC. None for impossible dates such as February 30th.
    pub fn minute_base(&self, default_year: i32) -> Option<i64> {
        let date = NaiveDate::from_ymd_opt(
            self.resolve_year(default_year),
            self.month.unwrap_or(1),
            self.day.unwrap_or(1),
        )?;
        let time = date.and_hms_opt(self.resolve_hour(), self.minute.unwrap_or(0), 0)?;
        Some(time.and_utc().timestamp())
    }
}

impl Field {
    /// Whether the value matched by this field changes the computed epoch.
    pub fn affects_epoch(&self) -> bool {
        use Field::*;
        matches!(
            self,
            Year | YearOfCentury
                | Century
                | Month
                | MonthName
                | Day
                | Hour
                | Hour12
                | Meridiem
                | Minute
                | Second
                | EpochSeconds
        )
    }

    /// Match this field at `pos`, record its value and return the position
    /// after the match.
    pub fn apply(&self, input: &[u8], pos: usize, out: &mut Fields) -> Option<usize> {
        use Field::*;
        match self {
            Literal(lit) => {
                if input[pos..].starts_with(lit.as_slice()) {
                    Some(pos + lit.len())
                } else {
                    None
                }
            }
            Whitespace => Some(
                pos + input[pos..]
                    .iter()
                    .take_while(|c| c.is_ascii_whitespace())
                    .count(),
            ),
            Year => {
                let (v, end) = ranged(input, pos, 4, 0, 9999)?;
                out.year = Some(v as i32);
                Some(end)
            }
            YearOfCentury => {
                let (v, end) = ranged(input, pos, 2, 0, 99)?;
                out.year_of_century = Some(v as i32);
                Some(end)
            }
            Century => {
                let (v, end) = ranged(input, pos, 2, 0, 99)?;
                out.century = Some(v as i32);
                Some(end)
            }
            Month => {
                let (v, end) = ranged(input, pos, 2, 1, 12)?;
                out.month = Some(v);
                Some(end)
            }
            MonthName => {
                let (index, end) = name(input, pos, &MONTHS)?;
                out.month = Some(index as u32 + 1);
                Some(end)
            }
            Day => {
                let (v, end) = ranged(input, pos, 2, 1, 31)?;
                out.day = Some(v);
                Some(end)
            }
            Hour => {
                let (v, end) = ranged(input, pos, 2, 0, 23)?;
                out.hour = Some(v);
                Some(end)
            }
            Hour12 => {
                let (v, end) = ranged(input, pos, 2, 1, 12)?;
                out.hour12 = Some(v);
                Some(end)
            }
            Meridiem => {
                let rest = &input[pos..];
                if starts_with_ignore_case(rest, "am") {
                    out.pm = Some(false);
                } else if starts_with_ignore_case(rest, "pm") {
                    out.pm = Some(true);
                } else {
                    return None;
                }
                Some(pos + 2)
            }
            Minute => {
                let (v, end) = ranged(input, pos, 2, 0, 59)?;
                out.minute = Some(v);
                Some(end)
            }
            Second => {
                let (v, end) = ranged(input, pos, 2, 0, 60)?;
                out.second = Some(v);
                Some(end)
            }
            Fraction => {
                let digits = digit_run(input, pos, usize::MAX);
                if digits == 0 {
                    return None;
                }
                out.nanos = nanos_of(&input[pos..pos + digits]);
                Some(pos + digits)
            }
            ZoneOffset => {
                let (offset, end) = zone_offset(input, pos)?;
                out.zone_offset = Some(offset);
                Some(end)
            }
            ZoneName => {
                let len = input[pos..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .count();
                if len == 0 {
                    None
                } else {
                    Some(pos + len)
                }
            }
            WeekdayName => {
                let (index, end) = name(input, pos, &WEEKDAYS)?;
                out.weekday = Some(index as u32);
                Some(end)
            }
            WeekdayNumber => {
                let (v, end) = ranged(input, pos, 1, 0, 7)?;
                out.weekday = Some(v % 7);
                Some(end)
            }
            DayOfYear => {
                let (v, end) = ranged(input, pos, 3, 1, 366)?;
                out.day_of_year = Some(v);
                Some(end)
            }
            WeekOfYear => {
                let (v, end) = ranged(input, pos, 2, 0, 53)?;
                out.week = Some(v);
                Some(end)
            }
            EpochSeconds => {
                let digits = digit_run(input, pos, EPOCH_MAX_DIGITS);
                if digits == 0 {
                    return None;
                }
                let run = &input[pos..pos + digits];
                out.epoch = Some(if digits > EPOCH_SECONDS_DIGITS {
                    let (secs, frac) = run.split_at(EPOCH_SECONDS_DIGITS);
                    (decimal(secs), Some(nanos_of(frac)))
                } else {
                    (decimal(run), None)
                });
                Some(pos + digits)
            }
        }
    }
}

fn digit_run(input: &[u8], pos: usize, max: usize) -> usize {
    input[pos..]
        .iter()
        .take(max)
        .take_while(|c| c.is_ascii_digit())
        .count()
}

fn decimal(digits: &[u8]) -> i64 {
    digits
        .iter()
        .fold(0_i64, |acc, d| acc * 10 + i64::from(d - b'0'))
}

/// Normalize a run of sub-second digits to nanoseconds, padding or
/// truncating to nine digits.
fn nanos_of(digits: &[u8]) -> u32 {
    let mut nanos: u32 = 0;
    for i in 0..NANOS_DIGITS {
        let d = digits.get(i).map_or(0, |d| u32::from(d - b'0'));
        nanos = nanos * 10 + d;
    }
    nanos
}

/// Read 1 to `max_digits` digits, after any leading spaces, and check the
/// value is within `min..=max`.
fn ranged(input: &[u8], pos: usize, max_digits: usize, min: u32, max: u32) -> Option<(u32, usize)> {
    let start = pos + input[pos..].iter().take_while(|c| **c == b' ').count();
    let digits = digit_run(input, start, max_digits);
    if digits == 0 {
        return None;
    }
    let value = decimal(&input[start..start + digits]) as u32;
    if value < min || value > max {
        return None;
    }
    Some((value, start + digits))
}

fn starts_with_ignore_case(input: &[u8], word: &str) -> bool {
    input.len() >= word.len() && input[..word.len()].eq_ignore_ascii_case(word.as_bytes())
}

/// Match a full name, then a three letter abbreviation, case insensitively.
fn name(input: &[u8], pos: usize, names: &[&str]) -> Option<(usize, usize)> {
    let rest = &input[pos..];
    if let Some(index) = names.iter().position(|n| starts_with_ignore_case(rest, n)) {
        return Some((index, pos + names[index].len()));
    }
    names
        .iter()
        .position(|n| starts_with_ignore_case(rest, &n[..3]))
        .map(|index| (index, pos + 3))
}

/// `Z`, or a sign followed by `HH`, `HHMM` or `HH:MM`. Returns seconds east of
/// UTC.
fn zone_offset(input: &[u8], pos: usize) -> Option<(i32, usize)> {
    let sign = match input.get(pos)? {
        b'Z' | b'z' => return Some((0, pos + 1)),
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let mut end = pos + 1;
    if digit_run(input, end, 2) != 2 {
        return None;
    }
    let hours = decimal(&input[end..end + 2]) as i32;
    end += 2;
    if input.get(end) == Some(&b':') && digit_run(input, end + 1, 2) == 2 {
        end += 1;
    }
    let mut minutes = 0;
    if digit_run(input, end, 2) == 2 {
        minutes = decimal(&input[end..end + 2]) as i32;
        end += 2;
    }
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some((sign * (hours * 3600 + minutes * 60), end))
}
