//! Utilities to deal with calendar dates as they appear in access logs.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// An error returned when constructing or parsing a [`NumDate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseNumDateError {
    /// The value does not consist of exactly eight decimal digits.
    #[error("date must consist of eight digits")]
    InvalidFormat,
    /// The digits do not describe an existing calendar day.
    #[error("not a valid calendar date: {0}")]
    InvalidDate(u32),
}

/// A calendar date encoded as the integer `YYYYMMDD`, for example `20200427`.
///
/// The integer order of the encoding is the chronological order of the dates, so partitions keyed
/// by a `NumDate` sort correctly by comparing the raw values.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NumDate(u32);

impl NumDate {
    /// Creates a date from its eight digit integer encoding.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_common::NumDate;
    ///
    /// let date = NumDate::new(20200427).unwrap();
    /// assert_eq!(date.year(), 2020);
    /// assert!(NumDate::new(20200431).is_err());
    /// ```
    pub fn new(value: u32) -> Result<Self, ParseNumDateError> {
        if !(10_000_000..=99_999_999).contains(&value) {
            return Err(ParseNumDateError::InvalidFormat);
        }

        let (year, month, day) = (value / 10_000, value / 100 % 100, value % 100);
        match NaiveDate::from_ymd_opt(year as i32, month, day) {
            Some(_) => Ok(Self(value)),
            None => Err(ParseNumDateError::InvalidDate(value)),
        }
    }

    /// Creates a date from year, month and day.
    ///
    /// Returns `None` if the day does not exist or the year has more or less than four digits.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).and_then(Self::from_naive)
    }

    /// Converts a chrono date into its integer encoding.
    pub fn from_naive(date: NaiveDate) -> Option<Self> {
        if !(1000..=9999).contains(&date.year()) {
            return None;
        }

        Some(Self(date.year() as u32 * 10_000 + date.month() * 100 + date.day()))
    }

    /// Returns the eight digit integer encoding.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the four digit year.
    pub fn year(self) -> u32 {
        self.0 / 10_000
    }

    /// Returns the month, starting at `1`.
    pub fn month(self) -> u32 {
        self.0 / 100 % 100
    }

    /// Returns the day of the month, starting at `1`.
    pub fn day(self) -> u32 {
        self.0 % 100
    }
}

impl fmt::Debug for NumDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumDate({})", self.0)
    }
}

impl fmt::Display for NumDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<u32> for NumDate {
    type Error = ParseNumDateError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for NumDate {
    type Err = ParseNumDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNumDateError::InvalidFormat);
        }

        let value = s.parse().or(Err(ParseNumDateError::InvalidFormat))?;
        Self::new(value)
    }
}

impl Serialize for NumDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for NumDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}
