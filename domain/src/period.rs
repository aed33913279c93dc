use crate::error::{Error, InternalErrorKind};
use chrono::{Datelike, Local};
use serde::Serialize;
use std::fmt;

/// A calendar month, as used by the `sales/by-month` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    month: u32,
    year: i32,
}

impl Period {
    /// `month` is 1-based.
    pub fn new(month: u32, year: i32) -> Result<Self, Error> {
        if !(1..=12).contains(&month) {
            return Err(Error::internal(
                InternalErrorKind::InvalidPeriod,
                &format!("month must be between 1 and 12, got {month}"),
            ));
        }
        Ok(Self { month, year })
    }

    /// The month containing today's date on the local clock.
    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Self {
            month: today.month(),
            year: today.year(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
