//! Structural failures that abort a whole computation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("scenario has no years to project")]
    EmptyScenario,

    #[error("years must be contiguous: expected {expected}, found {found}")]
    NonContiguousYears { expected: i32, found: i32 },

    #[error("{jurisdiction} brackets for {year} are not in ascending order")]
    UnsortedBrackets {
        jurisdiction: &'static str,
        year: i32,
    },

    #[error("{jurisdiction} brackets for {year} are empty or do not start at zero")]
    MissingBaseBracket {
        jurisdiction: &'static str,
        year: i32,
    },

    #[error("base year {base_year} is more than {max_distance} years from the projected years")]
    BaseYearOutOfRange { base_year: i32, max_distance: i32 },

    #[error("non-finite value in {field} for {year}")]
    NonFinite { field: &'static str, year: i32 },

    #[error("scheduled item {index} is malformed: {reason}")]
    MalformedRule { index: usize, reason: String },
}
