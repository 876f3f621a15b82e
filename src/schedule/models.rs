use std::fmt;

use chrono::{NaiveDate, NaiveTime, Weekday};

/// A weekday as written in the schedule, one character per day (`M`, `T`, `W`, `R`, `F`...)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayCode(pub char);

impl DayCode {
    /// Weekday this code stands for, if it's a known one
    pub fn weekday(self) -> Option<Weekday> {
        match self.0.to_ascii_uppercase() {
            'M' => Some(Weekday::Mon),
            'T' => Some(Weekday::Tue),
            'W' => Some(Weekday::Wed),
            'R' => Some(Weekday::Thu),
            'F' => Some(Weekday::Fri),
            'S' => Some(Weekday::Sat),
            'U' => Some(Weekday::Sun),
            _ => None,
        }
    }
}

/// Inclusive calendar window, `start <= end`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Daily meeting window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Course {
    /// Catalog code, e.g. `COP1000`
    pub code: String,

    /// Course's name
    pub name: String,

    /// Instructor's name, without the role marker
    pub instructor: String,

    /// Building and room, kept as written
    pub location: String,

    /// Days of the week the course meets, in the order of the source
    pub days: Vec<DayCode>,

    /// Period of the term the course takes place
    pub date_range: DateRange,

    /// Hours of the meeting
    pub time_range: TimeRange,
}

impl Course {
    /// Days as they were written in the schedule
    pub fn days_str(&self) -> String {
        self.days.iter().map(|day| day.0).collect()
    }
}

/// Why a meeting row was left out of the schedule
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No end time, the course is online or asynchronous
    NoMeetingTime { raw: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMeetingTime { raw } => write!(f, "no meeting time ({raw:?})"),
        }
    }
}

/// Outcome of the extraction of one meeting row
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extracted {
    Course(Course),
    Skipped { course: String, reason: SkipReason },
}

/// Field of a course whose text couldn't be decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Caption,
    MeetingRow,
    Instructor,
    DateRange,
    StartTime,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Caption => "caption",
            Self::MeetingRow => "meeting row",
            Self::Instructor => "instructor",
            Self::DateRange => "date range",
            Self::StartTime => "start time",
        })
    }
}
