use std::iter;

use chrono::{NaiveDate, NaiveTime};
use scraper::{html::Select, ElementRef, Html};
use tracing::info;

use crate::{
    error::ParseError,
    utils::{self, cell_text, models::Position},
};

pub mod models;

use models::{Course, DateRange, DayCode, Extracted, Field, SkipReason, TimeRange};

/// Caption of the tables listing the meetings of a course
const MEETINGS_CAPTION: &str = "Scheduled Meeting Times";

/// Separator of the caption parts and of the ranges
const SEPARATOR: &str = " - ";

/// Format of the dates, i.e. `Jan 08, 2024`
const DATE_FORMAT: &str = "%b %d, %Y";

/// Format of the hours, i.e. `9:00 AM`
const TIME_FORMAT: &str = "%I:%M %p";

/// Position of the cells in a meeting row, the instructor being the last one
const TIME_CELL: usize = 0;
const DAYS_CELL: usize = 1;
const LOCATION_CELL: usize = 2;
const DATES_CELL: usize = 3;

/// Build the schedule from the document, leaving out the courses without meeting time
pub fn parse(document: &Html) -> Result<Vec<Course>, ParseError> {
    let mut courses = vec![];
    for extracted in extract(document) {
        match extracted? {
            Extracted::Course(course) => courses.push(course),
            Extracted::Skipped { course, reason } => {
                info!("{course} left out of the schedule: {reason}");
            }
        }
    }

    Ok(courses)
}

/// Every meeting row of the document, in the order of the document, decoded on demand
pub fn extract<'a>(document: &'a Html) -> impl Iterator<Item = Result<Extracted, ParseError>> + 'a {
    TablePairs {
        tables: document.select(selector!("table.datadisplaytable")),
        pending: None,
        meetings_position: 0,
    }
    .flat_map(|pair| -> Rows<'a> {
        match pair {
            Ok((details, meetings)) => extract_course(details, meetings),
            Err(err) => Box::new(iter::once(Err(err))),
        }
    })
}

type Rows<'a> = Box<dyn Iterator<Item = Result<Extracted, ParseError>> + 'a>;

/// Join each meetings table with the course table right before it
struct TablePairs<'a> {
    tables: Select<'a, 'static>,
    /// Course table still waiting for its meetings
    pending: Option<ElementRef<'a>>,
    meetings_position: usize,
}

impl<'a> Iterator for TablePairs<'a> {
    type Item = Result<(ElementRef<'a>, ElementRef<'a>), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(table) = self.tables.next() else {
                return self.pending.take().map(|orphan| {
                    Err(ParseError::MissingMeetings {
                        caption: caption(orphan),
                    })
                });
            };

            if is_meetings(table) {
                let position = self.meetings_position;
                self.meetings_position += 1;
                return Some(match self.pending.take() {
                    Some(details) => Ok((details, table)),
                    None => Err(ParseError::MissingDetails { position }),
                });
            }

            if let Some(orphan) = self.pending.replace(table) {
                return Some(Err(ParseError::MissingMeetings {
                    caption: caption(orphan),
                }));
            }
        }
    }
}

fn caption(table: ElementRef) -> String {
    table
        .select(selector!("caption"))
        .next()
        .map(cell_text)
        .unwrap_or_default()
}

fn is_meetings(table: ElementRef) -> bool {
    caption(table) == MEETINGS_CAPTION
}

/// One entry per meeting row of the course
fn extract_course<'a>(details: ElementRef<'a>, meetings: ElementRef<'a>) -> Rows<'a> {
    let caption = caption(details);
    let Some((name, code)) =
        split_caption(&caption).map(|(name, code)| (name.to_owned(), code.to_owned()))
    else {
        return Box::new(iter::once(Err(ParseError::MalformedField {
            course: caption.clone(),
            field: Field::Caption,
            text: caption,
        })));
    };

    Box::new(
        meetings
            .select(selector!("tr"))
            .map(|row| row.select(selector!("td")).map(cell_text).collect::<Vec<_>>())
            .filter(|cells| !cells.is_empty())
            .map(move |cells| extract_meeting(&name, &code, &cells)),
    )
}

/// `<name> - <code>`, anything after the code is ignored
fn split_caption(caption: &str) -> Option<(&str, &str)> {
    let mut parts = caption.split(SEPARATOR);
    let name = parts.next().filter(|name| !name.is_empty())?;
    let code = parts.next().filter(|code| !code.is_empty())?;

    Some((name, code))
}

fn extract_meeting(name: &str, code: &str, cells: &[String]) -> Result<Extracted, ParseError> {
    let malformed = |field, text: &str| ParseError::MalformedField {
        course: code.to_owned(),
        field,
        text: text.to_owned(),
    };

    // The instructor cell comes after the dates one
    if cells.len() <= DATES_CELL + 1 {
        return Err(malformed(Field::MeetingRow, &cells.join(" | ")));
    }

    let instructor_cell = &cells[cells.len() - 1];
    let instructor = parse_instructor(instructor_cell)
        .ok_or_else(|| malformed(Field::Instructor, instructor_cell))?;

    let location = cells[LOCATION_CELL].clone();

    let days = cells[DAYS_CELL].chars().map(DayCode).collect();

    let dates_cell = &cells[DATES_CELL];
    let date_range =
        parse_date_range(dates_cell).ok_or_else(|| malformed(Field::DateRange, dates_cell))?;

    let time_cell = &cells[TIME_CELL];
    let Some((start, end)) = time_cell
        .split_once(SEPARATOR)
        .and_then(|(start, end)| Some((start, parse_time(end)?)))
    else {
        return Ok(Extracted::Skipped {
            course: code.to_owned(),
            reason: SkipReason::NoMeetingTime {
                raw: time_cell.clone(),
            },
        });
    };
    let start = parse_time(start).ok_or_else(|| malformed(Field::StartTime, time_cell))?;

    Ok(Extracted::Course(Course {
        code: code.to_owned(),
        name: name.to_owned(),
        instructor,
        location,
        days,
        date_range,
        time_range: TimeRange { start, end },
    }))
}

/// Name written right before a role marker such as `(P)`
fn parse_instructor(cell: &str) -> Option<String> {
    regex!(r"([\p{L} \-]+)\([A-Za-z]\)")
        .captures(cell)
        .map(|captures| captures[1].trim().to_owned())
        .filter(|name| !name.is_empty())
}

fn parse_date_range(text: &str) -> Option<DateRange> {
    let (start, end) = text.split_once(SEPARATOR)?;
    let start = NaiveDate::parse_from_str(start.trim(), DATE_FORMAT).ok()?;
    let end = NaiveDate::parse_from_str(end.trim(), DATE_FORMAT).ok()?;

    (start <= end).then_some(DateRange { start, end })
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(&text.trim().to_uppercase(), TIME_FORMAT).ok()
}

/// Display the schedule as a table
pub fn display(courses: &[Course]) {
    let headers = [
        "Code",
        "Name",
        "Days",
        "Time",
        "Dates",
        "Location",
        "Instructor",
    ]
    .map(str::to_owned);

    let rows: Vec<[String; 7]> = courses
        .iter()
        .map(|course| {
            [
                course.code.clone(),
                course.name.clone(),
                course.days_str(),
                format!(
                    "{}-{}",
                    course.time_range.start.format("%H:%M"),
                    course.time_range.end.format("%H:%M")
                ),
                format!(
                    "{} → {}",
                    course.date_range.start.format("%d/%m"),
                    course.date_range.end.format("%d/%m/%Y")
                ),
                course.location.clone(),
                course.instructor.clone(),
            ]
        })
        .collect();

    // Fit the columns to their content, but keep the names readable
    let mut widths = headers.clone().map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count()).min(30);
        }
    }

    utils::line_table(&widths, &Position::Top);
    utils::row_table(&widths, &headers);
    utils::line_table(&widths, &Position::Middle);
    for row in &rows {
        utils::row_table(&widths, row);
    }
    utils::line_table(&widths, &Position::Bottom);
}
