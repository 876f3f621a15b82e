use std::io;

use chrono::{NaiveDate, NaiveDateTime, Utc, Weekday};
use ::ics::{
    escape_text,
    properties::{Description, DtEnd, DtStart, Location, RRule, Summary},
    Event, ICalendar,
};
use tracing::warn;

use crate::schedule::models::Course;

/// Floating local time, the portal gives hours of the campus
const DATETIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Export the schedule to an iCalendar file, adding the `.ics` extension if needed
pub fn export(courses: &[Course], filename: &mut String) -> io::Result<()> {
    if !filename.ends_with(".ics") {
        filename.push_str(".ics");
    }

    calendar(courses).save_file(filename.as_str())
}

/// One weekly event per course
fn calendar(courses: &[Course]) -> ICalendar<'static> {
    let mut calendar = ICalendar::new(
        "2.0",
        concat!("-//calport//", env!("CARGO_PKG_VERSION"), "//EN"),
    );
    let dtstamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

    for course in courses {
        let Some(first_day) = first_occurrence(course) else {
            warn!(
                "{} not exported, no known day in {:?} between {} and {}",
                course.code,
                course.days_str(),
                course.date_range.start,
                course.date_range.end
            );
            continue;
        };

        let mut event = Event::new(uuid::Uuid::new_v4().to_string(), dtstamp.clone());

        event.push(Summary::new(escape_text(format!(
            "{} {}",
            course.code, course.name
        ))));
        event.push(Location::new(escape_text(course.location.clone())));
        event.push(Description::new(escape_text(format!(
            "{}\nInstructor: {}",
            course.code, course.instructor
        ))));

        let start = NaiveDateTime::new(first_day, course.time_range.start);
        let end = NaiveDateTime::new(first_day, course.time_range.end);
        event.push(DtStart::new(start.format(DATETIME_FORMAT).to_string()));
        event.push(DtEnd::new(end.format(DATETIME_FORMAT).to_string()));
        event.push(RRule::new(recurrence(course)));

        calendar.add_event(event);
    }

    calendar
}

/// Weekdays of the course, without the unknown codes and repetitions
fn weekdays(course: &Course) -> Vec<Weekday> {
    let mut weekdays = vec![];
    for weekday in course.days.iter().filter_map(|day| day.weekday()) {
        if !weekdays.contains(&weekday) {
            weekdays.push(weekday);
        }
    }

    weekdays
}

/// First day of the term the course meets
fn first_occurrence(course: &Course) -> Option<NaiveDate> {
    let weekdays = weekdays(course);

    course
        .date_range
        .start
        .iter_days()
        .take_while(|day| *day <= course.date_range.end)
        .find(|day| weekdays.contains(&chrono::Datelike::weekday(day)))
}

fn recurrence(course: &Course) -> String {
    let byday = weekdays(course)
        .into_iter()
        .map(|weekday| match weekday {
            Weekday::Mon => "MO",
            Weekday::Tue => "TU",
            Weekday::Wed => "WE",
            Weekday::Thu => "TH",
            Weekday::Fri => "FR",
            Weekday::Sat => "SA",
            Weekday::Sun => "SU",
        })
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "FREQ=WEEKLY;UNTIL={}T235959;BYDAY={byday}",
        course.date_range.end.format("%Y%m%d")
    )
}
