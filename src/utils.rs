use scraper::ElementRef;

use crate::utils::models::{Position, TabChar};

pub mod models;

/// Compile a CSS selector once and reuse it
macro_rules! selector {
    ($e: expr) => {{
        use ::once_cell::sync::Lazy;
        use ::scraper::Selector;
        static SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse($e).unwrap());
        &*SELECTOR
    }};
}

/// Compile a regex once and reuse it
macro_rules! regex {
    ($e: expr) => {{
        use ::once_cell::sync::Lazy;
        use ::regex::Regex;
        static PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new($e).unwrap());
        &*PATTERN
    }};
}

/// Text content of an element, with every run of whitespace (`&nbsp;` included)
/// collapsed into a single space
pub fn cell_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut a string to fit in `width` characters, ending it with `…` when too long
pub fn etc_str(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_owned();
    }

    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Print an horizontal line of the table
pub fn line_table(widths: &[usize], position: &Position) {
    let (left, joint, right) = position.joints();

    let bar = TabChar::Bh.val().to_string();
    let cells = widths
        .iter()
        .map(|width| bar.repeat(width + 2))
        .collect::<Vec<_>>()
        .join(&joint.val().to_string());

    println!("{}{}{}", left.val(), cells, right.val());
}

/// Print a row of the table, each cell cut to its column width
pub fn row_table(widths: &[usize], cells: &[String]) {
    let sep = TabChar::Bv.val();

    print!("{sep}");
    for (width, cell) in widths.iter().zip(cells) {
        print!(" {:<width$} {sep}", etc_str(cell, *width));
    }
    println!();
}
