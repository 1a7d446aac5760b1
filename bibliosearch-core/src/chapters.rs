use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Longest contents listing, in characters, searched for a terminator.
const CONTENTS_WINDOW_CHARS: usize = 3000;
const FULL_TEXT_TITLE: &str = "Full text";

static CONTENTS_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)CONTENTS\r?\n").expect("contents heading regex"));

static CONTENTS_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\r?\n\r?\n\r?\n|Letter 1|Chapter 1|CHAPTER I").expect("contents end regex")
});

static CONTENTS_ENTRY: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^Letter\s+\d+",
        r"(?i)^Chapter\s+\d+",
        r"(?i)^Chapter\s+[IVXLCDM]+",
        r"(?i)^CHAPTER\s+\d+",
        r"(?i)^CHAPTER\s+[IVXLCDM]+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("contents entry regex"))
    .collect()
});

static BODY_HEADINGS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?im)^Letter\s+\d+",
        r"(?im)^CHAPTER\s+[IVXLCDM]+",
        r"(?im)^Chapter\s+\d+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("heading regex"))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub number: usize,
    pub title: String,
    /// Offset of the heading in characters, not bytes.
    pub start_offset: usize,
    pub content: String,
}

/// Splits book text into chapters.
///
/// A `CONTENTS` listing wins when its entries can be found again in the body.
/// Otherwise the first heading style with any match anywhere in the text
/// supplies every chapter. A text without recognizable headings becomes one
/// chapter.
pub fn extract_chapters(text: &str) -> Vec<Chapter> {
    let mut starts = from_contents(text);
    if starts.is_empty() {
        starts = from_headings(text);
    }
    if starts.is_empty() {
        return vec![Chapter {
            number: 1,
            title: FULL_TEXT_TITLE.to_string(),
            start_offset: 0,
            content: text.to_string(),
        }];
    }
    build_chapters(text, starts)
}

/// First `limit` chapters of `text`.
pub fn table_of_contents(text: &str, limit: usize) -> Vec<Chapter> {
    let mut chapters = extract_chapters(text);
    chapters.truncate(limit);
    chapters
}

/// Title and byte offset of each chapter start.
type Starts = Vec<(String, usize)>;

fn from_contents(text: &str) -> Starts {
    let Some((window, body_start)) = contents_window(text) else {
        return Vec::new();
    };

    let mut starts = Vec::new();
    for line in window.split('\n') {
        let entry = line.trim();
        let len = entry.chars().count();
        if !(3..100).contains(&len) {
            continue;
        }
        if !CONTENTS_ENTRY.iter().any(|re| re.is_match(entry)) {
            continue;
        }
        // entries point at the body heading, never back into the listing
        if let Some(pos) = text[body_start..].find(entry) {
            starts.push((entry.to_string(), body_start + pos));
        }
    }
    starts.sort_by_key(|(_, offset)| *offset);
    starts.dedup_by_key(|(_, offset)| *offset);
    starts
}

/// The listing after a `CONTENTS` heading and the byte offset where the
/// listing ends.
fn contents_window(text: &str) -> Option<(&str, usize)> {
    for heading in CONTENTS_HEADING.find_iter(text) {
        let start = heading.end();
        let Some(first) = text[start..].chars().next() else {
            continue;
        };
        // the listing holds at least one character before its terminator
        let Some(end) = CONTENTS_END.find_at(text, start + first.len_utf8()) else {
            continue;
        };
        let window = &text[start..end.start()];
        if window.chars().count() <= CONTENTS_WINDOW_CHARS {
            return Some((window, end.start()));
        }
    }
    None
}

fn from_headings(text: &str) -> Starts {
    for re in BODY_HEADINGS.iter() {
        let starts: Starts = re
            .find_iter(text)
            .map(|m| (m.as_str().trim().to_string(), m.start()))
            .collect();
        if !starts.is_empty() {
            return starts;
        }
    }
    Vec::new()
}

fn build_chapters(text: &str, starts: Starts) -> Vec<Chapter> {
    let ends: Vec<usize> = starts
        .iter()
        .skip(1)
        .map(|(_, offset)| *offset)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chars_seen = 0;
    let mut last_byte = 0;
    starts
        .into_iter()
        .zip(ends)
        .enumerate()
        .map(|(index, ((title, start), end))| {
            chars_seen += text[last_byte..start].chars().count();
            last_byte = start;
            Chapter {
                number: index + 1,
                title,
                start_offset: chars_seen,
                content: text[start..end].to_string(),
            }
        })
        .collect()
}
