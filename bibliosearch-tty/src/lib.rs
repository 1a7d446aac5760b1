use std::io::{self, Write};

use anyhow::Result;
use bibliosearch_core::model::char_prefix;
use bibliosearch_core::reader::{FONT_STEP, MAX_FONT_SIZE, MIN_FONT_SIZE};
use bibliosearch_core::{BookSummary, ReaderCommand, SearchState, Theme};
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};

/// Characters of a highlighted fragment shown under a result.
pub const HIGHLIGHT_CHARS: usize = 500;
const BASE_MEASURE: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeColors {
    pub foreground: Color,
    pub background: Color,
}

pub fn theme_colors(theme: Theme) -> ThemeColors {
    match theme {
        Theme::Light => ThemeColors {
            foreground: Color::Rgb { r: 33, g: 33, b: 33 },
            background: Color::Rgb { r: 255, g: 255, b: 255 },
        },
        Theme::Sepia => ThemeColors {
            foreground: Color::Rgb { r: 91, g: 70, b: 54 },
            background: Color::Rgb { r: 244, g: 236, b: 216 },
        },
        Theme::Dark => ThemeColors {
            foreground: Color::Rgb { r: 224, g: 224, b: 224 },
            background: Color::Rgb { r: 30, g: 30, b: 30 },
        },
    }
}

/// Text column width for a font size: larger type gives a narrower measure.
pub fn text_measure(font_size: u8, columns: u16) -> usize {
    let font_size = usize::from(font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE));
    let measure = BASE_MEASURE * 18 / font_size;
    measure.min(usize::from(columns).saturating_sub(4)).max(10)
}

/// Greedy word wrap that keeps the text's own line breaks.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for raw in text.lines() {
        let mut line = String::new();
        let mut line_len = 0;
        for word in raw.split_whitespace() {
            let mut word = word;
            let mut word_len = word.chars().count();
            if line_len > 0 && line_len + 1 + word_len > width {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
            }
            while word_len > width {
                let head = char_prefix(word, width);
                lines.push(head.to_string());
                word = &word[head.len()..];
                word_len -= width;
            }
            if line_len > 0 {
                line.push(' ');
                line_len += 1;
            }
            line.push_str(word);
            line_len += word_len;
        }
        lines.push(line);
    }
    lines
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub marked: bool,
}

/// Splits a service fragment on `<mark>` tags. Other markup is kept as text.
pub fn highlight_segments(fragment: &str) -> Vec<Segment> {
    const OPEN: &str = "<mark>";
    const CLOSE: &str = "</mark>";
    let mut segments = Vec::new();
    let mut rest = fragment;
    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment {
                text: rest[..start].to_string(),
                marked: false,
            });
        }
        let after = &rest[start + OPEN.len()..];
        let (marked, remainder) = match after.find(CLOSE) {
            Some(end) => (&after[..end], &after[end + CLOSE.len()..]),
            None => (after, ""),
        };
        if !marked.is_empty() {
            segments.push(Segment {
                text: marked.to_string(),
                marked: true,
            });
        }
        rest = remainder;
    }
    if !rest.is_empty() {
        segments.push(Segment {
            text: rest.to_string(),
            marked: false,
        });
    }
    segments
}

pub fn truncate_with_ellipsis(mut text: String, width: usize) -> String {
    if text.chars().count() > width {
        if width <= 3 {
            text = text.chars().take(width).collect();
        } else {
            let mut truncated = text.chars().take(width - 3).collect::<String>();
            truncated.push_str("...");
            text = truncated;
        }
    }
    let len = text.chars().count();
    if len < width {
        text.push_str(&" ".repeat(width - len));
    }
    text
}

/// What the reader status line shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderStatus<'a> {
    pub title: &'a str,
    pub chapter: Option<&'a str>,
    pub page: usize,
    pub total_pages: usize,
    pub progress: f64,
    pub bookmarked: bool,
    pub font_size: u8,
    pub theme: Theme,
}

pub fn format_reader_status(status: &ReaderStatus<'_>) -> String {
    let mut line = status.title.to_string();
    if let Some(chapter) = status.chapter {
        line.push_str(" | ");
        line.push_str(chapter);
    }
    line.push_str(&format!(
        " | page {}/{} ({:.0}%)",
        status.page, status.total_pages, status.progress
    ));
    if status.bookmarked {
        line.push_str(" | bookmarked");
    }
    line.push_str(&format!(" | {}pt {}", status.font_size, status.theme));
    line
}

pub fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

/// One result row: position, title, author and scores.
pub fn format_result_line(position: usize, book: &BookSummary) -> String {
    format!(
        "{:>3}. [{}] {} by {} (relevance {}, {} hits)",
        position, book.id, book.title, book.author, book.relevance, book.occurrences
    )
}

pub fn format_results_footer(state: &SearchState, shown: usize) -> String {
    if state.total_results == 0 {
        return "no results".to_string();
    }
    format!(
        "page {}/{} | {} shown of {} | sort {}",
        state.page, state.total_pages, shown, state.total_results, state.filters.sort_by
    )
}

/// Explains a `--page` request that could not be honored, if any.
pub fn format_page_jump_note(requested: usize, state: &SearchState) -> Option<String> {
    if requested <= 1 || requested == state.page {
        return None;
    }
    Some(match state.total_pages {
        0 => format!("page {} does not exist, there are no results", requested),
        total => format!(
            "page {} does not exist, showing page {} of {}",
            requested, state.page, total
        ),
    })
}

/// Draws text screens with crossterm.
pub struct TextRenderer<W: Write> {
    writer: W,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::queue!(&mut self.writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
        Ok(())
    }

    /// Paints the page lines centred horizontally in the theme colors.
    pub fn draw_page(&mut self, lines: &[String], colors: ThemeColors, columns: u16, rows: u16) -> Result<()> {
        let measure = lines
            .iter()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0)
            .min(usize::from(columns));
        let left = (usize::from(columns).saturating_sub(measure) / 2) as u16;
        crossterm::queue!(
            &mut self.writer,
            SetForegroundColor(colors.foreground),
            SetBackgroundColor(colors.background)
        )?;
        for row in 0..rows {
            crossterm::queue!(
                &mut self.writer,
                cursor::MoveTo(0, row),
                Print(" ".repeat(usize::from(columns)))
            )?;
        }
        for (row, line) in lines.iter().take(usize::from(rows)).enumerate() {
            crossterm::queue!(&mut self.writer, cursor::MoveTo(left, row as u16), Print(line))?;
        }
        crossterm::queue!(&mut self.writer, ResetColor)?;
        Ok(())
    }

    /// Writes `segments` at the cursor, reversing the marked ones.
    pub fn draw_segments(&mut self, segments: &[Segment]) -> Result<()> {
        for segment in segments {
            if segment.marked {
                crossterm::queue!(
                    &mut self.writer,
                    SetAttribute(Attribute::Reverse),
                    Print(&segment.text),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                crossterm::queue!(&mut self.writer, Print(&segment.text))?;
            }
        }
        Ok(())
    }

    pub fn draw_status(&mut self, row: u16, status: &str) -> Result<()> {
        crossterm::queue!(
            &mut self.writer,
            cursor::MoveTo(0, row),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(&mut self.writer, status)?;
        Ok(())
    }

    pub fn print_inverted(&mut self, col: u16, row: u16, content: &str) -> Result<()> {
        crossterm::queue!(
            &mut self.writer,
            cursor::MoveTo(col, row),
            SetAttribute(Attribute::Reverse),
            Print(content),
            SetAttribute(Attribute::Reset)
        )?;
        Ok(())
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(ReaderCommand),
    OpenTableOfContents,
    CloseOverlay,
    TocMoveSelection { delta: isize },
    TocActivateSelection,
    NextResults,
    PreviousResults,
    GotoResultsPage { page: usize },
    BeginQuery,
    QueryChanged { query: String },
    QuerySubmit { query: String },
    QueryCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Reading a book.
    #[default]
    Normal,
    Toc,
    Results,
    /// Typing a new query from the result list.
    Query,
}

/// Turns key presses into [`UiEvent`]s, keeping numeric prefixes between keys.
#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    query_buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: InputMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.query_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Toc => self.map_event_toc(event),
            InputMode::Results => self.map_event_results(event),
            InputMode::Query => self.map_event_query(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('l'), KeyModifiers::NONE)
                | (KeyCode::Char('j'), KeyModifiers::NONE)
                | (KeyCode::Right, KeyModifiers::NONE)
                | (KeyCode::Char(' '), KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(ReaderCommand::NextPage { count })
                }
                (KeyCode::Char('h'), KeyModifiers::NONE)
                | (KeyCode::Char('k'), KeyModifiers::NONE)
                | (KeyCode::Left, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(ReaderCommand::PrevPage { count })
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                    let page = self.take_count();
                    UiEvent::Command(ReaderCommand::GotoPage { page })
                }
                (KeyCode::Char('G'), modifiers)
                    if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
                {
                    let page = self.pending_count.take().unwrap_or(usize::MAX);
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::GotoPage { page })
                }
                (KeyCode::End, _) => {
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::GotoPage { page: usize::MAX })
                }
                (KeyCode::Char('b'), _) => {
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::ToggleBookmark)
                }
                (KeyCode::Char('\''), _) => {
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::GotoBookmark)
                }
                (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => {
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::AdjustFontSize { delta: FONT_STEP })
                }
                (KeyCode::Char('-'), _) => {
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::AdjustFontSize { delta: -FONT_STEP })
                }
                (KeyCode::Char('d'), _) => {
                    self.reset_count();
                    UiEvent::Command(ReaderCommand::CycleTheme)
                }
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                    self.reset_count();
                    UiEvent::OpenTableOfContents
                }
                (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_toc(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => UiEvent::CloseOverlay,
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => UiEvent::CloseOverlay,
                (KeyCode::Enter, _) => UiEvent::TocActivateSelection,
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    UiEvent::TocMoveSelection { delta: 1 }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    UiEvent::TocMoveSelection { delta: -1 }
                }
                (KeyCode::Char('q'), _) => UiEvent::Quit,
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_results(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('n'), KeyModifiers::NONE) | (KeyCode::Right, _) => {
                    self.reset_count();
                    UiEvent::NextResults
                }
                (KeyCode::Char('p'), KeyModifiers::NONE) | (KeyCode::Left, _) => {
                    self.reset_count();
                    UiEvent::PreviousResults
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) => {
                    let page = self.take_count();
                    UiEvent::GotoResultsPage { page }
                }
                (KeyCode::Char('/'), KeyModifiers::NONE) => {
                    self.set_mode(InputMode::Query);
                    UiEvent::BeginQuery
                }
                (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_query(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => {
                    self.set_mode(InputMode::Results);
                    UiEvent::QueryCancel
                }
                (KeyCode::Enter, _) => {
                    let query = self.query_buffer.clone();
                    self.set_mode(InputMode::Results);
                    UiEvent::QuerySubmit { query }
                }
                (KeyCode::Backspace, _) => {
                    self.query_buffer.pop();
                    UiEvent::QueryChanged {
                        query: self.query_buffer.clone(),
                    }
                }
                (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                    self.query_buffer.push(c);
                    UiEvent::QueryChanged {
                        query: self.query_buffer.clone(),
                    }
                }
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if matches!(self.mode, InputMode::Query) {
            return Some(format!("/{}", self.query_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}
