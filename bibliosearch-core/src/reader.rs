use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::chapters::{extract_chapters, Chapter};
use crate::model::BookId;
use crate::search::ParseOptionError;
use crate::store::StateStore;

pub const DEFAULT_CHARS_PER_PAGE: usize = 800;
pub const DEFAULT_FONT_SIZE: u8 = 18;
pub const MIN_FONT_SIZE: u8 = 14;
pub const MAX_FONT_SIZE: u8 = 24;
pub const FONT_STEP: i8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Sepia,
    Dark,
}

impl Theme {
    pub fn next(self) -> Self {
        match self {
            Theme::Light => Theme::Sepia,
            Theme::Sepia => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Light => "light",
            Theme::Sepia => "sepia",
            Theme::Dark => "dark",
        })
    }
}

impl FromStr for Theme {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "sepia" => Ok(Theme::Sepia),
            "dark" => Ok(Theme::Dark),
            other => Err(ParseOptionError::new("theme", other)),
        }
    }
}

/// Where a reader left a book, persisted per book id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderPosition {
    pub book_id: BookId,
    #[serde(default = "first_page")]
    pub current_page: usize,
    #[serde(default = "default_font_size")]
    pub font_size: u8,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub bookmark_page: Option<usize>,
}

fn first_page() -> usize {
    1
}

fn default_font_size() -> u8 {
    DEFAULT_FONT_SIZE
}

impl ReaderPosition {
    pub fn new(book_id: BookId) -> Self {
        Self {
            book_id,
            current_page: 1,
            font_size: DEFAULT_FONT_SIZE,
            theme: Theme::Light,
            bookmark_page: None,
        }
    }
}

/// Fixed character-window pagination over a book's text.
#[derive(Debug, Clone)]
pub struct ReaderPaginator {
    window: usize,
    char_len: usize,
    /// Byte offset where each page starts, plus the text length.
    bounds: Vec<usize>,
}

impl ReaderPaginator {
    pub fn new(text: &str, window: usize) -> Self {
        let window = window.max(1);
        let mut bounds = Vec::new();
        let mut char_len = 0;
        for (index, (byte, _)) in text.char_indices().enumerate() {
            if index % window == 0 {
                bounds.push(byte);
            }
            char_len += 1;
        }
        bounds.push(text.len());
        Self {
            window,
            char_len,
            bounds,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn total_pages(&self) -> usize {
        self.char_len.div_ceil(self.window)
    }

    /// Character range `[(page-1)W, pW)` covered by `page`, cut at the end of text.
    pub fn page_range(&self, page: usize) -> Option<(usize, usize)> {
        if page < 1 || page > self.total_pages() {
            return None;
        }
        let start = (page - 1) * self.window;
        Some((start, (start + self.window).min(self.char_len)))
    }

    pub fn page_text<'a>(&self, text: &'a str, page: usize) -> &'a str {
        if page < 1 || page > self.total_pages() {
            return "";
        }
        let start = self.bounds[page - 1];
        let end = self.bounds[page];
        text.get(start..end).unwrap_or("")
    }

    pub fn current_chapter<'c>(&self, chapters: &'c [Chapter], page: usize) -> Option<&'c Chapter> {
        let start = page.saturating_sub(1) * self.window;
        chapters
            .iter()
            .filter(|chapter| chapter.start_offset <= start)
            .max_by_key(|chapter| chapter.start_offset)
            .or_else(|| chapters.first())
    }

    pub fn page_for_chapter(&self, chapter: &Chapter) -> usize {
        chapter.start_offset / self.window + 1
    }

    /// Percentage of the book read at `page`.
    pub fn progress(&self, page: usize) -> f64 {
        let total = self.total_pages();
        if total == 0 {
            return 0.0;
        }
        (page.min(total) as f64 / total as f64) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderCommand {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    GotoChapter { index: usize },
    ToggleBookmark,
    GotoBookmark,
    AdjustFontSize { delta: i8 },
    SetTheme { theme: Theme },
    CycleTheme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Opened(BookId),
    RedrawNeeded(BookId),
}

/// A loaded book with its reading position. All changes go through
/// [`ReaderSession::apply`], which saves the position after each one.
pub struct ReaderSession {
    title: String,
    text: String,
    chapters: Vec<Chapter>,
    paginator: ReaderPaginator,
    position: ReaderPosition,
    store: Arc<dyn StateStore>,
    events: Arc<Mutex<Vec<ReaderEvent>>>,
}

impl ReaderSession {
    #[instrument(skip(title, text, store))]
    pub fn open(
        book_id: BookId,
        title: impl Into<String>,
        text: impl Into<String>,
        chars_per_page: usize,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let text = text.into();
        let chapters = extract_chapters(&text);
        let paginator = ReaderPaginator::new(&text, chars_per_page);
        let mut position = store
            .load(book_id)?
            .unwrap_or_else(|| ReaderPosition::new(book_id));
        position.book_id = book_id;
        let last = paginator.total_pages().max(1);
        position.current_page = position.current_page.clamp(1, last);
        position.font_size = position.font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        position.bookmark_page = position.bookmark_page.filter(|page| (1..=last).contains(page));
        debug!(
            pages = paginator.total_pages(),
            chapters = chapters.len(),
            page = position.current_page,
            "book opened"
        );

        let events = Arc::new(Mutex::new(vec![ReaderEvent::Opened(book_id)]));
        Ok(Self {
            title: title.into(),
            text,
            chapters,
            paginator,
            position,
            store,
            events,
        })
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ReaderEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn position(&self) -> &ReaderPosition {
        &self.position
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn paginator(&self) -> &ReaderPaginator {
        &self.paginator
    }

    pub fn total_pages(&self) -> usize {
        self.paginator.total_pages()
    }

    pub fn page_text(&self) -> &str {
        self.paginator.page_text(&self.text, self.position.current_page)
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.paginator
            .current_chapter(&self.chapters, self.position.current_page)
    }

    /// Index of the chapter containing the current page.
    pub fn current_chapter_index(&self) -> Option<usize> {
        let current = self.current_chapter()?;
        self.chapters
            .iter()
            .position(|chapter| chapter.number == current.number)
    }

    pub fn progress(&self) -> f64 {
        self.paginator.progress(self.position.current_page)
    }

    pub fn is_bookmarked(&self) -> bool {
        self.position.bookmark_page == Some(self.position.current_page)
    }

    pub fn apply(&mut self, command: ReaderCommand) -> Result<()> {
        let last = self.paginator.total_pages().max(1);
        let before = self.position.clone();
        match command {
            ReaderCommand::NextPage { count } => {
                self.position.current_page =
                    self.position.current_page.saturating_add(count.max(1)).min(last);
            }
            ReaderCommand::PrevPage { count } => {
                self.position.current_page =
                    self.position.current_page.saturating_sub(count.max(1)).max(1);
            }
            ReaderCommand::GotoPage { page } => {
                self.position.current_page = page.clamp(1, last);
            }
            ReaderCommand::GotoChapter { index } => {
                if let Some(chapter) = self.chapters.get(index) {
                    self.position.current_page =
                        self.paginator.page_for_chapter(chapter).clamp(1, last);
                }
            }
            ReaderCommand::ToggleBookmark => {
                let page = self.position.current_page;
                self.position.bookmark_page = match self.position.bookmark_page {
                    Some(marked) if marked == page => None,
                    _ => Some(page),
                };
            }
            ReaderCommand::GotoBookmark => {
                if let Some(page) = self.position.bookmark_page {
                    self.position.current_page = page.clamp(1, last);
                }
            }
            ReaderCommand::AdjustFontSize { delta } => {
                let next = i16::from(self.position.font_size) + i16::from(delta);
                if (i16::from(MIN_FONT_SIZE)..=i16::from(MAX_FONT_SIZE)).contains(&next) {
                    self.position.font_size = next as u8;
                }
            }
            ReaderCommand::SetTheme { theme } => {
                self.position.theme = theme;
            }
            ReaderCommand::CycleTheme => {
                self.position.theme = self.position.theme.next();
            }
        }

        if self.position != before {
            self.store.save(&self.position)?;
            self.events
                .lock()
                .push(ReaderEvent::RedrawNeeded(self.position.book_id));
        }
        Ok(())
    }

    pub fn persist(&self) -> Result<()> {
        self.store.save(&self.position)
    }
}
