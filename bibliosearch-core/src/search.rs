use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::endpoints::{page_of, Endpoints, SearchEndpoint};
use crate::error::ClientError;
use crate::model::{
    char_prefix, ApiBook, ApiPage, BookId, BookSummary, PopularSearch, SuggestedBook, Suggestions,
};
use crate::SearchBackend;

pub const MAX_PAGE_SIZE: usize = 100;

const EXCERPT_CHARS: usize = 200;
const NO_PREVIEW: &str = "No preview available...";
const DEFAULT_RELEVANCE: u8 = 70;
const SUGGESTION_TITLE_CHARS: usize = 40;
const POPULAR_QUERY_CHARS: usize = 30;

const ICONS: [&str; 8] = ["📘", "📙", "📗", "📕", "📓", "📔", "📖", "📚"];
const COLORS: [&str; 8] = [
    "#1976d2", "#f57c00", "#388e3c", "#d32f2f", "#7b1fa2", "#0288d1", "#c2185b", "#5d4037",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} {value:?}")]
pub struct ParseOptionError {
    kind: &'static str,
    value: String,
}

impl ParseOptionError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// How the query text is interpreted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchType {
    #[default]
    Simple,
    Regex,
}

/// Which presentation the results are requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Simple,
    Advanced,
    Highlight,
}

/// Restricts client-side filtering to one field of the fetched results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    #[default]
    All,
    Title,
    Author,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Popularity,
    Relevance,
    Occurrences,
    Recent,
    Unsorted,
}

impl FromStr for SearchType {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(SearchType::Simple),
            "regex" => Ok(SearchType::Regex),
            other => Err(ParseOptionError::new("search type", other)),
        }
    }
}

impl FromStr for SearchMode {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(SearchMode::Simple),
            "advanced" => Ok(SearchMode::Advanced),
            "highlight" => Ok(SearchMode::Highlight),
            other => Err(ParseOptionError::new("search mode", other)),
        }
    }
}

impl FromStr for SearchScope {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(SearchScope::All),
            "title" => Ok(SearchScope::Title),
            "author" => Ok(SearchScope::Author),
            other => Err(ParseOptionError::new("search scope", other)),
        }
    }
}

impl FromStr for SortKey {
    type Err = Infallible;

    /// Unknown keys parse to [`SortKey::Unsorted`], which keeps fetch order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "popularity" => SortKey::Popularity,
            "relevance" => SortKey::Relevance,
            "occurrences" => SortKey::Occurrences,
            "recent" => SortKey::Recent,
            _ => SortKey::Unsorted,
        })
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::Popularity => "popularity",
            SortKey::Relevance => "relevance",
            SortKey::Occurrences => "occurrences",
            SortKey::Recent => "recent",
            SortKey::Unsorted => "unsorted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub case_sensitive: bool,
    pub exact_match: bool,
    pub relevance_min: u8,
    pub relevance_max: u8,
    pub occurrences_min: u32,
    pub sort_by: SortKey,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            exact_match: false,
            relevance_min: 0,
            relevance_max: 100,
            occurrences_min: 0,
            sort_by: SortKey::Popularity,
        }
    }
}

/// Partial update merged into [`Filters`].
#[derive(Debug, Clone, Default)]
pub struct FiltersUpdate {
    pub case_sensitive: Option<bool>,
    pub exact_match: Option<bool>,
    pub relevance_min: Option<u8>,
    pub relevance_max: Option<u8>,
    pub occurrences_min: Option<u32>,
    pub sort_by: Option<SortKey>,
}

impl Filters {
    pub fn merge(&mut self, update: FiltersUpdate) {
        if let Some(value) = update.case_sensitive {
            self.case_sensitive = value;
        }
        if let Some(value) = update.exact_match {
            self.exact_match = value;
        }
        if let Some(value) = update.relevance_min {
            self.relevance_min = value.min(100);
        }
        if let Some(value) = update.relevance_max {
            self.relevance_max = value.min(100);
        }
        if let Some(value) = update.occurrences_min {
            self.occurrences_min = value;
        }
        if let Some(value) = update.sort_by {
            self.sort_by = value;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub search_type: SearchType,
    pub mode: SearchMode,
    pub scope: SearchScope,
    pub author: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub query: String,
    pub search_type: SearchType,
    pub mode: SearchMode,
    pub scope: SearchScope,
    pub author: Option<String>,
    pub filters: Filters,
    pub page: usize,
    pub total_pages: usize,
    pub total_results: usize,
    pub next_cursor: Option<String>,
    pub previous_cursor: Option<String>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            query: String::new(),
            search_type: SearchType::default(),
            mode: SearchMode::default(),
            scope: SearchScope::default(),
            author: None,
            filters: Filters::default(),
            page: 1,
            total_pages: 0,
            total_results: 0,
            next_cursor: None,
            previous_cursor: None,
        }
    }
}

impl SearchState {
    pub fn has_query(&self) -> bool {
        !self.query.trim().is_empty()
    }
}

/// Result of a navigation or search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Loaded,
    Skipped,
    Failed,
}

pub fn select_endpoint(search_type: SearchType, mode: SearchMode) -> SearchEndpoint {
    if search_type == SearchType::Regex || mode == SearchMode::Advanced {
        SearchEndpoint::Advanced
    } else if mode == SearchMode::Highlight {
        SearchEndpoint::Highlight
    } else {
        SearchEndpoint::Simple
    }
}

pub fn total_pages(count: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    count.div_ceil(page_size)
}

/// Owns the search state and funnels every mutation through a named
/// transition. One request is in flight per call; nothing is retried.
pub struct SearchController {
    backend: Arc<dyn SearchBackend>,
    endpoints: Endpoints,
    page_size: usize,
    state: SearchState,
    fetched: Vec<BookSummary>,
    results: Vec<BookSummary>,
    highlights: HashMap<BookId, String>,
    suggestions: Suggestions,
    error: Option<String>,
}

impl SearchController {
    pub fn new(backend: Arc<dyn SearchBackend>, endpoints: Endpoints, page_size: usize) -> Self {
        Self {
            backend,
            endpoints,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            state: SearchState::default(),
            fetched: Vec::new(),
            results: Vec::new(),
            highlights: HashMap::new(),
            suggestions: Suggestions::default(),
            error: None,
        }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn results(&self) -> &[BookSummary] {
        &self.results
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn suggestions(&self) -> &Suggestions {
        &self.suggestions
    }

    pub fn highlight_for(&self, id: BookId) -> Option<&str> {
        self.highlights.get(&id).map(String::as_str)
    }

    pub fn has_next(&self) -> bool {
        self.state.next_cursor.is_some()
    }

    pub fn has_previous(&self) -> bool {
        self.state.previous_cursor.is_some()
    }

    /// Starts a new search, or loads the plain listing for a blank query.
    #[instrument(skip(self, request), fields(query = %request.query))]
    pub async fn perform_search(&mut self, request: SearchRequest) -> FetchStatus {
        self.state.query = request.query;
        self.state.search_type = request.search_type;
        self.state.mode = request.mode;
        self.state.scope = request.scope;
        self.state.author = request.author.filter(|a| !a.trim().is_empty());
        self.state.page = 1;
        // a failed search must not leave the previous query's cursors behind
        self.state.next_cursor = None;
        self.state.previous_cursor = None;
        self.state.total_pages = 0;
        self.state.total_results = 0;

        let url = self.url_for_page(1);
        self.fetch(url).await
    }

    pub async fn load_next_page(&mut self) -> FetchStatus {
        match self.state.next_cursor.clone() {
            Some(cursor) => {
                let fallback = self.state.page + 1;
                self.follow_cursor(&cursor, fallback).await
            }
            None => {
                debug!(page = self.state.page, "no next cursor, staying put");
                FetchStatus::Skipped
            }
        }
    }

    pub async fn load_previous_page(&mut self) -> FetchStatus {
        match self.state.previous_cursor.clone() {
            Some(cursor) => {
                let fallback = self.state.page.saturating_sub(1).max(1);
                self.follow_cursor(&cursor, fallback).await
            }
            None => {
                debug!(page = self.state.page, "no previous cursor, staying put");
                FetchStatus::Skipped
            }
        }
    }

    /// Jumps to `page` by rebuilding the request URL from scratch.
    pub async fn go_to_page(&mut self, page: usize) -> FetchStatus {
        if page < 1 || page > self.state.total_pages || page == self.state.page {
            debug!(
                requested = page,
                current = self.state.page,
                total = self.state.total_pages,
                "ignoring page jump"
            );
            return FetchStatus::Skipped;
        }
        self.state.page = page;
        let url = self.url_for_page(page);
        self.fetch(url).await
    }

    /// Merges a filter update and re-derives the visible results locally.
    pub fn update_filters(&mut self, update: FiltersUpdate) {
        self.state.filters.merge(update);
        self.rebuild_results();
    }

    pub async fn load_suggestions(&mut self) {
        let recommended_url = self.endpoints.books(1, 3);
        match self.backend.fetch_page(&recommended_url).await {
            Ok(page) => {
                let recommended = suggested_books(&page.results);
                self.suggestions.similar = recommended.clone();
                self.suggestions.recommended = recommended;
            }
            Err(err) => warn!(%err, "failed to load recommended books"),
        }

        let popular_url = self.endpoints.books(1, 5);
        match self.backend.fetch_page(&popular_url).await {
            Ok(page) => {
                self.suggestions.popular = page
                    .results
                    .iter()
                    .take(3)
                    .enumerate()
                    .map(|(idx, book)| PopularSearch {
                        id: idx + 1,
                        query: popular_query(&book.title),
                    })
                    .collect();
            }
            Err(err) => warn!(%err, "failed to load popular searches"),
        }
    }

    fn url_for_page(&self, page: usize) -> Url {
        let query = self.state.query.trim();
        if query.is_empty() {
            return self.endpoints.books(page, self.page_size);
        }
        let endpoint = select_endpoint(self.state.search_type, self.state.mode);
        self.endpoints.search(
            endpoint,
            query,
            self.state.author.as_deref(),
            page,
            self.page_size,
        )
    }

    async fn follow_cursor(&mut self, cursor: &str, fallback_page: usize) -> FetchStatus {
        let url = match Url::parse(cursor) {
            Ok(url) => url,
            Err(err) => {
                self.fail(ClientError::Decode(format!(
                    "invalid cursor {:?}: {}",
                    cursor, err
                )));
                return FetchStatus::Failed;
            }
        };
        // the cursor's own page number wins over local arithmetic
        self.state.page = page_of(&url).unwrap_or(fallback_page).max(1);
        self.fetch(url).await
    }

    async fn fetch(&mut self, url: Url) -> FetchStatus {
        self.error = None;
        debug!(%url, "requesting result page");
        match self.backend.fetch_page(&url).await {
            Ok(page) => {
                self.absorb(page);
                info!(
                    shown = self.results.len(),
                    total = self.state.total_results,
                    page = self.state.page,
                    "results loaded"
                );
                FetchStatus::Loaded
            }
            Err(err) => {
                warn!(%err, %url, "result page request failed");
                self.fail(err);
                FetchStatus::Failed
            }
        }
    }

    fn fail(&mut self, err: ClientError) {
        self.error = Some(err.user_message());
        self.fetched.clear();
        self.results.clear();
        self.highlights.clear();
    }

    fn absorb(&mut self, page: ApiPage) {
        self.state.total_results = page.count;
        self.state.total_pages = total_pages(page.count, self.page_size);
        if self.state.total_pages > 0 {
            self.state.page = self.state.page.clamp(1, self.state.total_pages);
        }
        self.state.next_cursor = page.next;
        self.state.previous_cursor = page.previous;

        self.highlights = if self.state.mode == SearchMode::Highlight && self.state.has_query() {
            page.results
                .iter()
                .filter_map(|book| {
                    book.highlighted_text
                        .as_ref()
                        .map(|fragment| (book.id, fragment.clone()))
                })
                .collect()
        } else {
            HashMap::new()
        };

        self.fetched = normalize_books(&page.results);
        self.rebuild_results();
    }

    fn rebuild_results(&mut self) {
        let query = self.state.query.trim();
        let filters = &self.state.filters;
        // the advanced endpoint reports 0 as a placeholder, not a real count
        let zero_is_unreported =
            select_endpoint(self.state.search_type, self.state.mode) == SearchEndpoint::Advanced;
        let mut books: Vec<BookSummary> = self
            .fetched
            .iter()
            .cloned()
            .map(|mut book| {
                book.occurrences = match book.reported_occurrences {
                    Some(count) if count > 0 || !zero_is_unreported => count,
                    _ => count_occurrences(
                        &format!("{} {} {}", book.title, book.author, book.excerpt),
                        query,
                        filters.case_sensitive,
                        filters.exact_match,
                    ),
                };
                book
            })
            .collect();

        if self.state.search_type != SearchType::Regex {
            books = filter_by_scope(books, self.state.scope, query, filters.case_sensitive);
        }
        books = apply_filters(books, filters, !query.is_empty());
        sort_results(&mut books, filters.sort_by);
        self.results = books;
    }
}

pub fn normalize_books(books: &[ApiBook]) -> Vec<BookSummary> {
    books
        .iter()
        .enumerate()
        .map(|(index, book)| BookSummary {
            id: book.id,
            title: book.title.clone(),
            author: book.author_name().to_string(),
            relevance: relevance_of(book),
            occurrences: book.occurrences_count.unwrap_or(0),
            reported_occurrences: book.occurrences_count,
            excerpt: excerpt_of(book),
            icon: book
                .cover_image
                .clone()
                .filter(|cover| !cover.is_empty())
                .unwrap_or_else(|| ICONS[index % ICONS.len()].to_string()),
            color: COLORS[index % COLORS.len()].to_string(),
        })
        .collect()
}

fn relevance_of(book: &ApiBook) -> u8 {
    if book.download_count > 0 {
        return (book.download_count / 1000).min(100) as u8;
    }
    match book.pagerank_score {
        Some(score) if score.is_finite() && score > 0.0 => (score * 100.0).round().clamp(0.0, 100.0) as u8,
        _ => DEFAULT_RELEVANCE,
    }
}

fn excerpt_of(book: &ApiBook) -> String {
    let source = book
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
        .or_else(|| book.text_content.as_deref().filter(|t| !t.is_empty()));
    match source {
        Some(text) => format!("{}...", char_prefix(text, EXCERPT_CHARS)),
        None => NO_PREVIEW.to_string(),
    }
}

/// Counts non-overlapping occurrences of `term` in `text`.
pub fn count_occurrences(text: &str, term: &str, case_sensitive: bool, exact_match: bool) -> u32 {
    if term.is_empty() {
        return 0;
    }
    let (haystack, needle) = if case_sensitive {
        (text.to_string(), term.to_string())
    } else {
        (text.to_lowercase(), term.to_lowercase())
    };

    if exact_match {
        let pattern = format!(r"\b{}\b", regex::escape(&needle));
        if let Ok(re) = Regex::new(&pattern) {
            return re.find_iter(&haystack).count() as u32;
        }
    }
    haystack.matches(needle.as_str()).count() as u32
}

pub fn filter_by_scope(
    books: Vec<BookSummary>,
    scope: SearchScope,
    query: &str,
    case_sensitive: bool,
) -> Vec<BookSummary> {
    if query.is_empty() || scope == SearchScope::All {
        return books;
    }
    let needle = if case_sensitive {
        query.to_string()
    } else {
        query.to_lowercase()
    };
    books
        .into_iter()
        .filter(|book| {
            let field = match scope {
                SearchScope::Title => &book.title,
                SearchScope::Author => &book.author,
                SearchScope::All => return true,
            };
            if case_sensitive {
                field.contains(needle.as_str())
            } else {
                field.to_lowercase().contains(needle.as_str())
            }
        })
        .collect()
}

pub fn apply_filters(
    books: Vec<BookSummary>,
    filters: &Filters,
    count_occurrences: bool,
) -> Vec<BookSummary> {
    books
        .into_iter()
        .filter(|book| book.relevance >= filters.relevance_min && book.relevance <= filters.relevance_max)
        .filter(|book| !count_occurrences || book.occurrences >= filters.occurrences_min)
        .collect()
}

/// Stable in-place sort; [`SortKey::Unsorted`] leaves the order untouched.
pub fn sort_results(books: &mut [BookSummary], key: SortKey) {
    match key {
        SortKey::Popularity | SortKey::Relevance => {
            books.sort_by(|a, b| b.relevance.cmp(&a.relevance))
        }
        SortKey::Occurrences => books.sort_by(|a, b| b.occurrences.cmp(&a.occurrences)),
        SortKey::Recent => books.sort_by(|a, b| b.id.cmp(&a.id)),
        SortKey::Unsorted => {}
    }
}

fn suggested_books(books: &[ApiBook]) -> Vec<SuggestedBook> {
    books
        .iter()
        .enumerate()
        .map(|(index, book)| {
            let rating = match book.download_count {
                n if n > 50_000 => 5,
                n if n > 10_000 => 4,
                n if n > 1_000 => 3,
                _ => 2,
            };
            let title = if book.title.chars().count() > SUGGESTION_TITLE_CHARS {
                format!("{}...", char_prefix(&book.title, SUGGESTION_TITLE_CHARS))
            } else {
                book.title.clone()
            };
            SuggestedBook {
                id: book.id,
                title,
                rating,
                image: book
                    .cover_image
                    .clone()
                    .filter(|cover| !cover.is_empty())
                    .unwrap_or_else(|| ICONS[index % 3].to_string()),
            }
        })
        .collect()
}

fn popular_query(title: &str) -> String {
    match title.split(':').next().filter(|head| !head.is_empty()) {
        Some(head) => head.to_string(),
        None => char_prefix(title, POPULAR_QUERY_CHARS).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApiAuthor;
    use parking_lot::Mutex;

    const BASE: &str = "http://books.test/api";

    #[derive(Default)]
    struct FakeBackend {
        pages: Mutex<HashMap<String, Result<ApiPage, ClientError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn respond(&self, url: &Url, response: Result<ApiPage, ClientError>) {
            self.pages.lock().insert(url.to_string(), response);
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl SearchBackend for FakeBackend {
        async fn fetch_page(&self, url: &Url) -> Result<ApiPage, ClientError> {
            self.requests.lock().push(url.to_string());
            self.pages
                .lock()
                .get(url.as_str())
                .cloned()
                .unwrap_or_else(|| Err(ClientError::status(404, None)))
        }

        async fn fetch_book(&self, _url: &Url) -> Result<ApiBook, ClientError> {
            Err(ClientError::status(404, None))
        }
    }

    fn book(id: BookId, title: &str, author: &str, downloads: u64) -> ApiBook {
        ApiBook {
            id,
            title: title.to_string(),
            authors: vec![ApiAuthor {
                id,
                name: author.to_string(),
                birth_year: None,
                death_year: None,
            }],
            download_count: downloads,
            description: Some(format!("{} by {}", title, author)),
            ..ApiBook::default()
        }
    }

    fn page(count: usize, next: Option<&Url>, previous: Option<&Url>, results: Vec<ApiBook>) -> ApiPage {
        ApiPage {
            count,
            next: next.map(|u| u.to_string()),
            previous: previous.map(|u| u.to_string()),
            results,
        }
    }

    fn controller(backend: &Arc<FakeBackend>) -> (SearchController, Endpoints) {
        let endpoints = Endpoints::new(BASE).unwrap();
        let shared: Arc<dyn SearchBackend> = backend.clone();
        (SearchController::new(shared, endpoints.clone(), 10), endpoints)
    }

    #[tokio::test]
    async fn simple_search_loads_and_sorts_by_relevance() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.search(SearchEndpoint::Simple, "whale", None, 1, 10);
        let next = endpoints.search(SearchEndpoint::Simple, "whale", None, 2, 10);
        backend.respond(
            &url,
            Ok(page(
                23,
                Some(&next),
                None,
                vec![
                    book(1, "Small whale", "A", 2_000),
                    book(2, "Moby Dick: or, the whale", "Herman Melville", 90_000),
                ],
            )),
        );

        let status = ctl.perform_search(SearchRequest::new("whale")).await;

        assert_eq!(status, FetchStatus::Loaded);
        assert_eq!(backend.requests(), vec![url.to_string()]);
        let state = ctl.state();
        assert_eq!(state.page, 1);
        assert_eq!(state.total_results, 23);
        assert_eq!(state.total_pages, 3);
        assert!(ctl.has_next());
        assert!(!ctl.has_previous());
        let ids: Vec<_> = ctl.results().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(ctl.results()[0].relevance, 90);
        assert!(ctl.results()[0].occurrences >= 1);
    }

    #[tokio::test]
    async fn regex_type_takes_priority_over_highlight_mode() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let advanced = endpoints.search(SearchEndpoint::Advanced, "wh.le", None, 1, 10);
        backend.respond(&advanced, Ok(page(0, None, None, vec![])));

        ctl.perform_search(
            SearchRequest::new("wh.le")
                .with_type(SearchType::Regex)
                .with_mode(SearchMode::Highlight),
        )
        .await;

        assert_eq!(backend.requests(), vec![advanced.to_string()]);
    }

    #[tokio::test]
    async fn highlight_mode_builds_fragment_lookup() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.search(SearchEndpoint::Highlight, "sea", None, 1, 10);
        let mut marked = book(5, "The Sea", "Someone", 3_000);
        marked.highlighted_text = Some("the <mark>sea</mark> rose".into());
        backend.respond(&url, Ok(page(2, None, None, vec![marked, book(6, "Land", "X", 1)])));

        ctl.perform_search(SearchRequest::new("sea").with_mode(SearchMode::Highlight))
            .await;

        assert_eq!(ctl.highlight_for(5), Some("the <mark>sea</mark> rose"));
        assert_eq!(ctl.highlight_for(6), None);
    }

    #[tokio::test]
    async fn go_to_page_ignores_out_of_range_and_current_page() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let first = endpoints.search(SearchEndpoint::Simple, "a", None, 1, 10);
        backend.respond(&first, Ok(page(25, None, None, vec![book(1, "a", "b", 5)])));
        ctl.perform_search(SearchRequest::new("a")).await;
        assert_eq!(ctl.state().total_pages, 3);

        assert_eq!(ctl.go_to_page(0).await, FetchStatus::Skipped);
        assert_eq!(ctl.go_to_page(4).await, FetchStatus::Skipped);
        assert_eq!(ctl.go_to_page(1).await, FetchStatus::Skipped);
        assert_eq!(backend.requests().len(), 1);

        let third = endpoints.search(SearchEndpoint::Simple, "a", None, 3, 10);
        backend.respond(&third, Ok(page(25, None, None, vec![book(9, "a", "b", 5)])));
        assert_eq!(ctl.go_to_page(3).await, FetchStatus::Loaded);
        assert_eq!(ctl.state().page, 3);
        assert_eq!(backend.requests().last(), Some(&third.to_string()));

        assert_eq!(ctl.go_to_page(3).await, FetchStatus::Skipped);
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn cursor_navigation_is_a_noop_without_links() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.books(1, 10);
        backend.respond(&url, Ok(page(3, None, None, vec![book(1, "a", "b", 5)])));
        ctl.perform_search(SearchRequest::new("  ")).await;

        assert_eq!(ctl.load_next_page().await, FetchStatus::Skipped);
        assert_eq!(ctl.load_previous_page().await, FetchStatus::Skipped);
        assert_eq!(backend.requests(), vec![url.to_string()]);
        assert!(ctl.error().is_none());
        assert_eq!(ctl.state().page, 1);
    }

    #[tokio::test]
    async fn cursor_navigation_reconciles_page_from_link() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let first = endpoints.search(SearchEndpoint::Simple, "sea", None, 1, 10);
        let second = endpoints.search(SearchEndpoint::Simple, "sea", None, 2, 10);
        // the service drops `page` from links back to the first page
        let back = Url::parse(&format!("{}/books/search/?q=sea&page_size=10", BASE)).unwrap();
        backend.respond(&first, Ok(page(15, Some(&second), None, vec![book(1, "sea", "x", 1)])));
        backend.respond(&second, Ok(page(15, None, Some(&back), vec![book(2, "sea", "y", 1)])));
        backend.respond(&back, Ok(page(15, Some(&second), None, vec![book(1, "sea", "x", 1)])));

        ctl.perform_search(SearchRequest::new("sea")).await;
        assert_eq!(ctl.load_next_page().await, FetchStatus::Loaded);
        assert_eq!(ctl.state().page, 2);
        assert_eq!(ctl.results()[0].id, 2);
        assert_eq!(ctl.load_next_page().await, FetchStatus::Skipped);

        assert_eq!(ctl.load_previous_page().await, FetchStatus::Loaded);
        assert_eq!(ctl.state().page, 1);
        assert_eq!(ctl.results()[0].id, 1);
    }

    #[tokio::test]
    async fn empty_result_has_zero_pages_and_rejects_jumps() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.search(SearchEndpoint::Simple, "zzz", None, 1, 10);
        backend.respond(&url, Ok(page(0, None, None, vec![])));

        assert_eq!(ctl.perform_search(SearchRequest::new("zzz")).await, FetchStatus::Loaded);
        assert!(ctl.results().is_empty());
        assert_eq!(ctl.state().total_pages, 0);
        assert_eq!(ctl.state().page, 1);
        assert!(ctl.error().is_none());
        assert_eq!(ctl.go_to_page(1).await, FetchStatus::Skipped);
    }

    #[tokio::test]
    async fn failed_request_clears_results_and_reports_status() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let ok = endpoints.search(SearchEndpoint::Simple, "a", None, 1, 10);
        let second = endpoints.search(SearchEndpoint::Simple, "a", None, 2, 10);
        backend.respond(&ok, Ok(page(25, Some(&second), None, vec![book(1, "a", "b", 5)])));
        ctl.perform_search(SearchRequest::new("a")).await;
        assert_eq!(ctl.results().len(), 1);
        assert!(ctl.has_next());

        let broken = endpoints.search(SearchEndpoint::Simple, "b", None, 1, 10);
        backend.respond(&broken, Err(ClientError::status(500, None)));
        assert_eq!(ctl.perform_search(SearchRequest::new("b")).await, FetchStatus::Failed);
        assert!(ctl.results().is_empty());
        assert_eq!(ctl.error(), Some("error 500"));
        assert_eq!(ctl.state().total_pages, 0);
        assert!(!ctl.has_next());
        assert!(!ctl.has_previous());
        assert_eq!(ctl.load_next_page().await, FetchStatus::Skipped);

        backend.respond(&ok, Ok(page(1, None, None, vec![book(1, "a", "b", 5)])));
        ctl.perform_search(SearchRequest::new("a")).await;
        assert!(ctl.error().is_none());
    }

    #[tokio::test]
    async fn author_filter_reaches_simple_endpoint_and_scope_filters_locally() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.search(SearchEndpoint::Simple, "shelley", Some("shelley"), 1, 10);
        backend.respond(
            &url,
            Ok(page(
                2,
                None,
                None,
                vec![
                    book(1, "Frankenstein", "Mary Shelley", 60_000),
                    book(2, "Shelley's Letters", "Editor", 2_000),
                ],
            )),
        );

        ctl.perform_search(
            SearchRequest::new("shelley")
                .with_scope(SearchScope::Author)
                .with_author("shelley"),
        )
        .await;

        assert_eq!(backend.requests(), vec![url.to_string()]);
        let ids: Vec<_> = ctl.results().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn advanced_zero_counts_are_recounted_locally() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.search(SearchEndpoint::Advanced, "sea", None, 1, 10);
        let mut placeholder = book(1, "Sea one", "A", 90_000);
        placeholder.occurrences_count = Some(0);
        backend.respond(&url, Ok(page(1, None, None, vec![placeholder])));

        ctl.update_filters(FiltersUpdate {
            occurrences_min: Some(1),
            ..FiltersUpdate::default()
        });
        ctl.perform_search(SearchRequest::new("sea").with_mode(SearchMode::Advanced))
            .await;

        assert_eq!(backend.requests(), vec![url.to_string()]);
        assert_eq!(ctl.results().len(), 1);
        assert_eq!(ctl.results()[0].occurrences, 2);
    }

    #[tokio::test]
    async fn filter_updates_rederive_without_network() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        let url = endpoints.search(SearchEndpoint::Simple, "sea", None, 1, 10);
        let mut counted = book(3, "Sea", "C", 40_000);
        counted.occurrences_count = Some(12);
        backend.respond(
            &url,
            Ok(page(
                3,
                None,
                None,
                vec![book(1, "Sea one", "A", 90_000), book(2, "Sea two", "B", 5_000), counted],
            )),
        );
        ctl.perform_search(SearchRequest::new("sea")).await;
        assert_eq!(ctl.results().len(), 3);

        ctl.update_filters(FiltersUpdate {
            relevance_min: Some(10),
            ..FiltersUpdate::default()
        });
        let ids: Vec<_> = ctl.results().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 3]);

        ctl.update_filters(FiltersUpdate {
            sort_by: Some(SortKey::Occurrences),
            occurrences_min: Some(5),
            ..FiltersUpdate::default()
        });
        let ids: Vec<_> = ctl.results().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn suggestions_use_listing_and_tolerate_failures() {
        let backend = Arc::new(FakeBackend::default());
        let (mut ctl, endpoints) = controller(&backend);
        backend.respond(
            &endpoints.books(1, 3),
            Ok(page(
                3,
                None,
                None,
                vec![
                    book(1, "Pride and Prejudice", "Jane Austen", 60_000),
                    book(2, "A Very Long Title That Goes On And On Past The Limit", "X", 500),
                ],
            )),
        );

        ctl.load_suggestions().await;

        let suggestions = ctl.suggestions();
        assert_eq!(suggestions.recommended.len(), 2);
        assert_eq!(suggestions.recommended[0].rating, 5);
        assert_eq!(suggestions.recommended[1].rating, 2);
        assert!(suggestions.recommended[1].title.ends_with("..."));
        assert_eq!(suggestions.recommended[1].title.chars().count(), 43);
        assert_eq!(suggestions.similar, suggestions.recommended);
        assert!(suggestions.popular.is_empty());
    }

    #[test]
    fn sorting_is_stable_and_unknown_keys_keep_order() {
        let mut books = normalize_books(&[
            book(1, "a", "x", 5_000),
            book(2, "b", "x", 9_000),
            book(3, "c", "x", 5_000),
            book(4, "d", "x", 5_000),
        ]);
        sort_results(&mut books, SortKey::Relevance);
        let once: Vec<_> = books.iter().map(|b| b.id).collect();
        assert_eq!(once, vec![2, 1, 3, 4]);
        sort_results(&mut books, SortKey::Relevance);
        let twice: Vec<_> = books.iter().map(|b| b.id).collect();
        assert_eq!(once, twice);

        sort_results(&mut books, SortKey::Recent);
        let recent: Vec<_> = books.iter().map(|b| b.id).collect();
        assert_eq!(recent, vec![4, 3, 2, 1]);

        let key: SortKey = "shelf-order".parse().unwrap();
        assert_eq!(key, SortKey::Unsorted);
        sort_results(&mut books, key);
        let same: Vec<_> = books.iter().map(|b| b.id).collect();
        assert_eq!(same, recent);
    }

    #[test]
    fn normalization_derives_relevance_and_excerpt() {
        let mut ranked = book(1, "Ranked", "R", 0);
        ranked.pagerank_score = Some(0.42);
        ranked.description = None;
        ranked.text_content = Some("x".repeat(300));
        let mut bare = book(2, "Bare", "B", 0);
        bare.description = None;
        bare.authors.clear();

        let books = normalize_books(&[ranked, bare, book(3, "Huge", "H", 10_000_000)]);
        assert_eq!(books[0].relevance, 42);
        assert_eq!(books[0].excerpt.chars().count(), 203);
        assert_eq!(books[1].relevance, DEFAULT_RELEVANCE);
        assert_eq!(books[1].excerpt, NO_PREVIEW);
        assert_eq!(books[1].author, crate::model::UNKNOWN_AUTHOR);
        assert_eq!(books[2].relevance, 100);
        assert_eq!(books[0].icon, ICONS[0]);
        assert_eq!(books[1].color, COLORS[1]);
    }

    #[test]
    fn occurrence_counting_honours_case_and_exactness() {
        let text = "The Whale and the whales of Whalebone";
        assert_eq!(count_occurrences(text, "whale", false, false), 3);
        assert_eq!(count_occurrences(text, "whale", true, false), 1);
        assert_eq!(count_occurrences(text, "whale", false, true), 1);
        assert_eq!(count_occurrences(text, "", false, false), 0);
    }

    #[test]
    fn endpoint_priority() {
        assert_eq!(select_endpoint(SearchType::Regex, SearchMode::Highlight), SearchEndpoint::Advanced);
        assert_eq!(select_endpoint(SearchType::Simple, SearchMode::Advanced), SearchEndpoint::Advanced);
        assert_eq!(select_endpoint(SearchType::Simple, SearchMode::Highlight), SearchEndpoint::Highlight);
        assert_eq!(select_endpoint(SearchType::Simple, SearchMode::Simple), SearchEndpoint::Simple);
    }

    #[test]
    fn page_math_handles_zero() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(5, 0), 0);
        assert_eq!(popular_query("Moby Dick; Or, The Whale"), "Moby Dick; Or, The Whale");
        assert_eq!(popular_query("Frankenstein: Or the Modern Prometheus"), "Frankenstein");
    }
}
