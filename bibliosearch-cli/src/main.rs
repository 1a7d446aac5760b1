use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bibliosearch_core::preview::PREVIEW_TOC_LIMIT;
use bibliosearch_core::{
    AppPaths, BookId, BookPreview, Chapter, Endpoints, Favorite, FavoritesStore, FetchStatus,
    FileStateStore, FiltersUpdate, ReaderCommand, ReaderSession, SearchBackend, SearchController,
    SearchMode, SearchRequest, SearchScope, SearchType, Settings, SortKey, StateStore,
};
use bibliosearch_core::model::char_prefix;
use bibliosearch_http::HttpBackend;
use bibliosearch_tty::{
    combine_status, format_page_jump_note, format_reader_status, format_result_line,
    format_results_footer, highlight_segments, text_measure, theme_colors, truncate_with_ellipsis,
    wrap_text, EventMapper, InputMode, ReaderStatus, TextRenderer, UiEvent, HIGHLIGHT_CHARS,
};
use clap::{Parser, Subcommand};
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "bibliosearch",
    version,
    about = "Search, preview and read public-domain books from the terminal"
)]
struct Args {
    /// Base URL of the book search service
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Results per page (1-100)
    #[arg(long, global = true)]
    page_size: Option<usize>,

    /// Directory for reading positions, favorites and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search the catalogue
    Search(SearchArgs),
    /// List books without a query
    Browse {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(short, long)]
        interactive: bool,
    },
    /// Show details, a text preview and the contents of a book
    Preview { id: BookId },
    /// Read a book page by page
    Read {
        id: BookId,
        /// Page to open on (1-based); defaults to the saved position
        #[arg(long)]
        page: Option<usize>,
    },
    /// Manage favorite books
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Debug, clap::Args)]
struct SearchArgs {
    query: String,
    /// Treat the query as a regular expression
    #[arg(long)]
    regex: bool,
    /// Use the advanced search endpoint
    #[arg(long, conflicts_with = "highlight")]
    advanced: bool,
    /// Ask the service for highlighted fragments
    #[arg(long)]
    highlight: bool,
    /// Restrict matches to a field: all, title or author
    #[arg(long, default_value = "all")]
    scope: String,
    #[arg(long)]
    author: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: usize,
    /// popularity, relevance, occurrences or recent
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    min_relevance: Option<u8>,
    #[arg(long)]
    max_relevance: Option<u8>,
    #[arg(long)]
    min_occurrences: Option<u32>,
    #[arg(long)]
    case_sensitive: bool,
    /// Count whole words only
    #[arg(long)]
    exact: bool,
    #[arg(short, long)]
    interactive: bool,
}

#[derive(Debug, Subcommand)]
enum FavoritesAction {
    List,
    Add { id: BookId },
    Remove { id: BookId },
    Clear,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0), cursor::Show);
    }
}

struct App {
    settings: Settings,
    paths: AppPaths,
    endpoints: Endpoints,
    backend: Arc<dyn SearchBackend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let paths = AppPaths::discover(args.data_dir.clone())?;
    let _log_guard = init_logging(&paths.log_dir())?;

    let settings = Settings::load(&paths.config_file)?
        .with_env(|key| std::env::var(key).ok())
        .with_overrides(args.api_url.clone(), args.page_size, None);
    let endpoints = Endpoints::new(&settings.api_base_url)?;
    info!(api = %endpoints.base(), page_size = settings.page_size, "starting");

    let app = App {
        settings,
        paths,
        endpoints,
        backend: Arc::new(HttpBackend::new()),
    };

    match args.command {
        Commands::Search(search) => run_search(&app, search).await,
        Commands::Browse { page, interactive } => run_browse(&app, page, interactive).await,
        Commands::Preview { id } => run_preview(&app, id).await,
        Commands::Read { id, page } => run_reader(&app, id, page).await,
        Commands::Favorites { action } => run_favorites(&app, action).await,
    }
}

fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
    let file_appender = tracing_appender::rolling::never(log_dir, "bibliosearch.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // warnings only, so the reader screen stays clean
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(LevelFilter::WARN);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;
    Ok(guard)
}

fn new_controller(app: &App) -> SearchController {
    SearchController::new(
        Arc::clone(&app.backend),
        app.endpoints.clone(),
        app.settings.page_size,
    )
}

async fn run_search(app: &App, args: SearchArgs) -> Result<()> {
    let scope: SearchScope = args.scope.parse()?;
    let mut request = SearchRequest::new(args.query.clone()).with_scope(scope);
    if args.regex {
        request = request.with_type(SearchType::Regex);
    }
    if args.advanced {
        request = request.with_mode(SearchMode::Advanced);
    } else if args.highlight {
        request = request.with_mode(SearchMode::Highlight);
    }
    if let Some(author) = args.author.clone() {
        request = request.with_author(author);
    }

    let mut controller = new_controller(app);
    controller.update_filters(FiltersUpdate {
        case_sensitive: Some(args.case_sensitive),
        exact_match: Some(args.exact),
        relevance_min: args.min_relevance,
        relevance_max: args.max_relevance,
        occurrences_min: args.min_occurrences,
        sort_by: args
            .sort
            .as_deref()
            .map(|key| key.parse::<SortKey>().unwrap_or(SortKey::Unsorted)),
    });

    load_first(&mut controller, request.clone(), args.page).await;
    if args.interactive {
        results_loop(&mut controller, request).await
    } else {
        print_results(&mut controller).await
    }
}

async fn run_browse(app: &App, page: usize, interactive: bool) -> Result<()> {
    let request = SearchRequest::new("");
    let mut controller = new_controller(app);
    load_first(&mut controller, request.clone(), page).await;
    if interactive {
        results_loop(&mut controller, request).await
    } else {
        print_results(&mut controller).await
    }
}

async fn load_first(controller: &mut SearchController, request: SearchRequest, page: usize) {
    if controller.perform_search(request).await != FetchStatus::Loaded {
        return;
    }
    if page > 1 {
        controller.go_to_page(page).await;
    }
    if let Some(note) = format_page_jump_note(page, controller.state()) {
        eprintln!("{}", note);
    }
}

async fn print_results(controller: &mut SearchController) -> Result<()> {
    if let Some(message) = controller.error() {
        bail!("{}", message);
    }

    let mut stdout = io::stdout();
    if controller.results().is_empty() {
        writeln!(stdout, "no results")?;
        controller.load_suggestions().await;
        print_suggestions(&mut stdout, controller)?;
        return Ok(());
    }

    let offset = (controller.state().page - 1) * controller.page_size();
    for (index, book) in controller.results().iter().enumerate() {
        writeln!(stdout, "{}", format_result_line(offset + index + 1, book))?;
        match controller.highlight_for(book.id) {
            Some(fragment) => {
                let mut renderer = TextRenderer::new(&mut stdout);
                write!(renderer.writer(), "     ")?;
                let excerpt = format!("{}...", char_prefix(fragment, HIGHLIGHT_CHARS));
                renderer.draw_segments(&highlight_segments(&excerpt))?;
                writeln!(renderer.writer())?;
            }
            None => writeln!(stdout, "     {}", book.excerpt)?,
        }
    }
    writeln!(
        stdout,
        "{}",
        format_results_footer(controller.state(), controller.results().len())
    )?;
    Ok(())
}

fn print_suggestions(out: &mut impl Write, controller: &SearchController) -> Result<()> {
    let suggestions = controller.suggestions();
    if suggestions.is_empty() {
        return Ok(());
    }
    if !suggestions.popular.is_empty() {
        let queries: Vec<_> = suggestions
            .popular
            .iter()
            .map(|popular| popular.query.as_str())
            .collect();
        writeln!(out, "popular searches: {}", queries.join(", "))?;
    }
    for book in &suggestions.recommended {
        writeln!(
            out,
            "recommended: [{}] {} ({}/5)",
            book.id, book.title, book.rating
        )?;
    }
    Ok(())
}

async fn results_loop(controller: &mut SearchController, mut request: SearchRequest) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = TextRenderer::new(stdout);
    let mut mapper = EventMapper::with_mode(InputMode::Results);
    let mut dirty = true;

    loop {
        if dirty {
            draw_results(&mut renderer, controller, &request, mapper.pending_input().as_deref())?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        match ui_event {
            UiEvent::NextResults => {
                dirty = controller.load_next_page().await != FetchStatus::Skipped;
            }
            UiEvent::PreviousResults => {
                dirty = controller.load_previous_page().await != FetchStatus::Skipped;
            }
            UiEvent::GotoResultsPage { page } => {
                controller.go_to_page(page).await;
                dirty = true;
            }
            UiEvent::QuerySubmit { query } => {
                request.query = query;
                controller.perform_search(request.clone()).await;
                dirty = true;
            }
            UiEvent::BeginQuery | UiEvent::QueryChanged { .. } | UiEvent::QueryCancel => {
                dirty = true;
            }
            UiEvent::Quit => break,
            UiEvent::None => {
                dirty = mapper.pending_input().is_some();
            }
            _ => {}
        }
    }
    Ok(())
}

fn draw_results<W: Write>(
    renderer: &mut TextRenderer<W>,
    controller: &SearchController,
    request: &SearchRequest,
    pending_input: Option<&str>,
) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    let width = usize::from(columns);
    renderer.begin_sync_update()?;
    renderer.clear_all()?;

    let heading = if request.query.trim().is_empty() {
        "All books".to_string()
    } else {
        format!("Results for \"{}\"", request.query)
    };
    renderer.print_inverted(0, 0, &truncate_with_ellipsis(heading, width))?;

    let mut row: u16 = 2;
    let last_row = rows.saturating_sub(1);
    let offset = (controller.state().page - 1) * controller.page_size();
    if let Some(message) = controller.error() {
        renderer.draw_status(row, &format!("error: {}", message))?;
    } else if controller.results().is_empty() {
        renderer.draw_status(row, "no results")?;
    }
    for (index, book) in controller.results().iter().enumerate() {
        if row + 1 >= last_row {
            break;
        }
        let line = truncate_with_ellipsis(format_result_line(offset + index + 1, book), width);
        renderer.draw_status(row, line.trim_end())?;
        let detail = controller
            .highlight_for(book.id)
            .map(|fragment| fragment.replace("<mark>", "").replace("</mark>", ""))
            .unwrap_or_else(|| book.excerpt.clone());
        let detail = truncate_with_ellipsis(format!("     {}", detail.replace('\n', " ")), width);
        renderer.draw_status(row + 1, detail.trim_end())?;
        row += 2;
    }

    let footer = format!(
        "{} | n next, p previous, <count>g page, / search, q quit",
        format_results_footer(controller.state(), controller.results().len())
    );
    let status = combine_status(Some(footer), pending_input).unwrap_or_default();
    renderer.draw_status(last_row, &truncate_with_ellipsis(status, width))?;
    renderer.end_sync_update()?;
    Ok(())
}

async fn fetch_book(app: &App, id: BookId) -> Result<bibliosearch_core::ApiBook> {
    app.backend
        .fetch_book(&app.endpoints.book_detail(id))
        .await
        .map_err(|err| anyhow!("could not load book {}: {}", id, err.user_message()))
}

async fn run_preview(app: &App, id: BookId) -> Result<()> {
    let book = fetch_book(app, id).await?;
    let preview = BookPreview::from_book(&book, PREVIEW_TOC_LIMIT);
    let favorites = FavoritesStore::new(app.paths.favorites_file())?;

    let mut out = io::stdout();
    write!(out, "{}", preview.title)?;
    if favorites.contains(id)? {
        write!(out, "  [favorite]")?;
    }
    writeln!(out)?;
    if preview.author_years.is_empty() {
        writeln!(out, "by {}", preview.author)?;
    } else {
        writeln!(out, "by {} ({})", preview.author, preview.author_years)?;
    }
    writeln!(
        out,
        "{} | {} | {} downloads | rating {:.1}",
        preview.category,
        preview.language.as_deref().unwrap_or("unknown language"),
        preview.download_count,
        preview.rating
    )?;
    writeln!(
        out,
        "{} words, about {} pages",
        preview.word_count, preview.estimated_pages
    )?;
    if !preview.table_of_contents.is_empty() {
        writeln!(out, "\nContents")?;
        for chapter in &preview.table_of_contents {
            writeln!(out, "  {}. {}", chapter.number, chapter.title)?;
        }
    }
    if !preview.preview_text.is_empty() {
        writeln!(out, "\n{}", preview.preview_text.trim())?;
    }
    Ok(())
}

async fn run_favorites(app: &App, action: FavoritesAction) -> Result<()> {
    let store = FavoritesStore::new(app.paths.favorites_file())?;
    let mut out = io::stdout();
    match action {
        FavoritesAction::List => {
            let favorites = store.list()?;
            if favorites.is_empty() {
                writeln!(out, "no favorites")?;
            }
            for favorite in favorites {
                writeln!(
                    out,
                    "[{}] {} by {} (added {})",
                    favorite.id,
                    favorite.title,
                    favorite.author,
                    favorite.added_at.format("%Y-%m-%d")
                )?;
            }
        }
        FavoritesAction::Add { id } => {
            if store.contains(id)? {
                writeln!(out, "book {} is already a favorite", id)?;
            } else {
                let book = fetch_book(app, id).await?;
                store.add(Favorite::from_book(&book))?;
                writeln!(out, "added {}", book.title)?;
            }
        }
        FavoritesAction::Remove { id } => {
            if store.remove(id)? {
                writeln!(out, "removed book {}", id)?;
            } else {
                writeln!(out, "book {} was not a favorite", id)?;
            }
        }
        FavoritesAction::Clear => {
            store.clear()?;
            writeln!(out, "favorites cleared")?;
        }
    }
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

enum OverlayState {
    None,
    Toc(TocWindow),
}

impl OverlayState {
    fn deactivate(&mut self) {
        *self = OverlayState::None;
    }
}

struct TocWindow {
    entries: Vec<Chapter>,
    selected: usize,
    scroll_offset: usize,
}

impl TocWindow {
    fn new(entries: Vec<Chapter>, selected: usize) -> Self {
        let selected = selected.min(entries.len().saturating_sub(1));
        Self {
            entries,
            selected,
            scroll_offset: 0,
        }
    }

    fn move_selection(&mut self, delta: isize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let len = self.entries.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    fn ensure_visible(&mut self, viewport_height: usize) {
        if viewport_height == 0 || self.entries.is_empty() {
            self.scroll_offset = 0;
            return;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + viewport_height {
            self.scroll_offset = self.selected + 1 - viewport_height;
        }
    }
}

async fn run_reader(app: &App, id: BookId, page: Option<usize>) -> Result<()> {
    let book = fetch_book(app, id).await?;
    if book.text().trim().is_empty() {
        bail!("book {} has no text to read", id);
    }
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(app.paths.state_dir())?);
    let mut session = ReaderSession::open(
        id,
        book.title.clone(),
        book.text(),
        app.settings.chars_per_page,
        store,
    )?;
    if let Some(page) = page {
        session.apply(ReaderCommand::GotoPage { page })?;
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = TextRenderer::new(stdout);
    let mut mapper = EventMapper::new();
    let mut overlay = OverlayState::None;
    let mut dirty = true;

    loop {
        if dirty {
            draw_reader(&mut renderer, &session, &mut overlay, mapper.pending_input().as_deref())?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        match handle_reader_event(ui_event, &mut session, &mut overlay, &mut mapper) {
            Ok(LoopAction::ContinueRedraw) => dirty = true,
            Ok(LoopAction::Continue) => dirty = mapper.pending_input().is_some(),
            Ok(LoopAction::Quit) => break,
            Err(err) => {
                warn!(?err, "failed to save reading position");
                dirty = true;
            }
        }
    }

    session.persist()?;
    Ok(())
}

fn handle_reader_event(
    event: UiEvent,
    session: &mut ReaderSession,
    overlay: &mut OverlayState,
    mapper: &mut EventMapper,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(command) => {
            session.apply(command)?;
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::OpenTableOfContents => {
            let selected = session.current_chapter_index().unwrap_or(0);
            *overlay = OverlayState::Toc(TocWindow::new(session.chapters().to_vec(), selected));
            mapper.set_mode(InputMode::Toc);
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::CloseOverlay => {
            overlay.deactivate();
            mapper.set_mode(InputMode::Normal);
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::TocMoveSelection { delta } => {
            if let OverlayState::Toc(toc) = overlay {
                if toc.move_selection(delta) {
                    return Ok(LoopAction::ContinueRedraw);
                }
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::TocActivateSelection => {
            if let OverlayState::Toc(toc) = overlay {
                let index = toc.selected;
                overlay.deactivate();
                mapper.set_mode(InputMode::Normal);
                session.apply(ReaderCommand::GotoChapter { index })?;
                return Ok(LoopAction::ContinueRedraw);
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        _ => Ok(LoopAction::Continue),
    }
}

fn draw_reader<W: Write>(
    renderer: &mut TextRenderer<W>,
    session: &ReaderSession,
    overlay: &mut OverlayState,
    pending_input: Option<&str>,
) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    let text_rows = rows.saturating_sub(1);
    let position = session.position();

    renderer.begin_sync_update()?;
    renderer.clear_all()?;
    let measure = text_measure(position.font_size, columns);
    let lines = wrap_text(session.page_text(), measure);
    renderer.draw_page(&lines, theme_colors(position.theme), columns, text_rows)?;

    let status = ReaderStatus {
        title: session.title(),
        chapter: session.current_chapter().map(|chapter| chapter.title.as_str()),
        page: position.current_page,
        total_pages: session.total_pages(),
        progress: session.progress(),
        bookmarked: session.is_bookmarked(),
        font_size: position.font_size,
        theme: position.theme,
    };
    let line = combine_status(Some(format_reader_status(&status)), pending_input).unwrap_or_default();
    renderer.draw_status(text_rows, &truncate_with_ellipsis(line, usize::from(columns)))?;

    if let OverlayState::Toc(toc) = overlay {
        draw_toc_overlay(renderer, toc, session, columns, text_rows)?;
    }
    renderer.end_sync_update()?;
    Ok(())
}

fn draw_toc_overlay<W: Write>(
    renderer: &mut TextRenderer<W>,
    toc: &mut TocWindow,
    session: &ReaderSession,
    columns: u16,
    rows: u16,
) -> Result<()> {
    const TITLE: &str = "Table of Contents";

    if columns < 24 || rows < 8 {
        return Ok(());
    }
    let max_inner_width = usize::from(columns) - 6;
    let inner_width = toc
        .entries
        .iter()
        .map(|chapter| toc_line(chapter, false, session).chars().count())
        .max()
        .unwrap_or(0)
        .max(TITLE.len())
        .min(max_inner_width);
    let content_height = toc.entries.len().clamp(1, usize::from(rows) - 6);
    toc.ensure_visible(content_height);

    let window_height = (content_height + 4) as u16;
    let start_col = (columns - inner_width as u16 - 2) / 2;
    let mut row = (rows.saturating_sub(window_height)) / 2;
    let border = format!("+{}+", "-".repeat(inner_width));

    renderer.print_inverted(start_col, row, &border)?;
    row += 1;
    renderer.print_inverted(
        start_col,
        row,
        &format!("|{: ^inner_width$}|", TITLE, inner_width = inner_width),
    )?;
    row += 1;
    renderer.print_inverted(start_col, row, &format!("|{}|", "-".repeat(inner_width)))?;
    row += 1;
    let end = (toc.scroll_offset + content_height).min(toc.entries.len());
    for (index, chapter) in toc.entries[toc.scroll_offset..end].iter().enumerate() {
        let selected = toc.scroll_offset + index == toc.selected;
        let content = truncate_with_ellipsis(toc_line(chapter, selected, session), inner_width);
        renderer.print_inverted(start_col, row, &format!("|{}|", content))?;
        row += 1;
    }
    renderer.print_inverted(start_col, row, &border)?;
    Ok(())
}

fn toc_line(chapter: &Chapter, selected: bool, session: &ReaderSession) -> String {
    let marker = if selected { '>' } else { ' ' };
    let page = session.paginator().page_for_chapter(chapter);
    format!("{} {} (p{})", marker, chapter.title, page)
}
