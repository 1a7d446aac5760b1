pub mod chapters;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod favorites;
pub mod model;
pub mod preview;
pub mod reader;
pub mod search;
pub mod store;

use url::Url;

pub use chapters::{extract_chapters, table_of_contents, Chapter};
pub use config::{AppPaths, Settings};
pub use endpoints::{Endpoints, SearchEndpoint};
pub use error::ClientError;
pub use favorites::{Favorite, FavoritesStore};
pub use model::{ApiBook, ApiPage, BookId, BookSummary, Suggestions};
pub use preview::BookPreview;
pub use reader::{ReaderCommand, ReaderEvent, ReaderPaginator, ReaderPosition, ReaderSession, Theme};
pub use search::{
    FetchStatus, Filters, FiltersUpdate, SearchController, SearchMode, SearchRequest, SearchScope,
    SearchState, SearchType, SortKey,
};
pub use store::{FileStateStore, MemoryStateStore, StateStore};

/// Transport to the book search service.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    async fn fetch_page(&self, url: &Url) -> Result<ApiPage, ClientError>;
    async fn fetch_book(&self, url: &Url) -> Result<ApiBook, ClientError>;
}
