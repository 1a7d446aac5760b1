use serde::{Deserialize, Serialize};

pub type BookId = u64;

pub const UNKNOWN_AUTHOR: &str = "Unknown author";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiAuthor {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub birth_year: Option<i32>,
    #[serde(default)]
    pub death_year: Option<i32>,
}

/// A book record as the search service serializes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiBook {
    pub id: BookId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<ApiAuthor>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subjects: Option<String>,
    #[serde(default)]
    pub bookshelves: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub copyright: Option<bool>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub occurrences_count: Option<u32>,
    #[serde(default)]
    pub pagerank_score: Option<f64>,
    #[serde(default)]
    pub highlighted_text: Option<String>,
}

impl ApiBook {
    pub fn first_author(&self) -> Option<&ApiAuthor> {
        self.authors.first()
    }

    pub fn author_name(&self) -> &str {
        self.first_author()
            .map(|a| a.name.as_str())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(UNKNOWN_AUTHOR)
    }

    pub fn text(&self) -> &str {
        self.text_content.as_deref().unwrap_or("")
    }
}

/// Paginated envelope `{count, next, previous, results}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiPage {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<ApiBook>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageBody {
    Bare(Vec<ApiBook>),
    Paged {
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        previous: Option<String>,
        #[serde(default)]
        results: Vec<ApiBook>,
    },
}

impl<'de> Deserialize<'de> for ApiPage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let page = match PageBody::deserialize(deserializer)? {
            PageBody::Bare(results) => ApiPage {
                count: results.len(),
                next: None,
                previous: None,
                results,
            },
            PageBody::Paged {
                count,
                next,
                previous,
                results,
            } => ApiPage {
                count: count.unwrap_or(results.len()),
                next: next.filter(|n| !n.is_empty()),
                previous: previous.filter(|p| !p.is_empty()),
                results,
            },
        };
        Ok(page)
    }
}

/// Normalized view of a book shown in a result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSummary {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub relevance: u8,
    pub occurrences: u32,
    /// Occurrence count supplied by the service, if any.
    pub reported_occurrences: Option<u32>,
    pub excerpt: String,
    pub icon: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedBook {
    pub id: BookId,
    pub title: String,
    pub rating: u8,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularSearch {
    pub id: usize,
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Suggestions {
    pub similar: Vec<SuggestedBook>,
    pub popular: Vec<PopularSearch>,
    pub recommended: Vec<SuggestedBook>,
}

impl Suggestions {
    pub fn is_empty(&self) -> bool {
        self.similar.is_empty() && self.popular.is_empty() && self.recommended.is_empty()
    }
}

/// First `max` characters of `text`.
pub fn char_prefix(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
