use serde::Serialize;

use crate::chapters::{table_of_contents, Chapter};
use crate::model::{char_prefix, ApiBook, BookId};

pub const PREVIEW_CHARS: usize = 2000;
pub const PREVIEW_TOC_LIMIT: usize = 8;
const WORDS_PER_PAGE: usize = 250;
const DEFAULT_CATEGORY: &str = "Literature";

/// Everything the preview screen shows about one book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookPreview {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub author_years: String,
    pub category: String,
    pub language: Option<String>,
    pub download_count: u64,
    pub word_count: usize,
    pub estimated_pages: usize,
    pub rating: f32,
    pub preview_text: String,
    pub table_of_contents: Vec<Chapter>,
}

impl BookPreview {
    pub fn from_book(book: &ApiBook, toc_limit: usize) -> Self {
        let text = book.text();
        let word_count = text.split_whitespace().count();
        Self {
            id: book.id,
            title: book.title.clone(),
            author: book.author_name().to_string(),
            author_years: author_years(book),
            category: category(book),
            language: book.language.clone().filter(|l| !l.is_empty()),
            download_count: book.download_count,
            word_count,
            estimated_pages: word_count.div_ceil(WORDS_PER_PAGE),
            rating: rating(book.download_count),
            preview_text: char_prefix(text, PREVIEW_CHARS).to_string(),
            table_of_contents: if text.is_empty() {
                Vec::new()
            } else {
                table_of_contents(text, toc_limit)
            },
        }
    }
}

fn author_years(book: &ApiBook) -> String {
    match book.first_author() {
        Some(author) => match (author.birth_year, author.death_year) {
            (Some(birth), Some(death)) => format!("{} - {}", birth, death),
            (Some(birth), None) => birth.to_string(),
            _ => String::new(),
        },
        None => String::new(),
    }
}

fn category(book: &ApiBook) -> String {
    book.bookshelves
        .as_deref()
        .and_then(|shelves| shelves.split(',').next())
        .map(str::trim)
        .filter(|shelf| !shelf.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string()
}

fn rating(downloads: u64) -> f32 {
    match downloads {
        0 => 3.5,
        n if n > 50_000 => 4.5,
        n if n > 10_000 => 4.0,
        n if n > 1_000 => 3.5,
        _ => 3.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApiAuthor;

    fn frankenstein() -> ApiBook {
        let mut text = String::from("Letter 1\n");
        text.push_str(&"word ".repeat(600));
        text.push_str("\nLetter 2\nmore words here");
        ApiBook {
            id: 84,
            title: "Frankenstein".into(),
            authors: vec![ApiAuthor {
                id: 1,
                name: "Mary Wollstonecraft Shelley".into(),
                birth_year: Some(1797),
                death_year: Some(1851),
            }],
            bookshelves: Some("Gothic Fiction, Science Fiction".into()),
            language: Some("en".into()),
            download_count: 52_000,
            text_content: Some(text),
            ..ApiBook::default()
        }
    }

    #[test]
    fn derives_preview_fields() {
        let preview = BookPreview::from_book(&frankenstein(), PREVIEW_TOC_LIMIT);
        assert_eq!(preview.author_years, "1797 - 1851");
        assert_eq!(preview.category, "Gothic Fiction");
        assert_eq!(preview.word_count, 607);
        assert_eq!(preview.estimated_pages, 3);
        assert_eq!(preview.rating, 4.5);
        assert_eq!(preview.preview_text.chars().count(), PREVIEW_CHARS);
        let titles: Vec<_> = preview
            .table_of_contents
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Letter 1", "Letter 2"]);
    }

    #[test]
    fn sparse_book_uses_fallbacks() {
        let book = ApiBook {
            id: 1,
            title: "Untitled".into(),
            authors: vec![ApiAuthor {
                id: 2,
                name: "Anon".into(),
                birth_year: Some(1800),
                death_year: None,
            }],
            ..ApiBook::default()
        };
        let preview = BookPreview::from_book(&book, PREVIEW_TOC_LIMIT);
        assert_eq!(preview.author_years, "1800");
        assert_eq!(preview.category, DEFAULT_CATEGORY);
        assert_eq!(preview.rating, 3.5);
        assert_eq!(preview.word_count, 0);
        assert_eq!(preview.estimated_pages, 0);
        assert!(preview.table_of_contents.is_empty());
        assert_eq!(rating(900), 3.0);
        assert_eq!(rating(20_000), 4.0);
    }
}
