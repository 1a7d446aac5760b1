use anyhow::{Context, Result};
use url::Url;

use crate::model::BookId;

/// Which search view of the service answers a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEndpoint {
    Simple,
    Advanced,
    Highlight,
}

/// URL builder for the book service routes.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized)
            .with_context(|| format!("invalid API base URL {:?}", base_url))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn route(&self, path: &str) -> Url {
        // base always ends with '/', and every route is relative
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }

    pub fn books(&self, page: usize, page_size: usize) -> Url {
        let mut url = self.route("books/");
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("page_size", &page_size.to_string());
        url
    }

    pub fn book_detail(&self, id: BookId) -> Url {
        self.route(&format!("books/{}/", id))
    }

    pub fn search(
        &self,
        endpoint: SearchEndpoint,
        query: &str,
        author: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Url {
        let path = match endpoint {
            SearchEndpoint::Simple => "books/search/",
            SearchEndpoint::Advanced => "books/advanced-search/",
            SearchEndpoint::Highlight => "books/highlight-search/",
        };
        let mut url = self.route(path);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query)
                .append_pair("page", &page.to_string())
                .append_pair("page_size", &page_size.to_string());
            if endpoint == SearchEndpoint::Simple {
                if let Some(author) = author.map(str::trim).filter(|a| !a.is_empty()) {
                    pairs.append_pair("author", author);
                }
            }
        }
        url
    }
}

/// Page number carried by a cursor URL, if it has one.
pub fn page_of(url: &Url) -> Option<usize> {
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_listing_url_with_trailing_slash_handling() {
        let endpoints = Endpoints::new("http://localhost:8000/api").unwrap();
        assert_eq!(
            endpoints.books(2, 10).as_str(),
            "http://localhost:8000/api/books/?page=2&page_size=10"
        );
        assert_eq!(
            endpoints.book_detail(84).as_str(),
            "http://localhost:8000/api/books/84/"
        );
    }

    #[test]
    fn search_urls_encode_query_and_only_simple_takes_author() {
        let endpoints = Endpoints::new("http://localhost:8000/api/").unwrap();
        let simple = endpoints.search(
            SearchEndpoint::Simple,
            "white whale",
            Some("Melville"),
            1,
            10,
        );
        assert_eq!(
            simple.as_str(),
            "http://localhost:8000/api/books/search/?q=white+whale&page=1&page_size=10&author=Melville"
        );

        let advanced = endpoints.search(SearchEndpoint::Advanced, "[Ww]hale", Some("x"), 3, 10);
        assert!(advanced.path().ends_with("/books/advanced-search/"));
        assert!(advanced.query().unwrap().contains("q=%5BWw%5Dhale"));
        assert!(!advanced.query().unwrap().contains("author"));

        let highlight = endpoints.search(SearchEndpoint::Highlight, "sea", None, 1, 5);
        assert!(highlight.path().ends_with("/books/highlight-search/"));
    }

    #[test]
    fn reads_page_from_cursor() {
        let url = Url::parse("http://h/api/books/search/?q=a&page=4&page_size=10").unwrap();
        assert_eq!(page_of(&url), Some(4));
        let first = Url::parse("http://h/api/books/search/?q=a&page_size=10").unwrap();
        assert_eq!(page_of(&first), None);
    }

    #[test]
    fn rejects_garbage_base() {
        assert!(Endpoints::new("not a url").is_err());
    }
}
