use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{ApiBook, BookId};
use crate::store::write_atomically;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub cover: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl Favorite {
    pub fn from_book(book: &ApiBook) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
            author: book.author_name().to_string(),
            cover: book.cover_image.clone().filter(|cover| !cover.is_empty()),
            added_at: Utc::now(),
        }
    }
}

/// Favorites kept as a single JSON array, oldest first.
pub struct FavoritesStore {
    path: PathBuf,
}

impl FavoritesStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create favorites directory at {:?}", parent))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Vec<Favorite>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read favorites {:?}", self.path))?;
        match serde_json::from_str(&raw) {
            Ok(favorites) => Ok(favorites),
            Err(err) => {
                warn!(path = ?self.path, %err, "ignoring unreadable favorites");
                Ok(Vec::new())
            }
        }
    }

    pub fn contains(&self, id: BookId) -> Result<bool> {
        Ok(self.list()?.iter().any(|favorite| favorite.id == id))
    }

    /// Adds `favorite` unless its book is already listed. Returns whether it was added.
    pub fn add(&self, favorite: Favorite) -> Result<bool> {
        let mut favorites = self.list()?;
        if favorites.iter().any(|existing| existing.id == favorite.id) {
            return Ok(false);
        }
        debug!(id = favorite.id, "adding favorite");
        favorites.push(favorite);
        self.write(&favorites)?;
        Ok(true)
    }

    pub fn remove(&self, id: BookId) -> Result<bool> {
        let mut favorites = self.list()?;
        let before = favorites.len();
        favorites.retain(|favorite| favorite.id != id);
        if favorites.len() == before {
            return Ok(false);
        }
        self.write(&favorites)?;
        Ok(true)
    }

    /// Returns whether the book is a favorite afterwards.
    pub fn toggle(&self, favorite: Favorite) -> Result<bool> {
        if self.remove(favorite.id)? {
            Ok(false)
        } else {
            self.add(favorite)
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.write(&[])
    }

    fn write(&self, favorites: &[Favorite]) -> Result<()> {
        let payload = serde_json::to_string_pretty(favorites)?;
        write_atomically(&self.path, payload.as_bytes())
    }
}
