//! Result consumption and the persisted gallery

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

/// Key the gallery is stored under
pub const GALLERY_STORAGE_KEY: &str = "replicate:gallery";

/// Label recorded on every item
pub const DEFAULT_MODEL_LABEL: &str = "stable-diffusion";

/// One generated image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem
{   /// `{job_id}-{index}`
    pub id: String
  , pub url: String
  , pub prompt: String
  , pub created_at: DateTime<Utc>
  , pub model: String
  , pub dimensions: String
  , /// Resolved parameters the image was generated with. Absent on
    /// items written before parameters were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<crate::request::PredictionInput>
}

/// Output artifact URLs in order. A bare string counts as one entry;
/// non-strings and empty strings are dropped.
pub fn normalize_output(output: Option<&serde_json::Value>)
  -> Vec<String>
{   match output
    {   Some(serde_json::Value::String(url)) if !url.is_empty() => {
          vec![url.clone()]
        }
      , Some(serde_json::Value::Array(entries)) => {
          entries.iter()
            .filter_map(|entry| entry.as_str())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
        }
      , _ => vec![]
    }
}

/// One page of the gallery, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryPage
{   pub page: usize
  , pub total_pages: usize
  , pub total_items: usize
  , pub items: Vec<ResultItem>
}

/// Ordered collection of results; append-only until reset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery
{   items: Vec<ResultItem>
}

impl Gallery
{   pub fn new() -> Self
    {   Gallery::default()
    }

    pub fn from_items(items: Vec<ResultItem>) -> Self
    {   Gallery { items }
    }

    pub fn items(&self) -> &[ResultItem]
    {   &self.items
    }

    pub fn len(&self) -> usize
    {   self.items.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.items.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&ResultItem>
    {   self.items.iter().find(|item| item.id == id)
    }

    /// Turn a succeeded prediction into items and append them.
    /// Returns the new items; existing ones are left alone.
    pub fn append_prediction(
      &mut self
    , prediction: &crate::request::Prediction
    , parameters: &crate::request::PredictionInput
    , model: &str
    ) -> Result<Vec<ResultItem>, crate::error::Error>
    {   if prediction.status != crate::request::JobStatus::Succeeded
        {   return Err(crate::error::Error::InvalidInput(format!(
              "prediction {} is {}, not succeeded",
              prediction.id, prediction.status
            )));
        }

        let created_at = Utc::now();
        let new_items: Vec<ResultItem>
          = normalize_output(prediction.output.as_ref())
            .into_iter()
            .enumerate()
            .map(|(index, url)| ResultItem
            {   id: format!("{}-{}", prediction.id, index)
              , url
              , prompt: parameters.prompt.clone()
              , created_at
              , model: model.to_string()
              , dimensions: parameters.image_dimensions.clone()
              , parameters: Some(parameters.clone())
            })
            .collect();

        if new_items.is_empty()
        {   warn!("Prediction {} succeeded without output", prediction.id);
        }
        debug!(
          "Appending {} items from {}",
          new_items.len(), prediction.id
        );
        self.items.extend(new_items.iter().cloned());
        Ok(new_items)
    }

    pub fn reset(&mut self)
    {   debug!("Resetting gallery of {} items", self.items.len());
        self.items.clear();
    }

    pub fn total_pages(&self, page_size: usize) -> usize
    {   let page_size = page_size.max(1);
        ((self.items.len() + page_size - 1) / page_size).max(1)
    }

    /// 1-based page, clamped into range
    pub fn page(&self, page: usize, page_size: usize) -> GalleryPage
    {   let page_size = page_size.max(1);
        let total_pages = self.total_pages(page_size);
        let page = page.clamp(1, total_pages);
        let items = self.items.iter()
          .rev()
          .skip((page - 1) * page_size)
          .take(page_size)
          .cloned()
          .collect();
        GalleryPage
        {   page
          , total_pages
          , total_items: self.items.len()
          , items
        }
    }

    pub fn to_json(&self) -> Result<String, crate::error::Error>
    {   serde_json::to_string(&self.items).map_err(|e| {
          crate::error::Error::StorageError(e.to_string())
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, crate::error::Error>
    {   let items: Vec<ResultItem> = serde_json::from_str(raw)
          .map_err(|e| {
            crate::error::Error::ParseError(e.to_string())
          })?;
        Ok(Gallery { items })
    }

    /// Load from `store`. A missing or unreadable entry gives an
    /// empty gallery.
    pub fn load(store: &dyn GalleryStore) -> Self
    {   match store.get(GALLERY_STORAGE_KEY)
        {   Ok(Some(raw)) => Gallery::from_json(&raw)
              .unwrap_or_else(|e| {
                warn!("Ignoring stored gallery: {}", e);
                Gallery::new()
              })
          , Ok(None) => Gallery::new()
          , Err(e) => {
              warn!("Could not read stored gallery: {}", e);
              Gallery::new()
            }
        }
    }

    pub fn save(&self, store: &dyn GalleryStore)
      -> Result<(), crate::error::Error>
    {   let raw = self.to_json()?;
        store.set(GALLERY_STORAGE_KEY, &raw)
    }
}

// ===== Persistence =====

/// Key-value storage for a serialized gallery
pub trait GalleryStore: Send + Sync
{   fn get(&self, key: &str)
      -> Result<Option<String>, crate::error::Error>;

    fn set(&self, key: &str, value: &str)
      -> Result<(), crate::error::Error>;
}

/// Keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore
{   entries: Mutex<HashMap<String, String>>
}

impl MemoryStore
{   pub fn new() -> Self
    {   MemoryStore::default()
    }
}

impl GalleryStore for MemoryStore
{   fn get(&self, key: &str)
      -> Result<Option<String>, crate::error::Error>
    {   let entries = self.entries.lock().map_err(|_| {
          crate::error::Error::StorageError(
            "memory store poisoned".to_string()
          )
        })?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str)
      -> Result<(), crate::error::Error>
    {   let mut entries = self.entries.lock().map_err(|_| {
          crate::error::Error::StorageError(
            "memory store poisoned".to_string()
          )
        })?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore
{   dir: PathBuf
}

impl FileStore
{   pub fn new(dir: impl Into<PathBuf>) -> Self
    {   FileStore { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf
    {   let name: String = key.chars()
          .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
          .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl GalleryStore for FileStore
{   fn get(&self, key: &str)
      -> Result<Option<String>, crate::error::Error>
    {   let path = self.path_for(key);
        match fs::read_to_string(&path)
        {   Ok(raw) => Ok(Some(raw))
          , Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
              debug!("No stored entry at {}", path.display());
              Ok(None)
            }
          , Err(e) => {
              error!("Failed to read {}: {}", path.display(), e);
              Err(crate::error::Error::StorageError(e.to_string()))
            }
        }
    }

    fn set(&self, key: &str, value: &str)
      -> Result<(), crate::error::Error>
    {   let path = self.path_for(key);
        fs::create_dir_all(&self.dir)
          .and_then(|_| fs::write(&path, value))
          .map_err(|e| {
            error!("Failed to write {}: {}", path.display(), e);
            crate::error::Error::StorageError(e.to_string())
          })
    }
}
