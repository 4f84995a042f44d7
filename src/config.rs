//! Configuration for the prediction provider, polling and the gallery

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::debug;
use serde::{Deserialize, Serialize};

/// Environment variable holding the provider token
pub const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

/// Gallery directory, relative to the working directory, used when
/// a persistent gallery is wanted but none is configured
pub const DEFAULT_GALLERY_DIR: &str = ".txt2img";

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig
{   /// API base URL (if custom)
    pub api_base: Option<String>
  , /// Model reference, `owner/name:version`
    pub model: Option<String>
  , /// Request timeout in seconds
    pub timeout_secs: Option<u64>
  , /// Enable detailed logging
    pub verbose: Option<bool>
}

impl Default for ProviderConfig
{   fn default() -> Self
    {   ProviderConfig
        {   api_base: None
          , model: None
          , timeout_secs: Some(30)
          , verbose: None
        }
    }
}

impl ProviderConfig
{   pub fn timeout(&self) -> Option<Duration>
    {   self.timeout_secs.map(Duration::from_secs)
    }
}

/// How often and how long to poll a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig
{   /// Delay between status queries in milliseconds
    pub interval_ms: u64
  , /// Give up after this many status queries
    pub max_polls: Option<u32>
  , /// Give up after this many seconds
    pub max_duration_secs: Option<u64>
}

impl Default for PollConfig
{   fn default() -> Self
    {   PollConfig
        {   interval_ms: 1500
          , max_polls: Some(400)
          , max_duration_secs: Some(600)
        }
    }
}

/// Retry configuration for transport errors while polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig
{   /// Max retry attempts per status query
    pub max_retries: usize
  , /// Backoff multiplier for retries
    pub backoff_multiplier: f32
  , /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64
}

impl Default for RetryConfig
{   fn default() -> Self
    {   RetryConfig
        {   max_retries: 3
          , backoff_multiplier: 2.0
          , initial_backoff_ms: 250
        }
    }
}

/// Where and how the result gallery is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig
{   /// Directory for the persisted gallery; in-memory when unset
    pub path: Option<PathBuf>
  , /// Items per gallery page
    pub page_size: usize
}

impl Default for GalleryConfig
{   fn default() -> Self
    {   GalleryConfig
        {   path: None
          , page_size: 8
        }
    }
}

/// txt2img configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Txt2ImgConfig
{   pub provider: ProviderConfig
  , pub polling: PollConfig
  , pub retry: RetryConfig
  , pub gallery: GalleryConfig
}

impl Txt2ImgConfig
{   /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>)
      -> Result<Self, crate::error::Error>
    {   let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|e| {
          crate::error::Error::InvalidConfiguration(
            format!("{}: {}", path.display(), e)
          )
        })?;
        let config: Txt2ImgConfig = serde_json::from_str(&raw)
          .map_err(|e| {
            crate::error::Error::InvalidConfiguration(
              format!("{}: {}", path.display(), e)
            )
          })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), crate::error::Error>
    {   if self.polling.interval_ms == 0
        {   return Err(crate::error::Error::InvalidConfiguration(
              "polling.interval_ms must be non-zero".to_string()
            ));
        }
        if self.polling.max_polls == Some(0)
        {   return Err(crate::error::Error::InvalidConfiguration(
              "polling.max_polls must be non-zero".to_string()
            ));
        }
        if self.provider.timeout_secs == Some(0)
        {   return Err(crate::error::Error::InvalidConfiguration(
              "provider.timeout_secs must be non-zero".to_string()
            ));
        }
        if self.gallery.page_size == 0
        {   return Err(crate::error::Error::InvalidConfiguration(
              "gallery.page_size must be non-zero".to_string()
            ));
        }
        Ok(())
    }

    /// Keep the gallery on disk, under `DEFAULT_GALLERY_DIR` unless a
    /// path is already set
    pub fn with_persistent_gallery(mut self) -> Self
    {   if self.gallery.path.is_none()
        {   debug!("No gallery path set, using {}", DEFAULT_GALLERY_DIR);
            self.gallery.path = Some(PathBuf::from(DEFAULT_GALLERY_DIR));
        }
        self
    }

    /// Provider token from the environment, if set
    pub fn api_token_from_env() -> Option<String>
    {   std::env::var(API_TOKEN_ENV)
          .ok()
          .filter(|token| !token.trim().is_empty())
    }
}
