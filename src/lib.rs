pub mod error;
pub mod config;
pub mod providers;
pub mod request;
pub mod retry;
pub mod submit;
pub mod poll;
pub mod gallery;
pub mod client;

/*

txt2img is an async-only client for hosted text-to-image predictions.
A prediction is created upstream, then polled until it reaches a
terminal state; succeeded outputs land in a persisted gallery.

txt2img/
├── Cargo.toml
├── src/
│   ├── lib.rs          # Re-exports and the channel API types
│   ├── error.rs        # Error type shared by every layer
│   ├── config.rs       # Provider, polling, retry and gallery config
│   ├── request.rs      # Generation request and prediction snapshots
│   ├── retry.rs        # Backoff for transport errors while polling
│   ├── providers/      # PredictionService and its HTTP implementation
│   ├── submit.rs       # Validate and create one prediction
│   ├── poll.rs         # Poll loop state machine and cancellation
│   ├── gallery.rs      # Result consumer and storage port
│   ├── client.rs       # Backend task owning gallery and active jobs
│   └── main.rs         # Command line front end
└── tests/

*/

pub use error::Error;
pub use config::Txt2ImgConfig;
pub use request::{GenerationRequest, JobStatus, Prediction, PredictionInput};
pub use providers::{PredictionService, ReplicateClient};
pub use submit::submit;
pub use poll::{start_polling, PollEvent, PollHandle, PollOutcome, PollPolicy};
pub use gallery::{Gallery, GalleryPage, GalleryStore, FileStore, MemoryStore, ResultItem};
pub use client::Txt2ImgBackend;

/// TXT2IMG API INTERFACE:

// ===== Generate =====

/// Everything a caller hears about one generation
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent
{   /// Upstream accepted the job
    Submitted(crate::request::Prediction)
  , /// Non-terminal status snapshot
    Update(crate::request::Prediction)
  , /// Job succeeded and its items were appended to the gallery
    Completed
    {   prediction: crate::request::Prediction
      , items: Vec<crate::gallery::ResultItem>
    }
  , /// Invalid input, upstream error or terminal failure
    Failed(crate::error::Error)
}

pub type GenerateReplySender
  = tokio::sync::mpsc::UnboundedSender<GenerationEvent>;

pub struct GenerateArgs
{   pub request: crate::request::GenerationRequest
  , pub reply: GenerateReplySender
}

// ===== CancelGeneration =====

pub type CancelGenerationReply = Result<(), crate::error::Error>;
pub type CancelGenerationReplySender
  = tokio::sync::mpsc::UnboundedSender<CancelGenerationReply>;

pub struct CancelGenerationArgs
{   pub job_id: String
  , pub reply: CancelGenerationReplySender
}

// ===== GetGallery =====

pub type GetGalleryReply
  = Result<Vec<crate::gallery::ResultItem>, crate::error::Error>;
pub type GetGalleryReplySender
  = tokio::sync::mpsc::UnboundedSender<GetGalleryReply>;

pub struct GetGalleryArgs
{   pub reply: GetGalleryReplySender
}

// ===== GetGalleryPage =====

pub type GetGalleryPageReply
  = Result<crate::gallery::GalleryPage, crate::error::Error>;
pub type GetGalleryPageReplySender
  = tokio::sync::mpsc::UnboundedSender<GetGalleryPageReply>;

pub struct GetGalleryPageArgs
{   pub page: usize
  , pub reply: GetGalleryPageReplySender
}

// ===== ResetGallery =====

pub type ResetGalleryReply = Result<(), crate::error::Error>;
pub type ResetGalleryReplySender
  = tokio::sync::mpsc::UnboundedSender<ResetGalleryReply>;

pub struct ResetGalleryArgs
{   pub reply: ResetGalleryReplySender
}

// ===== KillProcess =====

pub type KillProcessReply = Result<(), crate::error::Error>;
pub type KillProcessReplySender
  = tokio::sync::mpsc::UnboundedSender<KillProcessReply>;

pub struct KillProcessArgs
{   pub reply: KillProcessReplySender
}

// ===== Txt2ImgHand (sender side) =====

pub struct Txt2ImgHand
{   pub generate_tx
      : tokio::sync::mpsc::UnboundedSender<GenerateArgs>
  , pub cancel_generation_tx
      : tokio::sync::mpsc::UnboundedSender<CancelGenerationArgs>
  , pub get_gallery_tx
      : tokio::sync::mpsc::UnboundedSender<GetGalleryArgs>
  , pub get_gallery_page_tx
      : tokio::sync::mpsc::UnboundedSender<GetGalleryPageArgs>
  , pub reset_gallery_tx
      : tokio::sync::mpsc::UnboundedSender<ResetGalleryArgs>
  , pub kill_process_tx
      : tokio::sync::mpsc::UnboundedSender<KillProcessArgs>
}

// ===== Txt2ImgFoot (receiver side) =====

pub struct Txt2ImgFoot
{   pub generate_rx
      : tokio::sync::mpsc::UnboundedReceiver<GenerateArgs>
  , pub cancel_generation_rx
      : tokio::sync::mpsc::UnboundedReceiver<CancelGenerationArgs>
  , pub get_gallery_rx
      : tokio::sync::mpsc::UnboundedReceiver<GetGalleryArgs>
  , pub get_gallery_page_rx
      : tokio::sync::mpsc::UnboundedReceiver<GetGalleryPageArgs>
  , pub reset_gallery_rx
      : tokio::sync::mpsc::UnboundedReceiver<ResetGalleryArgs>
  , pub kill_process_rx
      : tokio::sync::mpsc::UnboundedReceiver<KillProcessArgs>
}
