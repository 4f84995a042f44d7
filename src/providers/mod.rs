//! Prediction service implementations

use async_trait::async_trait;

pub mod replicate;

// Re-export for convenience
pub use replicate::ReplicateClient;

/// The two upstream calls the workflow needs
#[async_trait]
pub trait PredictionService: Send + Sync
{   /// Create a job; the reply carries at least `id` and `status`
    async fn create_prediction(
      &self
    , input: &crate::request::PredictionInput
    ) -> Result<crate::request::Prediction, crate::error::Error>;

    /// Fetch the current snapshot of a job
    async fn get_prediction(
      &self
    , id: &str
    ) -> Result<crate::request::Prediction, crate::error::Error>;
}
