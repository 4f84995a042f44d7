//! Generation request and prediction types

use std::fmt;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_DIMENSIONS: &str = "512x512";
pub const DEFAULT_INFERENCE_STEPS: u32 = 50;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;
pub const DEFAULT_SCHEDULER: &str = "DPMSolverMultistep";
pub const DEFAULT_NUM_OUTPUTS: u32 = 1;

/// Message reported when a failed job carries no error of its own
pub const DEFAULT_FAILURE_MESSAGE: &str = "Generation failed";

/// What the caller asks for. Omitted parameters take the defaults above.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest
{   /// The prompt text
    pub prompt: String
  , /// What to avoid in the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>
  , /// Dimension string, e.g. "768x768"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dimensions: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>
  , /// Sampler algorithm name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_outputs: Option<u32>
}

impl GenerationRequest
{   pub fn new(prompt: impl Into<String>) -> Self
    {   GenerationRequest
        {   prompt: prompt.into()
          , ..Default::default()
        }
    }

    pub fn with_negative_prompt(mut self, text: impl Into<String>)
      -> Self
    {   self.negative_prompt = Some(text.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: impl Into<String>)
      -> Self
    {   self.image_dimensions = Some(dimensions.into());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self
    {   self.num_inference_steps = Some(steps);
        self
    }

    pub fn with_guidance(mut self, guidance: f32) -> Self
    {   self.guidance_scale = Some(guidance);
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl Into<String>)
      -> Self
    {   self.scheduler = Some(scheduler.into());
        self
    }

    pub fn with_outputs(mut self, num_outputs: u32) -> Self
    {   self.num_outputs = Some(num_outputs);
        self
    }

    /// The prompt must hold something other than whitespace
    pub fn validate(&self) -> Result<(), crate::error::Error>
    {   if self.prompt.trim().is_empty()
        {   return Err(crate::error::Error::InvalidInput(
              "Prompt is required".to_string()
            ));
        }
        Ok(())
    }

    /// Resolve every optional parameter against the defaults
    pub fn to_input(&self) -> PredictionInput
    {   PredictionInput
        {   prompt: self.prompt.clone()
          , negative_prompt: self.negative_prompt
              .clone()
              .filter(|text| !text.is_empty())
          , image_dimensions: self.image_dimensions
              .clone()
              .unwrap_or_else(||
                DEFAULT_IMAGE_DIMENSIONS.to_string()
              )
          , num_outputs: self.num_outputs
              .unwrap_or(DEFAULT_NUM_OUTPUTS)
          , num_inference_steps: self.num_inference_steps
              .unwrap_or(DEFAULT_INFERENCE_STEPS)
          , guidance_scale: self.guidance_scale
              .unwrap_or(DEFAULT_GUIDANCE_SCALE)
          , scheduler: self.scheduler
              .clone()
              .unwrap_or_else(|| DEFAULT_SCHEDULER.to_string())
        }
    }
}

/// Fully resolved model input, as sent upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput
{   pub prompt: String
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>
  , pub image_dimensions: String
  , pub num_outputs: u32
  , pub num_inference_steps: u32
  , pub guidance_scale: f32
  , pub scheduler: String
}

/// Remote job status. Unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus
{   Pending
  , Starting
  , Processing
  , Succeeded
  , Failed
  , Canceled
  , Other(String)
}

impl JobStatus
{   pub fn as_str(&self) -> &str
    {   match self
        {   JobStatus::Pending => "pending"
          , JobStatus::Starting => "starting"
          , JobStatus::Processing => "processing"
          , JobStatus::Succeeded => "succeeded"
          , JobStatus::Failed => "failed"
          , JobStatus::Canceled => "canceled"
          , JobStatus::Other(status) => status
        }
    }

    /// No further transitions happen after these
    pub fn is_terminal(&self) -> bool
    {   matches!(
          self,
          JobStatus::Succeeded
            | JobStatus::Failed
            | JobStatus::Canceled
        )
    }
}

impl From<String> for JobStatus
{   fn from(status: String) -> Self
    {   match status.as_str()
        {   "pending" => JobStatus::Pending
          , "starting" => JobStatus::Starting
          , "processing" => JobStatus::Processing
          , "succeeded" => JobStatus::Succeeded
          , "failed" => JobStatus::Failed
          , "canceled" => JobStatus::Canceled
          , _ => JobStatus::Other(status)
        }
    }
}

impl From<JobStatus> for String
{   fn from(status: JobStatus) -> Self
    {   match status
        {   JobStatus::Other(status) => status
          , known => known.as_str().to_string()
        }
    }
}

impl fmt::Display for JobStatus
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a remote prediction. Never edited locally, only
/// replaced by the next snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction
{   pub id: String
  , pub status: JobStatus
  , /// A single URL or a list of them; kept loose on purpose
    #[serde(default)]
    pub output: Option<serde_json::Value>
  , #[serde(default)]
    pub error: Option<String>
  , #[serde(default)]
    pub logs: Option<String>
  , #[serde(default)]
    pub metrics: Option<serde_json::Value>
}

impl Prediction
{   pub fn new(id: impl Into<String>, status: JobStatus) -> Self
    {   Prediction
        {   id: id.into()
          , status
          , output: None
          , error: None
          , logs: None
          , metrics: None
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self
    {   self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self
    {   self.error = Some(error.into());
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self
    {   self.logs = Some(logs.into());
        self
    }

    /// Upstream error text, or the generic message when absent
    pub fn failure_message(&self) -> String
    {   self.error
          .as_deref()
          .filter(|msg| !msg.is_empty())
          .unwrap_or(DEFAULT_FAILURE_MESSAGE)
          .to_string()
    }
}
