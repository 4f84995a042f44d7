use async_trait::async_trait;
use serde::Serialize;
use log::{debug, trace, error};

pub const REPLICATE_API_BASE: &str
  = "https://api.replicate.com/v1";

pub const DEFAULT_MODEL: &str
  = "stability-ai/stable-diffusion:\
db21e45d3f7023abc2a46ee38a23973f6dce16bb082a930b0c49861f96d1e5bf";

const FALLBACK_ERROR: &str = "Replicate error";

// ===== Wire Types =====

#[derive(Debug, Clone, Serialize)]
pub struct CreatePredictionBody<'a>
{   pub version: &'a str
  , pub input: &'a crate::request::PredictionInput
}

/// Version id to send for a model reference.
/// `owner/name:hash` sends only `hash`.
pub fn version_id(model: &str) -> &str
{   match model.rsplit_once(':')
    {   Some((_, hash)) if !hash.is_empty() => hash
      , _ => model
    }
}

/// Pull a readable message out of an error body
pub fn upstream_message(body: &str) -> String
{   if let Ok(value)
      = serde_json::from_str::<serde_json::Value>(body)
    {   for field in ["detail", "error", "title"]
        {   if let Some(msg) = value.get(field)
              .and_then(|v| v.as_str())
              .filter(|msg| !msg.is_empty())
            {   return msg.to_string();
            }
        }
    }
    let body = body.trim();
    if body.is_empty()
    {   FALLBACK_ERROR.to_string()
    } else
    {   body.to_string()
    }
}

fn transport_error(e: reqwest::Error) -> crate::error::Error
{   if e.is_timeout()
    {   crate::error::Error::Timeout
    } else
    {   crate::error::Error::HttpError(e.to_string())
    }
}

// ===== Replicate Client =====

/// HTTP client for the hosted prediction API
pub struct ReplicateClient
{   pub api_token: Option<String>
  , api_base: String
  , model: String
  , http_client: reqwest::Client
}

impl ReplicateClient
{   pub fn new(api_token: Option<String>) -> Self
    {   debug!("Creating ReplicateClient");
        ReplicateClient
        {   api_token
          , api_base: REPLICATE_API_BASE.to_string()
          , model: DEFAULT_MODEL.to_string()
          , http_client: reqwest::Client::new()
        }
    }

    pub fn from_config(
      config: &crate::config::ProviderConfig
    , api_token: Option<String>
    ) -> Result<Self, crate::error::Error>
    {   debug!("Creating ReplicateClient from config");
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout()
        {   builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(|e| {
          error!("Failed to build HTTP client: {}", e);
          crate::error::Error::InvalidConfiguration(e.to_string())
        })?;

        Ok(ReplicateClient
        {   api_token
          , api_base: config.api_base
              .clone()
              .unwrap_or_else(|| REPLICATE_API_BASE.to_string())
              .trim_end_matches('/')
              .to_string()
          , model: config.model
              .clone()
              .unwrap_or_else(|| DEFAULT_MODEL.to_string())
          , http_client
        })
    }

    pub fn set_api_token(&mut self, token: String)
    {   debug!("Setting API token");
        self.api_token = Some(token);
    }

    pub fn model(&self) -> &str
    {   &self.model
    }

    fn api_token(&self) -> Result<&str, crate::error::Error>
    {   self.api_token.as_deref().ok_or_else(|| {
          error!("No API token configured");
          crate::error::Error::MissingApiKey(
            crate::config::API_TOKEN_ENV.to_string()
          )
        })
    }

    async fn read_prediction(
      response: reqwest::Response
    ) -> Result<crate::request::Prediction, crate::error::Error>
    {   let status = response.status();
        trace!("Replicate response status: {}", status);

        if !status.is_success()
        {   let error_text = response.text().await
              .unwrap_or_default();
            let message = upstream_message(&error_text);
            error!("Replicate API error ({}): {}", status, message);
            return Err(crate::error::Error::UpstreamError(message));
        }

        let prediction: crate::request::Prediction
          = response.json().await.map_err(|e| {
            error!("Parse error: {}", e);
            crate::error::Error::ParseError(e.to_string())
          })?;

        if prediction.id.is_empty()
        {   error!("Prediction without id");
            return Err(crate::error::Error::ParseError(
              "prediction id is empty".to_string()
            ));
        }
        Ok(prediction)
    }

    async fn handle_create(
      &self
    , input: &crate::request::PredictionInput
    ) -> Result<crate::request::Prediction, crate::error::Error>
    {   let api_token = self.api_token()?;
        let body = CreatePredictionBody
        {   version: version_id(&self.model)
          , input
        };
        trace!("Replicate create request: {:?}", body);

        let response = self.http_client
          .post(format!("{}/predictions", self.api_base))
          .bearer_auth(api_token)
          .json(&body)
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            transport_error(e)
          })?;

        let prediction = Self::read_prediction(response).await?;
        debug!(
          "Created prediction {} ({})",
          prediction.id, prediction.status
        );
        Ok(prediction)
    }

    async fn handle_get(
      &self
    , id: &str
    ) -> Result<crate::request::Prediction, crate::error::Error>
    {   if id.is_empty()
        {   return Err(crate::error::Error::InvalidInput(
              "id is required".to_string()
            ));
        }
        let api_token = self.api_token()?;

        let response = self.http_client
          .get(format!("{}/predictions/{}", self.api_base, id))
          .bearer_auth(api_token)
          .send()
          .await
          .map_err(|e| {
            error!("Failed to fetch prediction {}: {}", id, e);
            transport_error(e)
          })?;

        let prediction = Self::read_prediction(response).await?;
        trace!("Prediction {} is {}", id, prediction.status);
        Ok(prediction)
    }
}

#[async_trait]
impl super::PredictionService for ReplicateClient
{   async fn create_prediction(
      &self
    , input: &crate::request::PredictionInput
    ) -> Result<crate::request::Prediction, crate::error::Error>
    {   self.handle_create(input).await
    }

    async fn get_prediction(
      &self
    , id: &str
    ) -> Result<crate::request::Prediction, crate::error::Error>
    {   self.handle_get(id).await
    }
}
