//! Submission of a generation request

use log::{debug, error, info};

/// Validate `request` and issue exactly one create-job call.
///
/// An empty prompt fails with `InvalidInput` without touching the
/// service. Every other failure comes back as `UpstreamError` and is
/// never retried here.
pub async fn submit(
  service: &dyn crate::providers::PredictionService
, request: &crate::request::GenerationRequest
) -> Result<crate::request::Prediction, crate::error::Error>
{   request.validate()?;
    let input = request.to_input();
    submit_input(service, &input).await
}

/// Submit an already resolved input
pub async fn submit_input(
  service: &dyn crate::providers::PredictionService
, input: &crate::request::PredictionInput
) -> Result<crate::request::Prediction, crate::error::Error>
{   if input.prompt.trim().is_empty()
    {   return Err(crate::error::Error::InvalidInput(
          "Prompt is required".to_string()
        ));
    }
    debug!(
      "Submitting prediction ({}, {} steps)",
      input.image_dimensions, input.num_inference_steps
    );

    match service.create_prediction(input).await
    {   Ok(prediction) => {
          info!("Submitted prediction {}", prediction.id);
          Ok(prediction)
        }
      , Err(e) => {
          error!("Submission failed: {}", e);
          Err(e.into_upstream())
        }
    }
}
