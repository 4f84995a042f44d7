//! Poll loop for one prediction's lifecycle
//!
//! A loop runs on its own task, queries the job status every
//! `interval`, and reports each snapshot as a `PollEvent`. It stops on
//! a terminal status, on an error it cannot retry, on its iteration or
//! time bound, or when the caller cancels it. Nothing is emitted after
//! cancellation.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use log::{debug, trace, warn, info};

/// Where a job is in its lifecycle, as seen from the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState
{   Submitted
  , Processing
  , Succeeded
  , Failed
  , Canceled
}

impl PollState
{   pub fn from_status(status: &crate::request::JobStatus) -> Self
    {   match status
        {   crate::request::JobStatus::Succeeded
              => PollState::Succeeded
          , crate::request::JobStatus::Failed
              => PollState::Failed
          , crate::request::JobStatus::Canceled
              => PollState::Canceled
          , _ => PollState::Processing
        }
    }

    pub fn is_terminal(&self) -> bool
    {   matches!(
          self,
          PollState::Succeeded | PollState::Failed | PollState::Canceled
        )
    }
}

/// How a loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome
{   /// Job succeeded; hand the snapshot to the result consumer
    Succeeded(crate::request::Prediction)
  , /// Job reached `failed` or `canceled`
    Failed
    {   prediction: crate::request::Prediction
      , message: String
    }
  , /// Upstream, transport or bound error stopped the loop
    Errored(crate::error::Error)
  , /// Caller canceled; nothing was emitted after that point
    Canceled
}

impl PollOutcome
{   /// Errors as the caller sees them; `Canceled` maps to `None`
    pub fn into_result(self)
      -> Option<Result<crate::request::Prediction, crate::error::Error>>
    {   match self
        {   PollOutcome::Succeeded(prediction) => Some(Ok(prediction))
          , PollOutcome::Failed { prediction, message } => {
              Some(Err(crate::error::Error::TerminalFailure
              {   status: prediction.status.to_string()
                , message
              }))
            }
          , PollOutcome::Errored(e) => Some(Err(e))
          , PollOutcome::Canceled => None
        }
    }
}

/// Emitted by a running loop
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent
{   /// Fresh non-terminal snapshot
    Update(crate::request::Prediction)
  , /// Last event of the loop
    Finished(PollOutcome)
}

/// Pacing and bounds of a loop
#[derive(Debug, Clone)]
pub struct PollPolicy
{   pub interval: Duration
  , pub max_polls: Option<u32>
  , pub max_duration: Option<Duration>
  , /// Per status query
    pub request_timeout: Option<Duration>
  , pub retry: crate::retry::RetryPolicy
}

impl PollPolicy
{   pub fn from_config(config: &crate::config::Txt2ImgConfig) -> Self
    {   PollPolicy
        {   interval: Duration::from_millis(
              config.polling.interval_ms.max(1)
            )
          , max_polls: config.polling.max_polls
          , max_duration: config.polling.max_duration_secs
              .map(Duration::from_secs)
          , request_timeout: config.provider.timeout()
          , retry: crate::retry::RetryPolicy::from_config(
              &config.retry
            )
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self
    {   self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_max_polls(mut self, max_polls: Option<u32>) -> Self
    {   self.max_polls = max_polls;
        self
    }

    pub fn with_max_duration(mut self, max: Option<Duration>) -> Self
    {   self.max_duration = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>)
      -> Self
    {   self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: crate::retry::RetryPolicy)
      -> Self
    {   self.retry = retry;
        self
    }
}

impl Default for PollPolicy
{   fn default() -> Self
    {   PollPolicy::from_config(
          &crate::config::Txt2ImgConfig::default()
        )
    }
}

/// Cancels a loop. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct PollCanceller
{   tx: Arc<watch::Sender<bool>>
}

impl PollCanceller
{   /// Fresh flag plus the receiver a loop watches
    pub fn channel() -> (Self, watch::Receiver<bool>)
    {   let (tx, rx) = watch::channel(false);
        (PollCanceller { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self)
    {   debug!("Poll cancellation requested");
        self.tx.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool
    {   *self.tx.borrow()
    }
}

/// Caller side of a running loop. Dropping every handle and
/// canceller cancels the loop.
pub struct PollHandle
{   job_id: String
  , canceller: PollCanceller
  , events: mpsc::UnboundedReceiver<PollEvent>
  , task: tokio::task::JoinHandle<PollOutcome>
}

impl PollHandle
{   pub fn job_id(&self) -> &str
    {   &self.job_id
    }

    /// Stop the loop. The loop may already have queued an `Update`
    /// when the flag flips; `next_event` drops it and returns `None`
    /// from then on.
    pub fn cancel(&self)
    {   self.canceller.cancel();
    }

    pub fn canceller(&self) -> PollCanceller
    {   self.canceller.clone()
    }

    /// Next event; `None` once the loop is gone or canceled
    pub async fn next_event(&mut self) -> Option<PollEvent>
    {   if self.canceller.is_canceled()
        {   self.events.close();
            return None;
        }
        let event = self.events.recv().await;
        if self.canceller.is_canceled()
        {   self.events.close();
            return None;
        }
        event
    }

    /// Wait for the loop to end
    pub async fn outcome(self) -> PollOutcome
    {   let PollHandle { canceller, task, .. } = self;
        let outcome = task.await.unwrap_or_else(|e| {
          PollOutcome::Errored(crate::error::Error::Other(
            format!("poll task failed: {}", e)
          ))
        });
        // flag stays alive until the loop has ended
        drop(canceller);
        outcome
    }
}

/// Spawn a loop for `job_id` and return its handle
pub fn start_polling(
  service: Arc<dyn crate::providers::PredictionService>
, job_id: impl Into<String>
, policy: PollPolicy
) -> PollHandle
{   let job_id = job_id.into();
    debug!("Starting poll loop for {}", job_id);
    let (canceller, cancel_rx) = PollCanceller::channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let loop_id = job_id.clone();
    let task = tokio::spawn(async move {
      run_poll_loop(service, loop_id, policy, events_tx, cancel_rx)
        .await
    });

    PollHandle
    {   job_id
      , canceller
      , events: events_rx
      , task
    }
}

fn is_canceled(cancel: &watch::Receiver<bool>) -> bool
{   let requested = *cancel.borrow();
    requested || cancel.has_changed().is_err()
}

/// Resolves once cancellation is requested or every sender is gone
async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>)
{   loop
    {   if is_canceled(cancel)
        {   return;
        }
        if cancel.changed().await.is_err()
        {   return;
        }
    }
}

/// One status query with bounded retries on transport errors.
/// `Ok(None)` means the loop was canceled meanwhile.
async fn query_status(
  service: &dyn crate::providers::PredictionService
, job_id: &str
, policy: &PollPolicy
, cancel: &mut watch::Receiver<bool>
) -> Result<Option<crate::request::Prediction>, crate::error::Error>
{   let mut attempt = 0;
    loop
    {   let query = async {
          match policy.request_timeout
          {   Some(limit) => {
                tokio::time::timeout(
                  limit,
                  service.get_prediction(job_id)
                )
                .await
                .unwrap_or(Err(crate::error::Error::Timeout))
              }
            , None => service.get_prediction(job_id).await
          }
        };

        let result = tokio::select!
        { result = query => result
        , _ = wait_for_cancel(cancel) => return Ok(None)
        };

        match result
        {   Ok(prediction) => return Ok(Some(prediction))
          , Err(e) if policy.retry.should_retry(attempt, &e) => {
              let backoff = policy.retry.backoff_for_attempt(attempt);
              warn!(
                "Status query for {} failed ({}), retrying in {:?}",
                job_id, e, backoff
              );
              attempt += 1;
              tokio::select!
              { _ = tokio::time::sleep(backoff) => {}
              , _ = wait_for_cancel(cancel) => return Ok(None)
              }
            }
          , Err(e) => return Err(e.into_upstream())
        }
    }
}

/// Drive one job to a terminal state.
///
/// Queries are strictly sequential. `events` gets an `Update` per
/// non-terminal snapshot and a final `Finished`, except after
/// cancellation, where the loop returns `Canceled` silently.
pub async fn run_poll_loop(
  service: Arc<dyn crate::providers::PredictionService>
, job_id: String
, policy: PollPolicy
, events: mpsc::UnboundedSender<PollEvent>
, mut cancel: watch::Receiver<bool>
) -> PollOutcome
{   let started = Instant::now();
    let mut state = PollState::Submitted;
    let mut polls: u32 = 0;

    let finish = |outcome: PollOutcome| {
      let _ = events.send(PollEvent::Finished(outcome.clone()));
      outcome
    };

    loop
    {   if is_canceled(&cancel)
        {   info!("Polling of {} canceled", job_id);
            return PollOutcome::Canceled;
        }
        if let Some(max) = policy.max_polls
        {   if polls >= max
            {   warn!("Giving up on {} after {} polls", job_id, polls);
                return finish(PollOutcome::Errored(
                  crate::error::Error::PollLimitExceeded(polls)
                ));
            }
        }
        if let Some(max) = policy.max_duration
        {   if started.elapsed() >= max
            {   warn!("Giving up on {} after {:?}", job_id, max);
                return finish(PollOutcome::Errored(
                  crate::error::Error::Timeout
                ));
            }
        }

        polls += 1;
        trace!("Poll {} for {} (state {:?})", polls, job_id, state);
        let result
          = query_status(&*service, &job_id, &policy, &mut cancel)
            .await;

        if is_canceled(&cancel)
        {   info!("Polling of {} canceled", job_id);
            return PollOutcome::Canceled;
        }

        let prediction = match result
        {   Ok(Some(prediction)) => prediction
          , Ok(None) => return PollOutcome::Canceled
          , Err(e) => {
              warn!("Polling of {} stopped: {}", job_id, e);
              return finish(PollOutcome::Errored(e));
            }
        };

        state = PollState::from_status(&prediction.status);
        debug!("Prediction {} is {}", job_id, prediction.status);
        match state
        {   PollState::Succeeded => {
              return finish(PollOutcome::Succeeded(prediction));
            }
          , PollState::Failed | PollState::Canceled => {
              let message = prediction.failure_message();
              return finish(PollOutcome::Failed
              {   prediction
                , message
              });
            }
          , PollState::Submitted | PollState::Processing => {
              if is_canceled(&cancel)
              {   return PollOutcome::Canceled;
              }
              let _ = events.send(PollEvent::Update(prediction));
            }
        }

        tokio::select!
        { _ = tokio::time::sleep(policy.interval) => {}
        , _ = wait_for_cancel(&mut cancel) => {}
        }
    }
}
