use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use log::{debug, trace, error, info, warn};
use crate::Txt2ImgFoot;

/// What spawned submission and poll tasks report back
enum JobEvent
{   Submitted
    {   prediction: crate::request::Prediction
      , input: crate::request::PredictionInput
      , reply: crate::GenerateReplySender
    }
  , Poll
    {   job_id: String
      , event: crate::poll::PollEvent
    }
}

/// A job whose poll loop is running
struct ActiveJob
{   input: crate::request::PredictionInput
  , reply: crate::GenerateReplySender
  , canceller: crate::poll::PollCanceller
}

/// Backend state: the only writer of the gallery and the job table
pub struct Txt2ImgBackendState
{   pub service: Arc<dyn crate::providers::PredictionService>
  , pub store: Arc<dyn crate::gallery::GalleryStore>
  , pub gallery: crate::gallery::Gallery
  , pub policy: crate::poll::PollPolicy
  , pub page_size: usize
  , pub model_label: String
  , active: HashMap<String, ActiveJob>
  , job_tx: mpsc::UnboundedSender<JobEvent>
}

impl Txt2ImgBackendState
{   fn new(
      service: Arc<dyn crate::providers::PredictionService>
    , store: Arc<dyn crate::gallery::GalleryStore>
    , config: &crate::config::Txt2ImgConfig
    , job_tx: mpsc::UnboundedSender<JobEvent>
    ) -> Self
    {   debug!("Initializing Txt2ImgBackendState");
        let gallery = crate::gallery::Gallery::load(&*store);
        debug!("Loaded gallery with {} items", gallery.len());
        Txt2ImgBackendState
        {   service
          , store
          , gallery
          , policy: crate::poll::PollPolicy::from_config(config)
          , page_size: config.gallery.page_size
          , model_label: crate::gallery::DEFAULT_MODEL_LABEL
              .to_string()
          , active: HashMap::new()
          , job_tx
        }
    }

    fn persist(&self)
    {   if let Err(e) = self.gallery.save(&*self.store)
        {   error!("Failed to persist gallery: {}", e);
        }
    }

    /// Validate here, submit on a separate task
    fn handle_generate(&mut self, cmd: crate::GenerateArgs)
    {   let crate::GenerateArgs { request, reply } = cmd;
        if let Err(e) = request.validate()
        {   debug!("Rejected generation: {}", e);
            let _ = reply.send(crate::GenerationEvent::Failed(e));
            return;
        }

        let input = request.to_input();
        let service = self.service.clone();
        let job_tx = self.job_tx.clone();
        tokio::spawn(async move {
          match crate::submit::submit_input(&*service, &input).await
          {   Ok(prediction) => {
                let _ = job_tx.send(JobEvent::Submitted
                {   prediction
                  , input
                  , reply
                });
              }
            , Err(e) => {
                let _ = reply.send(crate::GenerationEvent::Failed(e));
              }
          }
        });
    }

    fn handle_submitted(
      &mut self
    , prediction: crate::request::Prediction
    , input: crate::request::PredictionInput
    , reply: crate::GenerateReplySender
    )
    {   let job_id = prediction.id.clone();
        let _ = reply.send(
          crate::GenerationEvent::Submitted(prediction)
        );

        let mut handle = crate::poll::start_polling(
          self.service.clone()
        , job_id.clone()
        , self.policy.clone()
        );
        let canceller = handle.canceller();
        if let Some(previous) = self.active.insert(
          job_id.clone(),
          ActiveJob { input, reply, canceller }
        )
        {   warn!("Job {} was already active, replacing it", job_id);
            previous.canceller.cancel();
        }

        let job_tx = self.job_tx.clone();
        tokio::spawn(async move {
          while let Some(event) = handle.next_event().await
          {   let forwarded = job_tx.send(JobEvent::Poll
              {   job_id: job_id.clone()
                , event
              });
              if forwarded.is_err()
              {   handle.cancel();
                  break;
              }
          }
        });
    }

    fn handle_poll_event(
      &mut self
    , job_id: String
    , event: crate::poll::PollEvent
    )
    {   match event
        {   crate::poll::PollEvent::Update(prediction) => {
              match self.active.get(&job_id)
              {   Some(job) => {
                    let _ = job.reply.send(
                      crate::GenerationEvent::Update(prediction)
                    );
                  }
                , None => trace!("Dropping update for {}", job_id)
              }
            }
          , crate::poll::PollEvent::Finished(outcome) => {
              let job = match self.active.remove(&job_id)
              {   Some(job) => job
                , None => {
                    trace!("Dropping outcome for {}", job_id);
                    return;
                  }
              };
              match outcome.into_result()
              {   Some(Ok(prediction)) => {
                    self.complete(prediction, job);
                  }
                , Some(Err(e)) => {
                    info!("Job {} did not complete: {}", job_id, e);
                    let _ = job.reply.send(
                      crate::GenerationEvent::Failed(e)
                    );
                  }
                , None => debug!("Job {} canceled", job_id)
              }
            }
        }
    }

    fn complete(
      &mut self
    , prediction: crate::request::Prediction
    , job: ActiveJob
    )
    {   match self.gallery.append_prediction(
          &prediction, &job.input, &self.model_label
        )
        {   Ok(items) => {
              info!(
                "Job {} succeeded with {} images",
                prediction.id, items.len()
              );
              self.persist();
              let _ = job.reply.send(
                crate::GenerationEvent::Completed
                {   prediction
                  , items
                }
              );
            }
          , Err(e) => {
              error!("Could not consume {}: {}", prediction.id, e);
              let _ = job.reply.send(
                crate::GenerationEvent::Failed(e)
              );
            }
        }
    }

    fn handle_cancel(&mut self, job_id: &str)
      -> Result<(), crate::error::Error>
    {   match self.active.remove(job_id)
        {   Some(job) => {
              info!("Canceling job {}", job_id);
              job.canceller.cancel();
              Ok(())
            }
          , None => {
              debug!("Cancel for unknown job {}", job_id);
              Err(crate::error::Error::JobNotFound(job_id.to_string()))
            }
        }
    }

    fn cancel_all(&mut self)
    {   for (job_id, job) in self.active.drain()
        {   debug!("Canceling job {} on shutdown", job_id);
            job.canceller.cancel();
        }
    }
}

/// Public API for the txt2img backend - owns the task
pub struct Txt2ImgBackend
{   hand: crate::Txt2ImgHand
  , _task_handle: tokio::task::JoinHandle<()>
}

impl Txt2ImgBackend
{   /// Create and spawn a new backend
    /// Returns immediately - spawns background task
    pub fn new(
      service: Arc<dyn crate::providers::PredictionService>
    , store: Arc<dyn crate::gallery::GalleryStore>
    , config: crate::config::Txt2ImgConfig
    ) -> Self
    {   debug!("Creating Txt2ImgBackend with task ownership");

        let (generate_tx, generate_rx)
          = mpsc::unbounded_channel();
        let (cancel_generation_tx, cancel_generation_rx)
          = mpsc::unbounded_channel();
        let (get_gallery_tx, get_gallery_rx)
          = mpsc::unbounded_channel();
        let (get_gallery_page_tx, get_gallery_page_rx)
          = mpsc::unbounded_channel();
        let (reset_gallery_tx, reset_gallery_rx)
          = mpsc::unbounded_channel();
        let (kill_process_tx, kill_process_rx)
          = mpsc::unbounded_channel();

        let hand = crate::Txt2ImgHand
        {   generate_tx
          , cancel_generation_tx
          , get_gallery_tx
          , get_gallery_page_tx
          , reset_gallery_tx
          , kill_process_tx
        };

        let foot = crate::Txt2ImgFoot
        {   generate_rx
          , cancel_generation_rx
          , get_gallery_rx
          , get_gallery_page_rx
          , reset_gallery_rx
          , kill_process_rx
        };

        let _task_handle = tokio::spawn(async move {
          run_backend_loop(foot, service, store, config).await
        });

        Txt2ImgBackend
        {   hand
          , _task_handle
        }
    }

    /// Backend over the hosted API, token from the environment,
    /// gallery on disk when a path is configured
    pub fn from_config(config: crate::config::Txt2ImgConfig)
      -> Result<Self, crate::error::Error>
    {   config.validate()?;
        let token = crate::config::Txt2ImgConfig::api_token_from_env();
        if token.is_none()
        {   warn!(
              "{} is not set; submissions will fail",
              crate::config::API_TOKEN_ENV
            );
        }
        let service: Arc<dyn crate::providers::PredictionService>
          = Arc::new(crate::providers::ReplicateClient::from_config(
              &config.provider,
              token
            )?);
        let store: Arc<dyn crate::gallery::GalleryStore>
          = match &config.gallery.path
          {   Some(dir) => Arc::new(
                crate::gallery::FileStore::new(dir.clone())
              )
            , None => Arc::new(crate::gallery::MemoryStore::new())
          };
        Ok(Txt2ImgBackend::new(service, store, config))
    }

    /// Start a generation - returns almost immediately.
    /// The receiver closes after the last event of the job.
    pub async fn generate(
      &self
    , request: crate::request::GenerationRequest
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GenerationEvent>,
        crate::error::Error
      >
    {   debug!("generate queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::GenerateArgs
        {   request
          , reply: reply_tx
        };

        self.hand.generate_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Other(
              "Backend disconnected".to_string()
            )
          })?;

        Ok(reply_rx)
    }

    /// Stop polling a job - returns almost immediately
    pub async fn cancel(
      &self
    , job_id: String
    ) -> Result<
        mpsc::UnboundedReceiver<crate::CancelGenerationReply>,
        crate::error::Error
      >
    {   debug!("cancel queuing command for {}", job_id);
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::CancelGenerationArgs
        {   job_id
          , reply: reply_tx
        };

        self.hand.cancel_generation_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Other(
              "Backend disconnected".to_string()
            )
          })?;

        Ok(reply_rx)
    }

    /// Whole gallery in generation order
    pub async fn get_gallery(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GetGalleryReply>,
        crate::error::Error
      >
    {   debug!("get_gallery queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::GetGalleryArgs
        {   reply: reply_tx
        };

        self.hand.get_gallery_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Other(
              "Backend disconnected".to_string()
            )
          })?;

        Ok(reply_rx)
    }

    /// One page, newest first
    pub async fn get_gallery_page(
      &self
    , page: usize
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GetGalleryPageReply>,
        crate::error::Error
      >
    {   debug!("get_gallery_page queuing page {}", page);
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::GetGalleryPageArgs
        {   page
          , reply: reply_tx
        };

        self.hand.get_gallery_page_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Other(
              "Backend disconnected".to_string()
            )
          })?;

        Ok(reply_rx)
    }

    /// Clear and persist the gallery
    pub async fn reset_gallery(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::ResetGalleryReply>,
        crate::error::Error
      >
    {   debug!("reset_gallery queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::ResetGalleryArgs
        {   reply: reply_tx
        };

        self.hand.reset_gallery_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::Other(
              "Backend disconnected".to_string()
            )
          })?;

        Ok(reply_rx)
    }

    /// Gracefully shutdown the backend, canceling active jobs
    pub async fn shutdown(self)
      -> Result<(), crate::error::Error>
    {   debug!("Shutting down Txt2ImgBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::KillProcessArgs
        {   reply: reply_tx
        };

        self.hand.kill_process_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel already closed");
            crate::error::Error::Other(
              "Backend already shutdown".to_string()
            )
          })?;

        // Wait for shutdown confirmation
        if let Some(result) = reply_rx.recv().await
        {   debug!("Backend shutdown confirmed");
            result
        } else
        {   error!("Backend shutdown timeout");
            Err(crate::error::Error::Timeout)
        }
    }
}

/// Main backend event loop
///
/// Submissions and poll loops run on their own tasks; only their
/// results come back through `job_rx`, so this loop never waits on
/// the network.
async fn run_backend_loop(
  foot: crate::Txt2ImgFoot
, service: Arc<dyn crate::providers::PredictionService>
, store: Arc<dyn crate::gallery::GalleryStore>
, config: crate::config::Txt2ImgConfig
)
{   debug!("Starting Txt2ImgBackend event loop");
    let (job_tx, mut job_rx) = mpsc::unbounded_channel();
    let mut state
      = Txt2ImgBackendState::new(service, store, &config, job_tx);
    let Txt2ImgFoot
    {   mut generate_rx
      , mut cancel_generation_rx
      , mut get_gallery_rx
      , mut get_gallery_page_rx
      , mut reset_gallery_rx
      , mut kill_process_rx
    } = foot;

    loop
    { tokio::select!
      { Some(cmd) = generate_rx.recv() => {
          debug!("Received Generate");
          state.handle_generate(cmd);
        }
      , Some(event) = job_rx.recv() => {
          match event
          {   JobEvent::Submitted { prediction, input, reply } => {
                debug!("Job {} submitted", prediction.id);
                state.handle_submitted(prediction, input, reply);
              }
            , JobEvent::Poll { job_id, event } => {
                trace!("Poll event for {}", job_id);
                state.handle_poll_event(job_id, event);
              }
          }
        }
      , Some(cmd) = cancel_generation_rx.recv() => {
          debug!("Received CancelGeneration for {}", cmd.job_id);
          let result = state.handle_cancel(&cmd.job_id);
          let _ = cmd.reply.send(result);
        }
      , Some(cmd) = get_gallery_rx.recv() => {
          debug!("Received GetGallery");
          let _ = cmd.reply.send(Ok(state.gallery.items().to_vec()));
        }
      , Some(cmd) = get_gallery_page_rx.recv() => {
          debug!("Received GetGalleryPage {}", cmd.page);
          let page = state.gallery.page(cmd.page, state.page_size);
          let _ = cmd.reply.send(Ok(page));
        }
      , Some(cmd) = reset_gallery_rx.recv() => {
          debug!("Received ResetGallery");
          state.gallery.reset();
          let result = state.gallery.save(&*state.store);
          let _ = cmd.reply.send(result);
        }
      , cmd = kill_process_rx.recv() => {
          state.cancel_all();
          match cmd
          {   Some(cmd) => {
                debug!("Received KillProcess");
                let _ = cmd.reply.send(Ok(()));
              }
            , None => debug!("Backend handle dropped")
          }
          info!("Txt2ImgBackend shutting down");
          break;
        }
      }
    }
}
