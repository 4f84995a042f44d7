#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use txt2img::{Error, JobStatus, Prediction, PredictionInput, PredictionService};

type Script = VecDeque<Result<Prediction, Error>>;

/// Plays back scripted replies per job and records what it was asked
pub struct ScriptedService
{   pub job_id: String
  , pub created: Mutex<Vec<PredictionInput>>
  , create_error: Mutex<Option<Error>>
  , /// ids handed out by successive creates, then `job_id`
    issued: Mutex<VecDeque<String>>
  , scripts: Mutex<HashMap<String, Script>>
  , calls: Mutex<HashMap<String, usize>>
  , status_calls: AtomicUsize
  , slow_replies: AtomicUsize
  , delay: Mutex<Duration>
}

impl ScriptedService
{   pub fn new(job_id: &str) -> Self
    {   ScriptedService
        {   job_id: job_id.to_string()
          , created: Mutex::new(vec![])
          , create_error: Mutex::new(None)
          , issued: Mutex::new(VecDeque::new())
          , scripts: Mutex::new(HashMap::new())
          , calls: Mutex::new(HashMap::new())
          , status_calls: AtomicUsize::new(0)
          , slow_replies: AtomicUsize::new(0)
          , delay: Mutex::new(Duration::ZERO)
        }
    }

    /// Script the replies for `job_id`
    pub fn with_statuses(
      self
    , statuses: Vec<Result<Prediction, Error>>
    ) -> Self
    {   self.scripts.lock().unwrap()
          .insert(self.job_id.clone(), statuses.into());
        self
    }

    /// Hand out `id` on the next unclaimed create and script its replies
    pub fn with_job(
      self
    , id: &str
    , statuses: Vec<Result<Prediction, Error>>
    ) -> Self
    {   self.issued.lock().unwrap().push_back(id.to_string());
        self.scripts.lock().unwrap().insert(id.to_string(), statuses.into());
        self
    }

    /// The first `count` status replies take `delay` each
    pub fn with_slow_replies(self, count: usize, delay: Duration) -> Self
    {   self.slow_replies.store(count, Ordering::SeqCst);
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_create(self, error: Error) -> Self
    {   *self.create_error.lock().unwrap() = Some(error);
        self
    }

    pub fn create_calls(&self) -> usize
    {   self.created.lock().unwrap().len()
    }

    pub fn status_calls(&self) -> usize
    {   self.status_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls_for(&self, id: &str) -> usize
    {   self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PredictionService for ScriptedService
{   async fn create_prediction(
      &self
    , input: &PredictionInput
    ) -> Result<Prediction, Error>
    {   self.created.lock().unwrap().push(input.clone());
        if let Some(e) = self.create_error.lock().unwrap().clone()
        {   return Err(e);
        }
        let id = self.issued.lock().unwrap()
          .pop_front()
          .unwrap_or_else(|| self.job_id.clone());
        Ok(Prediction::new(id, JobStatus::Starting))
    }

    async fn get_prediction(&self, id: &str)
      -> Result<Prediction, Error>
    {   self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(id.to_string()).or_insert(0) += 1;

        let slow = self.slow_replies
          .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
          })
          .is_ok();
        if slow
        {   let delay = *self.delay.lock().unwrap();
            tokio::time::sleep(delay).await;
        }

        let next = self.scripts.lock().unwrap()
          .get_mut(id)
          .and_then(|script| script.pop_front());
        // an exhausted script keeps the job processing
        next.unwrap_or_else(|| {
          Ok(Prediction::new(id.to_string(), JobStatus::Processing))
        })
    }
}

pub fn processing(id: &str) -> Result<Prediction, Error>
{   Ok(Prediction::new(id, JobStatus::Processing))
}

pub fn succeeded(id: &str, output: serde_json::Value)
  -> Result<Prediction, Error>
{   Ok(Prediction::new(id, JobStatus::Succeeded).with_output(output))
}

pub fn failed(id: &str, message: &str) -> Result<Prediction, Error>
{   Ok(Prediction::new(id, JobStatus::Failed).with_error(message))
}
