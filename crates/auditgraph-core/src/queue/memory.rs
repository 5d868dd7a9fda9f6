//! In-process queue implementing the full broker contract.
//!
//! Nothing survives a restart, so this is for tests and embedded runs where
//! producer and workers share one process.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use super::{
    EnqueueOutcome, EventQueue, FailOutcome, Job, NewJob, QueueCounts, QueueResult, RetryPolicy,
    STALLED_ERROR,
};

#[derive(Default)]
struct State {
    jobs: HashMap<String, Job>,
    waiting: VecDeque<String>,
    delayed: Vec<(Instant, String)>,
    active: HashMap<String, Instant>,
    failed: Vec<String>,
}

impl State {
    fn promote_delayed(&mut self, now: Instant) {
        let (ready, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        self.waiting.extend(ready.into_iter().map(|(_, id)| id));
    }

    fn next_delayed(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn is_failed(&self, id: &str) -> bool {
        self.failed.iter().any(|f| f == id)
    }
}

pub struct MemoryQueue {
    policy: RetryPolicy,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn enqueue(&self, job: NewJob) -> QueueResult<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            if !state.is_failed(&job.id) {
                return Ok(EnqueueOutcome::Duplicate);
            }
            // A parked job does not block a new submission with its key.
            state.failed.retain(|id| id != &job.id);
        }
        let id = job.id.clone();
        state.jobs.insert(id.clone(), Job::from_new(job));
        state.waiting.push_back(id);
        drop(state);
        self.notify.notify_one();
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn reserve(&self, wait: Duration) -> QueueResult<Option<Job>> {
        let deadline = Instant::now() + wait;
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.promote_delayed(now);
                while let Some(id) = state.waiting.pop_front() {
                    if let Some(job) = state.jobs.get(&id).cloned() {
                        state.active.insert(id, now);
                        return Ok(Some(job));
                    }
                }
                if now >= deadline {
                    return Ok(None);
                }
                state
                    .next_delayed()
                    .map_or(deadline, |at| at.min(deadline))
            };
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete(&self, job: &Job) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.active.remove(&job.id);
        state.jobs.remove(&job.id);
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailOutcome> {
        let mut state = self.state.lock().await;
        state.active.remove(&job.id);

        let attempts = job.attempts_made + 1;
        let outcome = self.policy.outcome(attempts);
        let stored = state
            .jobs
            .entry(job.id.clone())
            .or_insert_with(|| job.clone());
        stored.attempts_made = attempts;
        stored.last_error = Some(error.to_string());

        match outcome {
            FailOutcome::Retrying { delay, .. } => {
                let at = Instant::now() + delay;
                state.delayed.push((at, job.id.clone()));
                drop(state);
                self.notify.notify_one();
            }
            FailOutcome::Dead { .. } => {
                stored.failed_at = Some(Utc::now());
                state.failed.push(job.id.clone());
            }
        }
        Ok(outcome)
    }

    async fn recover_stalled(&self, visibility_timeout: Duration) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let stalled: Vec<String> = state
            .active
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= visibility_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        let mut parked = 0;
        for id in &stalled {
            state.active.remove(id);
            let attempts = match state.jobs.get_mut(id) {
                Some(job) => {
                    job.attempts_made += 1;
                    job.last_error = Some(STALLED_ERROR.to_string());
                    job.attempts_made
                }
                None => continue,
            };
            if attempts >= self.policy.max_attempts {
                if let Some(job) = state.jobs.get_mut(id) {
                    job.failed_at = Some(Utc::now());
                }
                state.failed.push(id.clone());
                parked += 1;
            } else {
                state.waiting.push_front(id.clone());
            }
        }
        drop(state);
        if parked > 0 {
            warn!(parked, "Parked jobs that stalled on every attempt");
        }
        if stalled.len() > parked {
            self.notify.notify_one();
        }
        Ok(stalled.len())
    }

    async fn counts(&self) -> QueueResult<QueueCounts> {
        let state = self.state.lock().await;
        Ok(QueueCounts {
            waiting: state.waiting.len(),
            active: state.active.len(),
            delayed: state.delayed.len(),
            failed: state.failed.len(),
        })
    }

    async fn failed(&self, limit: usize) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .failed
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn retry_failed(&self, job_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        if !state.is_failed(job_id) {
            return Ok(false);
        }
        state.failed.retain(|id| id != job_id);
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.attempts_made = 0;
            job.failed_at = None;
        }
        state.waiting.push_back(job_id.to_string());
        drop(state);
        self.notify.notify_one();
        Ok(true)
    }

    async fn remove_failed(&self, job_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        if !state.is_failed(job_id) {
            return Ok(false);
        }
        state.failed.retain(|id| id != job_id);
        state.jobs.remove(job_id);
        Ok(true)
    }
}
