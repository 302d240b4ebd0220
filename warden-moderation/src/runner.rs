//! Polls due scheduled tasks and lifts expired punishments.
//!
//! Tasks are claimed with a lease, so several runners can share one table.
//! A failed task is retried with exponential backoff until it has failed
//! [`MAX_ATTEMPTS`] times, then abandoned with a warning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use warden_database::model::cases::{Actor, CaseId};
use warden_database::model::tasks::{Task, TaskPayload};
use warden_utils::formatting::automatic_reversal_reason;
use warden_utils::time::now_unix_secs;

use crate::error::{ModerationError, ModerationResult};
use crate::executor::ActionExecutor;
use crate::store::ModerationStore;

pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the next try of a task that has failed `attempts` times.
pub fn backoff_seconds(attempts: u32) -> u64 {
    10u64.saturating_mul(10u64.saturating_pow(attempts))
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    /// Bound on one reversal, guild API calls included.
    pub guild_api_timeout: Duration,
    /// How long a claimed task stays invisible to other runners.
    pub lease: Duration,
    pub batch_size: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            guild_api_timeout: Duration::from_secs(10),
            lease: Duration::from_secs(10 * 60),
            batch_size: 25,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Rescheduled { attempts: u32, run_at: u64 },
    Abandoned,
    /// Bookkeeping for the task failed; it is due again once its lease lapses.
    Unsettled,
}

pub struct TaskRunner {
    executor: ActionExecutor,
    store: Arc<dyn ModerationStore>,
    config: RunnerConfig,
}

impl TaskRunner {
    pub fn new(
        executor: ActionExecutor,
        store: Arc<dyn ModerationStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            executor,
            store,
            config,
        }
    }

    /// Claim every task due at `now` and run them in due order.
    pub async fn poll_once(&self, now: u64) -> ModerationResult<Vec<TaskOutcome>> {
        let tasks = self
            .store
            .claim_due_tasks(now, self.config.lease.as_secs(), self.config.batch_size)
            .await?;

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task_id = task.id;
            let outcome = match self.process(task, now).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    error!(task_id, ?source, "failed to settle task; retrying after its lease");
                    TaskOutcome::Unsettled
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.config.poll_interval,
            "task runner started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(source) = self.poll_once(now_unix_secs()).await {
                        error!(?source, "task poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("task runner stopped");
    }

    async fn process(&self, task: Task, now: u64) -> ModerationResult<TaskOutcome> {
        let error = match self.execute(&task).await {
            Ok(()) => {
                self.store.delete_task(task.id).await?;
                return Ok(TaskOutcome::Done);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            warn!(
                task_id = task.id,
                task_type = %task.task_type,
                guild_id = task.guild_id,
                %error,
                "abandoning task that cannot succeed"
            );
            self.store.delete_task(task.id).await?;
            return Ok(TaskOutcome::Abandoned);
        }

        let attempts = task.attempts.saturating_add(1);
        if attempts >= MAX_ATTEMPTS {
            let incident = ModerationError::TaskExhausted {
                task_id: task.id,
                attempts,
            };
            warn!(
                task_id = task.id,
                task_type = %task.task_type,
                guild_id = task.guild_id,
                attempts,
                %error,
                "{incident}; punishment left in place"
            );
            self.store.delete_task(task.id).await?;
            return Ok(TaskOutcome::Abandoned);
        }

        let run_at = now.saturating_add(backoff_seconds(attempts));
        warn!(
            task_id = task.id,
            guild_id = task.guild_id,
            attempts,
            run_at,
            %error,
            "task failed; retrying later"
        );
        self.store
            .reschedule_task(task.id, attempts, run_at)
            .await?;
        Ok(TaskOutcome::Rescheduled { attempts, run_at })
    }

    async fn execute(&self, task: &Task) -> ModerationResult<()> {
        match &task.payload {
            Some(TaskPayload::UndoRoleCase { case_id }) => self.undo_role_case(*case_id).await,
            None => Err(ModerationError::UnknownTask(task.task_type.clone())),
        }
    }

    async fn undo_role_case(&self, case_id: CaseId) -> ModerationResult<()> {
        let role_case = self
            .store
            .role_case(case_id)
            .await?
            .ok_or(ModerationError::CaseNotFound(case_id))?;

        let reason = role_case.case.action.reversal().map(|reversal| {
            automatic_reversal_reason(
                reversal.as_str(),
                role_case.case.expiry.duration_seconds().unwrap_or_default(),
            )
        });

        let limit = self.config.guild_api_timeout;
        tokio::time::timeout(
            limit,
            self.executor.reverse(&role_case, Actor::System, reason),
        )
        .await
        .map_err(|_| ModerationError::ExternalApiTimeout(limit))??;

        Ok(())
    }
}
