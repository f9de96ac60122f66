//! Progress reporting helper used by a running job.
//!
//! A [`StatusTracker`] is the job's side of the kill protocol: every progress
//! tick first polls the kill flag, and a flagged job records itself as
//! `killed` and gets [`TrackerError::Killed`] back so it can unwind.

use crate::status_store::{
    JobStatus, KillRegistry, StatusFields, StatusRecord, StatusStoreError, StatusUpdate,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// A kill was requested; the status has already been written as `killed`.
    #[error("Job {uuid} was killed")]
    Killed { uuid: String },

    #[error("Job {uuid} can't move from {from} to {to}")]
    InvalidTransition {
        uuid: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Store(#[from] StatusStoreError),
}

pub struct StatusTracker<S: KillRegistry + ?Sized> {
    store: Arc<S>,
    uuid: String,
    // Last status this tracker wrote
    status: Mutex<JobStatus>,
}

impl<S: KillRegistry + ?Sized> StatusTracker<S> {
    /// Track the status stored under `uuid`, starting from its current state.
    /// A missing record counts as `queued` and is written on the first report.
    pub fn new(store: Arc<S>, uuid: impl Into<String>) -> Result<Self, TrackerError> {
        let uuid = uuid.into();
        let status = store
            .get(&uuid)?
            .map_or(JobStatus::Queued, |record| record.status);
        Ok(Self {
            store,
            uuid,
            status: Mutex::new(status),
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Report `num` of `total` units done, unless a kill was requested.
    pub fn at(
        &self,
        num: i64,
        total: i64,
        message: Option<&str>,
    ) -> Result<StatusRecord, TrackerError> {
        self.check_kill()?;
        self.write(
            JobStatus::Working,
            StatusFields {
                num: Some(num),
                total: Some(total),
                message: message.map(str::to_string),
                ..Default::default()
            },
        )
    }

    /// Report liveness without counters, unless a kill was requested.
    pub fn tick(&self, message: Option<&str>) -> Result<StatusRecord, TrackerError> {
        self.check_kill()?;
        self.write(
            JobStatus::Working,
            StatusFields {
                message: message.map(str::to_string),
                ..Default::default()
            },
        )
    }

    pub fn completed(&self, message: Option<&str>) -> Result<StatusRecord, TrackerError> {
        self.write(
            JobStatus::Completed,
            StatusFields {
                message: message.map(str::to_string),
                ..Default::default()
            },
        )
    }

    /// Record a failure, typically the error that ended the job body.
    pub fn failed(&self, message: &str) -> Result<StatusRecord, TrackerError> {
        self.write(
            JobStatus::Failed,
            StatusFields {
                message: Some(message.to_string()),
                ..Default::default()
            },
        )
    }

    fn check_kill(&self) -> Result<(), TrackerError> {
        if !self.store.should_kill(&self.uuid)? {
            return Ok(());
        }

        warn!("Job {} observed a kill request, stopping", self.uuid);
        self.write(
            JobStatus::Killed,
            StatusFields {
                message: Some(format!("Killed at {}", Utc::now().to_rfc3339())),
                ..Default::default()
            },
        )?;
        self.store.killed(&self.uuid)?;
        Err(TrackerError::Killed {
            uuid: self.uuid.clone(),
        })
    }

    fn write(&self, next: JobStatus, fields: StatusFields) -> Result<StatusRecord, TrackerError> {
        let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *current;
        // A queued job may end without ever reporting progress
        let allowed =
            from.can_transition_to(next) || (from == JobStatus::Queued && next.is_terminal());
        if !allowed {
            return Err(TrackerError::InvalidTransition {
                uuid: self.uuid.clone(),
                from,
                to: next,
            });
        }

        let update = StatusUpdate::Fields(StatusFields {
            status: Some(next),
            ..fields
        });
        let stored = self.store.set(&self.uuid, &[update])?;
        *current = next;
        Ok(stored)
    }
}
