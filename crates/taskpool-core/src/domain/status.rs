//! Externally visible status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Status of one logical task, as seen by consumers.
///
/// One record exists per task id. It is created at submission and then only
/// mutated in place through [`StatusPatch`] merges, across every retry attempt.
///
/// Terminal failure leaves `complete == false` and sets `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus<T, E> {
    pub id: TaskId,
    pub running: bool,
    pub complete: bool,
    pub data: Option<T>,
    pub error: Option<E>,

    /// Attempts started so far (including the current one if running).
    pub attempts: u32,

    /// An attempt ended without settling (the work panicked).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub abandoned: bool,

    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T, E> TaskStatus<T, E> {
    /// Fresh record for a task that has just been submitted.
    pub fn queued(id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            running: false,
            complete: false,
            data: None,
            error: None,
            attempts: 0,
            abandoned: false,
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> TaskPhase {
        if self.running {
            TaskPhase::Running
        } else if self.complete {
            TaskPhase::Succeeded
        } else if self.error.is_some() {
            TaskPhase::Failed
        } else if self.abandoned {
            TaskPhase::Abandoned
        } else {
            TaskPhase::Queued
        }
    }

    /// No further transitions will happen for this record.
    pub fn is_settled(&self) -> bool {
        self.phase().is_terminal()
    }
}

/// Coarse lifecycle phase derived from the status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Waiting in the pending queue (first attempt or a retry).
    Queued,
    Running,
    Succeeded,
    /// Retry budget exhausted.
    Failed,
    Abandoned,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskPhase::Succeeded | TaskPhase::Failed | TaskPhase::Abandoned
        )
    }
}

/// Partial update merged into an existing [`TaskStatus`].
///
/// `None` means "leave the field as it is".
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch<T, E> {
    pub running: Option<bool>,
    pub complete: Option<bool>,
    pub data: Option<Option<T>>,
    pub error: Option<Option<E>>,
    pub abandoned: Option<bool>,
    pub attempt_started: bool,
    /// Undo `attempt_started` for an attempt whose work never ran.
    pub attempt_withdrawn: bool,
}

impl<T, E> Default for StatusPatch<T, E> {
    fn default() -> Self {
        Self {
            running: None,
            complete: None,
            data: None,
            error: None,
            abandoned: None,
            attempt_started: false,
            attempt_withdrawn: false,
        }
    }
}

impl<T, E> StatusPatch<T, E> {
    /// An attempt was admitted.
    pub fn started() -> Self {
        Self {
            running: Some(true),
            attempt_started: true,
            ..Self::default()
        }
    }

    pub fn succeeded(value: T) -> Self {
        Self {
            running: Some(false),
            complete: Some(true),
            data: Some(Some(value)),
            error: Some(None),
            ..Self::default()
        }
    }

    /// A failed attempt went back to the pending queue.
    pub fn requeued() -> Self {
        Self {
            running: Some(false),
            ..Self::default()
        }
    }

    /// Retry budget exhausted. `complete` is left untouched.
    pub fn failed(error: E) -> Self {
        Self {
            running: Some(false),
            error: Some(Some(error)),
            ..Self::default()
        }
    }

    pub fn abandoned() -> Self {
        Self {
            running: Some(false),
            abandoned: Some(true),
            ..Self::default()
        }
    }

    /// An admitted attempt was dropped before its work was polled.
    pub fn withdrawn() -> Self {
        Self {
            running: Some(false),
            abandoned: Some(true),
            attempt_withdrawn: true,
            ..Self::default()
        }
    }

    /// Merge into `status` in place.
    pub fn apply(self, status: &mut TaskStatus<T, E>, now: DateTime<Utc>) {
        if let Some(running) = self.running {
            status.running = running;
        }
        if let Some(complete) = self.complete {
            status.complete = complete;
        }
        if let Some(data) = self.data {
            status.data = data;
        }
        if let Some(error) = self.error {
            status.error = error;
        }
        if let Some(abandoned) = self.abandoned {
            status.abandoned = abandoned;
        }
        if self.attempt_started {
            status.attempts += 1;
        }
        if self.attempt_withdrawn {
            status.attempts = status.attempts.saturating_sub(1);
        }
        status.updated_at = now;
    }
}

/// Number of tasks per phase in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl StatusCounts {
    pub fn tally<'a, T: 'a, E: 'a>(records: impl IntoIterator<Item = &'a TaskStatus<T, E>>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.phase() {
                TaskPhase::Queued => counts.queued += 1,
                TaskPhase::Running => counts.running += 1,
                TaskPhase::Succeeded => counts.succeeded += 1,
                TaskPhase::Failed => counts.failed += 1,
                TaskPhase::Abandoned => counts.abandoned += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed + self.abandoned
    }

    /// Every task has reached a terminal phase.
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    type Status = TaskStatus<String, String>;
    type Patch = StatusPatch<String, String>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn fresh() -> Status {
        TaskStatus::queued(TaskId::from(Ulid::new()), t0())
    }

    #[test]
    fn new_record_is_queued() {
        let status = fresh();
        assert!(!status.running);
        assert!(!status.complete);
        assert_eq!(status.data, None);
        assert_eq!(status.error, None);
        assert_eq!(status.attempts, 0);
        assert_eq!(status.phase(), TaskPhase::Queued);
        assert!(!status.is_settled());
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let mut status = fresh();
        let later = t0() + chrono::Duration::seconds(3);

        Patch::started().apply(&mut status, later);
        assert!(status.running);
        assert_eq!(status.attempts, 1);
        assert_eq!(status.submitted_at, t0());
        assert_eq!(status.updated_at, later);

        Patch::requeued().apply(&mut status, later);
        assert!(!status.running);
        assert_eq!(status.attempts, 1);
        assert_eq!(status.error, None);

        Patch::started().apply(&mut status, later);
        Patch::succeeded("ok".to_string()).apply(&mut status, later);
        assert_eq!(status.attempts, 2);
        assert_eq!(status.data.as_deref(), Some("ok"));
        assert_eq!(status.phase(), TaskPhase::Succeeded);
    }

    #[test]
    fn terminal_failure_does_not_mark_complete() {
        let mut status = fresh();
        Patch::started().apply(&mut status, t0());
        Patch::failed("boom".to_string()).apply(&mut status, t0());

        assert!(!status.running);
        assert!(!status.complete);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert_eq!(status.phase(), TaskPhase::Failed);
        assert!(status.is_settled());
    }

    #[rstest]
    #[case::queued(Patch::requeued(), TaskPhase::Queued)]
    #[case::running(Patch::started(), TaskPhase::Running)]
    #[case::succeeded(Patch::succeeded("v".into()), TaskPhase::Succeeded)]
    #[case::failed(Patch::failed("e".into()), TaskPhase::Failed)]
    #[case::abandoned(Patch::abandoned(), TaskPhase::Abandoned)]
    fn phase_follows_flags(#[case] patch: Patch, #[case] expected: TaskPhase) {
        let mut status = fresh();
        patch.apply(&mut status, t0());
        assert_eq!(status.phase(), expected);
    }

    #[test]
    fn withdrawn_attempt_is_not_counted() {
        let mut status = fresh();
        Patch::started().apply(&mut status, t0());
        Patch::withdrawn().apply(&mut status, t0());

        assert_eq!(status.attempts, 0);
        assert!(!status.running);
        assert_eq!(status.phase(), TaskPhase::Abandoned);

        Patch::withdrawn().apply(&mut status, t0());
        assert_eq!(status.attempts, 0);
    }

    #[test]
    fn counts_tally_phases() {
        let mut records = vec![fresh(), fresh(), fresh(), fresh()];
        Patch::started().apply(&mut records[1], t0());
        Patch::succeeded("v".into()).apply(&mut records[2], t0());
        Patch::failed("e".into()).apply(&mut records[3], t0());

        let counts = StatusCounts::tally(&records);
        assert_eq!(
            counts,
            StatusCounts {
                queued: 1,
                running: 1,
                succeeded: 1,
                failed: 1,
                abandoned: 0,
            }
        );
        assert_eq!(counts.total(), 4);
        assert!(!counts.is_idle());
    }

    #[test]
    fn serializes_public_fields() {
        let mut status = fresh();
        Patch::succeeded("ok".into()).apply(&mut status, t0());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["id"], serde_json::json!(status.id.to_string()));
        assert_eq!(json["complete"], true);
        assert_eq!(json["data"], "ok");
        assert!(json["error"].is_null());
        assert!(json.get("abandoned").is_none());
    }
}
