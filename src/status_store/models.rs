use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque caller-supplied job parameters.
pub type JobOptions = Map<String, Value>;

/// Lifecycle state of a job execution.
///
/// ```text
/// queued ──► working ──► completed
///               │  └───► failed
///               └──────► killed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Working,
    Completed,
    Failed,
    Killed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Working,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Killed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Working => "working",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "working" => Some(JobStatus::Working),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "killed" => Some(JobStatus::Killed),
            _ => None,
        }
    }

    /// Completed, failed and killed jobs never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Killed
        )
    }

    /// Whether moving from `self` to `next` follows the lifecycle graph.
    ///
    /// Staying in the same non-terminal state is allowed (progress ticks
    /// rewrite `working`). The store itself never calls this.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Queued | JobStatus::Working) => true,
            (
                JobStatus::Working,
                JobStatus::Working | JobStatus::Completed | JobStatus::Failed | JobStatus::Killed,
            ) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A partial set of status fields. `None` means "not part of this update".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFields {
    pub status: Option<JobStatus>,
    pub name: Option<String>,
    pub message: Option<String>,
    pub time: Option<i64>,
    pub options: Option<JobOptions>,
    pub num: Option<i64>,
    pub total: Option<i64>,
}

impl StatusFields {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Overlay `other` on top of `self`; keys present in `other` win.
    fn merge(&mut self, other: &StatusFields) {
        if let Some(status) = other.status {
            self.status = Some(status);
        }
        if let Some(name) = &other.name {
            self.name = Some(name.clone());
        }
        if let Some(message) = &other.message {
            self.message = Some(message.clone());
        }
        if let Some(time) = other.time {
            self.time = Some(time);
        }
        if let Some(options) = &other.options {
            self.options = Some(options.clone());
        }
        if let Some(num) = other.num {
            self.num = Some(num);
        }
        if let Some(total) = other.total {
            self.total = Some(total);
        }
    }
}

/// One entry of the ordered update list that builds a [`StatusRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Shorthand for a field set containing only `message`.
    Message(String),
    Fields(StatusFields),
}

impl StatusUpdate {
    fn into_fields(self) -> StatusFields {
        match self {
            StatusUpdate::Message(message) => StatusFields {
                message: Some(message),
                ..Default::default()
            },
            StatusUpdate::Fields(fields) => fields,
        }
    }
}

impl From<&str> for StatusUpdate {
    fn from(message: &str) -> Self {
        StatusUpdate::Message(message.to_string())
    }
}

impl From<String> for StatusUpdate {
    fn from(message: String) -> Self {
        StatusUpdate::Message(message)
    }
}

impl From<StatusFields> for StatusUpdate {
    fn from(fields: StatusFields) -> Self {
        StatusUpdate::Fields(fields)
    }
}

impl From<JobStatus> for StatusUpdate {
    fn from(status: JobStatus) -> Self {
        StatusUpdate::Fields(StatusFields::with_status(status))
    }
}

/// The status of one job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub uuid: String,
    pub status: JobStatus,
    pub name: Option<String>,
    pub message: Option<String>,
    /// Unix timestamp (seconds) of when this record was last built.
    pub time: i64,
    pub options: Option<JobOptions>,
    pub num: Option<i64>,
    pub total: Option<i64>,
    #[serde(default)]
    pub kill_requested: bool,
}

impl StatusRecord {
    /// Build a record from an ordered list of updates, stamped with the current time.
    pub fn new(uuid: impl Into<String>, updates: &[StatusUpdate]) -> Self {
        Self::build(uuid, Utc::now().timestamp(), updates)
    }

    /// Build a record with an explicit base time.
    ///
    /// Base fields are `time = now` and `status = queued`; each update is
    /// merged on top of the previous result. The uuid is never taken from an
    /// update.
    pub fn build(uuid: impl Into<String>, now: i64, updates: &[StatusUpdate]) -> Self {
        let mut merged = StatusFields {
            status: Some(JobStatus::Queued),
            time: Some(now),
            ..Default::default()
        };
        for update in updates {
            merged.merge(&update.clone().into_fields());
        }

        StatusRecord {
            uuid: uuid.into(),
            status: merged.status.unwrap_or_default(),
            name: merged.name,
            message: merged.message,
            time: merged.time.unwrap_or(now),
            options: merged.options,
            num: merged.num,
            total: merged.total,
            kill_requested: false,
        }
    }

    /// Percentage of completion derived from `status`, `num` and `total`.
    ///
    /// A zero or missing `total` counts as 1, so `num = 5, total = 0` yields
    /// 500. The value is not clamped to 0..=100, only to the `i64` range.
    pub fn pct_complete(&self) -> i64 {
        match self.status {
            JobStatus::Completed => 100,
            JobStatus::Queued => 0,
            _ => {
                let total = match self.total {
                    Some(t) if t != 0 => t,
                    _ => 1,
                };
                let pct = i128::from(self.num.unwrap_or(0)) * 100 / i128::from(total);
                i64::try_from(pct).unwrap_or(if pct < 0 { i64::MIN } else { i64::MAX })
            }
        }
    }

    /// Failed, completed and killed jobs can't be killed.
    pub fn killable(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_queued(&self) -> bool {
        self.status == JobStatus::Queued
    }

    pub fn is_working(&self) -> bool {
        self.status == JobStatus::Working
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn is_killed(&self) -> bool {
        self.status == JobStatus::Killed
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }

    /// Display/transport form: all stored fields plus `pct_complete`.
    pub fn snapshot(&self) -> StatusSnapshot<'_> {
        StatusSnapshot {
            record: self,
            pct_complete: self.pct_complete(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSnapshot<'a> {
    #[serde(flatten)]
    pub record: &'a StatusRecord,
    pub pct_complete: i64,
}

/// Optional `[start, end)` window over the most-recent-first id listing.
///
/// Both bounds must be present for the window to apply; with either one
/// missing the whole listing is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl PageRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn skip(&self) -> usize {
        match (self.start, self.end) {
            (Some(start), Some(_)) => start,
            _ => 0,
        }
    }

    /// `None` means unbounded. An empty or inverted window still yields one row.
    pub fn limit(&self) -> Option<usize> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start).max(1)),
            _ => None,
        }
    }
}

/// Random 32-character lowercase hex identifier.
pub fn generate_uuid() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn working(num: Option<i64>, total: Option<i64>) -> StatusRecord {
        StatusRecord::build(
            "job",
            1_000,
            &[StatusFields {
                status: Some(JobStatus::Working),
                num,
                total,
                ..Default::default()
            }
            .into()],
        )
    }

    #[test]
    fn test_build_defaults_to_queued_at_now() {
        let record = StatusRecord::build("abc", 1_234, &[]);
        assert_eq!(record.uuid, "abc");
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.time, 1_234);
        assert!(!record.kill_requested);
        assert!(record.name.is_none());
    }

    #[test]
    fn test_build_merges_updates_in_order() {
        let record = StatusRecord::build(
            "abc",
            0,
            &[
                StatusFields {
                    name: Some("first".into()),
                    num: Some(1),
                    ..Default::default()
                }
                .into(),
                "hello".into(),
                StatusFields {
                    name: Some("second".into()),
                    total: Some(10),
                    ..Default::default()
                }
                .into(),
                JobStatus::Working.into(),
            ],
        );

        assert_eq!(record.uuid, "abc");
        assert_eq!(record.name.as_deref(), Some("second"));
        assert_eq!(record.message.as_deref(), Some("hello"));
        assert_eq!(record.num, Some(1));
        assert_eq!(record.total, Some(10));
        assert_eq!(record.status, JobStatus::Working);
    }

    #[test]
    fn test_later_message_overrides_earlier() {
        let record = StatusRecord::build("abc", 0, &["one".into(), "two".into()]);
        assert_eq!(record.message.as_deref(), Some("two"));
    }

    #[test]
    fn test_time_can_be_overridden_by_update() {
        let record = StatusRecord::build(
            "abc",
            500,
            &[StatusFields {
                time: Some(10),
                ..Default::default()
            }
            .into()],
        );
        assert_eq!(record.time, 10);
    }

    #[test]
    fn test_pct_complete_completed_is_always_100() {
        let mut record = working(Some(3), Some(10));
        record.status = JobStatus::Completed;
        assert_eq!(record.pct_complete(), 100);
    }

    #[test]
    fn test_pct_complete_queued_is_always_0() {
        let mut record = working(Some(3), Some(10));
        record.status = JobStatus::Queued;
        assert_eq!(record.pct_complete(), 0);
    }

    #[test]
    fn test_pct_complete_working() {
        assert_eq!(working(Some(3), Some(10)).pct_complete(), 30);
        assert_eq!(working(Some(1), Some(3)).pct_complete(), 33);
        assert_eq!(working(Some(29), Some(100)).pct_complete(), 29);
        assert_eq!(working(None, Some(10)).pct_complete(), 0);
    }

    #[test]
    fn test_pct_complete_zero_total_counts_as_one() {
        assert_eq!(working(Some(5), Some(0)).pct_complete(), 500);
        assert_eq!(working(Some(5), None).pct_complete(), 500);
    }

    #[test]
    fn test_pct_complete_truncates_toward_zero() {
        assert_eq!(working(Some(-1), Some(3)).pct_complete(), -33);
    }

    #[test]
    fn test_pct_complete_large_counters() {
        let big = 100_000_000_000_000_000;
        assert_eq!(working(Some(big), Some(big)).pct_complete(), 100);
        assert_eq!(working(Some(i64::MAX), Some(i64::MAX)).pct_complete(), 100);
        assert_eq!(working(Some(i64::MAX), Some(2)).pct_complete(), i64::MAX);
        assert_eq!(working(Some(i64::MIN), Some(-1)).pct_complete(), i64::MAX);
        assert_eq!(working(Some(i64::MIN), Some(1)).pct_complete(), i64::MIN);
    }

    #[test]
    fn test_killable() {
        for status in JobStatus::ALL {
            let mut record = working(None, None);
            record.status = status;
            let expected = !matches!(
                status,
                JobStatus::Failed | JobStatus::Completed | JobStatus::Killed
            );
            assert_eq!(record.killable(), expected, "status {}", status);
        }
    }

    #[test]
    fn test_status_predicates() {
        let mut record = working(None, None);
        assert!(record.is_working());
        assert!(!record.is_queued());

        record.status = JobStatus::Failed;
        assert!(record.is_failed());
        assert!(!record.is_completed());
        assert!(!record.is_killed());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("running"), None);
    }

    #[test]
    fn test_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Working));
        assert!(JobStatus::Working.can_transition_to(JobStatus::Killed));
        assert!(JobStatus::Working.can_transition_to(JobStatus::Working));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Killed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Working));
        assert!(!JobStatus::Killed.can_transition_to(JobStatus::Killed));
    }

    #[test]
    fn test_snapshot_includes_pct_complete() {
        let mut options = JobOptions::new();
        options.insert("num".to_string(), json!(10));
        let record = StatusRecord::build(
            "abc",
            42,
            &[StatusFields {
                status: Some(JobStatus::Working),
                name: Some("Job".into()),
                options: Some(options),
                num: Some(3),
                total: Some(10),
                ..Default::default()
            }
            .into()],
        );

        let value = serde_json::to_value(record.snapshot()).unwrap();
        assert_eq!(value["uuid"], "abc");
        assert_eq!(value["status"], "working");
        assert_eq!(value["time"], 42);
        assert_eq!(value["options"]["num"], 10);
        assert_eq!(value["kill_requested"], false);
        assert_eq!(value["pct_complete"], 30);
    }

    #[test]
    fn test_created_at() {
        let record = StatusRecord::build("abc", 86_400, &[]);
        let created_at = record.created_at().unwrap();
        assert_eq!(created_at.timestamp(), 86_400);
    }

    #[test]
    fn test_page_range() {
        let all = PageRange::all();
        assert_eq!(all.skip(), 0);
        assert_eq!(all.limit(), None);

        let half_open = PageRange {
            start: Some(5),
            end: None,
        };
        assert_eq!(half_open.skip(), 0);
        assert_eq!(half_open.limit(), None);

        let page = PageRange::new(10, 30);
        assert_eq!(page.skip(), 10);
        assert_eq!(page.limit(), Some(20));

        assert_eq!(PageRange::new(4, 4).limit(), Some(1));
        assert_eq!(PageRange::new(9, 2).limit(), Some(1));
    }

    #[test]
    fn test_generate_uuid_is_hex() {
        let id = generate_uuid();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_uuid());
    }
}
