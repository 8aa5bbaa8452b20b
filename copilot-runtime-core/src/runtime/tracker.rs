use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::RuntimeError;
use crate::config::DEFAULT_MAX_INTERRUPTED_RUNS;
use crate::events::RunStatus;

/// What the runtime remembers about a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub thread_id: String,
    pub agent_name: String,
    pub parent_run_id: Option<String>,
    /// Ancestor run ids, oldest first
    pub lineage: Vec<String>,
    pub status: RunStatus,
}

impl RunRecord {
    pub fn new(thread_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            agent_name: agent_name.into(),
            parent_run_id: None,
            lineage: Vec::new(),
            status: RunStatus::Pending,
        }
    }

    /// Record for a sub-run continuing `parent_run_id`
    pub fn resumed_from(parent_run_id: &str, parent: &RunRecord) -> Self {
        let mut lineage = parent.lineage.clone();
        lineage.push(parent_run_id.to_string());
        Self {
            thread_id: parent.thread_id.clone(),
            agent_name: parent.agent_name.clone(),
            parent_run_id: Some(parent_run_id.to_string()),
            lineage,
            status: RunStatus::Pending,
        }
    }
}

/// Live and interrupted runs
///
/// Records leave the tracker when their run reaches a terminal status.
/// Interrupted runs stay until they are resumed or discarded; past the
/// capacity the oldest interrupted run is evicted.
#[derive(Debug)]
pub struct RunTracker {
    runs: Mutex<Runs>,
    max_interrupted: usize,
}

#[derive(Debug, Default)]
struct Runs {
    records: HashMap<String, RunRecord>,
    /// Interrupted run ids, oldest first
    interrupted: VecDeque<String>,
}

impl Runs {
    fn forget_interrupted(&mut self, run_id: &str) {
        self.interrupted.retain(|id| id != run_id);
    }

    fn park(&mut self, run_id: &str, max: usize) {
        self.interrupted.push_back(run_id.to_string());
        while self.interrupted.len() > max {
            let Some(oldest) = self.interrupted.pop_front() else {
                break;
            };
            log::info!("evicting interrupted run {oldest}");
            self.records.remove(&oldest);
        }
    }
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self::with_max_interrupted(DEFAULT_MAX_INTERRUPTED_RUNS)
    }

    /// Tracker keeping at most `max` interrupted runs
    pub fn with_max_interrupted(max: usize) -> Self {
        Self {
            runs: Mutex::new(Runs::default()),
            max_interrupted: max.max(1),
        }
    }

    pub(crate) fn begin(&self, run_id: &str, record: RunRecord) -> Result<(), RuntimeError> {
        let mut runs = self.runs.lock();
        if runs.records.contains_key(run_id) {
            return Err(RuntimeError::RunExists(run_id.to_string()));
        }
        runs.records.insert(run_id.to_string(), record);
        Ok(())
    }

    /// Move a run to `next`, returning false if the transition is not allowed
    pub(crate) fn transition(&self, run_id: &str, next: RunStatus) -> bool {
        let mut runs = self.runs.lock();
        let Some(record) = runs.records.get_mut(run_id) else {
            log::warn!("status change for untracked run {run_id}");
            return false;
        };
        if !record.status.can_transition_to(next) {
            log::warn!(
                "rejected transition {:?} -> {next:?} for run {run_id}",
                record.status
            );
            return false;
        }
        let was_interrupted = record.status == RunStatus::Interrupted;
        record.status = next;
        if was_interrupted {
            runs.forget_interrupted(run_id);
        }
        if next.is_terminal() {
            runs.records.remove(run_id);
        } else if next == RunStatus::Interrupted {
            runs.park(run_id, self.max_interrupted);
        }
        true
    }

    /// An interrupted run, without claiming it
    pub fn interrupted(&self, run_id: &str) -> Option<RunRecord> {
        self.runs
            .lock()
            .records
            .get(run_id)
            .filter(|r| r.status == RunStatus::Interrupted)
            .cloned()
    }

    /// Claim an interrupted run for resumption
    ///
    /// The parent moves back to streaming and is handed over to the sub-run;
    /// a second claim for the same run fails.
    pub(crate) fn take_interrupted(&self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        let mut runs = self.runs.lock();
        match runs.records.remove(run_id) {
            Some(mut record) if record.status == RunStatus::Interrupted => {
                runs.forget_interrupted(run_id);
                record.status = RunStatus::Streaming;
                Ok(record)
            }
            Some(record) => {
                runs.records.insert(run_id.to_string(), record);
                Err(RuntimeError::UnknownRun(run_id.to_string()))
            }
            None => Err(RuntimeError::UnknownRun(run_id.to_string())),
        }
    }

    /// Hand a claimed run back so it can be resumed again
    pub(crate) fn restore_interrupted(&self, run_id: &str, mut record: RunRecord) {
        let mut runs = self.runs.lock();
        if runs.records.contains_key(run_id) {
            log::warn!("run {run_id} is tracked again, not restoring it");
            return;
        }
        log::debug!("run {run_id} is awaiting resumption again");
        record.status = RunStatus::Interrupted;
        runs.records.insert(run_id.to_string(), record);
        runs.park(run_id, self.max_interrupted);
    }

    /// Drop an interrupted run that will not be resumed
    ///
    /// Returns the removed record, or `None` if `run_id` is not interrupted.
    pub fn discard(&self, run_id: &str) -> Option<RunRecord> {
        let mut runs = self.runs.lock();
        if runs.records.get(run_id)?.status != RunStatus::Interrupted {
            return None;
        }
        runs.forget_interrupted(run_id);
        runs.records.remove(run_id)
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.lock().records.get(run_id).map(|r| r.status)
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.lock().records.get(run_id).cloned()
    }

    /// Number of interrupted runs awaiting resumption
    pub fn interrupted_len(&self) -> usize {
        self.runs.lock().interrupted.len()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.lock().records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_removes_finished_runs() {
        let tracker = RunTracker::new();
        tracker.begin("r1", RunRecord::new("t1", "calc")).unwrap();
        assert_eq!(tracker.status("r1"), Some(RunStatus::Pending));

        assert!(tracker.transition("r1", RunStatus::Streaming));
        assert!(!tracker.transition("r1", RunStatus::Pending));
        assert!(tracker.transition("r1", RunStatus::Finished));
        assert!(tracker.status("r1").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_duplicate_run_id() {
        let tracker = RunTracker::new();
        tracker.begin("r1", RunRecord::new("t1", "calc")).unwrap();
        let err = tracker.begin("r1", RunRecord::new("t2", "calc")).unwrap_err();
        assert!(matches!(err, RuntimeError::RunExists(id) if id == "r1"));
    }

    #[test]
    fn test_interrupted_run_is_claimed_once() {
        let tracker = RunTracker::new();
        tracker.begin("r1", RunRecord::new("t1", "planner")).unwrap();
        tracker.transition("r1", RunStatus::Streaming);
        tracker.transition("r1", RunStatus::Interrupted);
        assert!(tracker.interrupted("r1").is_some());

        let parent = tracker.take_interrupted("r1").unwrap();
        assert_eq!(parent.status, RunStatus::Streaming);
        assert!(matches!(
            tracker.take_interrupted("r1"),
            Err(RuntimeError::UnknownRun(_))
        ));

        let child = RunRecord::resumed_from("r1", &parent);
        assert_eq!(child.thread_id, "t1");
        assert_eq!(child.parent_run_id.as_deref(), Some("r1"));
        assert_eq!(child.lineage, vec!["r1".to_string()]);
    }

    #[test]
    fn test_streaming_run_cannot_be_resumed() {
        let tracker = RunTracker::new();
        tracker.begin("r1", RunRecord::new("t1", "planner")).unwrap();
        tracker.transition("r1", RunStatus::Streaming);
        assert!(tracker.interrupted("r1").is_none());
        assert!(tracker.take_interrupted("r1").is_err());
        assert_eq!(tracker.status("r1"), Some(RunStatus::Streaming));
    }

    fn interrupt(tracker: &RunTracker, run_id: &str) {
        tracker.begin(run_id, RunRecord::new("t1", "planner")).unwrap();
        tracker.transition(run_id, RunStatus::Streaming);
        tracker.transition(run_id, RunStatus::Interrupted);
    }

    #[test]
    fn test_oldest_interrupted_run_is_evicted() {
        let tracker = RunTracker::with_max_interrupted(2);
        interrupt(&tracker, "r1");
        interrupt(&tracker, "r2");
        tracker.begin("live", RunRecord::new("t2", "planner")).unwrap();
        interrupt(&tracker, "r3");

        assert!(tracker.interrupted("r1").is_none());
        assert!(tracker.interrupted("r2").is_some());
        assert!(tracker.interrupted("r3").is_some());
        assert_eq!(tracker.interrupted_len(), 2);
        assert_eq!(tracker.status("live"), Some(RunStatus::Pending));
    }

    #[test]
    fn test_claimed_run_no_longer_counts_toward_capacity() {
        let tracker = RunTracker::with_max_interrupted(1);
        interrupt(&tracker, "r1");
        tracker.take_interrupted("r1").unwrap();
        assert_eq!(tracker.interrupted_len(), 0);

        interrupt(&tracker, "r2");
        assert_eq!(tracker.interrupted_len(), 1);
        assert!(tracker.interrupted("r2").is_some());
    }

    #[test]
    fn test_restored_run_can_be_claimed_again() {
        let tracker = RunTracker::new();
        interrupt(&tracker, "r1");
        let parent = tracker.take_interrupted("r1").unwrap();

        tracker.restore_interrupted("r1", parent);
        assert_eq!(tracker.status("r1"), Some(RunStatus::Interrupted));
        assert!(tracker.take_interrupted("r1").is_ok());
    }

    #[test]
    fn test_discard_only_drops_interrupted_runs() {
        let tracker = RunTracker::new();
        interrupt(&tracker, "r1");
        tracker.begin("r2", RunRecord::new("t1", "planner")).unwrap();

        assert!(tracker.discard("r2").is_none());
        assert_eq!(tracker.discard("r1").map(|r| r.thread_id), Some("t1".to_string()));
        assert!(tracker.discard("r1").is_none());
        assert_eq!(tracker.interrupted_len(), 0);
        assert_eq!(tracker.len(), 1);
    }
}
