//! Per-session state: the active adapter handle, the stopped/running
//! flag, and the breakpoint registry with its merge-by-line semantics.

use crate::adapter::Adapter;
use crate::config::SourceBreakpointRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Server-side breakpoint info for one file: the
/// caller's request fields plus what the adapter reported back.
///
/// `requested_line` is the merge key: it is
/// always the line the caller most recently submitted for this entry,
/// never an adapter-corrected line, so a later `set_breakpoints` call
/// using the same source line replaces this entry rather than
/// duplicating it. `line` is the adapter-corrected line (CDP only;
/// DAP's `verified` line is usually the same as requested) shown to
/// callers via `list_breakpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBreakpoint {
    pub requested_line: i64,
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub verified: bool,
    pub id: Option<String>,
}

impl StoredBreakpoint {
    fn from_request(request: &SourceBreakpointRequest) -> Self {
        Self {
            requested_line: request.line,
            line: request.line,
            column: request.column,
            condition: request.condition.clone(),
            hit_condition: request.hit_condition.clone(),
            log_message: request.log_message.clone(),
            verified: false,
            id: None,
        }
    }

    fn as_request(&self) -> SourceBreakpointRequest {
        SourceBreakpointRequest {
            line: self.requested_line,
            column: self.column,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition.clone(),
            log_message: self.log_message.clone(),
        }
    }
}

/// Caller-facing rendering for `list_breakpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedBreakpoint {
    pub line: i64,
    pub verified: bool,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub id: Option<String>,
}

impl From<&StoredBreakpoint> for ListedBreakpoint {
    fn from(bp: &StoredBreakpoint) -> Self {
        Self {
            line: bp.line,
            verified: bp.verified,
            condition: bp.condition.clone(),
            hit_condition: bp.hit_condition.clone(),
            log_message: bp.log_message.clone(),
            id: bp.id.clone(),
        }
    }
}

/// A single active debug session. Owns the adapter
/// exclusively; `breakpoints` is one list per absolute file path,
/// `stopped_*` fields are set iff the debuggee is currently paused.
pub struct Session {
    pub id: String,
    pub adapter: Arc<dyn Adapter>,
    pub breakpoints: Mutex<HashMap<String, Vec<StoredBreakpoint>>>,
    pub stopped_thread_id: Mutex<Option<i64>>,
    pub stopped_reason: Mutex<Option<String>>,
}

impl Session {
    pub fn new(id: String, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            id,
            adapter,
            breakpoints: Mutex::new(HashMap::new()),
            stopped_thread_id: Mutex::new(None),
            stopped_reason: Mutex::new(None),
        }
    }

    /// Every resume attempt nulls the stopped fields,
    /// regardless of the operation's outcome.
    pub async fn mark_resumed(&self) {
        *self.stopped_thread_id.lock().await = None;
        *self.stopped_reason.lock().await = None;
    }

    pub async fn mark_stopped(&self, thread_id: Option<i64>, reason: Option<String>) {
        *self.stopped_thread_id.lock().await = thread_id;
        *self.stopped_reason.lock().await = reason;
    }

    /// Merge `requests` into `file`'s list by `requested_line`: a
    /// resubmission of a previously-requested line replaces that entry
    /// in place, preserving relative order; a new line is appended.
    /// Returns the full merged list, in the order it will be sent to the
    /// adapter (parallel with the adapter's response list).
    pub async fn merge_breakpoints(
        &self,
        file: &str,
        requests: Vec<SourceBreakpointRequest>,
    ) -> Vec<StoredBreakpoint> {
        let mut breakpoints = self.breakpoints.lock().await;
        let existing = breakpoints.entry(file.to_string()).or_default();

        for request in requests {
            if let Some(entry) = existing.iter_mut().find(|bp| bp.requested_line == request.line) {
                *entry = StoredBreakpoint::from_request(&request);
            } else {
                existing.push(StoredBreakpoint::from_request(&request));
            }
        }
        existing.clone()
    }

    pub fn to_adapter_requests(merged: &[StoredBreakpoint]) -> Vec<SourceBreakpointRequest> {
        merged.iter().map(StoredBreakpoint::as_request).collect()
    }

    /// Apply the adapter's parallel response list back onto the merged
    /// entries (by position) and store the result. Returns the updated
    /// list.
    pub async fn apply_breakpoint_results(
        &self,
        file: &str,
        results: Vec<crate::adapter::BreakpointResult>,
    ) -> Vec<StoredBreakpoint> {
        let mut breakpoints = self.breakpoints.lock().await;
        let existing = breakpoints.entry(file.to_string()).or_default();
        for (entry, result) in existing.iter_mut().zip(results.into_iter()) {
            entry.line = result.line;
            entry.verified = result.verified;
            entry.id = result.id;
        }
        existing.clone()
    }

    /// Remove the given lines (keyed on `requested_line`) from `file`'s
    /// list, or clear it entirely when `lines` is `None`. Drops the file
    /// from the registry once its list is empty.
    pub async fn remove_breakpoints(&self, file: &str, lines: Option<&[i64]>) -> Vec<StoredBreakpoint> {
        let mut breakpoints = self.breakpoints.lock().await;
        match lines {
            Some(lines) => {
                if let Some(existing) = breakpoints.get_mut(file) {
                    existing.retain(|bp| !lines.contains(&bp.requested_line));
                    if existing.is_empty() {
                        breakpoints.remove(file);
                        Vec::new()
                    } else {
                        existing.clone()
                    }
                } else {
                    Vec::new()
                }
            }
            None => {
                breakpoints.remove(file);
                Vec::new()
            }
        }
    }

    pub async fn list_breakpoints(&self) -> HashMap<String, Vec<ListedBreakpoint>> {
        let breakpoints = self.breakpoints.lock().await;
        breakpoints
            .iter()
            .map(|(file, bps)| (file.clone(), bps.iter().map(ListedBreakpoint::from).collect()))
            .collect()
    }
}
