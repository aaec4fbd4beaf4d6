//! Review sessions and their store.
//!
//! A session owns everything mutable about one PR review: the changed-file
//! list, cached per-file diffs, and the accumulated review results. The
//! store is injected so the core never touches a process global; the
//! bundled implementation is an in-memory map with TTL expiry on access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::jira::IssueSnapshot;
use crate::domain::vcs::PrRef;
use crate::error::AssayError;
use crate::types::{FileReviewResult, ReviewStatus};

/// How a file changed in the PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// One changed file tracked by a session. The diff and head content are
/// cached lazily the first time a review resolves them.
#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: String,
    pub change_type: ChangeType,
    pub additions: u32,
    pub deletions: u32,
    pub review_status: ReviewStatus,
    pub diff_text: Option<String>,
    pub content_at_head: Option<String>,
}

impl ChangedFile {
    pub fn new(path: String, change_type: ChangeType, additions: u32, deletions: u32) -> Self {
        Self {
            path,
            change_type,
            additions,
            deletions,
            review_status: ReviewStatus::Pending,
            diff_text: None,
            content_at_head: None,
        }
    }
}

#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub pr: PrRef,
    pub issue: Option<IssueSnapshot>,
    pub prompt: String,
    pub model: String,
    pub language: String,
    pub files: Vec<ChangedFile>,
    pub reviews: HashMap<String, FileReviewResult>,
    pub in_flight: bool,
}

impl SessionState {
    pub fn new(
        pr: PrRef,
        issue: Option<IssueSnapshot>,
        prompt: String,
        model: String,
        language: String,
        files: Vec<ChangedFile>,
        ttl: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            expires_at: now + ttl,
            pr,
            issue,
            prompt,
            model,
            language,
            files,
            reviews: HashMap::new(),
            in_flight: false,
        }
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut ChangedFile> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    pub fn set_file_status(&mut self, path: &str, status: ReviewStatus) {
        if let Some(f) = self.file_mut(path) {
            f.review_status = status;
        }
    }
}

/// Sessions are shared behind a mutex; locks are held only for short,
/// non-awaiting critical sections.
pub type SharedSession = Arc<Mutex<SessionState>>;

/// A poisoned session mutex only means a panic mid-mutation of plain data;
/// the map stays usable.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

/// Injected session store: get/put/delete/list. Expiry semantics are the
/// implementation's business.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<SharedSession>;
    fn put(&self, session: SessionState) -> SharedSession;
    fn delete(&self, id: &str);
    fn list_ids(&self) -> Vec<String>;
}

/// Process-local store with TTL checked on every read.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SharedSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Option<SharedSession> {
        let mut map = self.map();
        let session = map.get(id)?.clone();
        let expired = lock_session(&session).expires_at <= Instant::now();
        if expired {
            map.remove(id);
            return None;
        }
        Some(session)
    }

    fn put(&self, session: SessionState) -> SharedSession {
        let id = session.id.clone();
        let shared = Arc::new(Mutex::new(session));
        self.map().insert(id, shared.clone());
        shared
    }

    fn delete(&self, id: &str) {
        self.map().remove(id);
    }

    fn list_ids(&self) -> Vec<String> {
        self.map().keys().cloned().collect()
    }
}

/// RAII handle for the session's exclusivity flag. Acquiring it while an
/// operation is in flight is a `Busy` rejection, never a queue; dropping it
/// clears the flag on every exit path, including panics.
pub struct InFlightGuard {
    session: SharedSession,
}

impl InFlightGuard {
    pub fn acquire(session: &SharedSession) -> Result<Self, AssayError> {
        let mut s = lock_session(session);
        if s.in_flight {
            return Err(AssayError::Busy);
        }
        s.in_flight = true;
        drop(s);
        Ok(Self {
            session: session.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_session(&self.session).in_flight = false;
    }
}
