//! Optimistic like/save state for one post as seen by one viewer.
//!
//! Local state changes the moment a toggle is invoked; the matching remote
//! mutation is queued to the manager's worker thread and reports back over a
//! channel. One worker runs the calls one at a time, so full-replace like
//! writes reach the backend in the order they were issued. Settled results
//! are only observed through [`PostInteractions::poll`] or
//! [`PostInteractions::settle`], so every state transition happens on the
//! owner's thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{InteractionService, RemoteCall};
use crate::model::{Post, SavedRecord, ViewerQuery};

/// What happens to optimistic state when its remote mutation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep the optimistic value until the next snapshot refresh.
    #[default]
    Retain,
    /// Restore the last value the backend acknowledged, unless a newer
    /// toggle of the same kind has already been issued.
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MissingIdentifier {
    #[error("post identifier is missing")]
    Post,
    #[error("viewer identifier is missing")]
    Viewer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    Dispatched(RemoteCall),
    Skipped(MissingIdentifier),
}

impl Toggle {
    pub fn dispatched(&self) -> Option<&RemoteCall> {
        match self {
            Toggle::Dispatched(call) => Some(call),
            Toggle::Skipped(_) => None,
        }
    }
}

/// A remote mutation that has reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub call: RemoteCall,
    pub record: Option<SavedRecord>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeIcon {
    Liked,
    Unliked,
}

impl LikeIcon {
    pub fn asset(self) -> &'static str {
        match self {
            LikeIcon::Liked => "/assets/icons/liked.svg",
            LikeIcon::Unliked => "/assets/icons/like.svg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveIcon {
    Saved,
    Unsaved,
}

impl SaveIcon {
    pub fn asset(self) -> &'static str {
        match self {
            SaveIcon::Saved => "/assets/icons/saved.svg",
            SaveIcon::Unsaved => "/assets/icons/save.svg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostStatsView {
    pub like_count: usize,
    pub like_icon: LikeIcon,
    pub save_icon: SaveIcon,
}

pub fn is_liked(likes: &[String], viewer_id: &str) -> bool {
    likes.iter().any(|id| id == viewer_id)
}

/// The viewer's saved record for `post_id`, if the snapshot has one.
pub fn derive_saved_record<'a>(viewer: &'a ViewerQuery, post_id: &str) -> Option<&'a SavedRecord> {
    if post_id.is_empty() {
        return None;
    }
    viewer.viewer()?.saved_record_for(post_id)
}

struct Request {
    seq: u64,
    call: RemoteCall,
}

struct Response {
    seq: u64,
    call: RemoteCall,
    result: Result<Option<SavedRecord>, String>,
}

type Service = Arc<dyn InteractionService + Send + Sync>;

pub struct PostInteractions {
    post_id: String,
    likes: Vec<String>,
    saved: bool,
    saved_record: Option<SavedRecord>,
    policy: FailurePolicy,
    service: Service,
    request_tx: Option<Sender<Request>>,
    response_tx: Sender<Response>,
    response_rx: Receiver<Response>,
    in_flight: usize,
    next_seq: u64,
    latest_like: u64,
    latest_save: u64,
    // Last values the backend confirmed; the rollback targets.
    acked_likes: Vec<String>,
    acked_saved: bool,
}

impl PostInteractions {
    pub fn new(
        post: &Post,
        viewer: &ViewerQuery,
        service: Arc<dyn InteractionService + Send + Sync>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut state = Self {
            post_id: post.id.trim().to_string(),
            likes: post.likes.clone(),
            saved: false,
            saved_record: None,
            policy: FailurePolicy::default(),
            service,
            request_tx: None,
            response_tx,
            response_rx,
            in_flight: 0,
            next_seq: 0,
            latest_like: 0,
            latest_save: 0,
            acked_likes: post.likes.clone(),
            acked_saved: false,
        };
        state.sync_viewer(viewer);
        state
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn likes(&self) -> &[String] {
        &self.likes
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn saved_record(&self) -> Option<&SavedRecord> {
        self.saved_record.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn view(&self, viewer_id: &str) -> PostStatsView {
        PostStatsView {
            like_count: self.likes.len(),
            like_icon: if is_liked(&self.likes, viewer_id) {
                LikeIcon::Liked
            } else {
                LikeIcon::Unliked
            },
            save_icon: if self.saved {
                SaveIcon::Saved
            } else {
                SaveIcon::Unsaved
            },
        }
    }

    /// Re-derives the saved flag from a fresh viewer snapshot, discarding any
    /// optimistic value.
    pub fn sync_viewer(&mut self, viewer: &ViewerQuery) {
        self.saved_record = derive_saved_record(viewer, &self.post_id).cloned();
        self.saved = self.saved_record.is_some();
        self.acked_saved = self.saved;
    }

    pub fn toggle_like(&mut self, viewer_id: &str) -> Toggle {
        if self.post_id.is_empty() {
            return self.skip("like", MissingIdentifier::Post);
        }
        if viewer_id.trim().is_empty() {
            return self.skip("like", MissingIdentifier::Viewer);
        }

        let mut likes = self.likes.clone();
        if let Some(index) = likes.iter().position(|id| id == viewer_id) {
            likes.remove(index);
        } else {
            likes.push(viewer_id.to_string());
        }
        self.likes = likes.clone();

        let call = RemoteCall::UpdateLikes {
            post_id: self.post_id.clone(),
            likes,
        };
        self.dispatch(call)
    }

    pub fn toggle_save(&mut self, viewer_id: &str) -> Toggle {
        if let Some(record) = self.saved_record.as_ref() {
            let call = RemoteCall::DeleteSave {
                record_id: record.id.clone(),
            };
            self.saved = false;
            return self.dispatch(call);
        }

        if self.post_id.is_empty() {
            return self.skip("save", MissingIdentifier::Post);
        }
        if viewer_id.trim().is_empty() {
            return self.skip("save", MissingIdentifier::Viewer);
        }

        let call = RemoteCall::CreateSave {
            post_id: self.post_id.clone(),
            viewer_id: viewer_id.to_string(),
        };
        self.saved = true;
        self.dispatch(call)
    }

    /// Applies every result that has already arrived, without blocking.
    pub fn poll(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            settled.push(self.apply(response));
        }
        settled
    }

    /// Blocks until all in-flight calls have reported or `timeout` elapses.
    pub fn settle(&mut self, timeout: Duration) -> Vec<Settled> {
        let deadline = Instant::now() + timeout;
        let mut settled = Vec::new();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => settled.push(self.apply(response)),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        post_id = %self.post_id,
                        in_flight = self.in_flight,
                        "remote calls still pending after {:?}",
                        timeout
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        settled
    }

    fn skip(&self, action: &str, missing: MissingIdentifier) -> Toggle {
        warn!(post_id = %self.post_id, "cannot {action} post: {missing}");
        Toggle::Skipped(missing)
    }

    fn dispatch(&mut self, call: RemoteCall) -> Toggle {
        debug!(post_id = %self.post_id, call = ?call, "dispatching remote call");
        self.next_seq += 1;
        let seq = self.next_seq;
        match call {
            RemoteCall::UpdateLikes { .. } => self.latest_like = seq,
            RemoteCall::CreateSave { .. } | RemoteCall::DeleteSave { .. } => {
                self.latest_save = seq
            }
        }
        self.in_flight += 1;

        if self.request_tx.is_none() {
            self.request_tx = Some(spawn_worker(
                Arc::clone(&self.service),
                self.response_tx.clone(),
            ));
        }
        let request = Request {
            seq,
            call: call.clone(),
        };
        if let Some(Err(err)) = self.request_tx.as_ref().map(|tx| tx.send(request)) {
            let Request { seq, call } = err.into_inner();
            let _ = self.response_tx.send(Response {
                seq,
                call,
                result: Err("interaction worker stopped".to_string()),
            });
        }

        Toggle::Dispatched(call)
    }

    fn apply(&mut self, response: Response) -> Settled {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Response { seq, call, result } = response;

        match result {
            Ok(record) => {
                debug!(post_id = %self.post_id, call = call.label(), "remote call settled");
                self.acknowledge(&call);
                Settled {
                    call,
                    record,
                    error: None,
                }
            }
            Err(error) => {
                warn!(
                    post_id = %self.post_id,
                    "failed to {}: {}",
                    call.label(),
                    error
                );
                if self.policy == FailurePolicy::Rollback {
                    self.roll_back(seq, &call);
                }
                Settled {
                    call,
                    record: None,
                    error: Some(error),
                }
            }
        }
    }

    fn acknowledge(&mut self, call: &RemoteCall) {
        match call {
            RemoteCall::UpdateLikes { likes, .. } => self.acked_likes = likes.clone(),
            RemoteCall::CreateSave { .. } => self.acked_saved = true,
            RemoteCall::DeleteSave { .. } => self.acked_saved = false,
        }
    }

    // Only the newest call of a kind may revert; older failures were already
    // superseded locally.
    fn roll_back(&mut self, seq: u64, call: &RemoteCall) {
        match call {
            RemoteCall::UpdateLikes { .. } if seq == self.latest_like => {
                self.likes = self.acked_likes.clone();
            }
            RemoteCall::CreateSave { .. } | RemoteCall::DeleteSave { .. }
                if seq == self.latest_save =>
            {
                self.saved = self.acked_saved;
            }
            _ => {}
        }
    }
}

fn spawn_worker(service: Service, responses: Sender<Response>) -> Sender<Request> {
    let (tx, rx) = unbounded::<Request>();
    thread::spawn(move || {
        // Ends once the owner drops its sender and the queue is drained.
        for Request { seq, call } in rx {
            let result = call
                .execute(service.as_ref())
                .map_err(|err| format!("{err:#}"));
            // The receiver is gone once the owner is dropped; nothing to report to.
            let _ = responses.send(Response { seq, call, result });
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockBackend, PostService};
    use crate::model::Viewer;

    const WAIT: Duration = Duration::from_secs(5);

    fn post(id: &str, likes: &[&str]) -> Post {
        Post {
            id: id.into(),
            likes: likes.iter().map(|id| id.to_string()).collect(),
            ..Post::default()
        }
    }

    fn viewer(id: &str, saves: &[(&str, &str)]) -> ViewerQuery {
        ViewerQuery::Ready(Viewer {
            id: id.into(),
            save: saves
                .iter()
                .map(|(record, post)| SavedRecord::new(*record, *post, Some(id.to_string())))
                .collect(),
            ..Viewer::default()
        })
    }

    fn setup(post: &Post, query: &ViewerQuery) -> (Arc<MockBackend>, PostInteractions) {
        let backend = Arc::new(MockBackend::new(Viewer::default()).with_post(post.clone()));
        let state = PostInteractions::new(post, query, backend.clone());
        (backend, state)
    }

    #[test]
    fn is_liked_checks_membership() {
        let likes = vec!["U2".to_string(), "U3".to_string()];
        assert!(is_liked(&likes, "U3"));
        assert!(!is_liked(&likes, "U1"));
        assert!(!is_liked(&[], "U1"));
    }

    #[test]
    fn toggle_like_appends_and_sends_full_list() {
        let item = post("P1", &["U2", "U3"]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));

        let view = state.view("U1");
        assert_eq!(view.like_count, 2);
        assert_eq!(view.like_icon, LikeIcon::Unliked);

        let toggle = state.toggle_like("U1");
        let expected = vec!["U2".to_string(), "U3".to_string(), "U1".to_string()];
        assert_eq!(
            toggle,
            Toggle::Dispatched(RemoteCall::UpdateLikes {
                post_id: "P1".into(),
                likes: expected.clone(),
            })
        );
        let view = state.view("U1");
        assert_eq!(view.like_count, 3);
        assert_eq!(view.like_icon, LikeIcon::Liked);

        let settled = state.settle(WAIT);
        assert_eq!(settled.len(), 1);
        assert!(settled[0].error.is_none());
        assert_eq!(
            backend.calls(),
            vec![RemoteCall::UpdateLikes {
                post_id: "P1".into(),
                likes: expected,
            }]
        );
    }

    #[test]
    fn toggle_like_removes_single_occurrence() {
        let item = post("P1", &["U1", "U2"]);
        let (_backend, mut state) = setup(&item, &viewer("U1", &[]));
        state.toggle_like("U1");
        assert_eq!(state.likes(), ["U2".to_string()]);
        state.settle(WAIT);
    }

    #[test]
    fn double_like_restores_membership_and_calls_twice() {
        let item = post("P1", &["U2", "U3"]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        state.toggle_like("U1");
        state.toggle_like("U1");
        assert_eq!(state.likes(), item.likes.as_slice());
        let settled = state.settle(WAIT);
        assert_eq!(settled.len(), 2);
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn like_without_post_id_is_skipped() {
        let item = post("", &["U2"]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        assert_eq!(
            state.toggle_like("U1"),
            Toggle::Skipped(MissingIdentifier::Post)
        );
        assert_eq!(state.likes(), ["U2".to_string()]);
        assert_eq!(state.in_flight(), 0);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn like_without_viewer_id_is_skipped() {
        let item = post("P1", &[]);
        let (_backend, mut state) = setup(&item, &viewer("U1", &[]));
        assert_eq!(
            state.toggle_like(""),
            Toggle::Skipped(MissingIdentifier::Viewer)
        );
        assert!(state.likes().is_empty());
    }

    #[test]
    fn saved_is_derived_from_viewer_snapshot() {
        let item = post("P1", &[]);
        let (_backend, mut state) = setup(&item, &ViewerQuery::Pending);
        assert!(!state.is_saved());

        state.sync_viewer(&viewer("U1", &[("R9", "P1")]));
        assert!(state.is_saved());
        assert_eq!(state.saved_record().map(|r| r.id.as_str()), Some("R9"));

        state.sync_viewer(&viewer("U1", &[("R3", "P7")]));
        assert!(!state.is_saved());

        state.sync_viewer(&ViewerQuery::Failed("offline".into()));
        assert!(!state.is_saved());
    }

    #[test]
    fn toggle_save_deletes_resolved_record() {
        let item = post("P1", &[]);
        let query = viewer("U1", &[("R9", "P1")]);
        let backend = Arc::new(MockBackend::new(Viewer {
            id: "U1".into(),
            save: vec![SavedRecord::new("R9", "P1", Some("U1".into()))],
            ..Viewer::default()
        }));
        let mut state = PostInteractions::new(&item, &query, backend.clone());
        assert_eq!(state.view("U1").save_icon, SaveIcon::Saved);

        let toggle = state.toggle_save("U1");
        assert_eq!(
            toggle.dispatched(),
            Some(&RemoteCall::DeleteSave {
                record_id: "R9".into()
            })
        );
        assert!(!state.is_saved());
        state.settle(WAIT);
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn toggle_save_creates_when_unresolved() {
        let item = post("P1", &[]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        let toggle = state.toggle_save("U1");
        assert_eq!(
            toggle.dispatched(),
            Some(&RemoteCall::CreateSave {
                post_id: "P1".into(),
                viewer_id: "U1".into(),
            })
        );
        assert!(state.is_saved());
        let settled = state.settle(WAIT);
        assert_eq!(settled[0].record.as_ref().map(|r| r.post.id.as_str()), Some("P1"));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn save_without_post_id_changes_nothing() {
        let item = post("", &[]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        assert_eq!(
            state.toggle_save("U1"),
            Toggle::Skipped(MissingIdentifier::Post)
        );
        assert!(!state.is_saved());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn failure_keeps_optimistic_state_by_default() {
        let item = post("P1", &["U2"]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        backend.fail_with("network down");
        state.toggle_like("U1");
        let settled = state.settle(WAIT);
        assert_eq!(settled[0].error.as_deref(), Some("mock: network down"));
        assert_eq!(state.likes(), ["U2".to_string(), "U1".to_string()]);
    }

    #[test]
    fn rollback_policy_restores_prior_state() {
        let item = post("P1", &["U2"]);
        let (backend, state) = setup(&item, &viewer("U1", &[]));
        let mut state = state.with_policy(FailurePolicy::Rollback);
        backend.fail_with("network down");

        state.toggle_like("U1");
        state.toggle_save("U1");
        state.settle(WAIT);

        assert_eq!(state.likes(), ["U2".to_string()]);
        assert!(!state.is_saved());
    }

    fn like_response(seq: u64, likes: &[&str], result: Result<(), &str>) -> Response {
        Response {
            seq,
            call: RemoteCall::UpdateLikes {
                post_id: "P1".into(),
                likes: likes.iter().map(|id| id.to_string()).collect(),
            },
            result: result.map(|_| None).map_err(str::to_string),
        }
    }

    #[test]
    fn rollback_skips_when_newer_write_exists() {
        let item = post("P1", &["U2"]);
        let (backend, state) = setup(&item, &viewer("U1", &[]));
        let mut state = state.with_policy(FailurePolicy::Rollback);
        backend.fail_with("network down");

        state.toggle_like("U1");
        state.toggle_like("U3");
        state.apply(like_response(1, &["U2", "U1"], Err("network down")));
        assert_eq!(
            state.likes(),
            ["U2".to_string(), "U1".to_string(), "U3".to_string()]
        );
    }

    #[test]
    fn rollback_after_two_failures_restores_acknowledged_likes() {
        let item = post("P1", &["U2"]);
        let (backend, state) = setup(&item, &viewer("U1", &[]));
        let mut state = state.with_policy(FailurePolicy::Rollback);
        backend.fail_with("network down");

        state.toggle_like("U1");
        state.toggle_like("U1");
        let settled = state.settle(WAIT);
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|result| result.error.is_some()));
        assert_eq!(state.likes(), ["U2".to_string()]);
        assert_eq!(state.view("U1").like_icon, LikeIcon::Unliked);
    }

    #[test]
    fn rollback_returns_to_last_successful_write() {
        let item = post("P1", &["U2"]);
        let (backend, state) = setup(&item, &viewer("U1", &[]));
        let mut state = state.with_policy(FailurePolicy::Rollback);
        backend.fail_with("network down");

        state.toggle_like("U1");
        state.toggle_like("U3");
        state.apply(like_response(1, &["U2", "U1"], Ok(())));
        state.apply(like_response(2, &["U2", "U1", "U3"], Err("network down")));
        assert_eq!(state.likes(), ["U2".to_string(), "U1".to_string()]);
    }

    #[test]
    fn rollback_of_save_uses_snapshot_value() {
        let item = post("P1", &[]);
        let query = viewer("U1", &[("R9", "P1")]);
        let backend = Arc::new(MockBackend::new(Viewer::default()));
        let mut state = PostInteractions::new(&item, &query, backend.clone())
            .with_policy(FailurePolicy::Rollback);
        backend.fail_with("network down");

        state.toggle_save("U1");
        state.toggle_save("U1");
        assert!(!state.is_saved());
        state.settle(WAIT);
        assert!(state.is_saved());
    }

    #[test]
    fn calls_reach_backend_in_issue_order() {
        let item = post("P1", &["U2"]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        state.toggle_like("U1");
        state.toggle_like("U3");
        state.toggle_like("U1");
        state.settle(WAIT);

        let sent: Vec<Vec<String>> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::UpdateLikes { likes, .. } => Some(likes),
                _ => None,
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                vec!["U2".to_string(), "U1".to_string()],
                vec!["U2".to_string(), "U1".to_string(), "U3".to_string()],
                vec!["U2".to_string(), "U3".to_string()],
            ]
        );
        assert_eq!(backend.get_post("P1").unwrap().likes, state.likes());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn skipped_toggle_logs_a_warning() {
        let item = post("P1", &["U2"]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));

        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let toggle = tracing::subscriber::with_default(subscriber, || state.toggle_like(""));

        assert_eq!(toggle, Toggle::Skipped(MissingIdentifier::Viewer));
        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"), "{output}");
        assert!(
            output.contains("cannot like post: viewer identifier is missing"),
            "{output}"
        );
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn dropping_with_calls_in_flight_is_quiet() {
        let item = post("P1", &[]);
        let (backend, mut state) = setup(&item, &viewer("U1", &[]));
        state.toggle_like("U1");
        drop(state);
        // The worker may still be running; its send to the dropped receiver is ignored.
        let deadline = Instant::now() + WAIT;
        while backend.calls().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(backend.calls().len(), 1);
    }
}
