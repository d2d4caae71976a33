use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use crate::backend;
use crate::model::{Creator, Post, SavedRecord, Viewer};

pub trait PostService: Send + Sync {
    fn get_post(&self, post_id: &str) -> Result<Post>;
}

pub trait ViewerService: Send + Sync {
    fn current_viewer(&self) -> Result<Viewer>;
}

pub trait InteractionService: Send + Sync {
    fn update_likes(&self, post_id: &str, likes: &[String]) -> Result<()>;
    fn create_save(&self, post_id: &str, viewer_id: &str) -> Result<SavedRecord>;
    fn delete_save(&self, record_id: &str) -> Result<()>;
}

/// A remote mutation as issued against an [`InteractionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    UpdateLikes { post_id: String, likes: Vec<String> },
    CreateSave { post_id: String, viewer_id: String },
    DeleteSave { record_id: String },
}

impl RemoteCall {
    pub fn label(&self) -> &'static str {
        match self {
            RemoteCall::UpdateLikes { .. } => "update likes",
            RemoteCall::CreateSave { .. } => "save post",
            RemoteCall::DeleteSave { .. } => "unsave post",
        }
    }

    /// Runs the call against `service`. Only a create returns a record.
    pub fn execute(&self, service: &dyn InteractionService) -> Result<Option<SavedRecord>> {
        match self {
            RemoteCall::UpdateLikes { post_id, likes } => {
                service.update_likes(post_id, likes).map(|_| None)
            }
            RemoteCall::CreateSave { post_id, viewer_id } => {
                service.create_save(post_id, viewer_id).map(Some)
            }
            RemoteCall::DeleteSave { record_id } => service.delete_save(record_id).map(|_| None),
        }
    }
}

pub struct BackendPostService {
    client: Arc<backend::Client>,
}

impl BackendPostService {
    pub fn new(client: Arc<backend::Client>) -> Self {
        Self { client }
    }
}

impl PostService for BackendPostService {
    fn get_post(&self, post_id: &str) -> Result<Post> {
        self.client
            .get_post(post_id)
            .with_context(|| format!("fetch post {post_id}"))
    }
}

pub struct BackendViewerService {
    client: Arc<backend::Client>,
}

impl BackendViewerService {
    pub fn new(client: Arc<backend::Client>) -> Self {
        Self { client }
    }
}

impl ViewerService for BackendViewerService {
    fn current_viewer(&self) -> Result<Viewer> {
        self.client.current_viewer().context("fetch current user")
    }
}

pub struct BackendInteractionService {
    client: Arc<backend::Client>,
}

impl BackendInteractionService {
    pub fn new(client: Arc<backend::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for BackendInteractionService {
    fn update_likes(&self, post_id: &str, likes: &[String]) -> Result<()> {
        self.client.update_likes(post_id, likes)
    }

    fn create_save(&self, post_id: &str, viewer_id: &str) -> Result<SavedRecord> {
        self.client.create_save(post_id, viewer_id)
    }

    fn delete_save(&self, record_id: &str) -> Result<()> {
        self.client.delete_save(record_id)
    }
}

struct MockState {
    posts: HashMap<String, Post>,
    viewer: Viewer,
    calls: Vec<RemoteCall>,
    failure: Option<String>,
    next_record: u64,
}

/// In-memory backend serving one viewer and a set of posts.
///
/// Every interaction call is recorded, including calls that were made to
/// fail with [`MockBackend::fail_with`].
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        let viewer = Viewer {
            id: "U1".into(),
            name: "Snapgram Demo".into(),
            username: "demo".into(),
            account_id: "A1".into(),
            save: vec![SavedRecord::new("R9", "P1", Some("U1".into()))],
        };
        MockBackend::new(viewer).with_post(Post {
            id: "P1".into(),
            creator: Some(Creator {
                id: "U2".into(),
                name: "Second User".into(),
                username: "second".into(),
                image_url: String::new(),
            }),
            caption: "Welcome to Snapgram".into(),
            tags: vec!["welcome".into(), "offline".into()],
            image_url: String::new(),
            location: "Nowhere".into(),
            likes: vec!["U2".into(), "U3".into()],
            created_at: Some(Utc::now() - Duration::hours(2)),
        })
    }
}

impl MockBackend {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            state: Mutex::new(MockState {
                posts: HashMap::new(),
                viewer,
                calls: Vec::new(),
                failure: None,
                next_record: 100,
            }),
        }
    }

    pub fn with_post(self, post: Post) -> Self {
        self.state.lock().posts.insert(post.id.clone(), post);
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Makes every following interaction call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
    }

    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    fn record(&self, call: RemoteCall) -> Result<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(message) = state.failure.clone() {
            bail!("mock: {}", message);
        }
        Ok(state)
    }
}

impl PostService for MockBackend {
    fn get_post(&self, post_id: &str) -> Result<Post> {
        self.state
            .lock()
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| anyhow!("mock: post {} not found", post_id))
    }
}

impl ViewerService for MockBackend {
    fn current_viewer(&self) -> Result<Viewer> {
        Ok(self.state.lock().viewer.clone())
    }
}

impl InteractionService for MockBackend {
    fn update_likes(&self, post_id: &str, likes: &[String]) -> Result<()> {
        let mut state = self.record(RemoteCall::UpdateLikes {
            post_id: post_id.to_string(),
            likes: likes.to_vec(),
        })?;
        let post = state
            .posts
            .get_mut(post_id)
            .ok_or_else(|| anyhow!("mock: post {} not found", post_id))?;
        post.likes = likes.to_vec();
        Ok(())
    }

    fn create_save(&self, post_id: &str, viewer_id: &str) -> Result<SavedRecord> {
        let mut state = self.record(RemoteCall::CreateSave {
            post_id: post_id.to_string(),
            viewer_id: viewer_id.to_string(),
        })?;
        state.next_record += 1;
        let record = SavedRecord::new(
            format!("R{}", state.next_record),
            post_id,
            Some(viewer_id.to_string()),
        );
        if state.viewer.id == viewer_id {
            state.viewer.save.push(record.clone());
        }
        Ok(record)
    }

    fn delete_save(&self, record_id: &str) -> Result<()> {
        let mut state = self.record(RemoteCall::DeleteSave {
            record_id: record_id.to_string(),
        })?;
        let before = state.viewer.save.len();
        state.viewer.save.retain(|record| record.id != record_id);
        if state.viewer.save.len() == before {
            bail!("mock: saved record {} not found", record_id);
        }
        Ok(())
    }
}
