use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::model::{Post, SavedRecord, Viewer};

pub const DEFAULT_ENDPOINT: &str = "https://cloud.appwrite.io/v1";

const PROJECT_HEADER: &str = "X-Appwrite-Project";
const KEY_HEADER: &str = "X-Appwrite-Key";
const JWT_HEADER: &str = "X-Appwrite-JWT";
const UNIQUE_ID: &str = "unique()";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    Anonymous,
    ApiKey(String),
    Jwt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Collections {
    pub posts: String,
    pub users: String,
    pub saves: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub collections: Collections,
    pub credentials: Credentials,
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

/// Blocking client for the document API of the hosted backend.
pub struct Client {
    http: HttpClient,
    base_url: Url,
    project_id: String,
    database_id: String,
    collections: Collections,
    credentials: Credentials,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct DocumentList<T> {
    #[serde(default)]
    documents: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(rename = "$id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    #[serde(rename = "$id")]
    id: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("backend client user agent required");
        }
        if config.project_id.trim().is_empty() {
            bail!("backend: project id required");
        }
        if config.database_id.trim().is_empty() {
            bail!("backend: database id required");
        }

        let endpoint = if config.endpoint.trim().is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            config.endpoint.trim().to_string()
        };
        // Url::join drops the last path segment unless the base ends with '/'.
        let base_url = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .with_context(|| format!("backend: invalid endpoint {endpoint:?}"))?;

        let http = HttpClient::builder()
            .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
            .build()?;

        Ok(Client {
            http,
            base_url,
            project_id: config.project_id,
            database_id: config.database_id,
            collections: config.collections,
            credentials: config.credentials,
            user_agent: config.user_agent,
        })
    }

    pub fn account_id(&self) -> Result<String> {
        let resp = self.request(Method::GET, "account", &[], None)?;
        let account: Account = resp.json().context("backend: decode account")?;
        Ok(account.id)
    }

    pub fn current_viewer(&self) -> Result<Viewer> {
        let account_id = self.account_id()?;
        let query = json!({
            "method": "equal",
            "attribute": "accountId",
            "values": [account_id],
        })
        .to_string();
        let path = self.collection_path(&self.collections.users);
        let list: DocumentList<Viewer> =
            self.fetch(&path, &[("queries[]".to_string(), query)])?;
        list.documents
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("backend: no user document for account {}", account_id))
    }

    pub fn get_post(&self, post_id: &str) -> Result<Post> {
        if post_id.trim().is_empty() {
            bail!("backend: post id is required");
        }
        let path = self.document_path(&self.collections.posts, post_id);
        self.fetch(&path, &[])
    }

    /// Replaces the whole like list of a post.
    pub fn update_likes(&self, post_id: &str, likes: &[String]) -> Result<()> {
        if post_id.trim().is_empty() {
            bail!("backend: post id is required");
        }
        let path = self.document_path(&self.collections.posts, post_id);
        let body = json!({ "data": { "likes": likes } });
        self.request(Method::PATCH, &path, &[], Some(body))?;
        Ok(())
    }

    pub fn create_save(&self, post_id: &str, viewer_id: &str) -> Result<SavedRecord> {
        if post_id.trim().is_empty() || viewer_id.trim().is_empty() {
            bail!("backend: saving requires both a post id and a user id");
        }
        let path = self.collection_path(&self.collections.saves);
        let body = json!({
            "documentId": UNIQUE_ID,
            "data": { "user": viewer_id, "post": post_id },
        });
        let resp = self.request(Method::POST, &path, &[], Some(body))?;
        let created: CreatedDocument = resp.json().context("backend: decode saved record")?;
        Ok(SavedRecord::new(
            created.id,
            post_id,
            Some(viewer_id.to_string()),
        ))
    }

    pub fn delete_save(&self, record_id: &str) -> Result<()> {
        if record_id.trim().is_empty() {
            bail!("backend: saved record id is required");
        }
        let path = self.document_path(&self.collections.saves, record_id);
        self.request(Method::DELETE, &path, &[], None)?;
        Ok(())
    }

    fn collection_path(&self, collection: &str) -> String {
        format!(
            "databases/{}/collections/{}/documents",
            self.database_id, collection
        )
    }

    fn document_path(&self, collection: &str, document_id: &str) -> String {
        format!("{}/{}", self.collection_path(collection), document_id)
    }

    fn fetch<T>(&self, path: &str, params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.request(Method::GET, path, params, None)?;
        let value: T = resp
            .json()
            .with_context(|| format!("backend: decode response for {path}"))?;
        Ok(value)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Response> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        req = req.header(PROJECT_HEADER, self.project_id.clone());
        req = match &self.credentials {
            Credentials::Anonymous => req,
            Credentials::ApiKey(key) => req.header(KEY_HEADER, key.clone()),
            Credentials::Jwt(token) => req.header(JWT_HEADER, token.clone()),
        };
        if let Some(payload) = body {
            req = req.json(&payload);
        }

        let resp = req.send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            Err(status_error(status.as_u16(), &body))
        }
    }
}

fn status_error(status: u16, body: &str) -> anyhow::Error {
    match status {
        401 => anyhow!("backend: unauthorized"),
        403 => anyhow!("backend: forbidden"),
        404 => anyhow!("backend: not found"),
        429 => anyhow!("backend: rate limited: {}", body),
        _ => anyhow!("backend: api error {}: {}", status, body),
    }
}
