use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A post document as returned by the backend.
///
/// Fields the backend owns but may return in several shapes (`likes`, `tags`,
/// `creator`, `$createdAt`) pass through the lenient deserializers below, so
/// a `Post` in memory is always normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Post {
    #[serde(rename = "$id", default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_creator")]
    pub creator: Option<Creator>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub caption: String,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    #[serde(rename = "imageUrl", default, deserialize_with = "lenient_string")]
    pub image_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_likes")]
    pub likes: Vec<String>,
    #[serde(rename = "$createdAt", default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Creator {
    #[serde(rename = "$id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "imageUrl", default)]
    pub image_url: String,
}

/// The signed-in user together with the posts they have saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Viewer {
    #[serde(rename = "$id", default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: String,
    #[serde(rename = "accountId", default, deserialize_with = "lenient_string")]
    pub account_id: String,
    #[serde(default, deserialize_with = "lenient_saved_records")]
    pub save: Vec<SavedRecord>,
}

impl Viewer {
    pub fn saved_record_for(&self, post_id: &str) -> Option<&SavedRecord> {
        self.save.iter().find(|record| record.post.id == post_id)
    }
}

/// Join document binding a viewer to a post they saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedRecord {
    #[serde(rename = "$id")]
    pub id: String,
    pub post: DocumentRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<DocumentRef>,
}

impl SavedRecord {
    pub fn new(
        id: impl Into<String>,
        post_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            post: DocumentRef::new(post_id),
            user: user_id.map(DocumentRef::new),
        }
    }
}

/// A relationship attribute. The backend returns either the bare document id
/// or the expanded document; only the id is kept.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct DocumentRef {
    #[serde(rename = "$id")]
    pub id: String,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl<'de> Deserialize<'de> for DocumentRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        document_id(&value)
            .map(DocumentRef::new)
            .ok_or_else(|| serde::de::Error::custom("expected a document id or a document"))
    }
}

/// Result of the current-viewer query as seen by consumers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ViewerQuery {
    #[default]
    Pending,
    Ready(Viewer),
    Failed(String),
}

impl ViewerQuery {
    pub fn from_result(result: anyhow::Result<Viewer>) -> Self {
        match result {
            Ok(viewer) => ViewerQuery::Ready(viewer),
            Err(err) => ViewerQuery::Failed(format!("{err:#}")),
        }
    }

    pub fn viewer(&self) -> Option<&Viewer> {
        match self {
            ViewerQuery::Ready(viewer) => Some(viewer),
            _ => None,
        }
    }
}

/// Normalizes a raw `likes` attribute into an ordered list of unique user ids.
///
/// Accepts an array of ids or an array of expanded user documents. Anything
/// else yields an empty list.
pub fn normalize_likes(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    let mut likes: Vec<String> = Vec::with_capacity(items.len());
    for id in items.iter().filter_map(document_id) {
        if !likes.contains(&id) {
            likes.push(id);
        }
    }
    likes
}

pub fn normalize_tags(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn normalize_saved_records(value: &Value) -> Vec<SavedRecord> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<SavedRecord>(item.clone()).ok())
        .filter(|record| !record.id.is_empty() && !record.post.id.is_empty())
        .collect()
}

fn document_id(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(id) => id.as_str(),
        Value::Object(map) => map.get("$id")?.as_str()?,
        _ => return None,
    };
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

fn lenient_likes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_likes(&value))
}

fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_tags(&value))
}

fn lenient_saved_records<'de, D>(deserializer: D) -> Result<Vec<SavedRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_saved_records(&value))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => text,
        _ => String::new(),
    })
}

fn lenient_creator<'de, D>(deserializer: D) -> Result<Option<Creator>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(id) if !id.trim().is_empty() => Some(Creator {
            id,
            ..Creator::default()
        }),
        Value::Object(_) => serde_json::from_value::<Creator>(value).ok(),
        _ => None,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_likes_become_empty() {
        let post: Post = serde_json::from_value(json!({"$id": "P1", "likes": null})).unwrap();
        assert!(post.likes.is_empty());
    }

    #[test]
    fn missing_likes_become_empty() {
        let post: Post = serde_json::from_value(json!({"$id": "P1"})).unwrap();
        assert!(post.likes.is_empty());
    }

    #[test]
    fn non_sequence_likes_become_empty() {
        let post: Post =
            serde_json::from_value(json!({"$id": "P1", "likes": {"count": 4}})).unwrap();
        assert!(post.likes.is_empty());
        let post: Post = serde_json::from_value(json!({"$id": "P1", "likes": "U1"})).unwrap();
        assert!(post.likes.is_empty());
    }

    #[test]
    fn likes_accept_expanded_user_documents() {
        let post: Post = serde_json::from_value(json!({
            "$id": "P1",
            "likes": [{"$id": "U2", "name": "Two"}, "U3", 7, {"name": "anonymous"}, ""]
        }))
        .unwrap();
        assert_eq!(post.likes, vec!["U2".to_string(), "U3".to_string()]);
    }

    #[test]
    fn duplicate_likes_are_collapsed_in_order() {
        let likes = normalize_likes(&json!(["U3", "U2", "U3", {"$id": "U2"}]));
        assert_eq!(likes, vec!["U3".to_string(), "U2".to_string()]);
    }

    #[test]
    fn post_document_decodes() {
        let post: Post = serde_json::from_value(json!({
            "$id": "P1",
            "$createdAt": "2024-03-01T12:00:00.000+00:00",
            "creator": {"$id": "U9", "name": "Nine", "username": "nine"},
            "caption": "sunset",
            "tags": ["beach", " ", "summer"],
            "imageUrl": "https://example.test/p1.png",
            "location": null,
            "likes": ["U2"]
        }))
        .unwrap();
        assert_eq!(post.creator.as_ref().map(|c| c.username.as_str()), Some("nine"));
        assert_eq!(post.tags, vec!["beach".to_string(), "summer".to_string()]);
        assert_eq!(post.location, "");
        assert!(post.created_at.is_some());
    }

    #[test]
    fn creator_may_be_a_bare_id() {
        let post: Post = serde_json::from_value(json!({"$id": "P1", "creator": "U9"})).unwrap();
        assert_eq!(post.creator.map(|c| c.id), Some("U9".to_string()));
    }

    #[test]
    fn viewer_saved_records_accept_both_reference_shapes() {
        let viewer: Viewer = serde_json::from_value(json!({
            "$id": "U1",
            "save": [
                {"$id": "R9", "post": {"$id": "P1"}},
                {"$id": "R10", "post": "P2"},
                {"$id": "R11"},
                {"post": "P3"}
            ]
        }))
        .unwrap();
        assert_eq!(viewer.save.len(), 2);
        assert_eq!(viewer.saved_record_for("P1").map(|r| r.id.as_str()), Some("R9"));
        assert_eq!(viewer.saved_record_for("P2").map(|r| r.id.as_str()), Some("R10"));
        assert!(viewer.saved_record_for("P3").is_none());
    }

    #[test]
    fn malformed_save_collection_becomes_empty() {
        let viewer: Viewer = serde_json::from_value(json!({"$id": "U1", "save": 3})).unwrap();
        assert!(viewer.save.is_empty());
    }

    #[test]
    fn viewer_query_from_error_keeps_message() {
        let query = ViewerQuery::from_result(Err(anyhow::anyhow!("backend: unauthorized")));
        assert_eq!(query, ViewerQuery::Failed("backend: unauthorized".into()));
        assert!(query.viewer().is_none());
    }
}
