//! Issue-tracker capability.
//!
//! A review prompt is much better when the model knows what the change was
//! supposed to do, so a linked Jira issue is fetched once per session and
//! snapshotted. Jira Cloud returns descriptions as an ADF document; it is
//! flattened to plain text by walking paragraph/text nodes, with a raw JSON
//! dump as the fallback for node shapes we do not recognize.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::JiraConfig;

/// Point-in-time snapshot of an issue, stored on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub key: String,
    pub url: String,
    pub summary: String,
    pub description: String,
    pub acceptance_criteria: String,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_issue(&self, key: &str) -> Result<IssueSnapshot>;
}

/// Flatten an ADF node tree into plain text.
fn adf_to_text(node: &Value) -> String {
    match node {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let node_type = obj.get("type").and_then(Value::as_str);
            let content = obj.get("content").and_then(Value::as_array);
            match (node_type, content) {
                (Some("text"), _) => obj
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                (Some("paragraph"), Some(children)) => children
                    .iter()
                    .map(adf_to_text)
                    .collect::<String>()
                    .trim()
                    .to_string(),
                (_, Some(children)) => children
                    .iter()
                    .map(adf_to_text)
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string(),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

/// Plain strings pass through; ADF docs are flattened; anything else is
/// dumped as raw JSON rather than dropped.
pub fn normalize_description(desc: &Value) -> String {
    match desc {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("doc") => {
            adf_to_text(desc)
        }
        other => other.to_string(),
    }
}

pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    ac_field_id: Option<String>,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            ac_field_id: config.acceptance_criteria_field_id.clone(),
        })
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn fetch_issue(&self, key: &str) -> Result<IssueSnapshot> {
        let mut fields = "summary,description".to_string();
        if let Some(ac) = &self.ac_field_id {
            fields.push(',');
            fields.push_str(ac);
        }

        let response = self
            .client
            .get(format!("{}/rest/api/2/issue/{key}", self.base_url))
            .query(&[("fields", fields.as_str())])
            .header("Authorization", format!("Bearer {}", self.bearer_token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to reach Jira")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Jira {}: failed to load issue {key}. {}", status, text);
        }

        let data: Value = serde_json::from_str(&text).context("Jira returned non-JSON")?;
        let issue_fields = &data["fields"];

        let acceptance_criteria = self
            .ac_field_id
            .as_ref()
            .map(|id| normalize_description(&issue_fields[id.as_str()]))
            .unwrap_or_default();

        Ok(IssueSnapshot {
            key: key.to_string(),
            url: format!("{}/browse/{key}", self.base_url),
            summary: issue_fields["summary"].as_str().unwrap_or_default().to_string(),
            description: normalize_description(&issue_fields["description"]),
            acceptance_criteria,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_adf_paragraphs() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "As a user "},
                    {"type": "text", "text": "I want widgets."}
                ]},
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "So that things work."}
                ]}
            ]
        });
        assert_eq!(
            normalize_description(&doc),
            "As a user I want widgets.\nSo that things work."
        );
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(normalize_description(&json!("already plain")), "already plain");
        assert_eq!(normalize_description(&Value::Null), "");
    }

    #[test]
    fn unknown_shapes_fall_back_to_raw_json() {
        let odd = json!({"weird": ["shape", 1]});
        let out = normalize_description(&odd);
        assert!(out.contains("weird"));
        assert!(out.contains("shape"));
    }

    #[test]
    fn unrecognized_nodes_inside_a_doc_are_skipped() {
        let doc = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "kept"}]},
                {"type": "mediaSingle"}
            ]
        });
        assert_eq!(normalize_description(&doc), "kept");
    }
}
