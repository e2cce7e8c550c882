//! Highlight export to Readwise
//!
//! Highlights are posted as one JSON batch. The API token comes from an
//! environment variable and is checked before anything touches the network.

use crate::annotation::Annotation;
use crate::error::ExportError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "https://readwise.io/api/v2/highlights/";
pub const DEFAULT_TOKEN_ENV: &str = "READWISE_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightRecord {
    pub text: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub source_type: &'static str,
    pub category: &'static str,
    pub location_type: &'static str,
    /// 1-based page number
    pub location: usize,
    pub highlighted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPayload {
    pub highlights: Vec<HighlightRecord>,
}

impl ExportPayload {
    /// Collect the highlights that carry text; notes and empty highlights
    /// are skipped
    pub fn from_annotations<'a>(
        title: &str,
        author: Option<&str>,
        annotations: impl IntoIterator<Item = &'a Annotation>,
    ) -> Self {
        let highlights = annotations
            .into_iter()
            .filter(|annotation| annotation.is_highlight())
            .filter_map(|annotation| {
                let text = annotation.text()?.trim();
                (!text.is_empty()).then(|| HighlightRecord {
                    text: text.to_string(),
                    title: title.to_string(),
                    author: author.map(str::to_string),
                    source_type: "pdf",
                    category: "books",
                    location_type: "page",
                    location: annotation.page() + 1,
                    highlighted_at: annotation.created_at(),
                })
            })
            .collect();
        Self { highlights }
    }

    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Destination of exported highlights
pub trait HighlightSink: Send + Sync {
    fn post(&self, token: &str, payload: &ExportPayload) -> Result<(), ExportError>;
}

/// Read the API token; a missing or blank variable is `NoToken`
pub fn token_from_env(var: &str) -> Result<String, ExportError> {
    match std::env::var(var) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(ExportError::NoToken(var.to_string())),
    }
}

/// Post `payload` and return how many highlights were sent
///
/// An empty payload succeeds with 0 without calling the sink.
pub fn export(
    sink: &dyn HighlightSink,
    token: &str,
    payload: &ExportPayload,
) -> Result<usize, ExportError> {
    if payload.is_empty() {
        debug!("no highlights with text to export");
        return Ok(0);
    }
    sink.post(token, payload)?;
    info!(count = payload.len(), "highlights exported");
    Ok(payload.len())
}

/// HTTPS client for the Readwise highlights endpoint
#[derive(Debug)]
pub struct ReadwiseExporter {
    endpoint: String,
    agent: ureq::Agent,
}

impl Default for ReadwiseExporter {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, Duration::from_secs(30))
    }
}

impl ReadwiseExporter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl HighlightSink for ReadwiseExporter {
    fn post(&self, token: &str, payload: &ExportPayload) -> Result<(), ExportError> {
        let body = payload.to_json()?;
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Token {token}"))
            .set("Content-Type", "application/json")
            .send_string(&body);

        match response {
            Ok(response) => {
                debug!(status = response.status(), "export accepted");
                Ok(())
            }
            Err(ureq::Error::Status(401, _)) => Err(ExportError::Auth),
            Err(ureq::Error::Status(code, _)) => Err(ExportError::Server(code)),
            Err(ureq::Error::Transport(transport)) => {
                Err(ExportError::Network(transport.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Origin;
    use crate::geometry::{Point, Rect};
    use crate::testing::RecordingSink;
    use serial_test::serial;

    fn highlight(page: usize, text: Option<&str>) -> Annotation {
        Annotation::highlight(
            page,
            vec![Rect::new(0.0, 0.0, 1.0, 1.0)],
            text.map(str::to_string),
            Origin::Database,
        )
    }

    #[test]
    fn test_payload_skips_notes_and_empty_highlights() {
        let annotations = vec![
            highlight(0, Some("kept")),
            highlight(1, None),
            highlight(2, Some("   ")),
            Annotation::note(3, Point::new(0.0, 0.0), Some("note".into()), Origin::Database),
        ];
        let payload = ExportPayload::from_annotations("Book", Some("Ann"), &annotations);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.highlights[0].location, 1);
        assert_eq!(payload.highlights[0].author.as_deref(), Some("Ann"));
    }

    #[test]
    fn test_payload_json_shape() {
        let annotations = [highlight(4, Some("quote"))];
        let payload = ExportPayload::from_annotations("Title", None, &annotations);
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        let record = &value["highlights"][0];
        assert_eq!(record["text"], "quote");
        assert_eq!(record["source_type"], "pdf");
        assert_eq!(record["category"], "books");
        assert_eq!(record["location_type"], "page");
        assert_eq!(record["location"], 5);
        assert!(record.get("author").is_none());
        assert!(record["highlighted_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    #[serial]
    fn test_missing_or_blank_token() {
        let var = "PDF_VIEWER_TEST_EXPORT_TOKEN";
        std::env::remove_var(var);
        assert!(matches!(token_from_env(var), Err(ExportError::NoToken(_))));
        std::env::set_var(var, "  ");
        assert!(matches!(token_from_env(var), Err(ExportError::NoToken(_))));
        std::env::set_var(var, "abc");
        assert_eq!(token_from_env(var).unwrap(), "abc");
        std::env::remove_var(var);
    }

    #[test]
    fn test_empty_export_does_not_post() {
        let sink = RecordingSink::default();
        let payload = ExportPayload::from_annotations("T", None, &[] as &[Annotation]);
        assert_eq!(export(&sink, "token", &payload).unwrap(), 0);
        assert!(sink.posts().is_empty());
    }

    #[test]
    fn test_export_posts_with_token() {
        let sink = RecordingSink::default();
        let annotations = [highlight(0, Some("a")), highlight(1, Some("b"))];
        let payload = ExportPayload::from_annotations("T", None, &annotations);
        assert_eq!(export(&sink, "secret", &payload).unwrap(), 2);
        let posts = sink.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "secret");
        assert_eq!(posts[0].1, 2);
    }

    #[test]
    fn test_sink_errors_propagate() {
        let sink = RecordingSink::failing(|| ExportError::Auth);
        let annotations = [highlight(0, Some("a"))];
        let payload = ExportPayload::from_annotations("T", None, &annotations);
        assert!(matches!(
            export(&sink, "bad", &payload),
            Err(ExportError::Auth)
        ));
    }

    #[test]
    fn test_unreachable_endpoint_is_network_error() {
        let exporter = ReadwiseExporter::new("http://127.0.0.1:9/", Duration::from_secs(2));
        let annotations = [highlight(0, Some("a"))];
        let payload = ExportPayload::from_annotations("T", None, &annotations);
        assert!(matches!(
            exporter.post("token", &payload),
            Err(ExportError::Network(_))
        ));
    }
}
