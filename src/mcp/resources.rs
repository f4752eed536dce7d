//! MCP Resources Support
//!
//! Resource and resource template definitions, the handler trait that reads
//! them, and an in-memory text resource.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A resource exposed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            mime_type: guess_mime_type(&uri),
            uri,
            name: name.into(),
            title: None,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A parameterized family of resources, e.g. `file:///{path}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceTemplate {
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            title: None,
            description: None,
            mime_type: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Resource contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>, // base64 encoded
}

impl ResourceContents {
    pub fn text(uri: impl Into<String>, mime_type: Option<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type,
            text: Some(text.into()),
            blob: None,
        }
    }
}

/// Result of resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of resources/templates/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<ResourceTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// `resources/read` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

/// `resources/subscribe` and `resources/unsubscribe` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub uri: String,
}

/// Reads the contents behind a URI.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: &str) -> Result<ReadResourceResult>;
}

/// A fixed piece of text served under whatever URI it is registered at.
#[derive(Debug, Clone)]
pub struct TextResource {
    text: String,
    mime_type: Option<String>,
}

impl TextResource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[async_trait]
impl ResourceHandler for TextResource {
    async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        let mime_type = self.mime_type.clone().or_else(|| guess_mime_type(uri));
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(uri, mime_type, self.text.clone())],
        })
    }
}

/// Guess a MIME type from the extension at the end of a URI or path.
pub fn guess_mime_type(uri: &str) -> Option<String> {
    let name = uri.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    let mime = match ext {
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "js" | "jsx" => "text/javascript",
        "ts" | "tsx" => "text/typescript",
        "json" => "application/json",
        "yaml" | "yml" => "text/yaml",
        "toml" => "text/x-toml",
        "md" => "text/markdown",
        "html" => "text/html",
        "css" => "text/css",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "text/plain",
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(
            guess_mime_type("file:///src/main.rs").as_deref(),
            Some("text/x-rust")
        );
        assert_eq!(
            guess_mime_type("memo://notes/todo.md").as_deref(),
            Some("text/markdown")
        );
        assert_eq!(
            guess_mime_type("file:///data.unknown").as_deref(),
            Some("text/plain")
        );
        assert_eq!(guess_mime_type("memo://readme"), None);
    }

    #[test]
    fn test_resource_serialization() {
        let resource = Resource::new("file:///test.rs", "test.rs").with_description("A test file");

        let json = serde_json::to_string(&resource).unwrap();
        assert!(json.contains("\"uri\":\"file:///test.rs\""));
        assert!(json.contains("\"mimeType\":\"text/x-rust\""));
        assert!(!json.contains("\"title\""));
    }

    #[test]
    fn test_template_serialization() {
        let template = ResourceTemplate::new("file:///{path}", "files");
        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["uriTemplate"], "file:///{path}");
    }

    #[test]
    fn test_list_results_serialization() {
        let result = ListResourcesResult {
            resources: vec![],
            next_cursor: None,
        };
        assert!(!serde_json::to_string(&result).unwrap().contains("nextCursor"));

        let result = ListResourceTemplatesResult {
            resource_templates: vec![],
            next_cursor: Some("files".to_string()),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["nextCursor"], "files");
        assert!(json["resourceTemplates"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_resource_read() {
        let handler = TextResource::new("# Hello");
        let result = handler.read("memo://readme.md").await.unwrap();

        assert_eq!(result.contents.len(), 1);
        assert_eq!(result.contents[0].uri, "memo://readme.md");
        assert_eq!(result.contents[0].text.as_deref(), Some("# Hello"));
        assert_eq!(result.contents[0].mime_type.as_deref(), Some("text/markdown"));

        let handler = TextResource::new("plain").with_mime_type("text/plain");
        let result = handler.read("memo://readme").await.unwrap();
        assert_eq!(result.contents[0].mime_type.as_deref(), Some("text/plain"));
    }
}
