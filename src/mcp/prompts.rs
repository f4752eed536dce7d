//! MCP Prompts
//!
//! Prompt definitions, the handler trait that renders them, and a simple
//! text template handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::mcp::protocol::{ContentBlock, Role};

/// A prompt argument definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// A prompt as advertised by `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Check that every required argument was supplied.
    pub fn validate(&self, arguments: &HashMap<String, String>) -> Result<()> {
        match self
            .arguments
            .iter()
            .find(|a| a.required && !arguments.contains_key(&a.name))
        {
            Some(missing) => Err(Error::InvalidParams(format!(
                "Missing required argument: {}",
                missing.name
            ))),
            None => Ok(()),
        }
    }
}

/// A rendered prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: ContentBlock,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: ContentBlock::Text { text: text.into() },
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: ContentBlock::Text { text: text.into() },
        }
    }
}

/// `prompts/get` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(default)]
    pub arguments: HashMap<String, String>,
}

/// Result of prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// Renders a prompt from its arguments.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn messages(&self, arguments: &HashMap<String, String>) -> Result<Vec<PromptMessage>>;
}

/// Template for generating a single user message.
///
/// `{{name}}` is replaced by the argument value. `{{#if name}}...{{/if}}`
/// keeps its body only when `name` is present and non-empty.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub template: String,
}

const IF_OPEN: &str = "{{#if ";
const IF_CLOSE: &str = "{{/if}}";

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, arguments: &HashMap<String, String>) -> String {
        let mut text = self.template.clone();

        while let Some(start) = text.find(IF_OPEN) {
            let Some(tag_len) = text[start..].find("}}") else {
                break;
            };
            let key = text[start + IF_OPEN.len()..start + tag_len].trim().to_string();
            let body_start = start + tag_len + 2;
            let Some(body_len) = text[body_start..].find(IF_CLOSE) else {
                break;
            };
            let body = text[body_start..body_start + body_len].to_string();
            let keep = arguments.get(&key).is_some_and(|v| !v.is_empty());
            text.replace_range(
                start..body_start + body_len + IF_CLOSE.len(),
                if keep { body.as_str() } else { "" },
            );
        }

        for (key, value) in arguments {
            text = text.replace(&format!("{{{{{key}}}}}"), value);
        }
        text
    }
}

#[async_trait]
impl PromptHandler for PromptTemplate {
    async fn messages(&self, arguments: &HashMap<String, String>) -> Result<Vec<PromptMessage>> {
        Ok(vec![PromptMessage::user(self.render(arguments))])
    }
}
