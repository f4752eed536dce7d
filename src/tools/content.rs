//! Demo prompts, resources and completions.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::mcp::handler::CompletionHandler;
use crate::mcp::prompts::{Prompt, PromptArgument, PromptTemplate};
use crate::mcp::protocol::{CompleteParams, CompleteResult, Completion, CompletionReference};
use crate::mcp::resources::{
    ReadResourceResult, Resource, ResourceContents, ResourceHandler, ResourceTemplate,
};

pub const README_URI: &str = "memo://readme";
pub const CLOCK_URI: &str = "file:///current_time";

const README: &str = "# MCP engine demo\n\n\
Tools: `echo`, `async_echo` (progress), `task_echo` (task-augmented).\n\
Prompts: `greeting`, `code_review`.\n";

/// Names offered when completing the `greeting` prompt.
const GREETING_NAMES: &[&str] = &["Ada", "Alan", "Barbara", "Grace", "Linus"];

pub fn greeting_prompt() -> (Prompt, PromptTemplate) {
    let prompt = Prompt::new("greeting", "Greets someone by name")
        .with_argument(PromptArgument::required("name", "Who to greet"))
        .with_argument(PromptArgument::optional("title", "Honorific to use"));
    let template = PromptTemplate::new("Please greet {{#if title}}{{title}} {{/if}}{{name}} warmly.");
    (prompt, template)
}

pub fn code_review_prompt() -> (Prompt, PromptTemplate) {
    let mut prompt = Prompt::new(
        "code_review",
        "A prompt for reviewing a code snippet and providing feedback.",
    )
    .with_argument(PromptArgument::required("codeSnippet", "A snippet of code to review"));
    prompt.title = Some("Code Review Prompt".to_string());
    (prompt, PromptTemplate::new("Please review this code:\n{{codeSnippet}}"))
}

pub fn readme_resource() -> Resource {
    Resource::new(README_URI, "readme")
        .with_description("What this server exposes")
        .with_mime_type("text/markdown")
}

pub fn readme_text() -> &'static str {
    README
}

pub fn clock_resource() -> Resource {
    Resource::new(CLOCK_URI, "current_time")
        .with_description("A resource that returns the current server time.")
        .with_mime_type("text/plain")
}

pub fn templates() -> Vec<ResourceTemplate> {
    vec![
        ResourceTemplate::new("file:///{filename}", "file")
            .with_description("A resource template for file contents"),
        ResourceTemplate::new("test:///{filename}", "test").with_description("Test files"),
    ]
}

/// Current server time as RFC 3339 text.
pub struct ClockResource;

#[async_trait]
impl ResourceHandler for ClockResource {
    async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(
                uri,
                Some("text/plain".to_string()),
                Utc::now().to_rfc3339(),
            )],
        })
    }
}

/// Serves `test:///{filename}` URIs that were never registered.
pub struct TestFiles;

#[async_trait]
impl ResourceHandler for TestFiles {
    async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        let name = uri
            .strip_prefix("test:///")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::ResourceNotFound(uri.to_string()))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(
                uri,
                Some("text/plain".to_string()),
                format!("Contents of test file {name}"),
            )],
        })
    }
}

/// Prefix completion for the demo prompt and resource templates.
pub struct DemoCompletions;

impl DemoCompletions {
    fn matching(candidates: &[&str], prefix: &str) -> Completion {
        let values: Vec<String> = candidates
            .iter()
            .filter(|c| c.starts_with(prefix))
            .map(|c| c.to_string())
            .collect();
        Completion {
            total: Some(values.len() as u64),
            has_more: Some(false),
            values,
        }
    }
}

#[async_trait]
impl CompletionHandler for DemoCompletions {
    async fn complete(&self, params: CompleteParams) -> Result<CompleteResult> {
        let argument = &params.argument;
        let completion = match &params.reference {
            CompletionReference::Prompt { name } if name == "greeting" && argument.name == "name" => {
                Self::matching(GREETING_NAMES, &argument.value)
            }
            CompletionReference::Resource { uri } if uri.starts_with("test://") => Completion {
                values: vec![format!("Completion result for test resource template: {uri}")],
                ..Completion::default()
            },
            CompletionReference::Resource { uri } if uri.starts_with("file://") => {
                let partial = uri.replace(&format!("{{{}}}", argument.name), &argument.value);
                if CLOCK_URI.starts_with(&partial) {
                    Self::matching(&["current_time"], "")
                } else {
                    Completion::default()
                }
            }
            _ => Completion::default(),
        };
        Ok(CompleteResult { completion })
    }
}
