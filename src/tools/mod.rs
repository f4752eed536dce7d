//! Demo capabilities served by the binary.
//!
//! - `echo` - The three tool shapes: direct, interactive with progress, task
//! - `content` - Prompts, resources, resource templates and completions

pub mod content;
pub mod echo;

use crate::mcp::server::McpServer;
use crate::mcp::resources::TextResource;

/// Register every demo capability with the server.
pub fn register_all(server: &McpServer) {
    server.add_tool(echo::EchoTool);
    server.add_interactive_tool(echo::AsyncEchoTool::default());
    server.add_interactive_tool(echo::TaskEchoTool::default());

    let (prompt, template) = content::greeting_prompt();
    server.add_prompt(prompt, template);
    let (prompt, template) = content::code_review_prompt();
    server.add_prompt(prompt, template);

    server.add_resource(
        content::readme_resource(),
        TextResource::new(content::readme_text()).with_mime_type("text/markdown"),
    );
    server.add_resource(content::clock_resource(), content::ClockResource);
    for template in content::templates() {
        server.add_resource_template(template);
    }
    server.set_resource_fallback(content::TestFiles);
    server.set_completion_handler(content::DemoCompletions);
}
