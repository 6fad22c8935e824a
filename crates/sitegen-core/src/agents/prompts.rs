//! System prompts and prompt wrappers for each agent role.

use super::AgentRole;

const ORCHESTRATOR_PROMPT: &str = "You are a friendly web design assistant. \
The user describes a webpage they want. Reply conversationally: summarize what \
you will build, ask about anything unclear, and suggest improvements. Do not \
output HTML; a separate designer produces the page.";

const TEMPLATE_PROMPT: &str = "You are an expert front-end developer. For every \
request, output one complete, self-contained HTML document with inline CSS and \
JavaScript that implements everything asked for so far in this conversation. \
If a background image is wanted, reference it as `background.png`. Output only \
the HTML document.";

const TITLE_PROMPT: &str = "You name websites. Answer with a short title of at \
most six words, wrapped in curly braces, for example {Sunrise Bakery}.";

const IMAGE_PROMPT: &str = "";

pub fn system_prompt(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Orchestrator => ORCHESTRATOR_PROMPT,
        AgentRole::Template => TEMPLATE_PROMPT,
        AgentRole::Title => TITLE_PROMPT,
        AgentRole::ImageGenerator => IMAGE_PROMPT,
    }
}

/// Prompt sent to the title agent for the first prompt of a session.
pub fn title_request(prompt: &str) -> String {
    format!(
        "Create a title for a website built from the request below. \
Return the title wrapped in {{ and }}.\n\n{prompt}"
    )
}

/// Prompt sent to the image agent.
pub fn image_request(prompt: &str) -> String {
    format!(
        "Please generate an image that encapsulates the vibe of the following prompt:\n\n{prompt}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_request_mentions_braces_and_prompt() {
        let request = title_request("a bakery site");
        assert!(request.contains("{ and }"));
        assert!(request.ends_with("a bakery site"));
    }

    #[test]
    fn chat_roles_have_prompts() {
        for role in [AgentRole::Orchestrator, AgentRole::Template, AgentRole::Title] {
            assert!(!system_prompt(role).is_empty());
        }
    }
}
