//! Assembles the message list handed to the chat-completions request from
//! the session's configured system prompt, prior turns, and the current
//! utterance (spec E1: `memory.history[0]` is always the system prompt).

use voice_agent_core::llm_types::{GenerateRequest, Message, ToolDefinition};

/// Builds a `GenerateRequest` from a system prompt, history, and the
/// current user utterance. An empty utterance is valid: the turn router
/// uses it for the post-tool-call follow-up turn, where GPT is asked to
/// respond without new user input (spec §4.6).
pub struct PromptBuilder {
    system_prompt: String,
    history: Vec<Message>,
    user_message: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    tools: Vec<ToolDefinition>,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            user_message: None,
            max_tokens: None,
            temperature: None,
            tools: Vec::new(),
        }
    }

    /// Prior turns, excluding the system message (the builder owns slot 0).
    pub fn with_history(mut self, history: &[Message]) -> Self {
        self.history = history
            .iter()
            .filter(|m| !matches!(m.role, voice_agent_core::llm_types::Role::System))
            .cloned()
            .collect();
        self
    }

    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.user_message = Some(content);
        }
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Offers tool schemas with `tool_choice=auto` on the built request
    /// (spec §4.6's single streaming-with-tools call).
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn build(self) -> GenerateRequest {
        let mut request = GenerateRequest::new(self.system_prompt);
        request.messages.extend(self.history);
        if let Some(user_message) = self.user_message {
            request.messages.push(Message::user(user_message));
        }
        if let Some(max_tokens) = self.max_tokens {
            request.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            request.temperature = Some(temperature);
        }
        request.tools = self.tools;
        request.stream = true;
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_core::llm_types::Role;

    #[test]
    fn system_message_is_always_first() {
        let req = PromptBuilder::new("be helpful")
            .with_user_message("hi")
            .build();
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content, "be helpful");
        assert_eq!(req.messages[1].content, "hi");
    }

    #[test]
    fn empty_user_message_is_omitted_for_tool_followup_turns() {
        let req = PromptBuilder::new("be helpful")
            .with_history(&[Message::assistant("earlier reply")])
            .with_user_message("")
            .build();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[1].content, "earlier reply");
    }
}
