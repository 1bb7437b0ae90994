use serde::Serialize;

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatMessageRequest {
    pub role: String,
    pub content: String,
}

/// Body of a chat-completion POST. Built fresh for every prompt.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessageRequest>,
    pub stream: bool,
}

impl ChatRequest {
    /// A two-message conversation: the system prompt followed by the user's
    /// prompt.
    pub fn for_prompt(model: &str, system_prompt: &str, prompt: &str, stream: bool) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessageRequest {
                    role: ROLE_SYSTEM.to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessageRequest {
                    role: ROLE_USER.to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let request = ChatRequest::for_prompt(
            "deepseek-chat",
            "You are a helpful assistant.",
            "What is Rust?",
            true,
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "deepseek-chat",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "What is Rust?" }
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn test_prompt_is_not_trimmed_or_escaped_twice() {
        let request = ChatRequest::for_prompt("m", "sys", "  line one\n\"quoted\"  ", false);
        let text = serde_json::to_string(&request).unwrap();
        let back: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back["messages"][1]["content"], "  line one\n\"quoted\"  ");
        assert_eq!(back["stream"], false);
    }
}
