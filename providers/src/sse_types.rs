//! Typed payloads for OpenAI-compatible chat completions.
//!
//! Parse errors happen at the serde boundary, not scattered through parsing
//! logic. Every field the servers in the wild omit is optional or defaulted.

pub mod chat {
    use serde::Deserialize;

    /// One `data:` payload of a streaming completion.
    #[derive(Debug, Deserialize)]
    pub struct Chunk {
        #[serde(default)]
        pub choices: Vec<ChunkChoice>,
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChunkChoice {
        #[serde(default)]
        pub delta: Delta,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Delta {
        pub content: Option<String>,
        /// Reasoning trace some servers stream alongside the answer.
        #[serde(alias = "reasoning")]
        pub reasoning_content: Option<String>,
    }

    /// A non-streaming completion body.
    #[derive(Debug, Deserialize)]
    pub struct Completion {
        #[serde(default)]
        pub choices: Vec<CompletionChoice>,
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct CompletionChoice {
        pub message: CompletionMessage,
    }

    #[derive(Debug, Deserialize)]
    pub struct CompletionMessage {
        pub content: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        pub message: Option<String>,
    }

    impl ErrorInfo {
        #[must_use]
        pub fn message_or_default(&self) -> &str {
            self.message.as_deref().unwrap_or("unknown error")
        }
    }

}
