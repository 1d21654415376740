//! Model client resolution.
//!
//! The platform depends on the abstract [`ModelClient`]; hosted providers
//! are injected by embedders through [`crate::bootstrap::build_app_state`].
//! The one built-in provider is `replay`: a deterministic client that
//! serves scripted turns from a JSONL file (or echoes the last user
//! message once the script runs out), used for demos and end-to-end tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use ad_domain::config::Config;
use ad_domain::error::{Error, Result};
use ad_domain::message::Message;
use ad_domain::model::{ModelClient, ModelRequest, ModelTurn, TokenUsage};

/// One scripted model step: the assistant blocks to emit.
#[derive(Debug, Clone, Deserialize)]
struct ReplayStep {
    blocks: Vec<Message>,
}

/// Deterministic scripted model client.
pub struct ReplayModelClient {
    steps: Mutex<VecDeque<Vec<Message>>>,
}

impl ReplayModelClient {
    pub fn new(steps: Vec<Vec<Message>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
        }
    }

    /// Load a script: one JSON object per line, `{"blocks": [...]}`.
    pub fn from_script(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut steps = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let step: ReplayStep = serde_json::from_str(line).map_err(|e| {
                Error::Config(format!(
                    "replay script {} line {}: {e}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            steps.push(step.blocks);
        }
        Ok(Self::new(steps))
    }
}

#[async_trait::async_trait]
impl ModelClient for ReplayModelClient {
    async fn generate(&self, request: ModelRequest) -> Result<ModelTurn> {
        let blocks = match self.steps.lock().pop_front() {
            Some(blocks) => blocks,
            None => {
                // Script exhausted (or never provided): echo the latest
                // user text so smoke tests still produce a full turn.
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find_map(|m| match m {
                        Message::UserText { text, .. } => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                vec![Message::assistant(format!("(replay) {last_user}"))]
            }
        };
        Ok(ModelTurn {
            blocks,
            usage: TokenUsage {
                input_tokens: request.messages.len() as u64,
                output_tokens: 1,
            },
        })
    }

    fn name(&self) -> &str {
        "replay"
    }
}

/// Resolve the configured provider. Anything other than the built-in
/// `replay` client must be injected by the embedder.
pub fn from_config(config: &Config) -> Result<Arc<dyn ModelClient>> {
    match config.model.provider.as_str() {
        "replay" => {
            let client = match config.model.options.get("script").and_then(|v| v.as_str()) {
                Some(path) => ReplayModelClient::from_script(Path::new(path))?,
                None => ReplayModelClient::new(Vec::new()),
            };
            Ok(Arc::new(client))
        }
        other => Err(Error::Config(format!(
            "model provider '{other}' is not built into this binary; \
             embed a ModelClient via ad_gateway::bootstrap::build_app_state"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ad_domain::CancelToken;

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![Message::user(text)],
            system_prompt: String::new(),
            tools: Vec::new(),
            max_output_tokens: None,
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn scripted_steps_play_in_order() {
        let client = ReplayModelClient::new(vec![
            vec![Message::assistant("one")],
            vec![Message::assistant("two")],
        ]);

        let turn = client.generate(request("x")).await.unwrap();
        assert_eq!(turn.blocks, vec![Message::assistant("one")]);
        let turn = client.generate(request("x")).await.unwrap();
        assert_eq!(turn.blocks, vec![Message::assistant("two")]);
    }

    #[tokio::test]
    async fn exhausted_script_echoes() {
        let client = ReplayModelClient::new(Vec::new());
        let turn = client.generate(request("hello there")).await.unwrap();
        assert_eq!(turn.blocks, vec![Message::assistant("(replay) hello there")]);
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let mut config = Config::default();
        config.model.provider = "anthropic".into();
        assert!(matches!(from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn script_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.jsonl");
        std::fs::write(
            &path,
            r#"{"blocks":[{"type":"assistant_text","text":"hi"}]}
{"blocks":[{"type":"tool_call","id":"c1","name":"ls","input":{}}]}
"#,
        )
        .unwrap();

        let client = ReplayModelClient::from_script(&path).unwrap();
        assert_eq!(client.steps.lock().len(), 2);
    }
}
