use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One operation request produced by the model: a capability name and its
/// arguments as a raw JSON string. Malformed argument strings degrade to
/// an empty argument object downstream rather than rejecting the call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
}

/// The opaque function-call producer. Prompting, retries, and the model
/// call itself live behind this boundary and outside this workspace.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn propose_calls(&self, prompt: &str) -> Result<Vec<ToolCall>>;
}
