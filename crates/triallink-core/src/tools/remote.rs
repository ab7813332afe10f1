//! Wraps discovered tools as our Tool trait for agent integration.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::catalog::ToolDescriptor;
use crate::client::ToolClient;

use super::{Tool, ToolRegistry, ToolResult};

/// One discovered tool, invocable through the shared client.
pub struct RemoteTool {
    descriptor: ToolDescriptor,
    client: Arc<ToolClient>,
}

impl RemoteTool {
    pub fn new(descriptor: ToolDescriptor, client: Arc<ToolClient>) -> Self {
        Self { descriptor, client }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        self.descriptor.description.as_deref().unwrap_or("Remote tool")
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(&self.descriptor.parameters).unwrap_or(Value::Null)
    }

    async fn execute(&self, params: Value) -> ToolResult {
        match self.client.invoke(&self.descriptor.name, params).await {
            Ok(result) => ToolResult {
                output: render_result(&result),
                is_error: false,
            },
            Err(e) => ToolResult {
                output: format!("tool error: {}", e),
                is_error: true,
            },
        }
    }
}

/// Plain strings pass through; everything else is pretty-printed JSON.
fn render_result(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Expose every tool in the client's catalog through the registry.
pub async fn register_remote_tools(client: &Arc<ToolClient>, registry: &ToolRegistry) {
    for descriptor in client.tools().await {
        let tool = Arc::new(RemoteTool::new(descriptor, client.clone()));
        registry.register(tool).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ServerConfig};
    use serde_json::json;
    use std::time::Duration;

    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"method":"list_tools"'*)
      printf '{"id":"%s","result":[{"name":"list_tables","description":"List database tables"},{"name":"append_insight","parameters":{"properties":{"finding":{"type":"string"}},"required":["finding"]}}]}\n' "$id" ;;
    *'"method":"list_tables"'*)
      printf '{"id":"%s","result":["studies","conditions"]}\n' "$id" ;;
    *'"method":"append_insight"'*)
      printf '{"id":"%s","result":"recorded"}\n' "$id" ;;
    *)
      printf '{"id":"%s","error":{"message":"unknown method"}}\n' "$id" ;;
  esac
done
"#;

    async fn ready_client() -> Arc<ToolClient> {
        let config = ClientConfig {
            server: ServerConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), FAKE_SERVER.to_string()],
                cwd: None,
                env: Default::default(),
            },
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_millis(200),
        };
        let client = Arc::new(ToolClient::new(config));
        client.start().await.unwrap();
        client
    }

    #[tokio::test]
    async fn registers_discovered_tools() {
        let client = ready_client().await;
        let registry = ToolRegistry::new();
        register_remote_tools(&client, &registry).await;

        assert_eq!(registry.names().await, vec!["append_insight", "list_tables"]);
        let tool = registry.get("list_tables").await.unwrap();
        assert_eq!(tool.description(), "List database tables");
        client.stop().await;
    }

    #[tokio::test]
    async fn execute_renders_json_results() {
        let client = ready_client().await;
        let registry = ToolRegistry::new();
        register_remote_tools(&client, &registry).await;

        let tool = registry.get("list_tables").await.unwrap();
        let result = tool.execute(json!({})).await;
        assert!(!result.is_error);
        assert!(result.output.contains("studies"));

        // String results pass through unquoted.
        let tool = registry.get("append_insight").await.unwrap();
        let result = tool.execute(json!({"finding": "enrollment is seasonal"})).await;
        assert!(!result.is_error);
        assert_eq!(result.output, "recorded");
        client.stop().await;
    }

    #[tokio::test]
    async fn execute_surfaces_validation_failures_as_errors() {
        let client = ready_client().await;
        let registry = ToolRegistry::new();
        register_remote_tools(&client, &registry).await;

        let tool = registry.get("append_insight").await.unwrap();
        let result = tool.execute(json!({})).await;
        assert!(result.is_error);
        assert!(result.output.contains("finding"));
        client.stop().await;
    }

    #[tokio::test]
    async fn schema_round_trips_through_the_trait() {
        let client = ready_client().await;
        let registry = ToolRegistry::new();
        register_remote_tools(&client, &registry).await;

        let schema = registry.get("append_insight").await.unwrap().parameters_schema();
        assert_eq!(schema["required"], json!(["finding"]));
        assert_eq!(schema["properties"]["finding"]["type"], json!("string"));
        client.stop().await;
    }
}
