//! Tool client lifecycle
//!
//! Idle -> Starting -> Ready -> Stopping -> Stopped, with Failed absorbing
//! launch, handshake, and transport failures. One child process per client;
//! `stop()` always releases it, from any state, any number of times.

pub mod catalog;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::rpc::{ProcessTransport, RequestDispatcher, Result, RpcError, Transport};
use catalog::{parse_catalog, validate_args, ToolDescriptor};

/// Method the tool server answers with its catalog. Takes no parameters.
const CATALOG_METHOD: &str = "list_tools";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

struct Session {
    transport: Arc<ProcessTransport>,
    dispatcher: Arc<RequestDispatcher>,
    tools: HashMap<String, ToolDescriptor>,
}

struct Inner {
    state: ClientState,
    session: Option<Session>,
}

/// A client owning one tool-server process and its discovered catalog.
pub struct ToolClient {
    config: ClientConfig,
    inner: RwLock<Inner>,
}

impl ToolClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: ClientState::Idle,
                session: None,
            }),
        }
    }

    pub async fn state(&self) -> ClientState {
        self.inner.read().await.state
    }

    /// Descriptors discovered during the handshake. Empty unless Ready.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().await;
        match &inner.session {
            Some(session) if inner.state == ClientState::Ready => {
                session.tools.values().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Spawn the server process and perform the discovery handshake.
    ///
    /// On any failure (launch, handshake timeout, malformed catalog) the
    /// client lands in Failed with the process torn down, and the specific
    /// error propagates to the caller.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if matches!(inner.state, ClientState::Starting | ClientState::Ready) {
            return Err(RpcError::Internal {
                reason: "start() called on a running client".to_string(),
            });
        }
        inner.state = ClientState::Starting;

        match self.start_session().await {
            Ok(session) => {
                info!(
                    tools = session.tools.len(),
                    command = %self.config.server.command,
                    "tool client ready"
                );
                inner.session = Some(session);
                inner.state = ClientState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "tool client failed to start");
                inner.state = ClientState::Failed;
                Err(e)
            }
        }
    }

    async fn start_session(&self) -> Result<Session> {
        let transport = Arc::new(ProcessTransport::spawn(&self.config.server.spawn_config())?);
        let dispatcher = Arc::new(RequestDispatcher::new(
            transport.clone() as Arc<dyn Transport>
        ));

        // The child's startup time is unbounded from our perspective; the
        // catalog round-trip doubles as the readiness handshake.
        let started = Instant::now();
        let result = dispatcher
            .send(
                CATALOG_METHOD,
                Value::Object(Default::default()),
                self.config.handshake_timeout,
            )
            .await;

        let catalog = match result {
            Ok(catalog) => catalog,
            Err(e) => {
                let e = match e {
                    RpcError::CallTimeout { .. } => RpcError::HandshakeTimeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    },
                    other => other,
                };
                dispatcher.close().await;
                transport.stop(self.config.stop_grace).await;
                return Err(e);
            }
        };

        let tools = match parse_catalog(&catalog) {
            Ok(tools) => tools,
            Err(e) => {
                dispatcher.close().await;
                transport.stop(self.config.stop_grace).await;
                return Err(e);
            }
        };

        debug!(tools = tools.len(), elapsed_ms = started.elapsed().as_millis() as u64, "handshake complete");
        Ok(Session {
            transport,
            dispatcher,
            tools,
        })
    }

    /// Invoke a discovered tool. Arguments are validated against the tool's
    /// schema before anything is written to the child; remote errors pass
    /// through verbatim.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let (dispatcher, result) = {
            let inner = self.inner.read().await;
            let session = match (&inner.state, &inner.session) {
                (ClientState::Ready, Some(session)) => session,
                (ClientState::Failed, session) => {
                    return Err(RpcError::TransportClosed {
                        stderr_tail: session
                            .as_ref()
                            .map(|s| s.transport.stderr_tail())
                            .unwrap_or_default(),
                    });
                }
                _ => {
                    return Err(RpcError::Internal {
                        reason: format!("invoke('{}') on a client that is not started", name),
                    });
                }
            };

            let descriptor = session.tools.get(name).ok_or_else(|| RpcError::Validation {
                tool: name.to_string(),
                fields: vec![],
            })?;
            validate_args(descriptor, &args)?;

            let dispatcher = session.dispatcher.clone();
            drop(inner);
            let result = dispatcher
                .send(name, args, self.config.call_timeout)
                .await;
            (dispatcher, result)
        };

        // A closed transport latches the Failed state; later invokes fail
        // immediately without touching the process.
        if dispatcher.is_closed() || matches!(result, Err(RpcError::TransportClosed { .. })) {
            let mut inner = self.inner.write().await;
            if inner.state == ClientState::Ready {
                warn!("tool server connection lost, marking client failed");
                inner.state = ClientState::Failed;
            }
        }

        result
    }

    /// Stop the client and release the child process. Safe to call from any
    /// state, repeatedly; never fails.
    pub async fn stop(&self) {
        let mut inner = self.inner.write().await;
        let session = inner.session.take();
        if let Some(session) = session {
            inner.state = ClientState::Stopping;
            session.dispatcher.close().await;
            session.transport.stop(self.config.stop_grace).await;
        }
        inner.state = ClientState::Stopped;
        debug!("tool client stopped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use serde_json::json;
    use std::time::Duration;

    /// A fake tool server in shell: extracts the request id with sed and
    /// answers per method, which keeps the tests free of response-order
    /// assumptions.
    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"method":"list_tools"'*)
      printf '{"id":"%s","result":[{"name":"list_tables","description":"List database tables"},{"name":"describe_table","parameters":{"properties":{"table_name":{"type":"string"}},"required":["table_name"]}},{"name":"fail","description":"Always errors"}]}\n' "$id" ;;
    *'"method":"list_tables"'*)
      printf '{"id":"%s","result":["t1","t2"]}\n' "$id" ;;
    *'"method":"describe_table"'*)
      printf '{"id":"%s","result":{"columns":["nct_id"]}}\n' "$id" ;;
    *'"method":"fail"'*)
      printf '{"id":"%s","error":{"message":"boom","code":42}}\n' "$id" ;;
    *)
      printf '{"id":"%s","error":{"message":"unknown method"}}\n' "$id" ;;
  esac
done
"#;

    fn sh_config(script: &str) -> ClientConfig {
        ClientConfig {
            server: ServerConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                cwd: None,
                env: Default::default(),
            },
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_millis(200),
        }
    }

    fn client_for(script: &str) -> ToolClient {
        ToolClient::new(sh_config(script))
    }

    #[tokio::test]
    async fn discovers_catalog_and_invokes_a_tool() {
        let client = client_for(FAKE_SERVER);
        client.start().await.unwrap();
        assert_eq!(client.state().await, ClientState::Ready);

        let names: Vec<String> = client.tools().await.into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"list_tables".to_string()));

        let result = client.invoke("list_tables", json!({})).await.unwrap();
        assert_eq!(result, json!(["t1", "t2"]));

        client.stop().await;
        assert_eq!(client.state().await, ClientState::Stopped);
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_child() {
        // The fake server would answer *something* for any request it sees;
        // getting Validation back proves the request was never written.
        let client = client_for(FAKE_SERVER);
        client.start().await.unwrap();

        let err = client.invoke("describe_table", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Validation { .. }));

        let err = client
            .invoke("describe_table", json!({"table_name": "studies", "extra": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Validation { .. }));

        // Session still healthy afterwards.
        let result = client
            .invoke("describe_table", json!({"table_name": "studies"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"columns": ["nct_id"]}));
        client.stop().await;
    }

    #[tokio::test]
    async fn unknown_tool_is_a_validation_error() {
        let client = client_for(FAKE_SERVER);
        client.start().await.unwrap();
        let err = client.invoke("no_such_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Validation { .. }));
        client.stop().await;
    }

    #[tokio::test]
    async fn remote_tool_error_passes_through() {
        let client = client_for(FAKE_SERVER);
        client.start().await.unwrap();
        match client.invoke("fail", json!({})).await.unwrap_err() {
            RpcError::Remote { tool, message, code } => {
                assert_eq!(tool, "fail");
                assert_eq!(message, "boom");
                assert_eq!(code, Some(crate::rpc::ErrorCode::Number(42)));
            }
            other => panic!("expected Remote error, got {:?}", other),
        }
        client.stop().await;
    }

    #[tokio::test]
    async fn child_exit_latches_failed_state() {
        // Serve the handshake, then exit.
        let script = r#"
IFS= read -r line
id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
printf '{"id":"%s","result":[{"name":"list_tables"}]}\n' "$id"
exit 0
"#;
        let client = client_for(script);
        client.start().await.unwrap();

        let err = client.invoke("list_tables", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed { .. }));
        assert_eq!(client.state().await, ClientState::Failed);

        // Subsequent invokes fail immediately.
        let err = client.invoke("list_tables", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed { .. }));

        // stop() from Failed still releases everything.
        client.stop().await;
        assert_eq!(client.state().await, ClientState::Stopped);
    }

    #[tokio::test]
    async fn handshake_timeout_fails_start_and_tears_down() {
        let mut config = sh_config("sleep 30");
        config.handshake_timeout = Duration::from_millis(100);
        config.stop_grace = Duration::from_millis(100);
        let client = ToolClient::new(config);

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, RpcError::HandshakeTimeout { .. }));
        assert_eq!(client.state().await, ClientState::Failed);
        client.stop().await;
    }

    #[tokio::test]
    async fn malformed_catalog_fails_start() {
        let script = r#"
IFS= read -r line
id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
printf '{"id":"%s","result":"not a catalog"}\n' "$id"
sleep 5
"#;
        let client = client_for(script);
        let err = client.start().await.unwrap_err();
        assert!(matches!(err, RpcError::Catalog { .. }));
        assert_eq!(client.state().await, ClientState::Failed);
        client.stop().await;
    }

    #[tokio::test]
    async fn launch_failure_fails_start() {
        let mut config = sh_config("true");
        config.server.command = "definitely-not-a-real-binary-7f3a".to_string();
        let client = ToolClient::new(config);
        let err = client.start().await.unwrap_err();
        assert!(matches!(err, RpcError::Launch { .. }));
        assert_eq!(client.state().await, ClientState::Failed);
        client.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_from_every_state() {
        // Never started.
        let client = client_for(FAKE_SERVER);
        client.stop().await;
        client.stop().await;
        assert_eq!(client.state().await, ClientState::Stopped);

        // Started, then stopped twice.
        let client = client_for(FAKE_SERVER);
        client.start().await.unwrap();
        client.stop().await;
        client.stop().await;
        assert_eq!(client.state().await, ClientState::Stopped);
    }

    #[tokio::test]
    async fn stray_output_between_responses_is_tolerated() {
        let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  echo "log: handling a request"
  case "$line" in
    *'"method":"list_tools"'*)
      printf '{"id":"%s","result":[{"name":"list_tables"}]}\n' "$id" ;;
    *)
      printf '{"id":"%s","result":["t1"]}\n' "$id" ;;
  esac
done
"#;
        let client = client_for(script);
        client.start().await.unwrap();
        let result = client.invoke("list_tables", json!({})).await.unwrap();
        assert_eq!(result, json!(["t1"]));
        client.stop().await;
    }
}
