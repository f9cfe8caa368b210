//! Call dispatcher: validation, method routing, and response delivery.
//!
//! Methods are resolved through a table built once in [`Dispatcher::new`].
//! Handlers return `Result<Value, RpcError>`; the wire response is built
//! from that result only after routing completes.
//!
//! | Method                        | Outcome                                  |
//! |-------------------------------|------------------------------------------|
//! | `initialize`                  | server identity and capabilities         |
//! | `tools/list`, `tools.list`    | array of tool descriptors                |
//! | `tools/call`, `tools.call`    | `{ "content": [...] }` or `-32000`       |
//! | *(any other)*                 | `-32601`                                 |

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info_span, warn, Instrument};

use super::framing::Frame;
use super::protocol::{CallMessage, ProtocolError, ResponseMessage, RpcError};
use super::registry::SessionRegistry;
use super::tools::ToolRegistry;

/// Boxed future returned by a method handler.
type MethodFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>;

/// Entry in the static method table.
type MethodHandler = for<'a> fn(&'a Dispatcher, Map<String, Value>) -> MethodFuture<'a>;

/// How a response reached the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Written to the session's live stream; acknowledge with `202`.
    Pushed,
    /// No live stream took it; return it as the call's body.
    Direct(ResponseMessage),
}

/// Stateless per-call dispatcher sharing the tool provider and sessions.
pub struct Dispatcher {
    server_name: String,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionRegistry>,
    push_timeout: Duration,
    methods: HashMap<&'static str, MethodHandler>,
}

/// Bound on a push to a stream that is not being drained.
const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Dispatcher")
            .field("server_name", &self.server_name)
            .field("tools", &self.tools)
            .field("push_timeout", &self.push_timeout)
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher and its method table.
    #[must_use]
    pub fn new(
        server_name: impl Into<String>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        let mut methods: HashMap<&'static str, MethodHandler> = HashMap::new();
        methods.insert("initialize", Self::initialize);
        methods.insert("tools/list", Self::list_tools);
        methods.insert("tools.list", Self::list_tools);
        methods.insert("tools/call", Self::call_tool);
        methods.insert("tools.call", Self::call_tool);

        Self {
            server_name: server_name.into(),
            tools,
            sessions,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            methods,
        }
    }

    /// Replace the bound on a single push; past it the caller is answered
    /// directly.
    #[must_use]
    pub fn with_push_timeout(mut self, limit: Duration) -> Self {
        self.push_timeout = limit;
        self
    }

    /// Parse `raw`, run the call, and deliver the response.
    ///
    /// Protocol errors are returned before any side effect and are never
    /// pushed to a stream.
    ///
    /// # Errors
    ///
    /// Returns the [`ProtocolError`] when `raw` is not a single valid
    /// JSON-RPC 2.0 request.
    pub async fn handle(
        &self,
        raw: &[u8],
        session_id: Option<&str>,
    ) -> Result<Delivery, ProtocolError> {
        let call = CallMessage::parse(raw)?;
        let response = self.dispatch(call).await;
        Ok(self.deliver(session_id, response).await)
    }

    /// Route one validated call to its method handler.
    pub async fn dispatch(&self, call: CallMessage) -> ResponseMessage {
        let CallMessage { id, method, params } = call;
        let span = info_span!("dispatch", method = %method);

        let outcome = match self.methods.get(method.as_str()) {
            Some(handler) => handler(self, params).instrument(span).await,
            None => {
                debug!(method = %method, "unknown method");
                Err(RpcError::method_not_found(&method))
            }
        };

        match outcome {
            Ok(result) => ResponseMessage::success(id, result),
            Err(error) => ResponseMessage::error(id, error),
        }
    }

    /// Push `response` to the session's sink, or hand it back for a
    /// synchronous reply when there is no sink, the write fails, or the
    /// sink stays full past the push timeout.
    pub async fn deliver(&self, session_id: Option<&str>, response: ResponseMessage) -> Delivery {
        let Some(session_id) = session_id else {
            return Delivery::Direct(response);
        };

        let Some(sink) = self.sessions.fetch(session_id) else {
            debug!(session_id, "no live stream for session; answering synchronously");
            return Delivery::Direct(response);
        };

        match sink
            .write_within(Frame::Message(response.to_value()), self.push_timeout)
            .await
        {
            Ok(()) => Delivery::Pushed,
            Err(err) => {
                debug!(session_id, %err, "push to stream failed; answering synchronously");
                Delivery::Direct(response)
            }
        }
    }

    fn initialize(&self, _params: Map<String, Value>) -> MethodFuture<'_> {
        let result = json!({
            "server": {
                "name": self.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": { "list": true, "call": true } },
        });
        Box::pin(std::future::ready(Ok(result)))
    }

    fn list_tools(&self, _params: Map<String, Value>) -> MethodFuture<'_> {
        let result = json!(self.tools.descriptors());
        Box::pin(std::future::ready(Ok(result)))
    }

    fn call_tool(&self, params: Map<String, Value>) -> MethodFuture<'_> {
        Box::pin(async move {
            let name = match params.get("name") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(name)) => name.clone(),
                Some(other) => other.to_string(),
            };

            let Some(tool) = self.tools.get(&name) else {
                return Err(RpcError::execution(format!("Unknown tool: {name}")));
            };

            let arguments = match params.get("arguments") {
                None | Some(Value::Null) => json!({}),
                Some(arguments) => arguments.clone(),
            };

            // Own task so a panicking tool cannot take the request down with it.
            let invocation = tokio::spawn(
                async move { tool.invoke(arguments).await }
                    .instrument(info_span!("tool", tool = %name)),
            );

            match invocation.await {
                Ok(Ok(content)) => Ok(json!({ "content": content })),
                Ok(Err(err)) => {
                    warn!(tool = %name, %err, "tool invocation failed");
                    Err(RpcError::execution(err.message()))
                }
                Err(err) => {
                    warn!(tool = %name, %err, "tool task aborted");
                    Err(RpcError::execution(format!("tool {name} failed: {err}")))
                }
            }
        })
    }
}
