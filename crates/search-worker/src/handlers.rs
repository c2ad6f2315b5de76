//! Request decoding and method dispatch.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::searxng::{SearchClient, SearchParams};

#[derive(Debug, Deserialize)]
struct IncomingRequest {
    id: Option<u64>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct Worker {
    search: SearchClient,
}

impl Worker {
    pub fn new(search: SearchClient) -> Self {
        Self { search }
    }

    /// Handle one request line. Returns the response line, or `None` when
    /// the input cannot be answered (unparseable or without an id).
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let request: IncomingRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed request line");
                return None;
            }
        };
        let Some(id) = request.id else {
            tracing::warn!(method = %request.method, "discarding request without id");
            return None;
        };

        tracing::debug!(id, method = %request.method, "request");
        let response = match self.handle(&request.method, request.params).await {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(message) => {
                tracing::warn!(id, method = %request.method, error = %message, "request failed");
                json!({"jsonrpc": "2.0", "id": id, "error": message})
            }
        };
        Some(response.to_string())
    }

    async fn handle(&self, method: &str, params: Value) -> Result<Value, String> {
        match method {
            "initialize" => Ok(initialize_result(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_list() })),
            "tools/call" => {
                let call: ToolsCallParams = serde_json::from_value(params)
                    .map_err(|e| format!("invalid tools/call params: {e}"))?;
                Ok(match self.call_tool(&call.name, call.arguments).await {
                    Ok(value) => json!({
                        "content": [{"type": "text", "text": value.to_string()}],
                        "isError": false,
                    }),
                    Err(message) => json!({
                        "content": [{"type": "text", "text": message}],
                        "isError": true,
                    }),
                })
            }
            other => self.call_tool(other, params).await,
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String> {
        match name {
            "search" => {
                let params: SearchParams = serde_json::from_value(arguments)
                    .map_err(|e| format!("invalid search arguments: {e}"))?;
                self.search.search(&params).await
            }
            "get_current_time" => Ok(current_time()),
            other => Err(format!("Method not found: {other}")),
        }
    }
}

fn initialize_result(params: &Value) -> Value {
    let client = params
        .pointer("/clientInfo/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    tracing::info!(client, "initialize");
    json!({
        "protocolVersion": params.get("protocolVersion").cloned().unwrap_or(Value::Null),
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": { "tools": {} },
    })
}

fn tool_list() -> Value {
    json!([
        {
            "name": "search",
            "description": "Search the web using a SearXNG instance",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The search query string"},
                    "category": {"type": "string", "description": "Search category (general, images, news, ...)"},
                    "language": {"type": "string", "description": "Language code for results"},
                    "max_results": {"type": "integer", "description": "Maximum number of results to return"},
                },
                "required": ["query"],
            },
        },
        {
            "name": "get_current_time",
            "description": "Get the current system time",
            "inputSchema": {"type": "object", "properties": {}},
        },
    ])
}

fn current_time() -> Value {
    let now = chrono::Local::now();
    json!({
        "iso_format": now.to_rfc3339(),
        "readable": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "timestamp": now.timestamp(),
    })
}
