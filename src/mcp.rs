//! Line-delimited JSON-RPC 2.0 server exposing recall, remember and status
//! as MCP tools.
//!
//! One request per input line, one response per output line. Requests are
//! served strictly in order; the loop ends cleanly at end of input.

use crate::error::{MemoryError, RPC_INVALID_PARAMS};
use crate::memory::Memories;
use crate::types::{MemoryStats, MemoryType, NewMemory, RecallFilters, RecallRequest, Scope, Source};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::error::Category;
use serde_json::value::RawValue;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn, Dispatch};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "memorypilot";

const TOOL_PREFIX: &str = "memorypilot_";

// JSON-RPC error codes
const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC 2.0 request. The id is kept as raw JSON so it is echoed unchanged;
/// `None` only when the member is absent, an explicit `null` is kept.
/// `method` stays loose so a malformed one can still be answered with the id.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default, deserialize_with = "present_id")]
    id: Option<Box<RawValue>>,
    #[serde(default)]
    method: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
}

fn present_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error> {
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 response. `id` is always written, as `null` when unknown.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl JsonRpcResponse {
    fn success(id: Option<Box<RawValue>>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Box<RawValue>>, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(RPC_INVALID_PARAMS, message)
    }
}

impl From<MemoryError> for RpcError {
    fn from(e: MemoryError) -> Self {
        Self::new(e.rpc_code(), e.to_string())
    }
}

/// MCP tools/call parameters.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallResponse {
    content: Vec<ToolContent>,
    structured_content: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct RecallArgs {
    query: String,
    #[serde(default)]
    limit: Option<f64>,
    #[serde(default, rename = "type")]
    memory_type: Option<MemoryType>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    scope: Option<Scope>,
    #[serde(default)]
    project: Option<String>,
}

impl RecallArgs {
    /// Requested limit; anything below one selects the default
    fn limit(&self) -> usize {
        match self.limit {
            Some(limit) if limit >= 1.0 => limit as usize,
            _ => 0,
        }
    }
}

fn default_memory_type() -> MemoryType {
    MemoryType::Fact
}

/// An absent, null or empty type means `fact`
fn memory_type_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MemoryType, D::Error> {
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(default_memory_type()),
        Some(name) => name.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct RememberArgs {
    content: String,
    #[serde(
        default = "default_memory_type",
        rename = "type",
        deserialize_with = "memory_type_or_default"
    )]
    memory_type: MemoryType,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    scope: Option<Scope>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    importance: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusArgs {}

/// Streams and log sink the server runs against
pub struct ServerIo<R, W> {
    pub input: R,
    pub output: W,
    /// Installed as the default dispatcher while `run` executes
    pub log: Dispatch,
}

pub struct McpServer<R, W> {
    memories: Memories,
    io: ServerIo<R, W>,
}

impl<R: BufRead, W: Write> McpServer<R, W> {
    pub fn new(memories: Memories, io: ServerIo<R, W>) -> Self {
        Self { memories, io }
    }

    /// Serve until end of input. Fails only when the streams do.
    pub fn run(mut self) -> crate::error::Result<()> {
        let log = self.io.log.clone();
        tracing::dispatcher::with_default(&log, || self.serve())
    }

    fn serve(&mut self) -> crate::error::Result<()> {
        info!(version = env!("CARGO_PKG_VERSION"), "memory server started");
        self.send(&JsonRpcResponse::success(None, server_info()))?;

        let mut line = Vec::new();
        loop {
            line.clear();
            if self.io.input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            if let Some(response) = self.handle_line(&line) {
                self.send(&response)?;
            }
        }

        info!("input closed, shutting down");
        Ok(())
    }

    fn send(&mut self, response: &JsonRpcResponse) -> crate::error::Result<()> {
        serde_json::to_writer(&mut self.io.output, response)?;
        self.io.output.write_all(b"\n")?;
        self.io.output.flush()?;
        Ok(())
    }

    fn handle_line(&self, line: &[u8]) -> Option<JsonRpcResponse> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "request is not UTF-8");
                return Some(JsonRpcResponse::failure(
                    None,
                    RpcError::new(PARSE_ERROR, format!("parse error: {}", e)),
                ));
            }
        };

        let request: JsonRpcRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable request");
                // Well-formed JSON of the wrong shape, e.g. an array or a bare value
                let code = match e.classify() {
                    Category::Data => INVALID_REQUEST,
                    _ => PARSE_ERROR,
                };
                return Some(JsonRpcResponse::failure(
                    None,
                    RpcError::new(code, format!("parse error: {}", e)),
                ));
            }
        };

        let method = match request.method {
            Some(Value::String(method)) => method,
            _ => {
                debug!("request without a method name");
                return Some(JsonRpcResponse::failure(
                    request.id,
                    RpcError::new(METHOD_NOT_FOUND, "method must be a string"),
                ));
            }
        };

        if request.id.is_none() && method.starts_with("notifications/") {
            debug!(method = %method, "notification");
            return None;
        }

        debug!(method = %method, "request");
        let response = match self.dispatch(&method, request.params) {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => {
                debug!(method = %method, code = error.code, message = %error.message, "request failed");
                JsonRpcResponse::failure(request.id, error)
            }
        };
        Some(response)
    }

    fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(server_info()),
            "tools/list" => Ok(tools_list()),
            "tools/call" => self.call_tool(params),
            "ping" => Ok(json!({})),
            other => Err(RpcError::new(METHOD_NOT_FOUND, format!("method not found: {}", other))),
        }
    }

    fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: ToolCallParams = decode(params.unwrap_or(Value::Null))?;
        let tool = params.name.strip_prefix(TOOL_PREFIX).unwrap_or(&params.name);

        let response = match tool {
            "recall" => self.recall(decode(params.arguments)?)?,
            "remember" => self.remember(decode(params.arguments)?)?,
            "status" => {
                let _: StatusArgs = decode(params.arguments)?;
                self.status()?
            }
            _ => return Err(RpcError::invalid_params(format!("unknown tool: {}", params.name))),
        };

        Ok(serde_json::to_value(response).map_err(MemoryError::from)?)
    }

    fn recall(&self, args: RecallArgs) -> Result<ToolCallResponse, RpcError> {
        let request = RecallRequest {
            limit: args.limit(),
            query: args.query,
            filters: RecallFilters {
                memory_type: args.memory_type,
                topic: args.topic,
                scope: args.scope,
                project: args.project,
            },
        };
        let recall = self.memories.recall(&request)?;

        let text = if recall.results.is_empty() {
            format!("No memories found for: {:?}", request.query)
        } else {
            let mut text = format!("Found {} memories:\n\n", recall.results.len());
            for (i, result) in recall.results.iter().enumerate() {
                let memory = &result.memory;
                text.push_str(&format!(
                    "{}. [{}] {}\n   {}",
                    i + 1,
                    memory.memory_type,
                    memory.summary,
                    memory.content
                ));
                if !memory.topics.is_empty() {
                    text.push_str(&format!("\n   Topics: {}", memory.topics.join(", ")));
                }
                text.push_str("\n\n");
            }
            text
        };

        Ok(ToolCallResponse {
            content: vec![ToolContent::Text { text }],
            structured_content: json!({
                "mode": recall.mode,
                "memories": recall.results,
            }),
        })
    }

    fn remember(&self, args: RememberArgs) -> Result<ToolCallResponse, RpcError> {
        let mut memory = NewMemory::new(args.memory_type, args.content).with_topics(args.topics);
        memory.source = Source::manual("mcp");
        memory.project = args.project;
        if let Some(scope) = args.scope {
            memory.scope = scope;
        }
        if let Some(importance) = args.importance {
            memory.importance = importance;
        }

        let remembered = self.memories.remember(memory)?;
        let mut text = format!(
            "Remembered: {}\n   Type: {}\n   ID: {}",
            remembered.summary, remembered.memory_type, remembered.id
        );
        if !remembered.embedded {
            text.push_str("\n   (stored without embedding)");
        }

        Ok(ToolCallResponse {
            content: vec![ToolContent::Text { text }],
            structured_content: serde_json::to_value(&remembered).map_err(MemoryError::from)?,
        })
    }

    fn status(&self) -> Result<ToolCallResponse, RpcError> {
        let stats = self.memories.stats()?;
        Ok(ToolCallResponse {
            content: vec![ToolContent::Text { text: status_text(&stats) }],
            structured_content: serde_json::to_value(&stats).map_err(MemoryError::from)?,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(format!("invalid params: {}", e)))
}

fn status_text(stats: &MemoryStats) -> String {
    let mut text = format!(
        "MemoryPilot Status\n\nTotal memories: {}\nProjects: {}\nEmbedded: {}\n\nBy type:\n",
        stats.total_memories, stats.project_count, stats.embedded
    );
    for (memory_type, count) in &stats.by_type {
        text.push_str(&format!("  {}: {}\n", memory_type, count));
    }
    text
}

fn server_info() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn tools_list() -> Value {
    let types: Vec<&str> = MemoryType::ALL.iter().map(MemoryType::as_str).collect();
    json!({
        "tools": [
            {
                "name": "memorypilot_recall",
                "description": "Search your memory for relevant context",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "What to search for" },
                        "limit": { "type": "number", "description": "Maximum results", "default": 5 },
                        "type": { "type": "string", "description": "Only this memory type", "enum": types },
                        "topic": { "type": "string", "description": "Only memories with this topic" },
                        "scope": { "type": "string", "enum": ["personal", "project"] },
                        "project": { "type": "string", "description": "Only memories of this project" },
                    },
                    "required": ["query"],
                },
            },
            {
                "name": "memorypilot_remember",
                "description": "Explicitly remember something important",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string", "description": "What to remember" },
                        "type": { "type": "string", "description": "Memory type", "enum": types, "default": "fact" },
                        "topics": {
                            "type": "array",
                            "description": "Topics/tags for this memory",
                            "items": { "type": "string" },
                        },
                        "scope": { "type": "string", "enum": ["personal", "project"], "default": "personal" },
                        "project": { "type": "string" },
                        "importance": { "type": "number", "minimum": 0, "maximum": 1, "default": 0.5 },
                    },
                    "required": ["content"],
                },
            },
            {
                "name": "memorypilot_status",
                "description": "Get memory statistics",
                "inputSchema": { "type": "object", "properties": {} },
            },
        ]
    })
}
