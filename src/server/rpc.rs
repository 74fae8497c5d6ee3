//! Line-delimited JSON-RPC 2.0 over stdio.
//!
//! Thin adapter: decodes requests, dispatches to the server core, encodes
//! structured results. Every failure becomes a JSON-RPC error response or a
//! structured tool result; nothing propagates.

use crate::config::running_version;
use crate::server::{tool_definitions, KnowledgeServer};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message.into()},
    })
}

/// Wrap a tool result in MCP content form.
fn tool_result(value: Value) -> Value {
    let text = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": false,
    })
}

/// Handle one decoded request. `None` for notifications (no id).
fn dispatch(server: &KnowledgeServer, request: RpcRequest) -> Option<Value> {
    let RpcRequest { id, method, params } = request;
    let is_notification = id.is_none();
    let id = id.unwrap_or(Value::Null);

    let result = match method.as_str() {
        "initialize" => response(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}, "resources": {}},
                "serverInfo": {
                    "name": "pongogo-knowledge",
                    "version": running_version(),
                },
            }),
        ),
        "tools/list" => {
            let tools: Vec<Value> = tool_definitions().iter().map(|t| t.to_json()).collect();
            response(id, json!({"tools": tools}))
        }
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            match call_tool(server, name, &arguments) {
                Ok(value) => response(id, tool_result(value)),
                Err(message) => error_response(id, INVALID_PARAMS, message),
            }
        }
        "resources/read" => {
            let uri = params.get("uri").and_then(Value::as_str).unwrap_or("");
            match read_resource(server, uri) {
                Ok(text) => response(
                    id,
                    json!({
                        "contents": [{
                            "uri": uri,
                            "mimeType": "text/markdown",
                            "text": text,
                        }],
                    }),
                ),
                Err(message) => error_response(id, INVALID_PARAMS, message),
            }
        }
        method if method.starts_with("notifications/") => return None,
        other => error_response(id, METHOD_NOT_FOUND, format!("Unknown method: {other}")),
    };

    (!is_notification).then_some(result)
}

fn call_tool(server: &KnowledgeServer, name: &str, args: &Value) -> Result<Value, String> {
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str);
    let bool_arg = |key: &str| args.get(key).and_then(Value::as_bool).unwrap_or(false);

    match name {
        "get_instructions" => Ok(server.get_instructions(
            str_arg("topic"),
            str_arg("category"),
            bool_arg("exact_match"),
        )),
        "search_instructions" => {
            let query = str_arg("query").ok_or("search_instructions requires 'query'")?;
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
            Ok(server.search_instructions(query, limit))
        }
        "route_instructions" => {
            let message = str_arg("message").ok_or("route_instructions requires 'message'")?;
            let context = args.get("context").cloned().filter(|v| !v.is_null());
            let limit = args.get("limit").and_then(Value::as_u64).map(|l| l as usize);
            Ok(server.route_instructions(message, context, limit))
        }
        "reindex_knowledge_base" => Ok(server.reindex_knowledge_base(bool_arg("force"))),
        "get_routing_info" => Ok(server.get_routing_info()),
        other => Err(format!("Unknown tool: {other}")),
    }
}

fn read_resource(server: &KnowledgeServer, uri: &str) -> Result<String, String> {
    let rest = uri
        .strip_prefix("instruction://pongogo/")
        .ok_or_else(|| format!("Unsupported resource URI: {uri}"))?;
    let (category, name) = rest
        .split_once('/')
        .ok_or_else(|| format!("Malformed instruction URI: {uri}"))?;
    server
        .read_instruction_resource(category, name)
        .map_err(|e| e.to_string())
}

/// Decode one line and produce the encoded response, if any.
pub fn handle_line(server: &KnowledgeServer, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let response = match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) => {
            debug!("rpc request: {}", request.method);
            dispatch(server, request)?
        }
        Err(e) => {
            warn!("Malformed request: {e}");
            error_response(Value::Null, PARSE_ERROR, format!("Parse error: {e}"))
        }
    };

    serde_json::to_string(&response).ok()
}

/// Serve requests from stdin until EOF. Responses go to stdout, one JSON
/// object per line; logging stays on stderr.
pub async fn run_stdio(server: Arc<KnowledgeServer>) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("pongogo-knowledge serving on stdio");
    while let Some(line) = lines.next_line().await? {
        let server = Arc::clone(&server);
        // Tool work is synchronous (and event capture may sleep briefly on
        // lock contention); keep it off the IO driver.
        let reply =
            tokio::task::spawn_blocking(move || handle_line(&server, &line)).await.ok().flatten();
        if let Some(reply) = reply {
            stdout.write_all(reply.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    info!("stdin closed, shutting down");
    Ok(())
}
