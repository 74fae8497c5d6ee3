//! Tool definitions exposed over the transport.

use serde_json::{json, Value};

/// A tool surfaced to MCP clients.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDef {
    fn new(name: &'static str, description: &'static str, input_schema: Value) -> Self {
        Self {
            name,
            description,
            input_schema,
        }
    }

    /// Export in MCP list-tools shape.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// The server's tool surface.
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "get_instructions",
            "Get relevant instruction files by topic or category.",
            json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "Topic or keyword to search (e.g. \"epic\", \"github\", \"testing\")"
                    },
                    "category": {
                        "type": "string",
                        "description": "Category to filter by (e.g. \"project_management\")"
                    },
                    "exact_match": {
                        "type": "boolean",
                        "description": "Match a specific file by category + topic",
                        "default": false
                    }
                }
            }),
        ),
        ToolDef::new(
            "search_instructions",
            "Full-text search across all instruction files.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query string"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results",
                        "default": 10
                    }
                },
                "required": ["query"]
            }),
        ),
        ToolDef::new(
            "route_instructions",
            "Intelligently route to relevant instruction files using keyword, \
             taxonomy, and context matching.",
            json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "User message or query"
                    },
                    "context": {
                        "type": "object",
                        "description": "Optional context: files, directories, branch, language"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of instructions to return",
                        "default": 5
                    }
                },
                "required": ["message"]
            }),
        ),
        ToolDef::new(
            "reindex_knowledge_base",
            "Manually trigger a knowledge base reindex. Includes spam \
             prevention (10-second minimum interval).",
            json!({
                "type": "object",
                "properties": {
                    "force": {
                        "type": "boolean",
                        "description": "Bypass the spam-prevention interval",
                        "default": false
                    }
                }
            }),
        ),
        ToolDef::new(
            "get_routing_info",
            "Get the active routing engine version, description, and loaded \
             instruction count.",
            json!({"type": "object", "properties": {}}),
        ),
    ]
}
