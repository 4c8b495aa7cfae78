// MCP payload extraction - projects user-controlled fields into scannable text

use serde_json::{json, Value};

/// Protocol-layer methods exempt from content scanning
pub const SAFE_METHODS: &[&str] = &[
    "initialize",
    "initialized",
    "ping",
    "$/cancelRequest",
    "$/progress",
    "notifications/initialized",
    "notifications/cancelled",
    "notifications/progress",
];

pub fn is_safe_method(method: &str) -> bool {
    SAFE_METHODS.contains(&method)
}

/// Read the JSON-RPC method out of a raw payload, if any
pub fn parse_method(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    value
        .get("method")
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

/// Resource name for audit lookups
///
/// `tools/call` and `prompts/get` use params.name; `resources/read` uses
/// params.uri; any other method has no auditable resource.
pub fn extract_resource_name(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let method = value.get("method").and_then(|m| m.as_str())?;
    let params = value.get("params")?;

    match method {
        "tools/call" | "prompts/get" => params
            .get("name")
            .and_then(|n| n.as_str())
            .map(|s| s.to_string()),
        "resources/read" => params
            .get("uri")
            .and_then(|u| u.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Tool name of a `tools/call` payload, if it is one
pub fn extract_tool_name(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    if value.get("method").and_then(|m| m.as_str()) != Some("tools/call") {
        return None;
    }
    value
        .get("params")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(|s| s.to_string())
}

/// Project a raw MCP payload into a single scannable string
///
/// Returns `None` for safe methods (signal: skip scanning entirely).
/// Unparseable or non-JSON-RPC payloads come back unchanged so the
/// scanners still see the raw text.
pub fn extract_scannable_text(payload: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return Some(payload.to_string()),
    };

    let method = match value.get("method").and_then(|m| m.as_str()) {
        Some(m) => m,
        None => return Some(payload.to_string()),
    };

    if is_safe_method(method) {
        return None;
    }

    let params = match value.get("params") {
        Some(p) => p,
        None => return Some(payload.to_string()),
    };

    match method {
        "tools/call" => Some(format_tool_call(params)),
        "sampling/createMessage" | "prompts/get" => {
            extract_message_content(params).or_else(|| Some(payload.to_string()))
        }
        "resources/read" => {
            let uri = params.get("uri").cloned().unwrap_or(Value::Null);
            Some(json!([{ "_resource_uri": uri }]).to_string())
        }
        _ => Some(json!([params]).to_string()),
    }
}

/// Scanners downstream depend on this exact framing; do not reformat.
fn format_tool_call(params: &Value) -> String {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let arguments_json =
        serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".to_string());

    format!(
        "Tool: {}\nArguments:\n{}\nContext:\norigin: mcp_call",
        name, arguments_json
    )
}

fn extract_message_content(params: &Value) -> Option<String> {
    let mut collected = Vec::new();

    if let Some(messages) = params.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            if let Some(content) = message.get("content") {
                collected.push(json!({ "_message_content": content }));
            }
        }
    }

    if let Some(prompt) = params.get("prompt") {
        collected.push(json!({ "_prompt": prompt }));
    }

    if collected.is_empty() {
        None
    } else {
        Some(Value::Array(collected).to_string())
    }
}
