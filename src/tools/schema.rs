//! 工具调用 JSON Schema 生成与参数校验
//!
//! tool_call_schema_json 注入 system prompt，减少 LLM 输出格式错误；
//! validate_args 按工具声明的 schema 检查必填项与基本类型。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 工具调用请求格式：与 ReAct 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名或子智能体名
    pub tool: String,
    /// 工具参数，依工具不同而不同；委派子智能体时为 {"query": "..."}
    pub args: Value,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// 按 schema 校验参数：顶层需为对象、必填项存在、已声明属性的类型匹配
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err(format!("arguments must be a JSON object, got {}", args));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(expected) = props.get(key).and_then(|p| p.get("type")) else {
            continue;
        };
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(ts) => ts
                .iter()
                .filter_map(|t| t.as_str())
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!("argument '{key}' should be {expected}, got {value}"));
        }
    }
    Ok(())
}
