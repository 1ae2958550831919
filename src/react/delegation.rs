//! 主控委派：把 THINK 选中的子智能体调用转成新的子请求
//!
//! 子请求 from_trace_id 指向主控调用，祖先链追加主控；工具作用域上限为主控当前可用工具。
//! 祖先环检测在 Mas::invoke 入口执行，环上的目标不会被再次执行。

use crate::core::OxyRequest;
use crate::react::ToolCall;

/// 委派查询：args.query 优先，否则沿用父调用的 query
pub fn delegation_query(call: &ToolCall, parent_query: &str) -> String {
    call.args
        .get("query")
        .and_then(|q| q.as_str())
        .map(String::from)
        .unwrap_or_else(|| parent_query.to_string())
}

pub fn delegation_request(req: &OxyRequest, call: &ToolCall, scope: &[String]) -> OxyRequest {
    let query = delegation_query(call, &req.query);
    req.child(&call.tool)
        .with_query(query)
        .with_arguments(call.args.clone())
        .with_scope(scope.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::core::CallInput;

    #[test]
    fn test_delegation_request_lineage_and_query() {
        let req = OxyRequest::root("master", CallInput::new("plan a trip"), CancellationToken::new());
        let call = ToolCall {
            tool: "weather_agent".into(),
            args: serde_json::json!({ "query": "weather in Rome" }),
        };
        let child = delegation_request(&req, &call, &["time_tool".to_string()]);
        assert_eq!(child.callee, "weather_agent");
        assert_eq!(child.query, "weather in Rome");
        assert_eq!(child.from_trace_id.as_deref(), Some(req.trace_id.as_str()));
        assert_eq!(child.scope, Some(vec!["time_tool".to_string()]));
        assert!(child.has_ancestor("master"));
    }

    #[test]
    fn test_delegation_query_falls_back_to_parent() {
        let call = ToolCall {
            tool: "b".into(),
            args: serde_json::Value::Null,
        };
        assert_eq!(delegation_query(&call, "original"), "original");
    }
}
