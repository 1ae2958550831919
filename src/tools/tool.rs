//! 工具抽象
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / validate / execute）。
//! 工具节点在调用前先 validate，失败即 InvalidArguments，不进入 execute。
//! FnTool 把带类型参数的异步闭包包装为工具：参数 schema 由 schemars 推导，校验即反序列化。

use std::future::Future;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::schema::validate_args;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、参数校验、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段，也是注册到 OxySpace 的节点名）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 调用前的参数校验；默认按 parameters_schema 检查必填项与类型
    fn validate(&self, args: &Value) -> Result<(), String> {
        validate_args(&self.parameters_schema(), args)
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

type Validator = dyn Fn(&Value) -> Result<(), String> + Send + Sync;
type Handler = dyn Fn(Value) -> BoxFuture<'static, Result<String, String>> + Send + Sync;

/// 闭包工具：参数类型 A 决定 schema 与校验
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    validator: Box<Validator>,
    handler: Box<Handler>,
}

impl FnTool {
    pub fn new<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let schema = serde_json::to_value(schema_for!(A))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            validator: Box::new(|args: &Value| {
                serde_json::from_value::<A>(args.clone())
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }),
            handler: Box::new(move |args: Value| -> BoxFuture<'static, Result<String, String>> {
                match serde_json::from_value::<A>(args) {
                    Ok(a) => Box::pin(f(a)),
                    Err(e) => Box::pin(async move { Err(e.to_string()) }),
                }
            }),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        (self.validator)(args)
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        (self.handler)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn adder() -> FnTool {
        FnTool::new("add", "Add two integers", |args: AddArgs| async move {
            Ok((args.a + args.b).to_string())
        })
    }

    #[tokio::test]
    async fn test_fn_tool_executes_typed_args() {
        let tool = adder();
        let args = serde_json::json!({ "a": 2, "b": 3 });
        assert!(tool.validate(&args).is_ok());
        assert_eq!(tool.execute(args).await.unwrap(), "5");
    }

    #[test]
    fn test_fn_tool_rejects_bad_args() {
        let tool = adder();
        assert!(tool.validate(&serde_json::json!({ "a": "two" })).is_err());
        assert!(tool.validate(&serde_json::json!({ "a": 1 })).is_err());
    }

    #[test]
    fn test_fn_tool_schema_lists_properties() {
        let schema = adder().parameters_schema();
        let props = schema.get("properties").unwrap();
        assert!(props.get("a").is_some());
        assert!(props.get("b").is_some());
    }
}
