//! 工具箱：Tool trait、FnTool、参数校验与内置工具（echo / current_time）

pub mod echo;
pub mod schema;
pub mod time;
pub mod tool;

pub use echo::EchoTool;
pub use schema::{tool_call_schema_json, validate_args};
pub use time::CurrentTimeTool;
pub use tool::{FnTool, Tool};
