//! ReAct 层：上下文引擎、Planner 与输出解析、主循环、过程事件、主控委派

pub mod context;
pub mod delegation;
pub mod events;
pub mod loop_;
pub mod planner;

pub use context::{AgentContext, ContextEngine};
pub use delegation::{delegation_query, delegation_request};
pub use events::ReactEvent;
pub use loop_::{effective_tools, normalize_args, run_react};
pub use planner::{agent_system_prompt, parse_llm_output, CatalogEntry, PlannerOutput, ToolCall};
