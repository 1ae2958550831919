//! Oxy - Rust 多智能体执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量 OXY__*）
//! - **core**: 节点与空间、调用契约、错误与恢复、并发闸门、编排器（Mas）与注册表
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 消息与有界记忆、长期记忆来源、分块与历史索引、会话短期历史
//! - **react**: 上下文引擎、Planner、ReAct 主循环、主控委派、过程事件
//! - **tools**: 工具 trait、类型化工具、参数校验与内置工具
//! - **workflow**: 固定顺序流水线
//! - **checkpoint**: 断点账本、存储与回放
//! - **remote**: 跨进程调用信封、分发器与服务端

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod remote;
pub mod tools;
pub mod workflow;

pub use crate::core::{CallInput, Mas, MasRegistry, Node, OxyError, OxyResponse};
