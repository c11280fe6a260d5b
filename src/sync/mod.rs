// 配置同步模块
//
// 模块结构:
// - commands: 远程读写命令构造
// - document: 通用文档树与规范化哈希
// - engine: 同步引擎 (ConfigSyncEngine)
// - store: 同步目标元数据 (SyncStore)
// - xrayr: XrayR 配置摘要视图

pub mod commands;
pub mod document;
pub mod engine;
pub mod store;
pub mod xrayr;

pub use document::{parse_yaml, Document, DocumentError, ParsedSnapshot, Scalar};
pub use engine::ConfigSyncEngine;
pub use store::SyncStore;
pub use xrayr::{XrayrError, XrayrSummary};
