//! KubeGate Common - 令牌生命周期共享数据模型
//!
//! 该模块提供 KubeGate 项目中所有组件共享的数据结构、错误处理和工具函数。
//! 包括令牌阶段、缓存记录、授权范围以及签名声明等模型，不依赖任何集群连接。

pub mod models;
pub mod error;
pub mod time;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::claims::*;
pub use models::scope::*;
pub use models::token::*;
