//! 数据模型模块
//!
//! 该模块定义了 KubeGate 项目中使用的核心数据模型，包括令牌状态、
//! 授权范围和签名声明，并提供序列化/反序列化功能。

pub mod claims;
pub mod scope;
pub mod token;
