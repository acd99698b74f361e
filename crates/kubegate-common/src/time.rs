//! 时间工具函数
//!
//! 令牌的所有时间比较都以整数 Unix 秒为粒度，这里负责秒与 RFC3339 字符串之间的换算。

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// 将 Unix 秒格式化为 RFC3339 UTC 字符串
pub fn format_epoch(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// 解析 RFC3339 字符串为 Unix 秒，亚秒部分被截断
pub fn parse_rfc3339(value: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.timestamp())
        .map_err(|e| Error::UserData(format!("无效的时间格式 {:?}: {}", value, e)))
}
