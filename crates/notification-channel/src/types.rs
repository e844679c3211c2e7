//! 通知模型
//!
//! 定义向监听者投递的通知结构以及通知类型与代理主题的对应关系。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 默认订阅的代理主题
pub mod topics {
    pub const CRITICAL_STOCK: &str = "critical-stock";
    pub const PREVENTIVE_STOCK: &str = "preventive-stock";

    /// STOMP 目的地前缀
    pub const DESTINATION_PREFIX: &str = "/topic/";
}

/// 通知类型
///
/// 每种类型对应一个代理主题，监听者按类型注册
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    /// 缺货、库存见底
    Critical,
    /// 库存偏低，需要补货
    Preventive,
}

impl NotificationType {
    pub const ALL: [NotificationType; 2] = [Self::Critical, Self::Preventive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Preventive => "preventive",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递给监听者的通知
///
/// 构造后不再修改；每个监听者拿到各自的副本。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// 原始帧字段与规范化后的 payload 字段合并结果，payload 字段优先
    pub data: Map<String, Value>,
}

impl Notification {
    /// 从 data 中读取字符串字段，数值类型转换为字符串
    pub fn field(&self, key: &str) -> Option<String> {
        crate::frame::string_field(&self.data, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_serde() {
        assert_eq!(
            serde_json::to_string(&NotificationType::Critical).unwrap(),
            "\"critical\""
        );
        let parsed: NotificationType = serde_json::from_str("\"preventive\"").unwrap();
        assert_eq!(parsed, NotificationType::Preventive);
        assert_eq!(NotificationType::Critical.to_string(), "critical");
    }

    #[test]
    fn test_notification_serializes_type_field() {
        let notification = Notification {
            notification_type: NotificationType::Critical,
            message: "Producto agotado: Gasas (G-01)".to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({ "codigo": "G-01", "stock": 0 })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "critical");
        assert_eq!(json["data"]["codigo"], "G-01");
        assert_eq!(notification.field("stock").as_deref(), Some("0"));
        assert_eq!(notification.field("missing"), None);
    }
}
