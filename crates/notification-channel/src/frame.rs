//! 代理帧解码
//!
//! 代理推送的消息结构不受控：字段可能缺失、类型不符，`payload` 既可能是
//! 对象，也可能是 JSON 字符串或纯文本。这里把原始 JSON 解码为带判别的
//! `InboundFrame`，任何字段都经过显式检查后才使用。

use serde_json::{Map, Value};

use crate::error::ChannelError;
use crate::types::NotificationType;

/// 去重键中描述字段保留的字符数
const DEDUP_DESCRIPTION_CHARS: usize = 20;

/// payload 中承载纯文本的字段，按顺序查找
const TEXT_KEYS: [&str; 2] = ["message", "mensaje"];

// ---------------------------------------------------------------------------
// FrameKind — 帧类型判别
// ---------------------------------------------------------------------------

/// 帧的 `type` 字段
///
/// 已知类型有专门的消息模板，其余原样保留在 `Other` 中。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    ProductoAgotado,
    StockCritico,
    StockBajo,
    Other(String),
}

impl FrameKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRODUCTO_AGOTADO" => Self::ProductoAgotado,
            "STOCK_CRITICO" => Self::StockCritico,
            "STOCK_BAJO" => Self::StockBajo,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ProductoAgotado => "PRODUCTO_AGOTADO",
            Self::StockCritico => "STOCK_CRITICO",
            Self::StockBajo => "STOCK_BAJO",
            Self::Other(raw) => raw,
        }
    }
}

// ---------------------------------------------------------------------------
// StockPayload — 规范化后的 payload 形态
// ---------------------------------------------------------------------------

/// 带库存明细的 payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StockItem {
    pub codigo: Option<String>,
    pub descripcion: Option<String>,
}

/// payload 的封闭形态集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockPayload {
    /// 含商品编码或描述的结构化明细
    Item(StockItem),
    /// 只有一段文本
    Text(String),
    Empty,
}

// ---------------------------------------------------------------------------
// InboundFrame
// ---------------------------------------------------------------------------

/// 解码后的入站帧
#[derive(Debug, Clone)]
pub struct InboundFrame {
    tenant_id: Option<String>,
    kind: FrameKind,
    message: Option<String>,
    timestamp: Option<String>,
    payload: StockPayload,
    fields: Map<String, Value>,
    payload_fields: Map<String, Value>,
}

impl InboundFrame {
    /// 解码帧正文，正文必须是 JSON 对象
    pub fn decode(body: &str) -> Result<Self, ChannelError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ChannelError::Decode(e.to_string()))?;

        let Value::Object(fields) = value else {
            return Err(ChannelError::Decode(format!(
                "帧正文不是 JSON 对象: {}",
                json_kind(&value)
            )));
        };

        let payload_fields = normalize_payload(fields.get("payload"));
        let payload = classify_payload(&payload_fields, &fields);

        Ok(Self {
            tenant_id: string_field(&fields, "tenantId"),
            kind: string_field(&fields, "type")
                .map(|t| FrameKind::parse(&t))
                .unwrap_or_else(|| FrameKind::Other(String::new())),
            message: string_field(&fields, "message"),
            timestamp: string_field(&fields, "timestamp"),
            payload,
            fields,
            payload_fields,
        })
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    /// 帧顶层的 `message` 字段
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn payload(&self) -> &StockPayload {
        &self.payload
    }

    /// 去重键：通知类型、商品编码、时间戳与描述前 20 个字符
    ///
    /// 纯文本 payload 以文本本身代替描述：没有编码和时间戳的两条不同文本
    /// 告警产生不同的键，会各自投递一次，这是有意为之。
    pub fn dedup_key(&self, notification_type: NotificationType) -> String {
        let (codigo, descripcion) = match &self.payload {
            StockPayload::Item(item) => (item.codigo.as_deref(), item.descripcion.as_deref()),
            StockPayload::Text(text) => (None, Some(text.as_str())),
            StockPayload::Empty => (None, None),
        };
        let prefix: String = descripcion
            .unwrap_or_default()
            .chars()
            .take(DEDUP_DESCRIPTION_CHARS)
            .collect();

        format!(
            "{}|{}|{}|{}",
            notification_type,
            codigo.unwrap_or_default(),
            self.timestamp.as_deref().unwrap_or_default(),
            prefix
        )
    }

    /// payload 中的纯文本字段，与 payload 是否带有商品编码无关
    pub fn payload_text(&self) -> Option<String> {
        TEXT_KEYS
            .iter()
            .find_map(|k| string_field(&self.payload_fields, k))
    }

    /// 合并原始帧字段与规范化后的 payload 字段，同名时 payload 优先
    pub fn merged_data(&self) -> Map<String, Value> {
        let mut data = self.fields.clone();
        for (key, value) in &self.payload_fields {
            data.insert(key.clone(), value.clone());
        }
        data
    }
}

/// 规范化 payload
///
/// - 对象原样使用
/// - 以 `{` 或 `[` 开头的字符串尝试按 JSON 解析，失败时退化为文本
/// - 其他字符串包装为 `{ "message": 原文 }`
/// - 数组包装为 `{ "items": [...] }`
pub fn normalize_payload(payload: Option<&Value>) -> Map<String, Value> {
    match payload {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(items)) => wrap("items", Value::Array(items.clone())),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Object(map)) => return map,
                    Ok(Value::Array(items)) => return wrap("items", Value::Array(items)),
                    _ => {}
                }
            }
            wrap("message", Value::String(raw.clone()))
        }
        Some(other) => wrap("message", Value::String(other.to_string())),
    }
}

/// 从 JSON 对象中安全提取字符串值
///
/// 字符串去除首尾空白后为空视为缺失；数值和布尔值转换为字符串表示。
pub fn string_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn classify_payload(payload: &Map<String, Value>, frame: &Map<String, Value>) -> StockPayload {
    let lookup = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| string_field(payload, k))
            .or_else(|| keys.iter().find_map(|k| string_field(frame, k)))
    };

    let item = StockItem {
        codigo: lookup(&["codigo", "code"]),
        descripcion: lookup(&["descripcion", "description"]),
    };
    if item.codigo.is_some() || item.descripcion.is_some() {
        return StockPayload::Item(item);
    }

    match TEXT_KEYS
        .iter()
        .find_map(|k| string_field(payload, k))
    {
        Some(text) => StockPayload::Text(text),
        None => StockPayload::Empty,
    }
}

fn wrap(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = InboundFrame::decode("not valid json").unwrap_err();
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = InboundFrame::decode("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_payload_json_string_is_parsed() {
        let frame = InboundFrame::decode(
            r#"{"type":"PRODUCTO_AGOTADO","payload":"{\"codigo\":\"X1\",\"descripcion\":\"Widget\"}"}"#,
        )
        .unwrap();

        assert_eq!(frame.kind(), &FrameKind::ProductoAgotado);
        assert_eq!(
            frame.payload(),
            &StockPayload::Item(StockItem {
                codigo: Some("X1".to_string()),
                descripcion: Some("Widget".to_string()),
            })
        );
    }

    #[test]
    fn test_payload_plain_text_is_wrapped() {
        let frame =
            InboundFrame::decode(r#"{"tenantId":"T1","type":"CRITICO","payload":"Out of gauze"}"#)
                .unwrap();

        assert_eq!(frame.tenant_id(), Some("T1"));
        assert_eq!(frame.kind(), &FrameKind::Other("CRITICO".to_string()));
        assert_eq!(frame.payload(), &StockPayload::Text("Out of gauze".to_string()));
        assert_eq!(frame.merged_data()["message"], "Out of gauze");
    }

    #[test]
    fn test_payload_broken_json_string_falls_back_to_text() {
        let normalized = normalize_payload(Some(&json!("{codigo: X1")));
        assert_eq!(normalized["message"], "{codigo: X1");
    }

    #[test]
    fn test_payload_shapes() {
        assert!(normalize_payload(None).is_empty());
        assert!(normalize_payload(Some(&Value::Null)).is_empty());

        let object = normalize_payload(Some(&json!({ "codigo": "A" })));
        assert_eq!(object["codigo"], "A");

        let array = normalize_payload(Some(&json!("[1,2]")));
        assert_eq!(array["items"], json!([1, 2]));

        let number = normalize_payload(Some(&json!(42)));
        assert_eq!(number["message"], "42");
    }

    #[test]
    fn test_item_fields_fall_back_to_frame_level() {
        let frame = InboundFrame::decode(
            r#"{"type":"STOCK_BAJO","codigo":17,"descripcion":"Jeringas 5ml"}"#,
        )
        .unwrap();

        assert_eq!(
            frame.payload(),
            &StockPayload::Item(StockItem {
                codigo: Some("17".to_string()),
                descripcion: Some("Jeringas 5ml".to_string()),
            })
        );
    }

    #[test]
    fn test_dedup_key_uses_description_prefix() {
        let frame = InboundFrame::decode(
            r#"{"type":"STOCK_BAJO","timestamp":1700000000000,"payload":{"codigo":"B2","descripcion":"Guantes de nitrilo talla mediana"}}"#,
        )
        .unwrap();

        assert_eq!(
            frame.dedup_key(NotificationType::Preventive),
            "preventive|B2|1700000000000|Guantes de nitrilo t"
        );
    }

    #[test]
    fn test_dedup_key_counts_characters_not_bytes() {
        let frame = InboundFrame::decode(
            r#"{"payload":{"descripcion":"Solución salina fisiológica 0,9%"}}"#,
        )
        .unwrap();

        assert_eq!(
            frame.dedup_key(NotificationType::Critical),
            "critical|||Solución salina fisi"
        );
    }

    #[test]
    fn test_dedup_key_text_payload_stands_in_for_description() {
        let gasa = InboundFrame::decode(r#"{"type":"CRITICO","payload":"Out of gauze"}"#).unwrap();
        let guantes = InboundFrame::decode(r#"{"type":"CRITICO","payload":"Out of gloves"}"#).unwrap();

        assert_eq!(gasa.dedup_key(NotificationType::Critical), "critical|||Out of gauze");
        assert_ne!(
            gasa.dedup_key(NotificationType::Critical),
            guantes.dedup_key(NotificationType::Critical)
        );
    }

    #[test]
    fn test_payload_text_alongside_code() {
        let frame = InboundFrame::decode(
            r#"{"type":"PRODUCTO_AGOTADO","payload":{"codigo":"X1","message":"Falta gasa"}}"#,
        )
        .unwrap();

        assert!(matches!(frame.payload(), StockPayload::Item(_)));
        assert_eq!(frame.payload_text().as_deref(), Some("Falta gasa"));
    }

    #[test]
    fn test_merged_data_prefers_payload_fields() {
        let frame = InboundFrame::decode(
            r#"{"type":"STOCK_CRITICO","codigo":"OLD","payload":{"codigo":"NEW","stock":2}}"#,
        )
        .unwrap();

        let data = frame.merged_data();
        assert_eq!(data["codigo"], "NEW");
        assert_eq!(data["stock"], 2);
        assert_eq!(data["type"], "STOCK_CRITICO");
    }

    #[test]
    fn test_string_field_types() {
        let data = json!({ "s": "  ", "n": 3, "b": true, "o": {} });
        let data = data.as_object().unwrap();
        assert_eq!(string_field(data, "s"), None);
        assert_eq!(string_field(data, "n").as_deref(), Some("3"));
        assert_eq!(string_field(data, "b").as_deref(), Some("true"));
        assert_eq!(string_field(data, "o"), None);
    }
}
