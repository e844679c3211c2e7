//! 通知文案模板
//!
//! 根据帧类型与库存明细生成面向仓库人员的西班牙语提示文案。
//! 文案优先级：帧顶层 message > 纯文本 payload > 类型模板 > 通知类型默认文案。

use crate::frame::{FrameKind, InboundFrame, StockItem, StockPayload};
use crate::types::NotificationType;

/// 通知文案模板引擎
pub struct MessageTemplates;

impl MessageTemplates {
    /// 为入站帧生成最终文案
    pub fn render(frame: &InboundFrame, notification_type: NotificationType) -> String {
        if let Some(message) = frame.message() {
            return message.to_string();
        }

        match frame.payload() {
            StockPayload::Text(text) => text.clone(),
            StockPayload::Item(item) => Self::render_item(frame.kind(), item)
                .or_else(|| frame.payload_text().filter(|_| item.descripcion.is_none()))
                .unwrap_or_else(|| Self::default_message(notification_type).to_string()),
            StockPayload::Empty => Self::default_message(notification_type).to_string(),
        }
    }

    /// 按帧类型渲染库存明细
    ///
    /// 缺少描述时无法生成有意义的文案，返回 None 交由默认文案处理
    pub fn render_item(kind: &FrameKind, item: &StockItem) -> Option<String> {
        let prefix = match kind {
            FrameKind::ProductoAgotado => "Producto agotado",
            FrameKind::StockCritico => "Stock crítico",
            FrameKind::StockBajo => "Stock bajo",
            FrameKind::Other(_) => return None,
        };
        let descripcion = item.descripcion.as_deref()?;

        Some(match item.codigo.as_deref() {
            Some(codigo) => format!("{prefix}: {descripcion} ({codigo})"),
            None => format!("{prefix}: {descripcion}"),
        })
    }

    /// 通知类型的默认文案
    pub fn default_message(notification_type: NotificationType) -> &'static str {
        match notification_type {
            NotificationType::Critical => "Alerta crítica de inventario",
            NotificationType::Preventive => "Alerta preventiva de inventario",
        }
    }
}
