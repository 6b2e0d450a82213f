//! 工具调用参数在两种表示之间的归一化。
//!
//! 通用格式需要结构化对象，线上格式是 JSON 字符串。两个方向都不会失败：
//! 无法解析的字符串包装为 `{"raw": ...}`，其他标量包装为 `{"value": ...}`。
//! 因此在回退情况下这一对函数不是双射。

use serde_json::{json, Map, Value};

use crate::types::Arguments;

/// 通用 `args` → 线上参数（编码后的 JSON 对象字符串）
pub fn to_wire_args(args: Option<&Value>) -> Arguments {
    let object = match args {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(raw)) => parse_object(raw),
        Some(other) => json!({ "value": other }),
    };
    Arguments::Encoded(object.to_string())
}

/// 线上参数 → 通用 `args` 对象
pub fn from_wire_args(arguments: &Arguments) -> Value {
    match arguments {
        Arguments::Encoded(raw) => parse_object(raw),
        Arguments::Structured(Value::Object(map)) => Value::Object(map.clone()),
        Arguments::Structured(_) => Value::Object(Map::new()),
    }
}

fn parse_object(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({ "value": other }),
        Err(e) => {
            tracing::debug!("工具参数不是合法 JSON，按原文保留：{}", e);
            json!({ "raw": raw })
        }
    }
}
