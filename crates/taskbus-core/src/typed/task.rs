//! Task trait - 型付き Task の定義
//!
//! `Signature::name` と Rust の型を対応付けます。
//! args は `Signature::named_args()`（`{"<Name>": <Value>}`）から T に decode されます。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{Arg, Signature};

/// Task は task 名と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Add {
///     a: i64,
///     b: i64,
/// }
///
/// impl Task for Add {
///     const NAME: &'static str = "add";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    /// T のフィールドを named args に展開した Signature を作る
    fn to_signature(&self) -> Result<Signature, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let args = match value {
            serde_json::Value::Object(fields) => fields
                .into_iter()
                .map(|(name, value)| Arg::new(name, json_type_name(&value), value))
                .collect(),
            serde_json::Value::Null => Vec::new(),
            other => vec![Arg::new("0", json_type_name(&other), other)],
        };
        Ok(Signature::new(Self::NAME, args))
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(n) if n.is_f64() => "float64",
        serde_json::Value::Number(_) => "int64",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
