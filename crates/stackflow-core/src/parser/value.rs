//! 属性値のパース

use crate::error::{Result, StackError};
use crate::model::{AttrValue, Reference};
use crate::token;
use kdl::{KdlDocument, KdlEntry, KdlNode};
use std::collections::BTreeMap;

/// 参照を表す型注釈 `(ref)"vpc.id"`
const REF_ANNOTATION: &str = "ref";

/// 属性ノードを属性値に変換
///
/// - 引数1つ: スカラー
/// - 引数複数: リスト
/// - 子ノード: オブジェクト（同名の子ノードはリストにまとめる）
/// - プロパティのみ: オブジェクト
/// - 引数も子ノードもなし: 空リスト
pub(super) fn parse_attribute(node: &KdlNode) -> Result<AttrValue> {
    let name = node.name().value();
    let args: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_none()).collect();
    let props: Vec<&KdlEntry> = node.entries().iter().filter(|e| e.name().is_some()).collect();

    if let Some(children) = node.children() {
        if !args.is_empty() || !props.is_empty() {
            return Err(StackError::InvalidConfig(format!(
                "attribute '{}' cannot have both values and a block",
                name
            )));
        }
        return parse_block(children);
    }

    match (args.len(), props.is_empty()) {
        (0, false) => {
            let mut fields = BTreeMap::new();
            for prop in props {
                if let Some(key) = prop.name() {
                    fields.insert(key.value().to_string(), entry_value(prop)?);
                }
            }
            Ok(AttrValue::object(fields))
        }
        (0, true) => Ok(AttrValue::list(Vec::new())),
        (1, true) => entry_value(args[0]),
        (_, true) => Ok(AttrValue::list(
            args.into_iter().map(entry_value).collect::<Result<Vec<_>>>()?,
        )),
        (_, false) => Err(StackError::InvalidConfig(format!(
            "attribute '{}' mixes values and properties",
            name
        ))),
    }
}

/// 子ノードのブロックをオブジェクトに変換
pub(super) fn parse_block(doc: &KdlDocument) -> Result<AttrValue> {
    let mut grouped: BTreeMap<String, Vec<AttrValue>> = BTreeMap::new();
    for child in doc.nodes() {
        grouped
            .entry(child.name().value().to_string())
            .or_default()
            .push(parse_attribute(child)?);
    }

    let fields = grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                AttrValue::list(values)
            };
            (key, value)
        })
        .collect();
    Ok(AttrValue::object(fields))
}

/// エントリ1つを属性値に変換
pub(super) fn entry_value(entry: &KdlEntry) -> Result<AttrValue> {
    let value = entry.value();

    if let Some(ty) = entry.ty()
        && ty.value() == REF_ANNOTATION
    {
        let expr = value.as_string().ok_or_else(|| {
            StackError::InvalidConfig("(ref) annotation requires a string".to_string())
        })?;
        return Reference::parse(expr)
            .map(AttrValue::Ref)
            .ok_or_else(|| StackError::InvalidConfig(format!("invalid reference: {}", expr)));
    }

    if let Some(s) = value.as_string() {
        return Ok(token::parse_template(s));
    }
    Ok(AttrValue::Literal(kdl_value_to_json(value)?))
}

/// KDL値をJSON値に変換
///
/// JSONで表せない整数は `u64` まで受け付け、それ以外はエラーになります。
pub fn kdl_value_to_json(value: &kdl::KdlValue) -> Result<serde_json::Value> {
    if let Some(s) = value.as_string() {
        Ok(serde_json::Value::String(s.to_string()))
    } else if let Some(i) = value.as_integer() {
        let number = match i64::try_from(i) {
            Ok(n) => serde_json::Number::from(n),
            Err(_) => u64::try_from(i).map(serde_json::Number::from).map_err(|_| {
                StackError::InvalidConfig(format!("整数が範囲外です: {}", i))
            })?,
        };
        Ok(serde_json::Value::Number(number))
    } else if let Some(f) = value.as_float() {
        Ok(serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null))
    } else if let Some(b) = value.as_bool() {
        Ok(serde_json::Value::Bool(b))
    } else {
        Ok(serde_json::Value::Null)
    }
}
