//! 属性値と参照
//!
//! リソースの属性はリテラル値か、他リソースの出力属性への参照で表現されます。
//! 参照は宣言時には評価されず、プラン／適用時に具体値へ解決されます。

use crate::token;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// プロバイダーが返す（または記録された）具体的な属性値
pub type Attributes = BTreeMap<String, Value>;

/// 論理識別子として有効か
///
/// 英字または `_` で始まり、英数字・`_`・`-` のみで構成される必要があります。
/// `.` は参照式の区切りに使うため許可しません。
pub fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// 他リソースの属性への参照（`vpc.id`, `role.inline_policy.0.name`）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// 参照先リソースの論理識別子
    pub resource: String,
    /// 参照先の属性パス（`.` 区切り）
    pub attribute: String,
}

impl Reference {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// `resource.attribute` 形式の式をパース
    pub fn parse(expr: &str) -> Option<Self> {
        let (resource, attribute) = expr.trim().split_once('.')?;
        if !is_valid_identifier(resource)
            || attribute.is_empty()
            || attribute.split('.').any(|part| part.is_empty())
        {
            return None;
        }
        Some(Self::new(resource, attribute))
    }

    /// 属性パスをたどって値を取り出す
    pub fn lookup<'a>(&self, attributes: &'a Attributes) -> Option<&'a Value> {
        let mut parts = self.attribute.split('.');
        let mut current = attributes.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// 属性パスの先頭（トップレベルの属性名）
    pub fn root_attribute(&self) -> &str {
        self.attribute
            .split('.')
            .next()
            .unwrap_or(self.attribute.as_str())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// 補間文字列の構成要素
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// 宣言された属性値
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// 参照を含まない値
    Literal(Value),
    /// 他リソースの属性そのもの
    Ref(Reference),
    /// 参照を含む文字列（`"${bucket.arn}/*"`）
    Interpolated(Vec<Segment>),
    /// 参照を含むリスト
    List(Vec<AttrValue>),
    /// 参照を含むオブジェクト
    Object(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        AttrValue::Literal(value.into())
    }

    /// リストを作成（参照を含まなければリテラルに畳み込む）
    pub fn list(items: Vec<AttrValue>) -> Self {
        if items.iter().all(|item| matches!(item, AttrValue::Literal(_))) {
            let values = items
                .into_iter()
                .filter_map(|item| match item {
                    AttrValue::Literal(v) => Some(v),
                    _ => None,
                })
                .collect();
            AttrValue::Literal(Value::Array(values))
        } else {
            AttrValue::List(items)
        }
    }

    /// オブジェクトを作成（参照を含まなければリテラルに畳み込む）
    pub fn object(fields: BTreeMap<String, AttrValue>) -> Self {
        if fields.values().all(|v| matches!(v, AttrValue::Literal(_))) {
            let map = fields
                .into_iter()
                .filter_map(|(k, v)| match v {
                    AttrValue::Literal(v) => Some((k, v)),
                    _ => None,
                })
                .collect();
            AttrValue::Literal(Value::Object(map))
        } else {
            AttrValue::Object(fields)
        }
    }

    /// 含まれる全ての参照（出現順）
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            AttrValue::Literal(_) => {}
            AttrValue::Ref(r) => out.push(r),
            AttrValue::Interpolated(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        out.push(r);
                    }
                }
            }
            AttrValue::List(items) => items.iter().for_each(|i| i.collect_references(out)),
            AttrValue::Object(fields) => fields.values().for_each(|v| v.collect_references(out)),
        }
    }

    pub fn has_references(&self) -> bool {
        !matches!(self, AttrValue::Literal(_))
    }

    /// 参照を具体値に置き換える
    ///
    /// `lookup` が値を返せない参照があった場合、その参照を `Err` で返します。
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Value, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            AttrValue::Literal(v) => Ok(v.clone()),
            AttrValue::Ref(r) => lookup(r).ok_or_else(|| r.clone()),
            AttrValue::Interpolated(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => {
                            let value = lookup(r).ok_or_else(|| r.clone())?;
                            out.push_str(&interpolation_text(&value));
                        }
                    }
                }
                Ok(Value::String(out))
            }
            AttrValue::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            AttrValue::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), value.resolve(lookup)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

/// 補間時の文字列表現（文字列はクォートなし、それ以外はJSON表現）
fn interpolation_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", token::encode(self))
    }
}

impl From<Reference> for AttrValue {
    fn from(r: Reference) -> Self {
        AttrValue::Ref(r)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Literal(Value::String(s.to_string()))
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Literal(Value::String(s))
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Literal(Value::Bool(b))
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Literal(Value::from(n))
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Literal(v)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(items: Vec<AttrValue>) -> Self {
        AttrValue::list(items)
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        token::encode(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|v| token::decode(&v))
    }
}
