//! リソース宣言

use super::value::{AttrValue, Reference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 宣言されたインフラリソース
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// 論理識別子（スタック内で一意）
    pub id: String,

    /// リソースタイプ（aws_vpc, aws_subnet など）
    #[serde(rename = "type")]
    pub resource_type: String,

    /// 属性（リテラルまたは参照）
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,

    /// 明示的な依存先
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_prevent_destroy(mut self, prevent_destroy: bool) -> Self {
        self.lifecycle.prevent_destroy = prevent_destroy;
        self
    }

    /// 属性に埋め込まれた参照を (属性名, 参照) の組で返す
    pub fn references(&self) -> Vec<(&str, &Reference)> {
        self.attributes
            .iter()
            .flat_map(|(name, value)| {
                value
                    .references()
                    .into_iter()
                    .map(move |r| (name.as_str(), r))
            })
            .collect()
    }
}

/// ライフサイクル設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// trueの場合、このリソースを削除するプランはエラーになる
    #[serde(default)]
    pub prevent_destroy: bool,
}

/// スタックから外部に公開する名前付きの値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: AttrValue,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: false,
            description: None,
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}
