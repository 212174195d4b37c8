//! スタック定義

use super::resource::{Output, Resource};
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::resolver::{ReferencePolicy, ReferenceResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// プロバイダー設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBlock {
    /// プロバイダー名（aws, local など）
    pub name: String,

    /// リージョン（eu-central-1 など）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// 追加設定（プロバイダー固有）
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// ステート保存先
///
/// bucket + key + region でステートの保存場所を一意に特定します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendBlock {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

/// パース直後のスタック宣言（参照は未検証）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackDefinition {
    pub name: String,
    pub provider: Option<ProviderBlock>,
    pub backend: Option<BackendBlock>,
    /// 宣言順のリソース
    pub resources: Vec<Resource>,
    pub outputs: Vec<Output>,
}

impl StackDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 参照を解決して依存グラフを構築
    pub fn resolve(self, policy: ReferencePolicy) -> Result<Stack> {
        let mut resolver = ReferenceResolver::new(policy);
        for resource in self.resources {
            resolver.declare(resource)?;
        }
        for output in self.outputs {
            resolver.declare_output(output)?;
        }

        Ok(Stack {
            name: self.name,
            provider: self.provider,
            backend: self.backend,
            graph: resolver.build()?,
        })
    }
}

/// 参照解決済みのスタック
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub provider: Option<ProviderBlock>,
    pub backend: Option<BackendBlock>,
    pub graph: ResourceGraph,
}
