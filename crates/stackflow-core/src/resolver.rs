//! 参照リゾルバー
//!
//! 宣言フェーズと解決フェーズの2段階で参照を扱います。
//! 宣言時には属性に埋め込まれた参照をエッジとして登録するだけで、値の評価は行いません。

use crate::error::{Result, StackError};
use crate::graph::{Edge, ResourceGraph};
use crate::model::{Output, Resource, is_valid_identifier};
use std::collections::HashSet;
use tracing::debug;

/// 未宣言リソースへの参照の扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// 宣言済みのリソースのみ参照可能（宣言時に `UnknownTarget`）
    #[default]
    Strict,
    /// 前方参照を許可し、検証をグラフ構築時まで遅延する
    Deferred,
}

/// 宣言を受け付けて依存エッジを記録する
#[derive(Debug, Default)]
pub struct ReferenceResolver {
    policy: ReferencePolicy,
    declared: Vec<Resource>,
    ids: HashSet<String>,
    edges: Vec<Edge>,
    outputs: Vec<Output>,
}

impl ReferenceResolver {
    pub fn new(policy: ReferencePolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> ReferencePolicy {
        self.policy
    }

    /// リソースを宣言する
    pub fn declare(&mut self, resource: Resource) -> Result<()> {
        if !is_valid_identifier(&resource.id) {
            return Err(StackError::InvalidIdentifier(resource.id));
        }
        if self.ids.contains(&resource.id) {
            return Err(StackError::DuplicateIdentifier(resource.id));
        }

        let mut edges = Vec::new();
        for (attribute, reference) in resource.references() {
            self.check_declared(&resource.id, &reference.resource, || reference.to_string())?;
            edges.push(Edge::reference(
                &resource.id,
                attribute,
                &reference.resource,
                &reference.attribute,
            ));
        }
        for target in &resource.depends_on {
            self.check_declared(&resource.id, target, || target.clone())?;
            edges.push(Edge::explicit(&resource.id, target));
        }

        debug!(
            resource = %resource.id,
            resource_type = %resource.resource_type,
            edges = edges.len(),
            "Declared resource"
        );
        self.ids.insert(resource.id.clone());
        self.edges.extend(edges);
        self.declared.push(resource);
        Ok(())
    }

    /// 出力を宣言する
    pub fn declare_output(&mut self, output: Output) -> Result<()> {
        for reference in output.value.references() {
            let from = format!("output {}", output.name);
            self.check_declared(&from, &reference.resource, || reference.to_string())?;
        }
        self.outputs.push(output);
        Ok(())
    }

    /// 宣言時に記録されたエッジ
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// 依存グラフを構築する
    ///
    /// 遅延された参照はここで検証され、循環があれば `CyclicDependency` になります。
    pub fn build(self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();
        for resource in self.declared {
            graph.insert(resource)?;
        }
        for edge in self.edges {
            graph.add_reference(edge)?;
        }
        for output in self.outputs {
            graph.add_output(output)?;
        }

        graph.topological_order()?;
        Ok(graph)
    }

    fn check_declared(
        &self,
        from: &str,
        target: &str,
        describe: impl FnOnce() -> String,
    ) -> Result<()> {
        // 自己参照は循環としてグラフ構築時に報告する
        if self.policy == ReferencePolicy::Strict && target != from && !self.ids.contains(target) {
            return Err(StackError::UnknownTarget {
                from: from.to_string(),
                target: describe(),
            });
        }
        Ok(())
    }
}
