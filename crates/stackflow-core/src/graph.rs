//! リソース依存グラフ
//!
//! リソースはアリーナ（`Vec`）に宣言順で格納し、依存関係はインデックスのリストで
//! 保持します。循環検出はインデックス上の純粋な走査で行います。

use crate::error::{Result, StackError};
use crate::model::{AttrValue, Output, Resource};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// 依存エッジ
///
/// `source` の属性 `source_attribute` が `target` の属性 `target_attribute` を参照していることを表します。
/// `depends-on` による明示的な依存の場合、属性は `None` です。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub source: String,
    pub source_attribute: Option<String>,
    pub target: String,
    pub target_attribute: Option<String>,
}

impl Edge {
    pub fn reference(
        source: impl Into<String>,
        source_attribute: impl Into<String>,
        target: impl Into<String>,
        target_attribute: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_attribute: Some(source_attribute.into()),
            target: target.into(),
            target_attribute: Some(target_attribute.into()),
        }
    }

    pub fn explicit(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_attribute: None,
            target: target.into(),
            target_attribute: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// リソースをノード、参照をエッジとする有向グラフ
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceGraph {
    nodes: Vec<Resource>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    /// ノードごとの依存先インデックス（昇順 = 宣言順）
    dependencies: Vec<Vec<usize>>,
    edges: Vec<Edge>,
    outputs: Vec<Output>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// リソースを追加
    pub fn add_resource(
        &mut self,
        id: impl Into<String>,
        resource_type: impl Into<String>,
        attributes: BTreeMap<String, AttrValue>,
    ) -> Result<usize> {
        let mut resource = Resource::new(id, resource_type);
        resource.attributes = attributes;
        self.insert(resource)
    }

    /// ライフサイクル設定などを含むリソースをそのまま追加
    pub fn insert(&mut self, resource: Resource) -> Result<usize> {
        if self.index.contains_key(&resource.id) {
            return Err(StackError::DuplicateIdentifier(resource.id));
        }
        let idx = self.nodes.len();
        self.index.insert(resource.id.clone(), idx);
        self.nodes.push(resource);
        self.dependencies.push(Vec::new());
        Ok(idx)
    }

    /// 依存エッジを追加
    pub fn add_reference(&mut self, edge: Edge) -> Result<()> {
        let source = *self
            .index
            .get(&edge.source)
            .ok_or_else(|| StackError::UnknownResource(edge.source.clone()))?;
        let target = *self
            .index
            .get(&edge.target)
            .ok_or_else(|| StackError::UnknownTarget {
                from: edge.source.clone(),
                target: match &edge.target_attribute {
                    Some(attr) => format!("{}.{}", edge.target, attr),
                    None => edge.target.clone(),
                },
            })?;

        let deps = &mut self.dependencies[source];
        if let Err(pos) = deps.binary_search(&target) {
            deps.insert(pos, target);
        }
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    /// 出力を追加（参照先はグラフ内に存在する必要がある）
    pub fn add_output(&mut self, output: Output) -> Result<()> {
        if self.outputs.iter().any(|o| o.name == output.name) {
            return Err(StackError::DuplicateIdentifier(format!(
                "output {}",
                output.name
            )));
        }
        for r in output.value.references() {
            if !self.index.contains_key(&r.resource) {
                return Err(StackError::UnknownTarget {
                    from: format!("output {}", output.name),
                    target: r.to_string(),
                });
            }
        }
        self.outputs.push(output);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// 宣言順のリソース
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// 直接の依存先（宣言順）
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&idx| {
                self.dependencies[idx]
                    .iter()
                    .map(|&d| self.nodes[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 直接の依存元（宣言順）
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        let Some(&target) = self.index.get(id) else {
            return Vec::new();
        };
        self.dependencies
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.binary_search(&target).is_ok())
            .map(|(idx, _)| self.nodes[idx].id.as_str())
            .collect()
    }

    /// トポロジカル順序
    ///
    /// 各リソースは参照する全てのリソースより後に現れます。順序制約のない
    /// リソース同士は宣言順で並ぶため、同じ入力からは常に同じ順序が得られます。
    /// 循環がある場合は循環を構成するリソースを含む `CyclicDependency` を返します。
    pub fn topological_order(&self) -> Result<Vec<&Resource>> {
        Ok(self
            .topological_indices()?
            .into_iter()
            .map(|idx| &self.nodes[idx])
            .collect())
    }

    fn topological_indices(&self) -> Result<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::InProgress;
            // (ノード, 次に調べる依存先の位置)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(&dep) = self.dependencies[node].get(frame.1) {
                    frame.1 += 1;
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::InProgress;
                            stack.push((dep, 0));
                        }
                        Mark::InProgress => {
                            let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                            let mut cycle: Vec<String> = stack[start..]
                                .iter()
                                .map(|(n, _)| self.nodes[*n].id.clone())
                                .collect();
                            cycle.push(self.nodes[dep].id.clone());
                            return Err(StackError::CyclicDependency { cycle });
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }

    /// 並列に適用可能なリソースの層
    ///
    /// 同じ層に属するリソース同士には依存関係がありません。
    pub fn layers(&self) -> Result<Vec<Vec<&str>>> {
        let order = self.topological_indices()?;
        let mut depth = vec![0usize; self.nodes.len()];
        let mut layers: Vec<Vec<&str>> = Vec::new();

        for idx in order {
            let d = self.dependencies[idx]
                .iter()
                .map(|&dep| depth[dep] + 1)
                .max()
                .unwrap_or(0);
            depth[idx] = d;
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(self.nodes[idx].id.as_str());
        }

        for layer in &mut layers {
            layer.sort_by_key(|id| self.index[*id]);
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        for (id, ty) in [
            ("vpc", "aws_vpc"),
            ("subnet1", "aws_subnet"),
            ("subnet2", "aws_subnet"),
            ("igw", "aws_internet_gateway"),
        ] {
            graph.add_resource(id, ty, BTreeMap::new()).unwrap();
        }
        for id in ["subnet1", "subnet2", "igw"] {
            graph
                .add_reference(Edge::reference(id, "vpc_id", "vpc", "id"))
                .unwrap();
        }
        graph
    }

    fn position(order: &[&Resource], id: &str) -> usize {
        order.iter().position(|r| r.id == id).unwrap()
    }

    #[test]
    fn test_vpc_before_dependents() {
        let graph = network_graph();
        let order = graph.topological_order().unwrap();
        let ids: Vec<&str> = order.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["vpc", "subnet1", "subnet2", "igw"]);
    }

    #[test]
    fn test_independent_resources_share_a_layer() {
        let graph = network_graph();
        let layers = graph.layers().unwrap();
        assert_eq!(layers, vec![vec!["vpc"], vec!["subnet1", "subnet2", "igw"]]);
    }

    #[test]
    fn test_forward_declared_dependency_is_ordered_first() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("alb", "aws_alb", BTreeMap::new()).unwrap();
        graph.add_resource("subnet1", "aws_subnet", BTreeMap::new()).unwrap();
        graph.add_resource("vpc", "aws_vpc", BTreeMap::new()).unwrap();
        graph
            .add_reference(Edge::reference("alb", "subnets", "subnet1", "id"))
            .unwrap();
        graph
            .add_reference(Edge::reference("subnet1", "vpc_id", "vpc", "id"))
            .unwrap();

        let order = graph.topological_order().unwrap();
        assert!(position(&order, "vpc") < position(&order, "subnet1"));
        assert!(position(&order, "subnet1") < position(&order, "alb"));
    }

    #[test]
    fn test_duplicate_identifier() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("vpc", "aws_vpc", BTreeMap::new()).unwrap();
        let err = graph
            .add_resource("vpc", "aws_vpc", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, StackError::DuplicateIdentifier(id) if id == "vpc"));
    }

    #[test]
    fn test_unknown_target() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("subnet1", "aws_subnet", BTreeMap::new()).unwrap();
        let err = graph
            .add_reference(Edge::reference("subnet1", "vpc_id", "vpc", "id"))
            .unwrap_err();
        assert!(matches!(err, StackError::UnknownTarget { target, .. } if target == "vpc.id"));
    }

    #[test]
    fn test_two_node_cycle() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("a", "t", BTreeMap::new()).unwrap();
        graph.add_resource("b", "t", BTreeMap::new()).unwrap();
        graph.add_reference(Edge::reference("a", "x", "b", "y")).unwrap();
        graph.add_reference(Edge::reference("b", "y", "a", "x")).unwrap();

        match graph.topological_order() {
            Err(StackError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_reports_only_members() {
        let mut graph = ResourceGraph::new();
        for id in ["root", "a", "b", "c"] {
            graph.add_resource(id, "t", BTreeMap::new()).unwrap();
        }
        graph.add_reference(Edge::explicit("root", "a")).unwrap();
        graph.add_reference(Edge::explicit("a", "b")).unwrap();
        graph.add_reference(Edge::explicit("b", "c")).unwrap();
        graph.add_reference(Edge::explicit("c", "a")).unwrap();

        let err = graph.topological_order().unwrap_err();
        match err {
            StackError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = ResourceGraph::new();
        graph.add_resource("a", "t", BTreeMap::new()).unwrap();
        graph.add_reference(Edge::reference("a", "x", "a", "id")).unwrap();
        assert!(matches!(
            graph.topological_order(),
            Err(StackError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_dependents_and_dependencies() {
        let graph = network_graph();
        assert_eq!(graph.dependencies("subnet1"), vec!["vpc"]);
        assert_eq!(graph.dependents("vpc"), vec!["subnet1", "subnet2", "igw"]);
        assert!(graph.dependents("igw").is_empty());
    }

    #[test]
    fn test_every_resource_after_its_dependencies() {
        // 宣言順とは逆向きの依存を含む鎖
        let mut graph = ResourceGraph::new();
        let ids = ["e", "d", "c", "b", "a"];
        for id in ids {
            graph.add_resource(id, "t", BTreeMap::new()).unwrap();
        }
        for pair in ids.windows(2) {
            graph.add_reference(Edge::explicit(pair[0], pair[1])).unwrap();
        }
        graph.add_reference(Edge::explicit("e", "a")).unwrap();

        let order = graph.topological_order().unwrap();
        for edge in graph.edges() {
            assert!(position(&order, &edge.target) < position(&order, &edge.source));
        }
    }
}
