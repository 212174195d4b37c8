//! シンセサイザー
//!
//! 解決済みのスタックをトポロジカル順に走査し、移植可能なJSONドキュメントを生成します。
//! 参照は `${resource.attribute}` プレースホルダーのまま残し、具体値への置換は
//! プランナー／エグゼキューターに任せます。同じグラフからは常にバイト単位で同一の
//! ドキュメントが生成されます。

use crate::error::Result;
use crate::model::{AttrValue, BackendBlock, ProviderBlock, Stack};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, instrument};

/// ドキュメント形式のバージョン
pub const SYNTH_FORMAT_VERSION: u32 = 1;

fn is_false(value: &bool) -> bool {
    !*value
}

/// 合成されたスタック（望ましい状態）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthDocument {
    pub format_version: u32,
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendBlock>,
    /// トポロジカル順のリソース
    pub resources: Vec<SynthResource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, SynthOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    /// 直接の依存先（宣言順）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub prevent_destroy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthOutput {
    pub value: AttrValue,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,
}

impl SynthDocument {
    /// 空のスタック（全リソース削除用）
    pub fn empty(stack: impl Into<String>) -> Self {
        Self {
            format_version: SYNTH_FORMAT_VERSION,
            stack: stack.into(),
            provider: None,
            backend: None,
            resources: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn resource(&self, id: &str) -> Option<&SynthResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// スタックを合成する
#[instrument(skip(stack), fields(stack = %stack.name))]
pub fn synthesize(stack: &Stack) -> Result<SynthDocument> {
    let graph = &stack.graph;
    let resources = graph
        .topological_order()?
        .into_iter()
        .map(|resource| SynthResource {
            id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            depends_on: graph
                .dependencies(&resource.id)
                .into_iter()
                .map(str::to_string)
                .collect(),
            attributes: resource.attributes.clone(),
            prevent_destroy: resource.lifecycle.prevent_destroy,
        })
        .collect::<Vec<_>>();

    let outputs = graph
        .outputs()
        .iter()
        .map(|output| {
            (
                output.name.clone(),
                SynthOutput {
                    value: output.value.clone(),
                    sensitive: output.sensitive,
                },
            )
        })
        .collect();

    debug!(resources = resources.len(), "Synthesized stack");
    Ok(SynthDocument {
        format_version: SYNTH_FORMAT_VERSION,
        stack: stack.name.clone(),
        provider: stack.provider.clone(),
        backend: stack.backend.clone(),
        resources,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StackBuilder;
    use crate::error::StackError;
    use crate::model::{Reference, Resource};
    use crate::resolver::ReferencePolicy;
    use serde_json::json;

    fn sample_stack() -> Stack {
        let mut builder = StackBuilder::new("lambda-crawl");
        let vpc = builder
            .resource("vpc", "aws_vpc", [("cidr_block", "10.0.0.0/16".into())])
            .unwrap();
        builder
            .resource(
                "subnet1",
                "aws_subnet",
                [
                    ("vpc_id", vpc.attr("id")),
                    ("cidr_block", "10.0.3.0/24".into()),
                ],
            )
            .unwrap();
        builder
            .resource(
                "policy",
                "aws_iam_policy",
                [("note", "literal ${not_a.ref}".into())],
            )
            .unwrap();
        builder.output("vpc-id-output", vpc.attr("id")).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_resynthesis_is_byte_identical() {
        let stack = sample_stack();
        let first = synthesize(&stack).unwrap().to_json().unwrap();
        let second = synthesize(&stack).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_references_become_placeholders() {
        let doc = synthesize(&sample_stack()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();

        assert_eq!(value["resources"][1]["id"], json!("subnet1"));
        assert_eq!(value["resources"][1]["depends_on"], json!(["vpc"]));
        assert_eq!(
            value["resources"][1]["attributes"]["vpc_id"],
            json!("${vpc.id}")
        );
        // リテラルの ${ はエスケープされる
        assert_eq!(
            value["resources"][2]["attributes"]["note"],
            json!("literal $${not_a.ref}")
        );
        assert_eq!(value["outputs"]["vpc-id-output"]["value"], json!("${vpc.id}"));
    }

    #[test]
    fn test_document_round_trip_preserves_references() {
        let doc = synthesize(&sample_stack()).unwrap();
        let parsed = SynthDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(
            parsed.resource("subnet1").unwrap().attributes["vpc_id"],
            AttrValue::Ref(Reference::new("vpc", "id"))
        );
    }

    #[test]
    fn test_cycle_prevents_synthesis() {
        let mut builder = StackBuilder::with_policy("cyclic", ReferencePolicy::Deferred);
        builder
            .add(Resource::new("a", "t").with_attribute("x", Reference::new("b", "id")))
            .unwrap();
        builder
            .add(Resource::new("b", "t").with_attribute("x", Reference::new("a", "id")))
            .unwrap();
        assert!(matches!(
            builder.build(),
            Err(StackError::CyclicDependency { .. })
        ));
    }
}
