//! リソース・プロバイダー・バックエンド・出力ノードのパース

use super::value::{entry_value, parse_attribute};
use crate::error::{Result, StackError};
use crate::model::{AttrValue, BackendBlock, Output, ProviderBlock, Resource};
use kdl::KdlNode;

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn child_or_property(node: &KdlNode, key: &str) -> Option<String> {
    if let Some(value) = node.get(key).and_then(|v| v.as_string()) {
        return Some(value.to_string());
    }
    node.children()
        .and_then(|children| children.get(key))
        .and_then(first_string)
}

/// provider ノードをパース
pub fn parse_provider(node: &KdlNode) -> Result<ProviderBlock> {
    let name = first_string(node)
        .ok_or_else(|| StackError::InvalidConfig("provider requires a name".to_string()))?;

    let mut provider = ProviderBlock {
        name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "region" => {
                    provider.region = first_string(child);
                }
                // 追加設定はconfigに保存
                other => {
                    if let Some(value) = first_string(child) {
                        provider.config.insert(other.to_string(), value);
                    }
                }
            }
        }
    }

    Ok(provider)
}

/// backend ノードをパース
///
/// `backend { bucket "..." key "..." region "..." }` または
/// `backend bucket="..." key="..." region="..."` の形式を受け付けます。
pub fn parse_backend(node: &KdlNode) -> Result<BackendBlock> {
    let require = |key: &str| {
        child_or_property(node, key)
            .ok_or_else(|| StackError::InvalidConfig(format!("backend requires '{}'", key)))
    };

    Ok(BackendBlock {
        bucket: require("bucket")?,
        key: require("key")?,
        region: require("region")?,
    })
}

/// resource ノードをパース
///
/// ```kdl
/// resource "subnet1" type="aws_subnet" {
///     vpc_id (ref)"vpc.id"
///     cidr_block "10.0.3.0/24"
///     depends-on "igw"
///     lifecycle { prevent-destroy #true }
/// }
/// ```
pub fn parse_resource(node: &KdlNode) -> Result<Resource> {
    let id = first_string(node)
        .ok_or_else(|| StackError::InvalidConfig("resource requires a name".to_string()))?;
    let resource_type = node
        .get("type")
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            StackError::InvalidConfig(format!("resource '{}' requires type=\"...\"", id))
        })?
        .to_string();

    let mut resource = Resource::new(id, resource_type);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" | "depends_on" => {
                    // 複数の依存先を引数として受け取る
                    resource.depends_on.extend(
                        child
                            .entries()
                            .iter()
                            .filter_map(|e| e.value().as_string().map(|s| s.to_string())),
                    );
                }
                "lifecycle" => {
                    if let Some(lifecycle) = child.children() {
                        for setting in lifecycle.nodes() {
                            if matches!(
                                setting.name().value(),
                                "prevent-destroy" | "prevent_destroy"
                            ) {
                                resource.lifecycle.prevent_destroy = setting
                                    .entries()
                                    .first()
                                    .and_then(|e| e.value().as_bool())
                                    .unwrap_or(false);
                            }
                        }
                    }
                }
                name => {
                    if resource.attributes.contains_key(name) {
                        return Err(StackError::InvalidConfig(format!(
                            "resource '{}' declares attribute '{}' twice",
                            resource.id, name
                        )));
                    }
                    let value = parse_attribute(child)?;
                    resource.attributes.insert(name.to_string(), value);
                }
            }
        }
    }

    Ok(resource)
}

/// output ノードをパース
///
/// `output "vpc-id" (ref)"vpc.id" sensitive=#true description="..."`
pub fn parse_output(node: &KdlNode) -> Result<Output> {
    let mut args = node.entries().iter().filter(|e| e.name().is_none());
    let name = args
        .next()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| StackError::InvalidConfig("output requires a name".to_string()))?
        .to_string();

    let values = args.map(entry_value).collect::<Result<Vec<_>>>()?;
    let value = match values.len() {
        0 => {
            return Err(StackError::InvalidConfig(format!(
                "output '{}' requires a value",
                name
            )));
        }
        1 => values.into_iter().next().unwrap_or(AttrValue::list(Vec::new())),
        _ => AttrValue::list(values),
    };

    Ok(Output {
        name,
        value,
        sensitive: node.get("sensitive").and_then(|v| v.as_bool()).unwrap_or(false),
        description: node
            .get("description")
            .and_then(|v| v.as_string())
            .map(|s| s.to_string()),
    })
}
