//! KDLパーサー
//!
//! StackFlowのスタック定義ファイル（stack.kdl）をパースします。
//! リソースブロックのパース処理はモジュールに分離されています。

mod resource;
mod value;

use resource::{parse_backend, parse_output, parse_provider, parse_resource};

pub use value::kdl_value_to_json;

use crate::error::Result;
use crate::model::StackDefinition;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;
use tracing::debug;

/// KDLファイルをパースしてStackDefinitionを生成
pub fn parse_stack_file<P: AsRef<Path>>(path: P) -> Result<StackDefinition> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_stack_string(&content, name)
}

/// KDL文字列をパース
///
/// リソースは宣言順に保持されます。参照の検証は行いません
/// （[`StackDefinition::resolve`] で行います）。
pub fn parse_stack_string(content: &str, default_name: String) -> Result<StackDefinition> {
    let doc: KdlDocument = content.parse()?;
    let mut stack = StackDefinition::new(default_name);

    for node in doc.nodes() {
        match node.name().value() {
            "stack" | "project" => {
                // stackノードから名前を取得
                if let Some(stack_name) = node.entries().first().and_then(|e| e.value().as_string())
                {
                    stack.name = stack_name.to_string();
                }
            }
            "provider" => {
                stack.provider = Some(parse_provider(node)?);
            }
            "backend" => {
                stack.backend = Some(parse_backend(node)?);
            }
            "resource" => {
                stack.resources.push(parse_resource(node)?);
            }
            "output" => {
                stack.outputs.push(parse_output(node)?);
            }
            "variables" => {
                // テンプレート展開時に処理済み
            }
            other => {
                debug!(node = other, "Skipping unknown top-level node");
            }
        }
    }

    Ok(stack)
}
