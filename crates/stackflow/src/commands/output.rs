use crate::display;
use crate::project::{GlobalOptions, Project};
use colored::Colorize;
use std::collections::BTreeMap;

/// 記録済みの出力値を表示
///
/// 名前を指定した場合は値のみを出力するため、シェルから利用できます。
pub async fn handle(global: &GlobalOptions, name: Option<&str>, json: bool) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    let outputs = project.store().read().await?.outputs;

    if let Some(name) = name {
        let output = outputs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("出力値が見つかりません: {}", name))?;
        if json {
            println!("{}", serde_json::to_string_pretty(&output.value)?);
        } else {
            match &output.value {
                serde_json::Value::String(s) => println!("{}", s),
                other => println!("{}", other),
            }
        }
        return Ok(());
    }

    if json {
        let values: BTreeMap<&String, &serde_json::Value> =
            outputs.iter().map(|(k, v)| (k, &v.value)).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("{}", "出力値はありません".dimmed());
        return Ok(());
    }
    display::print_outputs(&outputs);
    Ok(())
}
