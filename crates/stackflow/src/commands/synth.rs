use crate::project::{GlobalOptions, Project};
use colored::Colorize;
use std::path::Path;

/// 合成ドキュメントを標準出力またはファイルに書き出す
pub fn handle(global: &GlobalOptions, out: Option<&Path>) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    let document = project.synthesize()?;

    match out {
        Some(path) => {
            document.write_to(path)?;
            eprintln!(
                "{} {} ({} リソース)",
                "✓ 合成ドキュメントを書き出しました:".green(),
                path.display().to_string().cyan(),
                document.resources.len()
            );
        }
        None => print!("{}", document.to_json()?),
    }
    Ok(())
}
