use crate::display;
use crate::project::{GlobalOptions, Project};
use colored::Colorize;
use std::path::Path;

pub async fn handle(global: &GlobalOptions, out: Option<&Path>, refresh: bool) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    project.print_header();

    let document = project.synthesize()?;
    let engine = project.engine()?;

    if refresh {
        println!();
        println!("{}", "実リソースとの差分を確認中...".blue());
        let drift = engine.refresh().await?;
        display::print_drift(&drift);
    }

    let plan = engine.plan(&document).await?;
    display::print_plan(&plan);

    if let Some(path) = out {
        std::fs::write(path, plan.to_json()?)?;
        println!();
        println!(
            "計画を保存しました: {}",
            path.display().to_string().cyan()
        );
        println!(
            "  適用するには: {}",
            format!("stack apply {}", path.display()).cyan()
        );
    }

    Ok(())
}
