use crate::display;
use crate::project::{GlobalOptions, Project};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    global: &GlobalOptions,
    yes: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    project.print_header();
    let engine = project.engine()?;

    let preview = engine.plan_destroy(&project.stack.name).await?;
    display::print_plan(&preview);
    if !preview.has_changes {
        return Ok(());
    }

    if !yes {
        println!();
        println!(
            "{}",
            "⚠ 記録されている全てのリソースが削除されます".red().bold()
        );
        println!(
            "{}",
            "実行するには --yes オプションを指定してください".yellow()
        );
        return Ok(());
    }

    println!();
    println!("{}", "リソースを削除中...".blue());
    let report = engine.destroy(&project.stack.name, cancel).await?;
    super::apply::finish(&report)
}
