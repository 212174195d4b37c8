use crate::display;
use crate::project::{GlobalOptions, Project};
use colored::Colorize;
use stackflow_cloud::{ApplyReport, Plan};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    global: &GlobalOptions,
    plan_file: Option<&Path>,
    yes: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    project.print_header();
    let engine = project.engine()?;

    // 保存済みの計画はそれ自体が確認済みとみなす
    if let Some(path) = plan_file {
        let plan = Plan::from_json(&std::fs::read_to_string(path)?)?;
        display::print_plan(&plan);
        if !plan.has_changes {
            return Ok(());
        }
        println!();
        println!("{}", "保存済みの計画を適用中...".blue());
        let report = engine.apply_plan(&plan, cancel).await?;
        return finish(&report);
    }

    let document = project.synthesize()?;
    let preview = engine.plan(&document).await?;
    display::print_plan(&preview);
    if !preview.has_changes {
        return Ok(());
    }

    if !yes {
        println!();
        println!(
            "{}",
            "実行するには --yes オプションを指定してください".yellow()
        );
        return Ok(());
    }

    println!();
    println!("{}", "変更を適用中...".blue());
    let report = engine.apply(&document, cancel).await?;
    finish(&report)
}

pub(crate) fn finish(report: &ApplyReport) -> anyhow::Result<()> {
    display::print_report(report);
    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} 件のアクションが失敗し、{} 件がスキップされました",
            report.failed.len(),
            report.skipped.len()
        )
    }
}
