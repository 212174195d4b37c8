use crate::display;
use crate::project::{GlobalOptions, Project};
use colored::Colorize;

pub async fn handle(global: &GlobalOptions) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    project.print_header();

    println!();
    println!("{}", "実リソースとの差分を確認中...".blue());
    let drift = project.engine()?.refresh().await?;
    display::print_drift(&drift);
    Ok(())
}
