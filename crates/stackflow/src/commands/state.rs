use crate::display;
use crate::project::{GlobalOptions, Project};
use colored::Colorize;

pub async fn handle_list(global: &GlobalOptions) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    let store = project.store();
    let snapshot = store.read().await?;

    println!("ステート: {}", store.describe().cyan());
    if !snapshot.lineage.is_empty() {
        println!(
            "  シリアル: {}  系譜: {}",
            snapshot.serial,
            snapshot.lineage.dimmed()
        );
    }
    println!();
    display::print_resources(&snapshot.resources);

    if let Some(lock) = store.lock_info().await? {
        println!();
        println!(
            "{}",
            format!(
                "⚠ ロック中: {} ({} / {})",
                lock.operation, lock.holder, lock.token
            )
            .yellow()
        );
    }
    Ok(())
}

pub async fn handle_show(global: &GlobalOptions, id: &str) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    let snapshot = project.store().read().await?;
    let resource = snapshot
        .get(id)
        .ok_or_else(|| anyhow::anyhow!("ステートにリソースがありません: {}", id))?;
    println!("{}", serde_json::to_string_pretty(resource)?);
    Ok(())
}

pub async fn handle_unlock(global: &GlobalOptions, token: &str, force: bool) -> anyhow::Result<()> {
    let project = Project::load(global)?;
    let store = project.store();

    let Some(lock) = store.lock_info().await? else {
        println!("{}", "ロックは取得されていません".dimmed());
        return Ok(());
    };

    println!(
        "ロック: {} ({}, {})",
        lock.operation.cyan(),
        lock.holder,
        lock.acquired_at.format("%Y-%m-%d %H:%M:%S")
    );
    if !force {
        println!();
        println!(
            "{}",
            "⚠ 実行中の操作がないことを確認してから --force を指定してください".yellow()
        );
        return Ok(());
    }

    store.force_unlock(token).await?;
    println!("{}", "✓ ロックを解除しました".green());
    Ok(())
}
