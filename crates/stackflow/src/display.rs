use colored::Colorize;
use stackflow_cloud::{
    ActionOutcome, ActionType, ApplyReport, DriftReport, OutputState, Plan, ResourceState,
};
use std::collections::BTreeMap;

/// 実行計画を表示
pub fn print_plan(plan: &Plan) {
    println!();
    if !plan.has_changes {
        println!(
            "{}",
            "変更はありません。インフラは最新の状態です。".green()
        );
        return;
    }

    println!("{}", "実行計画:".bold());
    for action in &plan.actions {
        match action.action_type {
            ActionType::Create => {
                println!(
                    "  {} {} ({})",
                    "+".green().bold(),
                    action.resource_id.green(),
                    action.resource_type.dimmed()
                );
            }
            ActionType::Update => {
                println!(
                    "  {} {} ({})",
                    "~".yellow().bold(),
                    action.resource_id.yellow(),
                    action.resource_type.dimmed()
                );
                for change in &action.changes {
                    println!("      {} {}", "~".yellow(), change);
                }
            }
            ActionType::Destroy => {
                println!(
                    "  {} {} ({})",
                    "-".red().bold(),
                    action.resource_id.red(),
                    action.resource_type.dimmed()
                );
            }
            ActionType::NoOp => {}
        }
    }
    for id in &plan.metadata_updates {
        println!(
            "  {} {} ({})",
            "~".yellow().bold(),
            id.yellow(),
            "依存関係・ライフサイクルのみ".dimmed()
        );
    }
    if plan.outputs_changed {
        println!("  {} 出力値", "~".yellow().bold());
    }

    let summary = plan.summary();
    println!();
    println!(
        "計画: {} 作成, {} 更新, {} 削除 ({} 変更なし)",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.destroy.to_string().red(),
        summary.no_change
    );
}

/// 適用結果を表示
pub fn print_report(report: &ApplyReport) {
    println!();
    for outcome in &report.applied {
        println!(
            "  {} {} {}",
            "✓".green(),
            verb(outcome.action_type),
            outcome.resource_id.cyan()
        );
    }
    for outcome in &report.failed {
        print_failure(outcome);
    }
    for outcome in &report.skipped {
        let reason = outcome
            .skip_reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default();
        println!(
            "  {} {} {} ({})",
            "-".dimmed(),
            verb(outcome.action_type).dimmed(),
            outcome.resource_id.dimmed(),
            reason.dimmed()
        );
    }

    println!();
    let seconds = report.duration_ms as f64 / 1000.0;
    if report.is_success() {
        println!(
            "{}",
            format!(
                "✓ 適用が完了しました: {} 件 ({:.1}秒)",
                report.applied.len(),
                seconds
            )
            .green()
            .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "✗ 適用: {} 件, 失敗: {} 件, スキップ: {} 件 ({:.1}秒)",
                report.applied.len(),
                report.failed.len(),
                report.skipped.len(),
                seconds
            )
            .red()
            .bold()
        );
    }
    println!("  ステートのシリアル: {}", report.state_serial);

    if !report.outputs.is_empty() {
        println!();
        println!("{}", "出力:".bold());
        print_outputs(&report.outputs);
    }
}

fn print_failure(outcome: &ActionOutcome) {
    println!(
        "  {} {} {}",
        "✗".red(),
        verb(outcome.action_type),
        outcome.resource_id.red()
    );
    if let Some(error) = &outcome.error {
        println!("      {}", error);
    }
}

fn verb(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::Create => "作成",
        ActionType::Update => "更新",
        ActionType::Destroy => "削除",
        ActionType::NoOp => "変更なし",
    }
}

/// 出力値を `name = value` 形式で表示
pub fn print_outputs(outputs: &BTreeMap<String, OutputState>) {
    for (name, output) in outputs {
        println!("  {} = {}", name.cyan(), format_output(output));
    }
}

/// 機密値は伏せて表示
pub fn format_output(output: &OutputState) -> String {
    if output.sensitive {
        return "(sensitive)".dimmed().to_string();
    }
    match &output.value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn print_drift(report: &DriftReport) {
    println!();
    if !report.has_drift() {
        println!(
            "{}",
            format!(
                "✓ 差分はありません ({} 件のリソースを確認)",
                report.unchanged.len()
            )
            .green()
        );
        return;
    }

    for id in &report.removed {
        println!("  {} {} (実リソースが存在しません)", "-".red().bold(), id.red());
    }
    for drifted in &report.changed {
        println!(
            "  {} {} ({})",
            "~".yellow().bold(),
            drifted.id.yellow(),
            drifted.changed_keys.join(", ")
        );
    }
    println!();
    println!(
        "{}",
        format!(
            "⚠ {} 件の削除, {} 件の変更を検出しました (シリアル: {})",
            report.removed.len(),
            report.changed.len(),
            report.state_serial
        )
        .yellow()
    );
}

/// ステートのリソース一覧
pub fn print_resources(resources: &BTreeMap<String, ResourceState>) {
    if resources.is_empty() {
        println!("{}", "記録されているリソースはありません".dimmed());
        return;
    }

    println!(
        "{}",
        format!("{:<24} {:<28} {}", "ID", "TYPE", "PROVIDER ID").bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for (id, state) in resources {
        println!(
            "{} {:<28} {}",
            format!("{:<24}", id).cyan(),
            state.resource_type,
            state.provider_id.dimmed()
        );
    }
}
