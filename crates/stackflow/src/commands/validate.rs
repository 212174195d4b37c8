use crate::project::{GlobalOptions, Project};
use colored::Colorize;

pub fn handle(global: &GlobalOptions) -> anyhow::Result<()> {
    println!("{}", "スタックを検証中...".blue());

    let project = match Project::load(global) {
        Ok(project) => project,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };
    let layers = match project.stack.graph.layers() {
        Ok(layers) => layers,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 依存グラフエラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    let stack = &project.stack;
    println!("{}", "✓ スタックファイルは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  スタック: {}", stack.name.cyan());
    if let Some(provider) = &stack.provider {
        let region = provider.region.as_deref().unwrap_or("(未設定)");
        println!("  プロバイダー: {} (region: {})", provider.name.cyan(), region);
    }
    if let Some(backend) = &stack.backend {
        println!(
            "  バックエンド: s3://{}/{} ({})",
            backend.bucket, backend.key, backend.region
        );
    }

    println!("  リソース: {}個", stack.graph.len());
    for resource in stack.graph.resources() {
        let deps = stack.graph.dependencies(&resource.id);
        let dep_info = if deps.is_empty() {
            String::new()
        } else {
            format!(" → {}", deps.join(", "))
        };
        println!(
            "    - {} ({}){}",
            resource.id.cyan(),
            resource.resource_type,
            dep_info.dimmed()
        );
    }

    println!("  実行順序: {}段階", layers.len());
    for (i, layer) in layers.iter().enumerate() {
        println!("    {}. {}", i + 1, layer.join(", "));
    }

    if !stack.graph.outputs().is_empty() {
        println!("  出力: {}個", stack.graph.outputs().len());
        for output in stack.graph.outputs() {
            println!("    - {}", output.name.cyan());
        }
    }

    Ok(())
}
