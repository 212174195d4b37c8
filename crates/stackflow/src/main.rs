mod commands;
mod display;
mod project;

use clap::{Parser, Subcommand};
use colored::Colorize;
use project::GlobalOptions;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "インフラ構成はKDLで宣言する", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// スタックファイル（省略時は stack.kdl などを自動検出）
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// テンプレート変数の上書き (key=value、複数指定可)
    #[arg(long = "var", global = true, value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// ステートの保存先ディレクトリ（既定: <project>/.stackflow/state）
    #[arg(long, global = true, env = "STACK_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// 同時に実行するアクションの上限
    #[arg(long, global = true, env = "STACK_PARALLELISM", default_value_t = 4)]
    parallelism: usize,

    /// ステートロックの待機時間（秒）
    #[arg(long, global = true, env = "STACK_LOCK_TIMEOUT", default_value_t = 10)]
    lock_timeout: u64,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// スタックファイルを検証
    Validate,
    /// 合成ドキュメント（JSON）を出力
    Synth {
        /// 出力先ファイル（省略時は標準出力）
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// 実行計画を表示
    Plan {
        /// 計画をファイルに保存（stack apply <PLAN> で適用）
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// 計画の前に実リソースとの差分を取り込む
        #[arg(long)]
        refresh: bool,
    },
    /// 変更を適用
    Apply {
        /// 保存済みの計画ファイル
        plan: Option<PathBuf>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// ステートに記録された全リソースを削除
    Destroy {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 実リソースを読み直してステートとの差分を記録
    Refresh,
    /// 出力値を表示
    Output {
        /// 出力名（省略時は全て）
        name: Option<String>,
        /// JSON形式で出力
        #[arg(long)]
        json: bool,
    },
    /// ステートを操作
    #[command(subcommand)]
    State(StateCommands),
    /// バージョン情報を表示
    Version,
}

/// ステート操作のサブコマンド
#[derive(Subcommand)]
enum StateCommands {
    /// 記録されているリソースの一覧
    List,
    /// リソースの記録内容を表示
    Show {
        /// リソースID
        id: String,
    },
    /// 残ったロックを強制解除
    Unlock {
        /// ロックトークン
        token: String,
        /// 強制解除を確認
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ctrl-C で実行中の適用を中断するトークン
fn cancellation_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "中断を要求しました。実行中のアクションの完了を待っています...".yellow()
            );
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let global = GlobalOptions {
        file: cli.file,
        vars: cli.vars,
        state_dir: cli.state_dir,
        parallelism: cli.parallelism,
        lock_timeout: cli.lock_timeout,
    };

    match cli.command {
        Commands::Validate => commands::validate::handle(&global)?,
        Commands::Synth { out } => commands::synth::handle(&global, out.as_deref())?,
        Commands::Plan { out, refresh } => {
            commands::plan::handle(&global, out.as_deref(), refresh).await?
        }
        Commands::Apply { plan, yes } => {
            let cancel = cancellation_on_ctrl_c();
            commands::apply::handle(&global, plan.as_deref(), yes, &cancel).await?
        }
        Commands::Destroy { yes } => {
            let cancel = cancellation_on_ctrl_c();
            commands::destroy::handle(&global, yes, &cancel).await?
        }
        Commands::Refresh => commands::refresh::handle(&global).await?,
        Commands::Output { name, json } => {
            commands::output::handle(&global, name.as_deref(), json).await?
        }
        Commands::State(state_cmd) => match state_cmd {
            StateCommands::List => commands::state::handle_list(&global).await?,
            StateCommands::Show { id } => commands::state::handle_show(&global, &id).await?,
            StateCommands::Unlock { token, force } => {
                commands::state::handle_unlock(&global, &token, force).await?
            }
        },
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
