use colored::Colorize;
use stackflow_cloud::{
    Engine, EngineOptions, ResourceProvider, RetryConfig, StateLocation, StateStore,
};
use stackflow_cloud_local::{DEFAULT_REGION, LocalProvider};
use stackflow_core::{
    Stack, SynthDocument, Variables, load_stack, parse_variable_override, synthesize,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 全コマンド共通のオプション
pub struct GlobalOptions {
    pub file: Option<PathBuf>,
    pub vars: Vec<String>,
    pub state_dir: Option<PathBuf>,
    pub parallelism: usize,
    pub lock_timeout: u64,
}

/// 読み込み済みのスタックと、その実行環境
pub struct Project {
    pub stack_file: PathBuf,
    pub stack: Stack,
    pub state_dir: PathBuf,
    options: EngineOptions,
}

impl Project {
    /// スタックファイルを検出・読み込み
    pub fn load(global: &GlobalOptions) -> anyhow::Result<Self> {
        let stack_file = match &global.file {
            Some(file) => file.clone(),
            None => stackflow_config::find_stack_file()?,
        };
        debug!(file = %stack_file.display(), "Loading stack file");

        let mut variables = Variables::new();
        for assignment in &global.vars {
            let (key, value) = parse_variable_override(assignment)?;
            variables.insert(key, value);
        }

        let stack = load_stack(&stack_file, &variables)?;
        let state_dir = global
            .state_dir
            .clone()
            .unwrap_or_else(|| stackflow_config::default_state_dir(&stack_file));

        Ok(Self {
            stack_file,
            stack,
            state_dir,
            options: EngineOptions {
                lock_timeout: Duration::from_secs(global.lock_timeout),
                parallelism: global.parallelism.max(1),
                retry: RetryConfig::default(),
            },
        })
    }

    pub fn synthesize(&self) -> anyhow::Result<SynthDocument> {
        Ok(synthesize(&self.stack)?)
    }

    /// backend ブロックが無い場合はスタック名から決まるローカルの保存先
    pub fn location(&self) -> StateLocation {
        self.stack
            .backend
            .as_ref()
            .map(StateLocation::from)
            .unwrap_or_else(|| StateLocation::local(&self.stack.name))
    }

    pub fn store(&self) -> StateStore {
        StateStore::filesystem(&self.state_dir, &self.location())
    }

    /// provider ブロックに対応するプロバイダー
    ///
    /// `local` と `aws` はどちらもローカルのシミュレーターで実行されます。
    pub fn provider(&self) -> anyhow::Result<Arc<dyn ResourceProvider>> {
        let (name, region) = match &self.stack.provider {
            Some(block) => (block.name.as_str(), block.region.clone()),
            None => ("local", None),
        };

        match name {
            "local" | "aws" => {
                let region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
                let provider: Arc<dyn ResourceProvider> = Arc::new(LocalProvider::from_env(
                    stackflow_config::local_resources_path(&self.state_dir),
                    region,
                )?);
                Ok(provider)
            }
            other => Err(anyhow::anyhow!(
                "未対応のプロバイダーです: {} (local または aws を指定してください)",
                other
            )),
        }
    }

    pub fn engine(&self) -> anyhow::Result<Engine> {
        Ok(Engine::new(self.store(), self.provider()?).with_options(self.options.clone()))
    }

    /// 読み込んだファイルとステートの場所を表示
    pub fn print_header(&self) {
        println!("📄 スタック: {}", self.stack.name.cyan());
        println!("  • {}", display_path(&self.stack_file).cyan());
        println!("  • ステート: {}", self.location().to_string().dimmed());
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
