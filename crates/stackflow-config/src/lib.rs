pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing directly at a stack file
pub const CONFIG_PATH_ENV: &str = "STACK_CONFIG_PATH";

/// Per-project working directory (state, simulated resources)
pub const PROJECT_DIR: &str = ".stackflow";

const CANDIDATES: [&str; 4] = [
    "stack.local.kdl",
    ".stack.local.kdl",
    "stack.kdl",
    ".stack.kdl",
];

/// StackFlowの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトのstack.kdlファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 STACK_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. ./.stackflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/stackflow/stack.kdl (グローバル設定)
#[tracing::instrument]
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            debug!(path = %path.display(), "Using stack file from environment");
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = find_in(&current_dir) {
        return Ok(path);
    }

    let project_dir = current_dir.join(PROJECT_DIR);
    if project_dir.is_dir()
        && let Some(path) = find_in(&project_dir)
    {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stackflow").join("stack.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// スタックファイルが属するプロジェクトのルート
///
/// `.stackflow/` 内のファイルはその親ディレクトリがルートになります。
pub fn project_root(stack_file: &Path) -> PathBuf {
    let parent = stack_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if parent.file_name().is_some_and(|name| name == PROJECT_DIR) {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// 既定のステート保存先: `<project>/.stackflow/state`
pub fn default_state_dir(stack_file: &Path) -> PathBuf {
    project_root(stack_file).join(PROJECT_DIR).join("state")
}

/// ローカルプロバイダーのリソース記録ファイル: `<state-dir>/resources.json`
pub fn local_resources_path(state_dir: &Path) -> PathBuf {
    state_dir.join("resources.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("stackflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_stack_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stack.kdl"), "// test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_stack_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("stack.kdl"));
    }

    #[test]
    #[serial]
    fn test_local_file_has_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stack.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join(".stack.local.kdl"), "// hidden local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_stack_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".stack.local.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_stack_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(PROJECT_DIR);
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("stack.kdl"), "// in project dir").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_stack_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".stackflow/stack.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_stack_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.kdl");
        fs::write(&config_path, "// custom").unwrap();

        let result = temp_env::with_var(CONFIG_PATH_ENV, Some(&config_path), find_stack_file);
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    #[serial]
    fn test_find_stack_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, None::<&str>),
                ("XDG_CONFIG_HOME", Some(temp_dir.path().to_str().unwrap())),
                ("HOME", Some(temp_dir.path().to_str().unwrap())),
            ],
            find_stack_file,
        );

        std::env::set_current_dir(original_dir).unwrap();
        assert!(matches!(result, Err(ConfigError::StackFileNotFound)));
    }

    #[test]
    fn test_project_root_and_state_dir() {
        assert_eq!(
            project_root(Path::new("/work/app/stack.kdl")),
            PathBuf::from("/work/app")
        );
        assert_eq!(
            project_root(Path::new("/work/app/.stackflow/stack.kdl")),
            PathBuf::from("/work/app")
        );
        assert_eq!(project_root(Path::new("stack.kdl")), PathBuf::from("."));
        assert_eq!(
            default_state_dir(Path::new("/work/app/stack.kdl")),
            PathBuf::from("/work/app/.stackflow/state")
        );
        assert_eq!(
            local_resources_path(Path::new("/work/app/.stackflow/state")),
            PathBuf::from("/work/app/.stackflow/state/resources.json")
        );
    }
}
