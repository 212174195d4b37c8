//! 統合ローダー
//!
//! 変数収集、テンプレート展開、パース、参照解決を統合

use crate::error::{Result, StackError};
use crate::model::{Stack, StackDefinition};
use crate::parser::parse_stack_string;
use crate::resolver::ReferencePolicy;
use crate::template::{TemplateProcessor, Variables, extract_variables};
use std::path::Path;
use tracing::{debug, info, instrument};

/// スタックファイルを読み込み、参照解決済みの Stack を生成
///
/// 以下の処理を実行:
/// 1. variables ブロックの抽出
/// 2. テンプレート展開
/// 3. KDLパース
/// 4. 参照解決と依存グラフの構築
///
/// ファイル内ではリソースを任意の順序で宣言できます（前方参照を許可）。
#[instrument(skip(overrides), fields(path = %path.display()))]
pub fn load_stack(path: &Path, overrides: &Variables) -> Result<Stack> {
    let definition = load_definition(path, overrides)?;
    let stack = definition.resolve(ReferencePolicy::Deferred)?;
    info!(
        stack = %stack.name,
        resources = stack.graph.len(),
        "Stack loaded successfully"
    );
    Ok(stack)
}

/// スタックファイルを読み込み、参照解決前の定義を返す
pub fn load_definition(path: &Path, overrides: &Variables) -> Result<StackDefinition> {
    let rendered = render_stack_file(path, overrides)?;

    debug!("Parsing KDL");
    let name = path
        .parent()
        .and_then(|p| p.canonicalize().ok())
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "unnamed".to_string());
    parse_stack_string(&rendered, name)
}

/// テンプレート展開のみを行う
///
/// 変数の優先順位（後のものが優先）:
/// 1. スタックファイルと同じディレクトリの .env
/// 2. 環境変数（STACK_*, CI_*）
/// 3. variables ブロック
/// 4. 呼び出し側からの上書き（--var）
pub fn render_stack_file(path: &Path, overrides: &Variables) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| StackError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut processor = TemplateProcessor::new();
    let project_root = path.parent().unwrap_or_else(|| Path::new("."));
    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );

    let env_file = project_root.join(".env");
    if env_file.is_file() {
        processor.add_env_file_variables(&env_file)?;
    }
    processor.add_env_variables();

    let variables = extract_variables(&content)?;
    debug!(vars = ?variables, "Adding variables block");
    processor.add_variables(variables);
    processor.add_variables(overrides.clone());

    processor.render_file(path)
}
