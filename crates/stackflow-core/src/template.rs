//! テンプレート展開機能
//!
//! Teraを使用してスタック定義ファイルのテンプレート展開を行います。
//! `${resource.attribute}` 形式の参照は Tera の構文と衝突しないため、そのまま残ります。

use crate::error::{Result, StackError};
use crate::parser::kdl_value_to_json;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// 変数コンテキスト
pub type Variables = HashMap<String, serde_json::Value>;

/// テンプレートから参照できる環境変数のプレフィックス
pub const ALLOWED_ENV_PREFIXES: &[&str] = &["STACK_", "CI_"];

/// テンプレートプロセッサ
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// 複数の変数を追加
    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// 環境変数を追加（STACK_*, CI_* のみ）
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        let mut count = 0;

        for (key, value) in std::env::vars() {
            if ALLOWED_ENV_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &serde_json::Value::String(value));
                count += 1;
            }
        }

        info!(
            env_var_count = count,
            "Added filtered environment variables"
        );
    }

    /// .env ファイルから変数を読み込んで追加
    ///
    /// .env ファイルの変数はプレフィックス制限なしで全て読み込まれます。
    #[tracing::instrument(skip(self))]
    pub fn add_env_file_variables(&mut self, env_file_path: &Path) -> Result<()> {
        let content =
            std::fs::read_to_string(env_file_path).map_err(|e| StackError::IoError {
                path: env_file_path.to_path_buf(),
                message: e.to_string(),
            })?;

        let variables = parse_env_content(&content);
        let count = variables.len();
        for (key, value) in variables {
            debug!(key = %key, "Adding variable from .env file");
            self.context.insert(key, &serde_json::Value::String(value));
        }

        info!(
            env_file = %env_file_path.display(),
            variable_count = count,
            "Loaded variables from .env file"
        );

        Ok(())
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| StackError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    /// ファイルを読み込んでテンプレート展開
    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| StackError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            StackError::TemplateRenderError(message) => StackError::TemplateError {
                file: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// KEY=VALUE 形式の内容をパース（空行と # コメントは無視）
fn parse_env_content(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim().trim_start_matches("export ").trim();
            (key.to_string(), strip_quotes(value.trim()).to_string())
        })
        .collect()
}

/// KDLファイルから変数定義を抽出
///
/// variables { ... } ブロックを正規表現で切り出してからパースするため、
/// ファイル中の `{{ ... }}` によってパースが失敗することはありません。
/// 後に出現したブロックの値が優先されます。
pub fn extract_variables(kdl_content: &str) -> Result<Variables> {
    use regex::Regex;

    let re = Regex::new(r"(?s)variables\s*\{(?P<content>.*?)\}")
        .map_err(|e| StackError::InvalidConfig(format!("正規表現のコンパイルエラー: {}", e)))?;

    let mut all_vars = HashMap::new();

    for cap in re.captures_iter(kdl_content) {
        if let Some(var_content) = cap.name("content") {
            // ブロックの中身だけをダミーのKDLとしてパース
            let dummy_kdl = format!("extracted {{\n{}\n}}", var_content.as_str());
            let doc: kdl::KdlDocument = dummy_kdl.parse().map_err(|e| {
                StackError::InvalidConfig(format!("KDL パースエラー (変数抽出ブロック): {}", e))
            })?;

            if let Some(node) = doc.nodes().first()
                && let Some(children) = node.children()
            {
                for var_node in children.nodes() {
                    let key = var_node.name().value().to_string();
                    if let Some(entry) = var_node.entries().first() {
                        all_vars.insert(key, kdl_value_to_json(entry.value())?);
                    }
                }
            }
        }
    }

    Ok(all_vars)
}

/// `--var key=value` 形式の指定をパース
///
/// 値が JSON として解釈できる場合（数値・真偽値など）はその型で扱い、
/// それ以外は文字列として扱います。
pub fn parse_variable_override(assignment: &str) -> Result<(String, serde_json::Value)> {
    let (key, raw) = assignment.split_once('=').ok_or_else(|| {
        StackError::InvalidConfig(format!(
            "変数指定は key=value 形式で指定してください: {}",
            assignment
        ))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "変数名が空です: {}",
            assignment
        )));
    }

    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => value,
        _ => serde_json::Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// クォートを除去するヘルパー関数
fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Teraエラーから詳細情報を抽出
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }

    let full_error = details.join(" | ");

    // "Variable `xxx` not found in context"
    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "未定義の変数: `{}`\nヒント: variables ブロックで定義するか、.env ファイルまたは --var で指定してください",
            var_name
        );
    }

    full_error
}
