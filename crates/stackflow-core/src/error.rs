use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("テンプレートエラー: {file}\n理由: {message}")]
    TemplateError { file: PathBuf, message: String },

    #[error("テンプレート展開エラー: {0}")]
    TemplateRenderError(String),

    #[error("無効な識別子: '{0}' (英字または _ で始まり、英数字・_・- のみ使用できます)")]
    InvalidIdentifier(String),

    #[error("識別子が重複しています: {0}")]
    DuplicateIdentifier(String),

    #[error("参照先のリソースが存在しません: {from} -> {target}")]
    UnknownTarget { from: String, target: String },

    #[error("リソースが存在しません: {0}")]
    UnknownResource(String),

    #[error("循環依存が検出されました: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("参照を解決できません: {0}")]
    UnresolvedReference(String),
}

impl StackError {
    /// グラフ構築時のエラーかどうか（プロバイダー呼び出し前に必ず検出される）
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            StackError::InvalidIdentifier(_)
                | StackError::DuplicateIdentifier(_)
                | StackError::UnknownTarget { .. }
                | StackError::UnknownResource(_)
                | StackError::CyclicDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
