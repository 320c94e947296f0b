// スクリプトソース
//
// スクリプトディレクトリをスキャンし、並び順キー付きのスクリプトを列挙します。
// 列挙は読み取り専用で、ファイルを変更しません。

use crate::core::error::MigrationError;
use crate::core::naming::DEFAULT_SCRIPT_EXTENSION;
use crate::core::script::ScriptUnit;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// スクリプトの列挙元
pub trait ScriptSource {
    /// 並び順キーでソートされたスクリプトを返す
    fn enumerate(&self) -> Result<Vec<ScriptUnit>, MigrationError>;
}

/// ファイルシステム上のディレクトリをスクリプトソースとして扱う
#[derive(Debug, Clone)]
pub struct FileSystemScriptSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FileSystemScriptSource {
    /// 新しいFileSystemScriptSourceを作成
    ///
    /// # Arguments
    ///
    /// * `root` - スクリプトディレクトリ
    /// * `extensions` - 対象とする拡張子（`.sql` など、大文字小文字は区別しない）
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    /// 既定の拡張子（`.sql`）で作成
    pub fn with_default_extensions(root: impl Into<PathBuf>) -> Self {
        Self::new(root, vec![DEFAULT_SCRIPT_EXTENSION.to_string()])
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 許可リストに含まれるスクリプトファイルかどうか
    fn is_script_file(&self, file_name: &str) -> bool {
        if file_name.starts_with('.') {
            return false;
        }

        let lower = file_name.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| lower.len() > ext.len() && lower.ends_with(ext.as_str()))
    }

    fn read_script(&self, path: &Path, file_name: &str) -> Result<ScriptUnit, MigrationError> {
        let bytes = fs::read(path).map_err(|e| MigrationError::InvalidScript {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;

        let content = String::from_utf8(bytes).map_err(|e| MigrationError::InvalidScript {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;

        // BOMは内容として扱わない
        let content = content
            .strip_prefix('\u{feff}')
            .map(str::to_string)
            .unwrap_or(content);

        Ok(ScriptUnit::new(file_name, content))
    }
}

impl ScriptSource for FileSystemScriptSource {
    fn enumerate(&self) -> Result<Vec<ScriptUnit>, MigrationError> {
        let source_not_found = |cause: String| MigrationError::SourceNotFound {
            path: self.root.display().to_string(),
            cause,
        };

        if !self.root.is_dir() {
            return Err(source_not_found(
                "path does not exist or is not a directory".to_string(),
            ));
        }

        let entries = fs::read_dir(&self.root).map_err(|e| source_not_found(e.to_string()))?;

        let mut scripts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| source_not_found(e.to_string()))?;
            let path = entry.path();

            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                debug!(path = %path.display(), "Skipping file with non UTF-8 name");
                continue;
            };

            if !self.is_script_file(file_name) {
                debug!(file = file_name, "Skipping non-script file");
                continue;
            }

            scripts.push(self.read_script(&path, file_name)?);
        }

        scripts.sort_by(|a, b| a.order_key.cmp(&b.order_key));

        debug!(
            root = %self.root.display(),
            count = scripts.len(),
            "Enumerated scripts"
        );

        Ok(scripts)
    }
}
