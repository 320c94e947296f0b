// マイグレーション実行のドメインモデル
//
// プラン、実行状態、実行結果を表現します。

use crate::core::error::{MigrationError, MissingScriptWarning, ScriptDriftError};
use crate::core::script::{ScriptId, ScriptUnit};

/// マイグレーションプラン
///
/// 未適用スクリプトを適用順に並べたもの。実行ごとに計算され、永続化されない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    scripts: Vec<ScriptUnit>,
}

impl MigrationPlan {
    pub fn new(scripts: Vec<ScriptUnit>) -> Self {
        Self { scripts }
    }

    pub fn scripts(&self) -> &[ScriptUnit] {
        &self.scripts
    }

    pub fn ids(&self) -> Vec<ScriptId> {
        self.scripts.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// マイグレーション実行の状態
///
/// `Idle → Preparing → Planning → Applying → Completed` が正常系。
/// 非終端状態からはいつでも `Failed` に遷移できる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationState {
    #[default]
    Idle,
    Preparing,
    Planning,
    Applying,
    Completed,
    Failed,
}

impl MigrationState {
    /// 終端状態かどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Completed | MigrationState::Failed)
    }

    /// 指定した状態に遷移できるかどうか
    pub fn can_transition_to(&self, next: MigrationState) -> bool {
        use MigrationState::*;
        match (self, next) {
            (Idle, Preparing) | (Preparing, Planning) | (Planning, Applying) => true,
            (Applying, Completed) => true,
            (state, Failed) => !state.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MigrationState::Idle => "idle",
            MigrationState::Preparing => "preparing",
            MigrationState::Planning => "planning",
            MigrationState::Applying => "applying",
            MigrationState::Completed => "completed",
            MigrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// マイグレーション実行結果
///
/// `migrate()` 呼び出しごとに1つ生成され、呼び出し元に返される。
#[derive(Debug, Clone)]
pub struct DatabaseUpgradeResult {
    /// 成功したかどうか
    pub successful: bool,
    /// この実行で適用されたスクリプト（適用順）
    pub scripts_applied: Vec<ScriptId>,
    /// 失敗時のエラー
    pub error: Option<MigrationError>,
    /// 削除された適用済みスクリプトの警告
    pub warnings: Vec<MissingScriptWarning>,
    /// 検出されたドリフト（非厳格モード）
    pub drift: Vec<ScriptDriftError>,
    /// 終了時の状態
    pub state: MigrationState,
}

impl DatabaseUpgradeResult {
    /// 成功結果を作成
    pub fn success(scripts_applied: Vec<ScriptId>) -> Self {
        Self {
            successful: true,
            scripts_applied,
            error: None,
            warnings: Vec::new(),
            drift: Vec::new(),
            state: MigrationState::Completed,
        }
    }

    /// 失敗結果を作成
    pub fn failure(scripts_applied: Vec<ScriptId>, error: MigrationError) -> Self {
        Self {
            successful: false,
            scripts_applied,
            error: Some(error),
            warnings: Vec::new(),
            drift: Vec::new(),
            state: MigrationState::Failed,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<MissingScriptWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_drift(mut self, drift: Vec<ScriptDriftError>) -> Self {
        self.drift = drift;
        self
    }

    /// 適用されたスクリプト数
    pub fn applied_count(&self) -> usize {
        self.scripts_applied.len()
    }
}
