// ジャーナルのドメインモデル
//
// 適用済みスクリプトの記録を表現します。

use crate::core::script::{ScriptId, ScriptUnit};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// ジャーナルエントリ
///
/// Executorがスクリプトの実行後にのみ作成する。作成後は変更も削除もされない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub script_id: ScriptId,
    pub applied_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub success: bool,
}

impl JournalEntry {
    /// 成功エントリを作成
    pub fn succeeded(script: &ScriptUnit) -> Self {
        Self::for_script(script, true)
    }

    /// 失敗エントリを作成
    pub fn failed(script: &ScriptUnit) -> Self {
        Self::for_script(script, false)
    }

    fn for_script(script: &ScriptUnit, success: bool) -> Self {
        Self {
            script_id: script.id.clone(),
            applied_at: Utc::now(),
            content_hash: script.content_hash.clone(),
            success,
        }
    }
}

/// 適用済みスクリプトの集合
///
/// 成功エントリのみを保持し、識別子から記録時のハッシュを引けます。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedScripts {
    entries: BTreeMap<ScriptId, Option<String>>,
}

impl AppliedScripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// ジャーナルエントリから集合を構築（失敗エントリは無視）
    pub fn from_entries(entries: impl IntoIterator<Item = JournalEntry>) -> Self {
        let mut applied = Self::new();
        for entry in entries.into_iter().filter(|e| e.success) {
            applied
                .entries
                .entry(entry.script_id)
                .or_insert(entry.content_hash);
        }
        applied
    }

    pub fn insert(&mut self, id: ScriptId, content_hash: Option<String>) {
        self.entries.insert(id, content_hash);
    }

    pub fn contains(&self, id: &ScriptId) -> bool {
        self.entries.contains_key(id)
    }

    /// 記録時のハッシュ（未記録やNULLの場合はNone）
    pub fn recorded_hash(&self, id: &ScriptId) -> Option<&str> {
        self.entries.get(id).and_then(|hash| hash.as_deref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &ScriptId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
