// マイグレーションプランナー
//
// 列挙されたスクリプトとジャーナルの差分から、未適用スクリプトの
// 適用順リスト（プラン）を計算します。削除されたスクリプトの警告と
// 内容ハッシュのドリフト検出もここで行います。

use crate::core::config::HashCheck;
use crate::core::error::{MigrationError, MissingScriptWarning, ScriptDriftError};
use crate::core::journal::AppliedScripts;
use crate::core::migration::MigrationPlan;
use crate::core::script::{ScriptId, ScriptUnit};
use std::collections::HashSet;
use tracing::{debug, warn};

/// プランニングの結果
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    /// 未適用スクリプトのプラン
    pub plan: MigrationPlan,
    /// ジャーナルにあるがディレクトリにないスクリプトの警告
    pub warnings: Vec<MissingScriptWarning>,
    /// 適用後に内容が変わったスクリプト（HashCheck::Warn のとき）
    pub drift: Vec<ScriptDriftError>,
}

/// マイグレーションプランナー
#[derive(Debug, Clone, Default)]
pub struct MigrationPlanner {
    hash_check: HashCheck,
}

impl MigrationPlanner {
    /// 新しいMigrationPlannerを作成
    pub fn new(hash_check: HashCheck) -> Self {
        Self { hash_check }
    }

    /// プランを計算
    ///
    /// # Arguments
    ///
    /// * `candidates` - スクリプトソースが列挙したスクリプト
    /// * `applied` - ジャーナルに記録済みのスクリプト
    ///
    /// # Returns
    ///
    /// プランと警告、または識別子の重複や厳格モードでのドリフトによるエラー
    pub fn plan(
        &self,
        candidates: &[ScriptUnit],
        applied: &AppliedScripts,
    ) -> Result<PlanOutcome, MigrationError> {
        let mut seen: HashSet<&ScriptId> = HashSet::new();
        for script in candidates {
            if !seen.insert(&script.id) {
                return Err(MigrationError::PlanConsistency {
                    script_id: script.id.clone(),
                    message: "script identifier appears more than once".to_string(),
                });
            }
        }

        let mut ordered: Vec<&ScriptUnit> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.order_key.cmp(&b.order_key));

        let mut pending = Vec::new();
        let mut drift = Vec::new();
        for script in ordered {
            if !applied.contains(&script.id) {
                pending.push(script.clone());
                continue;
            }

            if let Some(changed) = self.detect_drift(script, applied) {
                drift.push(changed);
            }
        }

        if self.hash_check == HashCheck::Strict {
            if let Some(first) = drift.into_iter().next() {
                return Err(MigrationError::ScriptDrift(first));
            }
            drift = Vec::new();
        }

        for changed in &drift {
            warn!("{}", changed);
        }

        let warnings: Vec<MissingScriptWarning> = applied
            .ids()
            .filter(|id| !seen.contains(id))
            .map(|id| MissingScriptWarning::new(id.clone()))
            .collect();

        debug!(
            candidates = candidates.len(),
            applied = applied.len(),
            pending = pending.len(),
            "Computed migration plan"
        );

        Ok(PlanOutcome {
            plan: MigrationPlan::new(pending),
            warnings,
            drift,
        })
    }

    /// 記録時のハッシュと現在のハッシュを比較
    ///
    /// どちらかが記録されていない場合は比較しない。
    fn detect_drift(
        &self,
        script: &ScriptUnit,
        applied: &AppliedScripts,
    ) -> Option<ScriptDriftError> {
        if self.hash_check == HashCheck::Off {
            return None;
        }

        let recorded = applied.recorded_hash(&script.id)?;
        let current = script.content_hash.as_deref()?;
        if recorded.eq_ignore_ascii_case(current) {
            return None;
        }

        Some(ScriptDriftError {
            script_id: script.id.clone(),
            recorded_hash: recorded.to_string(),
            current_hash: current.to_string(),
        })
    }
}
