// スクリプトのドメインモデル
//
// 変更スクリプトの識別子、並び順キー、内容を表現します。

use regex::Regex;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

/// スクリプト識別子
///
/// スクリプトのファイル名そのもの。1回の列挙の中で一意。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScriptId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<&str> for ScriptId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// 並び順キー
///
/// ファイル名が数字と区切り文字（`_` `-` `.` 空白）で始まる場合は
/// その数値を明示的な順序として扱います。数値プレフィックス付きの
/// スクリプトはプレフィックスなしのものより前に並び、同値の場合は
/// ファイル名で比較します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub prefix: Option<u64>,
    pub name: String,
}

fn prefix_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"^(\d+)[_\-. ]").expect("valid prefix regex"))
}

impl OrderKey {
    /// ファイル名から並び順キーを導出
    pub fn from_name(name: &str) -> Self {
        // u64に収まらない桁数はプレフィックスなし扱い
        let prefix = prefix_regex()
            .captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());

        Self {
            prefix,
            name: name.to_string(),
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.prefix, other.prefix) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.name.cmp(&other.name)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.name.cmp(&other.name),
        }
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 変更スクリプト
///
/// 列挙後は変更されない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUnit {
    pub id: ScriptId,
    pub order_key: OrderKey,
    pub content: String,
    pub content_hash: Option<String>,
}

impl ScriptUnit {
    /// 名前と内容からスクリプトを作成（ハッシュも計算する）
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let content = content.into();
        let content_hash = Some(content_hash(&content));

        Self {
            id: ScriptId::new(name.clone()),
            order_key: OrderKey::from_name(&name),
            content,
            content_hash,
        }
    }
}

/// スクリプト内容のSHA-256ハッシュ（64文字の16進数文字列）
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
