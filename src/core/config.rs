// 設定管理
//
// プロバイダー種別、マイグレーション実行ポリシー、
// 設定ファイル（YAML形式）の読み込みと検証を行います。

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::core::naming::DEFAULT_SCRIPT_EXTENSION;

/// データベースプロバイダー種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Microsoft SQL Server
    #[default]
    MsSql,
    /// PostgreSQL
    Postgres,
    /// SQLite
    Sqlite,
}

impl ProviderKind {
    /// すべてのプロバイダー
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::MsSql,
        ProviderKind::Postgres,
        ProviderKind::Sqlite,
    ];

    /// CLIや設定ファイルで使う名前
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::MsSql => "mssql",
            ProviderKind::Postgres => "postgres",
            ProviderKind::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(ProviderKind::MsSql),
            "postgres" | "postgresql" => Ok(ProviderKind::Postgres),
            "sqlite" => Ok(ProviderKind::Sqlite),
            other => Err(anyhow!(
                "Unsupported provider: {}. Please specify one of: mssql, postgres, sqlite.",
                other
            )),
        }
    }
}

/// 適用済みスクリプトの内容ハッシュ検証ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashCheck {
    /// 検証しない
    #[default]
    Off,
    /// 差異を結果に含めるが適用は続行する
    Warn,
    /// 差異があれば何も適用せずに失敗する
    Strict,
}

impl FromStr for HashCheck {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(HashCheck::Off),
            "warn" => Ok(HashCheck::Warn),
            "strict" => Ok(HashCheck::Strict),
            other => Err(anyhow!(
                "Unsupported hash check mode: {}. Please specify one of: off, warn, strict.",
                other
            )),
        }
    }
}

/// スクリプト実行時のトランザクション境界
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// スクリプトごとにトランザクションを張り、ジャーナル記録と同時にコミットする
    #[default]
    PerScript,
    /// トランザクションを張らない（CREATE INDEX CONCURRENTLY など向け）
    None,
}

/// マイグレーション設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// 対象とするスクリプト拡張子
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// 内容ハッシュ検証ポリシー
    #[serde(default)]
    pub hash_check: HashCheck,

    /// トランザクションモード
    #[serde(default)]
    pub transaction: TransactionMode,
}

fn default_extensions() -> Vec<String> {
    vec![DEFAULT_SCRIPT_EXTENSION.to_string()]
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            hash_check: HashCheck::default(),
            transaction: TransactionMode::default(),
        }
    }
}

impl MigratorConfig {
    /// 設定ファイルを読み込んで検証する
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: MigratorConfig = content.parse()?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    /// 設定の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(anyhow!("At least one script extension is required"));
        }

        for extension in &self.extensions {
            if !extension.starts_with('.') || extension.len() < 2 {
                return Err(anyhow!(
                    "Invalid script extension '{}': extensions must start with '.'",
                    extension
                ));
            }
        }

        Ok(())
    }
}

impl FromStr for MigratorConfig {
    type Err = anyhow::Error;

    fn from_str(yaml: &str) -> Result<Self, Self::Err> {
        serde_saphyr::from_str(yaml).with_context(|| "Failed to parse config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("mssql".parse::<ProviderKind>().unwrap(), ProviderKind::MsSql);
        assert_eq!("MSSQL".parse::<ProviderKind>().unwrap(), ProviderKind::MsSql);
        assert_eq!(
            "postgres".parse::<ProviderKind>().unwrap(),
            ProviderKind::Postgres
        );
        assert_eq!(
            "PostgreSQL".parse::<ProviderKind>().unwrap(),
            ProviderKind::Postgres
        );
        assert_eq!("sqlite".parse::<ProviderKind>().unwrap(), ProviderKind::Sqlite);
        assert!("oracle".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_default_is_mssql() {
        assert_eq!(ProviderKind::default(), ProviderKind::MsSql);
    }

    #[test]
    fn test_provider_kind_display_round_trips() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_default_config() {
        let config = MigratorConfig::default();
        assert_eq!(config.extensions, vec![".sql".to_string()]);
        assert_eq!(config.hash_check, HashCheck::Off);
        assert_eq!(config.transaction, TransactionMode::PerScript);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
extensions:
  - .sql
  - .psql
hash_check: strict
transaction: none
"#;
        let config: MigratorConfig = yaml.parse().unwrap();
        assert_eq!(config.extensions.len(), 2);
        assert_eq!(config.hash_check, HashCheck::Strict);
        assert_eq!(config.transaction, TransactionMode::None);
    }

    #[test]
    fn test_flow_style_extensions_pass_validation() {
        let yaml = "extensions: [.sql]\nhash_check: warn\ntransaction: per_script\n";
        let config: MigratorConfig = yaml.parse().unwrap();
        config.validate().unwrap();
        assert_eq!(config.extensions, vec![".sql".to_string()]);

        let without_dot: MigratorConfig = "extensions: [sql]\n".parse().unwrap();
        assert!(without_dot.validate().is_err());
    }

    #[test]
    fn test_parse_partial_config_uses_defaults() {
        let config: MigratorConfig = "hash_check: warn\n".parse().unwrap();
        assert_eq!(config.extensions, vec![".sql".to_string()]);
        assert_eq!(config.hash_check, HashCheck::Warn);
        assert_eq!(config.transaction, TransactionMode::PerScript);
    }

    #[test]
    fn test_validate_rejects_bad_extensions() {
        let config = MigratorConfig {
            extensions: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MigratorConfig {
            extensions: vec!["sql".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "transaction: per_script\n").unwrap();

        let config = MigratorConfig::from_file(&path).unwrap();
        assert_eq!(config.transaction, TransactionMode::PerScript);

        assert!(MigratorConfig::from_file(&dir.path().join("missing.yaml")).is_err());
    }
}
