pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 設定ファイルパスを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "VPCFLOW_CONFIG_PATH";

const CANDIDATES: [&str; 4] = [
    "vpcflow.local.yaml",
    ".vpcflow.local.yaml",
    "vpcflow.yaml",
    ".vpcflow.yaml",
];

/// 収束エンジンの設定
///
/// 省略された値はプロバイダの既定値（VPC/Subnet 10分、その他 1分、
/// リトライ 5分）になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 状態ポーリングの間隔（秒）
    pub poll_interval_secs: u64,

    /// 直前の変更がまだ反映されていない状態を許容する猶予（秒）
    pub attachment_lag_grace_secs: u64,

    pub retry: RetrySettings,

    pub timeouts: Timeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            attachment_lag_grace_secs: 10,
            retry: RetrySettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// 単発 API 呼び出しのリトライ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// リトライ全体の上限（秒）
    pub budget_secs: u64,

    /// 試行間の固定待機（ミリ秒）
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            budget_secs: 5 * 60,
            backoff_ms: 500,
        }
    }
}

impl RetrySettings {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// リソース種別ごとの待機タイムアウト（秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub vpc_secs: u64,
    pub subnet_secs: u64,
    pub internet_gateway_secs: u64,
    pub route_table_secs: u64,
    pub route_table_association_secs: u64,
    pub security_group_secs: u64,
    /// 削除後に消滅を待つ時間
    pub delete_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            vpc_secs: 10 * 60,
            subnet_secs: 10 * 60,
            internet_gateway_secs: 60,
            route_table_secs: 60,
            route_table_association_secs: 60,
            security_group_secs: 60,
            delete_secs: 5 * 60,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn attachment_lag_grace(&self) -> Duration {
        Duration::from_secs(self.attachment_lag_grace_secs)
    }

    /// 設定ファイルを探して読み込む。見つからなければ既定値
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Ok(path) => Self::load_from(&path),
            Err(ConfigError::ConfigFileNotFound) => {
                tracing::debug!("No vpcflow config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// 指定したファイルから読み込む
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        tracing::debug!("Loaded vpcflow config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs は 1 以上にしてください".to_string(),
            ));
        }
        if self.retry.backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_ms は 1 以上にしてください".to_string(),
            ));
        }
        let t = &self.timeouts;
        let timeouts = [
            ("vpc_secs", t.vpc_secs),
            ("subnet_secs", t.subnet_secs),
            ("internet_gateway_secs", t.internet_gateway_secs),
            ("route_table_secs", t.route_table_secs),
            ("route_table_association_secs", t.route_table_association_secs),
            ("security_group_secs", t.security_group_secs),
            ("delete_secs", t.delete_secs),
        ];
        for (name, secs) in timeouts {
            if secs < self.poll_interval_secs {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} ({}秒) がポーリング間隔 ({}秒) より短いです",
                    name, secs, self.poll_interval_secs
                )));
            }
        }
        Ok(())
    }
}

/// グローバル設定ファイルのパス (~/.config/vpcflow/vpcflow.yaml)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
    Ok(config_dir.join("vpcflow").join("vpcflow.yaml"))
}

/// 設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 VPCFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: vpcflow.local.yaml, .vpcflow.local.yaml, vpcflow.yaml, .vpcflow.yaml
/// 3. ./.vpcflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/vpcflow/vpcflow.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points to a missing file: {}",
            CONFIG_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.vpcflow/ ディレクトリで検索
    let project_dir = current_dir.join(".vpcflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    // 4. グローバル設定ファイル
    if let Ok(global_config) = global_config_path() {
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}
