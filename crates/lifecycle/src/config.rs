//! # ライフサイクル設定
//!
//! | 変数 | 用途 |
//! |------|------|
//! | `LIFECYCLE_PROVIDER` | `aws`（既定）または `mock` |
//! | `AWS_DEFAULT_REGION` | リージョン（未設定ならAWS標準の解決順） |
//! | `SIGNER_LAUNCH_TEMPLATE_ID` | 署名インスタンスの起動テンプレート |
//! | `SIGNER_IMAGE_ID` | AMI（未設定なら起動テンプレートの値） |
//! | `SIGNER_INSTANCE_TAG` | 署名インスタンスを識別するタグ `key=value` |

/// 署名インスタンスを識別するタグの既定値
pub const DEFAULT_SIGNER_TAG: &str = "Application=signer";

/// プロバイダの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// AWS EC2
    Aws,
    /// メモリ上のモック
    Mock,
}

/// ライフサイクル管理の設定。
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// プロバイダの種類
    pub provider: ProviderKind,
    /// リージョン
    pub region: Option<String>,
    /// 起動テンプレートID
    pub launch_template_id: Option<String>,
    /// AMI
    pub image_id: Option<String>,
    /// タグのキー
    pub tag_key: String,
    /// タグの値
    pub tag_value: String,
}

impl LifecycleConfig {
    /// 環境変数から読み込む。
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の変数ルックアップから読み込む。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match lookup("LIFECYCLE_PROVIDER").as_deref() {
            None | Some("aws") => ProviderKind::Aws,
            Some("mock") => ProviderKind::Mock,
            Some(other) => {
                return Err(format!(
                    "LIFECYCLE_PROVIDER が不正です: {other}（aws または mock）"
                ))
            }
        };

        let tag = lookup("SIGNER_INSTANCE_TAG").unwrap_or_else(|| DEFAULT_SIGNER_TAG.to_string());
        let (tag_key, tag_value) = tag
            .split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| format!("SIGNER_INSTANCE_TAG は key=value 形式で指定してください: {tag}"))?;

        Ok(Self {
            provider,
            region: lookup("AWS_DEFAULT_REGION"),
            launch_template_id: lookup("SIGNER_LAUNCH_TEMPLATE_ID"),
            image_id: lookup("SIGNER_IMAGE_ID"),
            tag_key,
            tag_value,
        })
    }
}
