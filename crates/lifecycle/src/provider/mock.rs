//! # モックプロバイダ
//!
//! メモリ上のインスタンス群。ローカル開発とテストで使用する
//! （`LIFECYCLE_PROVIDER=mock`）。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dropper_types::{InstanceState, SigningInstanceInfo};

use super::{ComputeProvider, ProviderError};

struct MockInstance {
    signing: bool,
    state: InstanceState,
    private_ip_address: String,
}

/// メモリ上のインスタンス群によるプロバイダ。
pub struct MockProvider {
    instances: Mutex<BTreeMap<String, MockInstance>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    deny: bool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// 空のインスタンス群
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
            deny: false,
        }
    }

    /// すべての呼び出しを権限不足で拒否する。
    pub fn deny_permissions(mut self) -> Self {
        self.deny = true;
        self
    }

    /// プロバイダが呼ばれた回数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 署名タグを持たない稼働中インスタンスを追加する。
    pub fn insert_untagged(&self) -> String {
        self.insert(false)
    }

    /// インスタンスの状態（存在しなければ `None`）
    pub fn state_of(&self, instance_id: &str) -> Option<InstanceState> {
        self.lock().get(instance_id).map(|i| i.state)
    }

    /// 全インスタンスのID
    pub fn instances(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MockInstance>> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, signing: bool) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("i-{n:017x}");
        self.lock().insert(
            id.clone(),
            MockInstance {
                signing,
                state: InstanceState::Running,
                private_ip_address: format!("10.0.0.{}", n % 250 + 2),
            },
        );
        id
    }

    fn begin(&self, dry_run: bool) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(ProviderError::Unauthorized(
                "You are not authorized to perform this operation.".into(),
            ));
        }
        if dry_run {
            return Err(ProviderError::DryRunOperation);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ComputeProvider for MockProvider {
    async fn run_instance(&self, dry_run: bool) -> Result<String, ProviderError> {
        self.begin(dry_run)?;
        Ok(self.insert(true))
    }

    async fn describe_signing_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<SigningInstanceInfo>, ProviderError> {
        self.begin(false)?;
        let instances = self.lock();
        if let Some(unknown) = instance_ids.iter().find(|id| !instances.contains_key(*id)) {
            return Err(ProviderError::Api(format!(
                "The instance ID '{unknown}' does not exist"
            )));
        }
        Ok(instances
            .iter()
            .filter(|(id, _)| instance_ids.is_empty() || instance_ids.contains(id))
            .filter(|(_, i)| {
                i.signing && matches!(i.state, InstanceState::Running | InstanceState::Starting)
            })
            .map(|(id, i)| SigningInstanceInfo {
                instance_id: id.clone(),
                state: i.state,
                private_ip_address: Some(i.private_ip_address.clone()),
                launch_time: None,
            })
            .collect())
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>, ProviderError> {
        self.begin(dry_run)?;
        let mut instances = self.lock();
        let mut terminated = Vec::new();
        for id in instance_ids {
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| ProviderError::Api(format!("The instance ID '{id}' does not exist")))?;
            instance.state = InstanceState::Terminated;
            terminated.push(id.clone());
        }
        Ok(terminated)
    }
}
