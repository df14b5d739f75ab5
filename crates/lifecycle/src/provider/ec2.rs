//! # EC2 プロバイダ
//!
//! 起動テンプレートから署名インスタンスを起動し、タグで識別する。

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::primitives::DateTimeFormat;
use aws_sdk_ec2::types::{
    Filter, InstanceStateName, LaunchTemplateSpecification, ResourceType, Tag, TagSpecification,
};

use dropper_types::{InstanceState, SigningInstanceInfo};

use super::{ComputeProvider, ProviderError};
use crate::config::LifecycleConfig;

/// EC2によるプロバイダ実装。
pub struct Ec2Provider {
    client: aws_sdk_ec2::Client,
    launch_template_id: String,
    image_id: Option<String>,
    tag_key: String,
    tag_value: String,
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    match err.code() {
        Some("DryRunOperation") => ProviderError::DryRunOperation,
        Some("UnauthorizedOperation") => ProviderError::Unauthorized(message),
        Some(code) => ProviderError::Api(format!("{code}: {message}")),
        None => ProviderError::Api(message),
    }
}

fn map_state(state: Option<&InstanceStateName>) -> InstanceState {
    match state {
        Some(InstanceStateName::Pending) => InstanceState::Starting,
        Some(InstanceStateName::Running) => InstanceState::Running,
        Some(InstanceStateName::ShuttingDown) | Some(InstanceStateName::Stopping) => {
            InstanceState::Stopping
        }
        Some(InstanceStateName::Terminated) | Some(InstanceStateName::Stopped) => {
            InstanceState::Terminated
        }
        _ => InstanceState::Absent,
    }
}

impl Ec2Provider {
    /// 設定とAWSの標準認証情報チェーンから構築する。
    pub async fn from_config(config: &LifecycleConfig) -> Result<Self, ProviderError> {
        let launch_template_id = config.launch_template_id.clone().ok_or_else(|| {
            ProviderError::Api("SIGNER_LAUNCH_TEMPLATE_ID が設定されていません".to_string())
        })?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_sdk_ec2::config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        Ok(Self {
            client: aws_sdk_ec2::Client::new(&sdk_config),
            launch_template_id,
            image_id: config.image_id.clone(),
            tag_key: config.tag_key.clone(),
            tag_value: config.tag_value.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ComputeProvider for Ec2Provider {
    async fn run_instance(&self, dry_run: bool) -> Result<String, ProviderError> {
        let tags = TagSpecification::builder()
            .resource_type(ResourceType::Instance)
            .tags(
                Tag::builder()
                    .key(&self.tag_key)
                    .value(&self.tag_value)
                    .build(),
            )
            .build();
        let request = self
            .client
            .run_instances()
            .launch_template(
                LaunchTemplateSpecification::builder()
                    .launch_template_id(&self.launch_template_id)
                    .build(),
            )
            .set_image_id(self.image_id.clone())
            .tag_specifications(tags)
            .min_count(1)
            .max_count(1)
            .dry_run(dry_run);

        let output = request.send().await.map_err(map_sdk_error)?;
        output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Api("起動結果にインスタンスIDがありません".to_string()))
    }

    async fn describe_signing_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<SigningInstanceInfo>, ProviderError> {
        let ids = if instance_ids.is_empty() {
            None
        } else {
            Some(instance_ids.to_vec())
        };
        let output = self
            .client
            .describe_instances()
            .set_instance_ids(ids)
            .filters(
                Filter::builder()
                    .name(format!("tag:{}", self.tag_key))
                    .values(&self.tag_value)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;

        let mut instances = Vec::new();
        for reservation in output.reservations() {
            for instance in reservation.instances() {
                let Some(instance_id) = instance.instance_id() else {
                    continue;
                };
                instances.push(SigningInstanceInfo {
                    instance_id: instance_id.to_string(),
                    state: map_state(instance.state().and_then(|s| s.name())),
                    private_ip_address: instance.private_ip_address().map(str::to_string),
                    launch_time: instance
                        .launch_time()
                        .and_then(|t| t.fmt(DateTimeFormat::DateTime).ok()),
                });
            }
        }
        Ok(instances)
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>, ProviderError> {
        let output = self
            .client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(output
            .terminating_instances()
            .iter()
            .filter_map(|change| change.instance_id().map(str::to_string))
            .collect())
    }
}
