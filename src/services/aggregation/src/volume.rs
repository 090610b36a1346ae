//! Block storage client, wrappers and the attachment view

use crate::client::ServiceClient;
use crate::compute::ComputeApi;
use crate::wrapper::{take_list, take_object, ResourceWrapper};
use async_trait::async_trait;
use futures::future::try_join_all;
use horizon_shared::{ApiError, ApiResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

const SERVICE: &str = "volume";

/// Name shown for attachments that carry no server reference
pub const UNKNOWN_INSTANCE: &str = "Unknown instance";

crate::api_wrapper!(
    /// Block storage volume
    Volume,
    "Volume",
    [
        "id",
        "display_name",
        "name",
        "display_description",
        "size",
        "status",
        "volume_type",
        "availability_zone",
        "attachments",
        "created_at",
        "os-vol-tenant-attr:tenant_id",
    ]
);

impl Volume {
    /// Size in gigabytes
    pub fn size(&self) -> ApiResult<i64> {
        self.get_i64("size")
    }

    pub fn display_name(&self) -> &str {
        self.opt_str("display_name")
            .or_else(|| self.opt_str("name"))
            .unwrap_or("")
    }

    /// Raw attachment records
    pub fn attachments(&self) -> &[Value] {
        self.get_opt("attachments")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// One attachment joined with the server it points at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentView {
    pub server_id: Option<String>,
    pub device: Option<String>,
    pub instance_name: String,
}

impl AttachmentView {
    fn from_raw(raw: &Value, instance_name: impl FnOnce(&str) -> Option<String>) -> Self {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let server_id = text("server_id");
        let instance_name = server_id
            .as_deref()
            .and_then(instance_name)
            .unwrap_or_else(|| UNKNOWN_INSTANCE.to_string());
        Self {
            server_id,
            device: text("device"),
            instance_name,
        }
    }
}

/// Volume with resolved attachments; the volume payload is left untouched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeView {
    pub volume: Volume,
    pub attachments: Vec<AttachmentView>,
}

#[async_trait]
pub trait VolumeApi: Send + Sync {
    /// Volumes of the bound tenant, or of every tenant when `all_tenants`
    async fn volume_list(&self, all_tenants: bool) -> ApiResult<Vec<Volume>>;

    async fn volume_get(&self, volume_id: &str) -> ApiResult<Volume>;
}

/// HTTP implementation of `VolumeApi`
#[derive(Debug, Clone)]
pub struct VolumeClient {
    client: ServiceClient,
}

impl VolumeClient {
    /// Create a new volume client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VolumeApi for VolumeClient {
    async fn volume_list(&self, all_tenants: bool) -> ApiResult<Vec<Volume>> {
        let query = if all_tenants {
            vec![("all_tenants".to_string(), "1".to_string())]
        } else {
            Vec::new()
        };
        debug!(all_tenants, "volume_list");
        let body: Value = self.client.get_json("volumes/detail", &query).await?;
        Volume::wrap_all(take_list(body, SERVICE, "volumes")?)
    }

    async fn volume_get(&self, volume_id: &str) -> ApiResult<Volume> {
        let body: Value = self
            .client
            .get_json(&format!("volumes/{}", volume_id), &[])
            .await?;
        Volume::wrap(take_object(body, SERVICE, "volume")?)
    }
}

/// One volume with each attached server looked up individually
pub async fn volume_get_detailed(
    volumes: &dyn VolumeApi,
    compute: &dyn ComputeApi,
    volume_id: &str,
) -> ApiResult<VolumeView> {
    let volume = volumes.volume_get(volume_id).await?;

    let lookups = volume.attachments().iter().map(|raw| async move {
        let name = match raw.get("server_id").and_then(Value::as_str) {
            Some(server_id) => Some(compute.server_get(server_id).await?.name().to_string()),
            None => None,
        };
        Ok::<_, ApiError>(AttachmentView::from_raw(raw, |_| name))
    });
    let attachments = try_join_all(lookups).await?;

    Ok(VolumeView { volume, attachments })
}

/// Volumes with attachments resolved against one server listing
pub async fn volume_list_with_servers(
    volumes: &dyn VolumeApi,
    compute: &dyn ComputeApi,
    all_tenants: bool,
) -> ApiResult<Vec<VolumeView>> {
    let (volumes, servers) = tokio::try_join!(
        volumes.volume_list(all_tenants),
        compute.server_list(all_tenants)
    )?;

    let mut names = HashMap::with_capacity(servers.len());
    for server in &servers {
        names.insert(server.id()?, server.name().to_string());
    }

    Ok(volumes
        .into_iter()
        .map(|volume| {
            let attachments = volume
                .attachments()
                .iter()
                .map(|raw| AttachmentView::from_raw(raw, |id| names.get(id).cloned()))
                .collect();
            VolumeView { volume, attachments }
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::floating_ip::tests::FakeCompute;
    use serde_json::json;

    pub(crate) struct FakeVolumes {
        pub volumes: Vec<Value>,
    }

    #[async_trait]
    impl VolumeApi for FakeVolumes {
        async fn volume_list(&self, _all_tenants: bool) -> ApiResult<Vec<Volume>> {
            Volume::wrap_all(self.volumes.clone())
        }

        async fn volume_get(&self, volume_id: &str) -> ApiResult<Volume> {
            self.volumes
                .iter()
                .find(|v| v["id"] == volume_id)
                .cloned()
                .map(Volume::wrap)
                .unwrap_or_else(|| Err(ApiError::not_found(SERVICE, volume_id)))
        }
    }

    fn fixtures() -> (FakeVolumes, FakeCompute) {
        let volumes = FakeVolumes {
            volumes: vec![json!({
                "id": "vol-1",
                "display_name": "data",
                "size": "10",
                "attachments": [
                    {"server_id": "vm-1", "device": "/dev/vdb"},
                    {"device": "/dev/vdc"}
                ]
            })],
        };
        let compute = FakeCompute {
            servers: vec![json!({"id": "vm-1", "name": "web"})],
            ..Default::default()
        };
        (volumes, compute)
    }

    #[tokio::test]
    async fn test_list_with_servers_builds_views() {
        let (volumes, compute) = fixtures();
        let views = volume_list_with_servers(&volumes, &compute, false)
            .await
            .unwrap();

        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.volume.size().unwrap(), 10);
        assert_eq!(view.attachments[0].instance_name, "web");
        assert_eq!(view.attachments[0].device.as_deref(), Some("/dev/vdb"));
        assert_eq!(view.attachments[1].instance_name, UNKNOWN_INSTANCE);
        assert!(view.attachments[1].server_id.is_none());

        // the raw attachment is not stamped with a name
        assert!(view.volume.attachments()[0].get("instance_name").is_none());
    }

    #[tokio::test]
    async fn test_get_detailed_propagates_missing_server() {
        let (volumes, compute) = fixtures();
        let view = volume_get_detailed(&volumes, &compute, "vol-1").await.unwrap();
        assert_eq!(view.volume.display_name(), "data");
        assert_eq!(view.attachments[0].instance_name, "web");

        let empty = FakeCompute::default();
        let err = volume_get_detailed(&volumes, &empty, "vol-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }
}
