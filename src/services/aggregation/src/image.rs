//! Image service client and wrappers

use crate::client::ServiceClient;
use crate::wrapper::{take_list, ApiResource, AttrSet, ResourceWrapper};
use async_trait::async_trait;
use horizon_shared::{ApiResult, ConfigGate, FilterTenant};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const SERVICE: &str = "image";

/// Image with its custom properties wrapped lazily
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Image {
    resource: ApiResource,
    #[serde(skip)]
    properties: OnceCell<ImageProperties>,
}

impl ResourceWrapper for Image {
    const KIND: &'static str = "Image";
    const ATTRS: AttrSet = AttrSet::Fixed(&[
        "id",
        "name",
        "status",
        "visibility",
        "is_public",
        "owner",
        "size",
        "disk_format",
        "container_format",
        "min_disk",
        "min_ram",
        "protected",
        "checksum",
        "created_at",
        "updated_at",
        "properties",
    ]);

    fn from_resource(resource: ApiResource) -> Self {
        Self {
            resource,
            properties: OnceCell::new(),
        }
    }

    fn resource(&self) -> &ApiResource {
        &self.resource
    }
}

impl std::ops::Deref for Image {
    type Target = ApiResource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

crate::api_wrapper!(
    /// Free-form image properties
    ImageProperties,
    "ImageProperties",
    open
);

impl Image {
    /// Custom properties, wrapped on first access
    pub fn properties(&self) -> &ImageProperties {
        self.properties.get_or_init(|| {
            let properties = match self.resource.payload().get("properties") {
                Some(Value::Object(map)) => map.clone(),
                _ => serde_json::Map::new(),
            };
            ImageProperties::from_resource(ApiResource::from_map(
                ImageProperties::KIND,
                ImageProperties::ATTRS,
                properties,
            ))
        })
    }

    pub fn owner(&self) -> Option<&str> {
        self.opt_str("owner")
    }

    pub fn is_public(&self) -> bool {
        match self.opt_str("visibility") {
            Some(visibility) => visibility == "public",
            None => self
                .get_opt("is_public")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Official-tenant entry when this public image belongs to one
    pub fn official<'a>(&self, config: &'a ConfigGate) -> Option<&'a FilterTenant> {
        if !self.is_public() {
            return None;
        }
        self.owner().and_then(|owner| config.official_tenant(owner))
    }
}

/// Parameters of one image listing call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageListRequest {
    /// Number of images to request
    pub limit: usize,
    /// Last image id of the previous page
    pub marker: Option<String>,
    /// Server-side filters, passed through as query parameters
    pub filters: BTreeMap<String, String>,
}

/// One page of images
#[derive(Debug, Clone, Serialize)]
pub struct ImagePage {
    pub images: Vec<Image>,
    pub has_more: bool,
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn image_get(&self, image_id: &str) -> ApiResult<Image>;

    async fn image_list(&self, request: &ImageListRequest) -> ApiResult<Vec<Image>>;
}

/// HTTP implementation of `ImageApi`
#[derive(Debug, Clone)]
pub struct ImageClient {
    client: ServiceClient,
}

impl ImageClient {
    /// Create a new image client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageApi for ImageClient {
    async fn image_get(&self, image_id: &str) -> ApiResult<Image> {
        // image endpoints are versioned from the host root
        let body: Value = self
            .client
            .get_json(&format!("/v2/images/{}", image_id), &[])
            .await?;
        Image::wrap(body)
    }

    async fn image_list(&self, request: &ImageListRequest) -> ApiResult<Vec<Image>> {
        let mut query = vec![("limit".to_string(), request.limit.to_string())];
        if let Some(marker) = &request.marker {
            query.push(("marker".to_string(), marker.clone()));
        }
        query.extend(
            request
                .filters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        debug!(limit = request.limit, marker = ?request.marker, "image_list");
        let body: Value = self.client.get_json("/v2/images", &query).await?;
        Image::wrap_all(take_list(body, SERVICE, "images")?)
    }
}

/// List images, optionally one page at a time.
///
/// With `paginate`, one more image than the page size is requested; its
/// presence sets `has_more` and it is dropped from the page.
pub async fn image_list_detailed(
    api: &dyn ImageApi,
    config: &ConfigGate,
    marker: Option<&str>,
    filters: BTreeMap<String, String>,
    paginate: bool,
) -> ApiResult<ImagePage> {
    let page_size = config.page_size;
    let request_size = if paginate {
        page_size + 1
    } else {
        config.api_result_limit
    };

    let request = ImageListRequest {
        limit: request_size,
        marker: marker.map(str::to_string),
        filters,
    };
    let mut images = api.image_list(&request).await?;
    images.truncate(request_size);

    let mut has_more = false;
    if paginate && images.len() > page_size {
        images.truncate(page_size);
        has_more = true;
    }

    Ok(ImagePage { images, has_more })
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_shared::ApiError;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedImages {
        count: usize,
        requests: Mutex<Vec<ImageListRequest>>,
    }

    #[async_trait]
    impl ImageApi for FixedImages {
        async fn image_get(&self, image_id: &str) -> ApiResult<Image> {
            Err(ApiError::not_found("image", image_id))
        }

        async fn image_list(&self, request: &ImageListRequest) -> ApiResult<Vec<Image>> {
            self.requests.lock().unwrap().push(request.clone());
            let n = self.count.min(request.limit);
            (0..n)
                .map(|i| Image::wrap(json!({"id": format!("img-{}", i), "name": "x"})))
                .collect()
        }
    }

    fn images(count: usize) -> FixedImages {
        FixedImages {
            count,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_pagination_requests_one_extra() {
        let mut config = ConfigGate::default();
        config.page_size = 3;
        let api = images(10);

        let page = image_list_detailed(&api, &config, Some("img-0"), BTreeMap::new(), true)
            .await
            .unwrap();

        assert_eq!(page.images.len(), 3);
        assert!(page.has_more);
        let requests = api.requests.lock().unwrap();
        assert_eq!(requests[0].limit, 4);
        assert_eq!(requests[0].marker.as_deref(), Some("img-0"));
    }

    #[tokio::test]
    async fn test_last_page_has_no_more() {
        let mut config = ConfigGate::default();
        config.page_size = 3;
        let api = images(3);

        let page = image_list_detailed(&api, &config, None, BTreeMap::new(), true)
            .await
            .unwrap();
        assert_eq!(page.images.len(), 3);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_unpaginated_uses_result_limit() {
        let config = ConfigGate::default();
        let api = images(5);

        let page = image_list_detailed(&api, &config, None, BTreeMap::new(), false)
            .await
            .unwrap();
        assert_eq!(page.images.len(), 5);
        assert!(!page.has_more);
        assert_eq!(api.requests.lock().unwrap()[0].limit, 1000);
    }

    #[test]
    fn test_properties_and_official_marking() {
        let config: ConfigGate = serde_yaml::from_str(
            r#"
IMAGES_LIST_FILTER_TENANTS:
  - tenant: "official-tenant"
    text: "Official"
"#,
        )
        .unwrap();

        let image = Image::wrap(json!({
            "id": "img-1",
            "name": "ubuntu",
            "visibility": "public",
            "owner": "official-tenant",
            "properties": {"architecture": "x86_64"}
        }))
        .unwrap();
        assert_eq!(
            image.properties().get("architecture").unwrap(),
            &json!("x86_64")
        );
        assert_eq!(
            image.official(&config).and_then(|t| t.text.as_deref()),
            Some("Official")
        );

        let private = Image::wrap(json!({
            "id": "img-2",
            "is_public": false,
            "owner": "official-tenant"
        }))
        .unwrap();
        assert!(private.official(&config).is_none());
        assert!(private.properties().payload().is_empty());
    }
}
