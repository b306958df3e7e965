use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use url::Url;

use crate::app::ports::BlobStore;
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};

#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    url_base: String,
}

impl ObjectStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.s3_endpoint.clone())
            .force_path_style(true);
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let s3_config = s3_builder.build();

        let client = Client::from_conf(s3_config);

        Ok(Self {
            client,
            bucket: config.s3_bucket.clone(),
            url_base: url_base(config.object_url_base())?,
        })
    }
}

#[async_trait]
impl BlobStore for ObjectStorage {
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> PipelineResult<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("put object {}", name))
            .map_err(PipelineError::transient)?;

        Ok(self.url_for(name))
    }

    async fn get(&self, name: &str) -> PipelineResult<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .with_context(|| format!("get object {}", name))
            .map_err(PipelineError::transient)?;

        let data = object
            .body
            .collect()
            .await
            .with_context(|| format!("read object {}", name))
            .map_err(PipelineError::transient)?;
        Ok(data.into_bytes())
    }

    async fn delete(&self, name: &str) -> PipelineResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .with_context(|| format!("delete object {}", name))
            .map_err(PipelineError::transient)?;
        Ok(())
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}/{}", self.url_base, self.bucket, name)
    }
}

/// Normalizes the configured endpoint into `scheme://host[:port][/path]`
/// without a trailing slash. Bare hosts are treated as http.
fn url_base(endpoint: &str) -> Result<String> {
    let parsed = if endpoint.contains("://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("http://{}", endpoint))?
    };
    if parsed.host_str().is_none() {
        return Err(anyhow!("object url base {} has no host", endpoint));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
