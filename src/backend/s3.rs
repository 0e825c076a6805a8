//! S3 object client
//!
//! Thin wrapper over the AWS SDK. Writes go through a background task that
//! buffers up to one part: small objects become a single PUT, larger ones a
//! multipart upload that is aborted if the stream is cancelled.

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, warn};

use super::types::{ListEntry, ListPage, ObjectAttributes, ObjectVersion, ReadStream};
use super::upload::{UploadChunks, UploadStream};
use super::ObjectClient;
use crate::config::Options;
use crate::error::{VfsError, VfsResult};

const BACKEND: &str = "s3";
const READ_CHUNK: usize = 1024 * 1024;

/// [`ObjectClient`] for AWS S3 and S3-compatible stores (MinIO, LocalStack)
///
/// # Example
///
/// ```no_run
/// use orbit_vfs::backend::{ObjectClient, S3ObjectClient};
/// use orbit_vfs::config::Options;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = Options {
///         region: Some("us-east-1".to_string()),
///         ..Default::default()
///     };
///     let client = S3ObjectClient::new(&options).await?;
///     let attrs = client.head_object("my-bucket", "path/to/file.txt").await?;
///     println!("Size: {} bytes", attrs.size);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct S3ObjectClient {
    client: AwsS3Client,
    part_size: usize,
    /// Endpoint and region; two clients copy natively only if these match
    store: String,
}

impl S3ObjectClient {
    /// Build a client from file system options
    pub async fn new(options: &Options) -> VfsResult<Self> {
        options.validate()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = match &options.region {
            Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
            None => RegionProviderChain::default_provider(),
        };
        loader = loader.region(region_provider);

        if let (Some(access_key), Some(secret_key)) =
            (&options.access_key_id, &options.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                options.session_token.clone(),
                None,
                "orbit-vfs-explicit",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        // Required for MinIO and LocalStack
        if options.force_path_style {
            builder = builder.force_path_style(true);
        }

        let config = builder.build();
        let store = store_identity(
            options.endpoint.as_deref(),
            config.region().map(|r| r.as_ref()),
        );
        Ok(Self {
            client: AwsS3Client::from_conf(config),
            part_size: options.effective_part_size(),
            store,
        })
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: AwsS3Client, part_size: usize) -> Self {
        let store = store_identity(None, client.config().region().map(|r| r.as_ref()));
        Self {
            client,
            part_size,
            store,
        }
    }
}

fn store_identity(endpoint: Option<&str>, region: Option<&str>) -> String {
    format!(
        "s3:{}:{}",
        endpoint.unwrap_or("aws"),
        region.unwrap_or("default")
    )
}

fn remote<E: std::error::Error>(operation: &str, err: E) -> VfsError {
    VfsError::remote(
        BACKEND,
        format!("{} failed: {}", operation, DisplayErrorContext(&err)),
    )
}

fn to_system_time(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> SystemTime {
    dt.and_then(|dt| SystemTime::try_from(*dt).ok())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// `bucket/key` with the key percent-encoded, as CopyObject expects
fn copy_source(bucket: &str, key: &str) -> String {
    let mut out = String::with_capacity(bucket.len() + key.len() + 1);
    out.push_str(bucket);
    out.push('/');
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Drive one upload: single PUT below `part_size`, multipart above
async fn run_upload(
    client: AwsS3Client,
    bucket: String,
    key: String,
    content_type: Option<String>,
    part_size: usize,
    mut chunks: UploadChunks,
) -> VfsResult<()> {
    let mut buffer = BytesMut::new();
    let mut multipart: Option<(String, Vec<CompletedPart>)> = None;

    loop {
        let chunk = match chunks.next().await {
            Ok(chunk) => chunk,
            Err(e) => {
                if let Some((upload_id, _)) = &multipart {
                    abort_upload(&client, &bucket, &key, upload_id).await;
                }
                return Err(e);
            }
        };

        let Some(chunk) = chunk else { break };
        buffer.extend_from_slice(&chunk);
        if buffer.len() < part_size {
            continue;
        }

        if multipart.is_none() {
            let mut request = client.create_multipart_upload().bucket(&bucket).key(&key);
            if let Some(ct) = &content_type {
                request = request.content_type(ct);
            }
            let response = request
                .send()
                .await
                .map_err(|e| remote("CreateMultipartUpload", e))?;
            let upload_id = response
                .upload_id()
                .ok_or_else(|| VfsError::remote(BACKEND, "No upload ID returned"))?
                .to_string();
            debug!(bucket = %bucket, key = %key, upload_id = %upload_id, "started multipart upload");
            multipart = Some((upload_id, Vec::new()));
        }

        if let Some((upload_id, parts)) = multipart.as_mut() {
            let part = buffer.split_to(part_size).freeze();
            if let Err(e) = upload_part(&client, &bucket, &key, upload_id, parts, part).await {
                abort_upload(&client, &bucket, &key, upload_id).await;
                return Err(e);
            }
        }
    }

    chunks.ensure_live()?;

    match multipart {
        None => {
            let mut request = client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from(buffer.freeze()));
            if let Some(ct) = &content_type {
                request = request.content_type(ct);
            }
            request.send().await.map_err(|e| remote("PutObject", e))?;
            Ok(())
        }
        Some((upload_id, mut parts)) => {
            let result = async {
                if !buffer.is_empty() {
                    upload_part(&client, &bucket, &key, &upload_id, &mut parts, buffer.freeze())
                        .await?;
                }
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                client
                    .complete_multipart_upload()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| remote("CompleteMultipartUpload", e))?;
                Ok(())
            }
            .await;
            if result.is_err() {
                abort_upload(&client, &bucket, &key, &upload_id).await;
            }
            result
        }
    }
}

async fn upload_part(
    client: &AwsS3Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    parts: &mut Vec<CompletedPart>,
    data: Bytes,
) -> VfsResult<()> {
    let part_number = parts.len() as i32 + 1;
    let response = client
        .upload_part()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .part_number(part_number)
        .body(ByteStream::from(data))
        .send()
        .await
        .map_err(|e| remote("UploadPart", e))?;

    let etag = response
        .e_tag()
        .ok_or_else(|| {
            VfsError::remote(BACKEND, format!("No ETag returned for part {}", part_number))
        })?
        .to_string();

    parts.push(
        CompletedPart::builder()
            .part_number(part_number)
            .e_tag(etag)
            .build(),
    );
    Ok(())
}

async fn abort_upload(client: &AwsS3Client, bucket: &str, key: &str, upload_id: &str) {
    if let Err(e) = client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await
    {
        warn!(bucket, key, upload_id, error = %DisplayErrorContext(&e), "failed to abort multipart upload");
    }
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn identity(&self) -> Option<String> {
        Some(self.store.clone())
    }

    #[tracing::instrument(
        skip(self),
        fields(otel.kind = "client", backend = "s3", bucket = %container, key = %key)
    )]
    async fn head_object(&self, container: &str, key: &str) -> VfsResult<ObjectAttributes> {
        let response = self
            .client
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    VfsError::not_found(container, key)
                } else {
                    remote("HeadObject", e)
                }
            })?;

        Ok(ObjectAttributes {
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: to_system_time(response.last_modified()),
            content_type: response.content_type().map(str::to_string),
            metadata: response.metadata().cloned().unwrap_or_default(),
        })
    }

    #[tracing::instrument(
        skip(self),
        fields(otel.kind = "client", backend = "s3", bucket = %container, key = %key, start)
    )]
    async fn range_read(&self, container: &str, key: &str, start: u64) -> VfsResult<ReadStream> {
        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .range(format!("bytes={}-", start))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    VfsError::not_found(container, key)
                } else {
                    remote("GetObject", e)
                }
            })?;

        use futures::stream;
        use tokio::io::AsyncReadExt;

        let reader = output.body.into_async_read();
        let stream = stream::unfold(
            (reader, vec![0u8; READ_CHUNK]),
            |(mut reader, mut buffer)| async move {
                match reader.read(&mut buffer).await {
                    Ok(0) => None,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buffer[..n]);
                        Some((Ok(data), (reader, buffer)))
                    }
                    Err(e) => Some((Err(e), (reader, buffer))),
                }
            },
        );

        Ok(Box::pin(stream))
    }

    #[tracing::instrument(
        skip(self, content_type),
        fields(otel.kind = "client", backend = "s3", bucket = %container, key = %key)
    )]
    async fn stream_write(
        &self,
        container: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<UploadStream> {
        let client = self.client.clone();
        let bucket = container.to_string();
        let key = key.to_string();
        let content_type = content_type.map(str::to_string);
        let part_size = self.part_size;

        Ok(UploadStream::spawn(BACKEND, move |chunks| {
            run_upload(client, bucket, key, content_type, part_size, chunks)
        }))
    }

    #[tracing::instrument(
        skip(self, content_type),
        fields(otel.kind = "client", backend = "s3", src = %src_key, dst = %dst_key)
    )]
    async fn copy_object(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
        content_type: Option<&str>,
    ) -> VfsResult<()> {
        let mut request = self
            .client
            .copy_object()
            .copy_source(copy_source(src_container, src_key))
            .bucket(dst_container)
            .key(dst_key);
        if let Some(ct) = content_type {
            request = request
                .content_type(ct)
                .metadata_directive(MetadataDirective::Replace);
        }
        request.send().await.map_err(|e| {
            let message = DisplayErrorContext(&e).to_string();
            if message.contains("NoSuchKey") {
                VfsError::not_found(src_container, src_key)
            } else {
                remote("CopyObject", e)
            }
        })?;
        Ok(())
    }

    #[tracing::instrument(
        skip(self, version_id),
        fields(otel.kind = "client", backend = "s3", bucket = %container, key = %key)
    )]
    async fn remove_object(
        &self,
        container: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> VfsResult<()> {
        self.client
            .delete_object()
            .bucket(container)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(|e| remote("DeleteObject", e))?;
        Ok(())
    }

    async fn list_versions(&self, container: &str, prefix: &str) -> VfsResult<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_object_versions()
                .bucket(container)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| remote("ListObjectVersions", e))?;

            versions.extend(response.versions().iter().filter_map(|v| {
                Some(ObjectVersion {
                    key: v.key()?.to_string(),
                    version_id: v.version_id()?.to_string(),
                    is_delete_marker: false,
                })
            }));
            versions.extend(response.delete_markers().iter().filter_map(|dm| {
                Some(ObjectVersion {
                    key: dm.key()?.to_string(),
                    version_id: dm.version_id()?.to_string(),
                    is_delete_marker: true,
                })
            }));

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            version_marker = response.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() {
                break;
            }
        }

        Ok(versions)
    }

    #[tracing::instrument(
        skip(self, delimiter, token),
        fields(otel.kind = "client", backend = "s3", bucket = %container, prefix = %prefix)
    )]
    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<&str>,
        token: Option<&str>,
    ) -> VfsResult<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(container)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(token.map(str::to_string))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_bucket()) {
                    VfsError::ContainerNotFound(container.to_string())
                } else {
                    remote("ListObjectsV2", e)
                }
            })?;

        Ok(ListPage {
            entries: response
                .contents()
                .iter()
                .filter_map(|obj| {
                    Some(ListEntry {
                        key: obj.key()?.to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                    })
                })
                .collect(),
            common_prefixes: response
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect(),
            next_token: response.next_continuation_token().map(str::to_string),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn container_exists(&self, container: &str) -> VfsResult<bool> {
        match self.client.head_bucket().bucket(container).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(remote("HeadBucket", e)),
        }
    }

    async fn update_metadata(
        &self,
        container: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> VfsResult<()> {
        let current = self.head_object(container, key).await?;
        self.client
            .copy_object()
            .copy_source(copy_source(container, key))
            .bucket(container)
            .key(key)
            .set_content_type(current.content_type)
            .set_metadata(Some(metadata.clone()))
            .metadata_directive(MetadataDirective::Replace)
            .send()
            .await
            .map_err(|e| remote("CopyObject", e))?;
        Ok(())
    }

    async fn versioning_enabled(&self, container: &str) -> VfsResult<bool> {
        let response = self
            .client
            .get_bucket_versioning()
            .bucket(container)
            .send()
            .await
            .map_err(|e| remote("GetBucketVersioning", e))?;

        Ok(matches!(
            response.status(),
            Some(aws_sdk_s3::types::BucketVersioningStatus::Enabled)
        ))
    }
}
