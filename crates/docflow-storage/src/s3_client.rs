//! `ObjectStoreClient` implementation backed by `aws-sdk-s3`, pointed at
//! whatever S3-compatible endpoint `S3Settings::endpoint_url` names (this is
//! what lets the same code target real S3 or a self-hosted MinIO bucket).

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use docflow_core::{Error, Result, S3Settings};

use crate::storage_operator::ObjectStoreClient;

pub struct AwsS3Client {
    client: Client,
}

impl AwsS3Client {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.access_secret.clone(),
            None,
            None,
            "docflow-static",
        );
        let config = aws_sdk_s3::Config::builder()
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint_url.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self { client: Client::from_conf(config) }
    }
}

#[async_trait::async_trait]
impl ObjectStoreClient for AwsS3Client {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::not_found(format!("s3 get_object {bucket}/{key}: {e}")))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::external(format!("s3 streaming {bucket}/{key}: {e}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| Error::external(format!("s3 put_object {bucket}/{key}: {e}")))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => Err(Error::external(format!("s3 head_object {bucket}/{key}: {e}"))),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::external(format!("s3 delete_object {bucket}/{key}: {e}")))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let output = req
                .send()
                .await
                .map_err(|e| Error::external(format!("s3 list_objects_v2 {bucket}/{prefix}: {e}")))?;
            keys.extend(output.contents().iter().filter_map(|o| o.key().map(str::to_string)));
            if output.is_truncated().unwrap_or(false) {
                continuation = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(keys)
    }
}
