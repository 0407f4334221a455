//! AWS S3 adapter, available behind the `s3` cargo feature.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::error::{StoreError, StoreResult};
use super::{BlobStore, DeleteOutcome};

/// S3 allows at most this many keys per DeleteObjects request.
const DELETE_BATCH: usize = 1000;

/// Blob store backed by one S3 bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Connect to a bucket using ambient AWS credentials, optionally against
    /// a custom endpoint (for S3-compatible object stores).
    pub async fn new(bucket: impl Into<String>, endpoint: Option<&str>) -> StoreResult<Self> {
        let bucket = bucket.into();
        info!(%bucket, "initializing S3 store");

        let aws_config = if let Some(endpoint) = endpoint {
            aws_config::from_env().endpoint_url(endpoint).load().await
        } else {
            aws_config::load_from_env().await
        };
        let client = Client::new(&aws_config);

        // Test the connection before any stage depends on it.
        client
            .head_bucket()
            .bucket(&bucket)
            .send()
            .await
            .map_err(|err| {
                StoreError::unavailable(format!("cannot access S3 bucket {bucket}: {err}"))
            })?;

        Ok(Self { client, bucket })
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        debug!(%prefix, "listing S3 objects");
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|err| StoreError::unavailable(format!("listing {prefix} failed: {err}")))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );
        }
        // ListObjectsV2 returns keys in lexicographic order already.
        Ok(keys)
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    StoreError::not_found(key)
                } else {
                    StoreError::unavailable(format!("fetching {key} failed: {service_err}"))
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|err| StoreError::unavailable(format!("reading {key} failed: {err}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| StoreError::unavailable(format!("writing {key} failed: {err}")))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(keys.len());

        for batch in keys.chunks(DELETE_BATCH) {
            let identifiers = batch
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|err| StoreError::configuration(err.to_string()))
                })
                .collect::<StoreResult<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .build()
                .map_err(|err| StoreError::configuration(err.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|err| {
                    StoreError::unavailable(format!("bulk delete failed: {err}"))
                })?;

            // DeleteObjects treats absent keys as deleted, which is exactly
            // the idempotence the pipeline wants; only explicit per-key
            // errors surface as failures.
            let mut failed: Vec<(String, String)> = response
                .errors()
                .iter()
                .filter_map(|err| {
                    err.key().map(|key| {
                        (
                            key.to_string(),
                            err.message().unwrap_or("unknown error").to_string(),
                        )
                    })
                })
                .collect();

            for key in batch {
                match failed.iter().position(|(failed_key, _)| failed_key == key) {
                    Some(at) => {
                        let (_, reason) = failed.swap_remove(at);
                        outcomes.push(DeleteOutcome::failed(key, reason));
                    }
                    None => outcomes.push(DeleteOutcome::deleted(key)),
                }
            }
        }

        Ok(outcomes)
    }
}
