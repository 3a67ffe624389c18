//! AWS S3 duplicate store.
//!
//! Each destination has a single JSON object at
//! `{prefix}/delivered/{destination}.json` holding its delivery records.
//! Recording a posting rewrites the whole object.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::DeliveryRecord;
use crate::storage::DuplicateStore;
use crate::utils::partition_name;

/// S3-backed duplicate store.
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
    partitions: Mutex<HashMap<String, Vec<DeliveryRecord>>>,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// Create S3 storage from environment configuration.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("S3_BUCKET")
            .map_err(|_| AppError::config("S3_BUCKET is not set"))?;
        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "jobwatch".to_string());

        Ok(Self::new(client, bucket, prefix))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn partition_key(&self, destination_id: &str) -> String {
        format!(
            "{}/delivered/{}.json",
            self.prefix.trim_end_matches('/'),
            partition_name(destination_id)
        )
    }

    fn list_prefix(&self) -> String {
        format!("{}/delivered/", self.prefix.trim_end_matches('/'))
    }

    /// Read an object, returning None if the key does not exist.
    pub async fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::S3(e.to_string()))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::debug!("No object at s3://{}/{}", self.bucket, key);
                    Ok(None)
                } else {
                    Err(AppError::S3(service_err.to_string()))
                }
            }
        }
    }

    async fn write_records(&self, key: &str, records: &[DeliveryRecord]) -> Result<()> {
        let json = serde_json::to_vec(records)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(json))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::S3(e.to_string()))?;

        log::debug!(
            "Wrote {} records to s3://{}/{}",
            records.len(),
            self.bucket,
            key
        );
        Ok(())
    }

    async fn read_records(&self, key: &str) -> Result<Vec<DeliveryRecord>> {
        match self.read_object(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn partition_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.list_prefix())
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| AppError::S3(e.to_string()))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(".json"))
                    .map(str::to_string),
            );
        }
        Ok(keys)
    }
}

#[async_trait]
impl DuplicateStore for S3Storage {
    async fn contains(&self, destination_id: &str, posting_id: &str) -> Result<bool> {
        let mut partitions = self.partitions.lock().await;
        if !partitions.contains_key(destination_id) {
            let records = self
                .read_records(&self.partition_key(destination_id))
                .await
                .map_err(AppError::store)?;
            partitions.insert(destination_id.to_string(), records);
        }
        Ok(partitions
            .get(destination_id)
            .is_some_and(|records| records.iter().any(|r| r.posting_id == posting_id)))
    }

    async fn record(&self, destination_id: &str, posting_id: &str) -> Result<()> {
        let key = self.partition_key(destination_id);
        let mut partitions = self.partitions.lock().await;
        if !partitions.contains_key(destination_id) {
            let records = self.read_records(&key).await.map_err(AppError::store)?;
            partitions.insert(destination_id.to_string(), records);
        }
        let Some(records) = partitions.get_mut(destination_id) else {
            return Err(AppError::store("partition vanished"));
        };
        if records.iter().any(|r| r.posting_id == posting_id) {
            return Ok(());
        }

        let mut updated = records.clone();
        updated.push(DeliveryRecord::now(destination_id, posting_id));
        self.write_records(&key, &updated)
            .await
            .map_err(AppError::store)?;
        *records = updated;
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut partitions = self.partitions.lock().await;
        let mut removed = 0;

        for key in self.partition_keys().await? {
            let records = self.read_records(&key).await?;
            let total = records.len();
            let kept: Vec<_> = records
                .into_iter()
                .filter(|r| r.delivered_at >= cutoff)
                .collect();
            if kept.len() < total {
                removed += total - kept.len();
                self.write_records(&key, &kept).await?;
            }
        }

        partitions.clear();
        if removed > 0 {
            log::info!("Pruned {} records from s3://{}", removed, self.bucket);
        }
        Ok(removed)
    }
}
