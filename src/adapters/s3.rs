//! `BlobSink` backed by `aws-sdk-s3`.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::collaborators::BlobSink;
use crate::error::{IngestError, Result};

pub struct S3BlobSink {
    client: Client,
    bucket: String,
}

impl S3BlobSink {
    pub async fn new(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: Client::new(&config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobSink for S3BlobSink {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| IngestError::Flush(e.to_string()))?;
        Ok(())
    }
}
