//! AWS S3 SDK wrappers for command output retrieval

use crate::aws::{Error, MAX_OUTPUT_KEYS};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{types::Object, Client as S3Client};

/// Creates an S3 client for the specified AWS region
pub(crate) async fn create_client(region: Region) -> S3Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await;
    S3Client::new(&config)
}

/// Resolves the region a bucket lives in.
///
/// Buckets in us-east-1 report no location constraint.
pub(crate) async fn bucket_region(client: &S3Client, bucket: &str) -> Result<String, Error> {
    let resp = client
        .get_bucket_location()
        .bucket(bucket)
        .send()
        .await
        .map_err(aws_sdk_s3::Error::from)?;
    Ok(resp
        .location_constraint
        .map(|constraint| constraint.as_str().to_string())
        .filter(|region| !region.is_empty())
        .unwrap_or_else(|| "us-east-1".to_string()))
}

/// Lists output objects under a prefix, bounded to [MAX_OUTPUT_KEYS] keys
pub(crate) async fn list_objects(
    client: &S3Client,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<Object>, Error> {
    let resp = client
        .list_objects_v2()
        .bucket(bucket)
        .max_keys(MAX_OUTPUT_KEYS)
        .prefix(prefix)
        .send()
        .await
        .map_err(aws_sdk_s3::Error::from)?;
    Ok(resp.contents.unwrap_or_default())
}

/// Fetches the full content of an object
pub(crate) async fn fetch_object(
    client: &S3Client,
    bucket: &str,
    key: &str,
) -> Result<Vec<u8>, Error> {
    let object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(aws_sdk_s3::Error::from)?;
    let content = object.body.collect().await.map_err(std::io::Error::other)?;
    Ok(content.into_bytes().to_vec())
}
