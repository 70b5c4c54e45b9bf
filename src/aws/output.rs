//! `output` subcommand: fetches persisted invocation output from S3 and logs
//! it in bounded chunks

use crate::aws::{s3, Clients, Error, OutputConfig, Region, MAX_LOG_CHUNK};
use aws_sdk_s3::Client as S3Client;
use tracing::{error, info};

/// Fetches and logs the persisted output of an existing command
pub async fn output(
    command_id: &str,
    bucket: &str,
    prefix: Option<String>,
    region: Option<String>,
) -> Result<(), Error> {
    let clients = Clients::from_env(region).await;
    let output = OutputConfig {
        bucket: bucket.to_string(),
        prefix,
    };
    collect_command_output(&clients.s3, command_id, &output).await
}

/// Fetches every output object persisted for a command and logs its content.
///
/// Objects are read through a client scoped to the bucket's own region. A
/// failed object fetch skips that object; region lookup and listing failures
/// abort.
pub(crate) async fn collect_command_output(
    client: &S3Client,
    command_id: &str,
    output: &OutputConfig,
) -> Result<(), Error> {
    let region = s3::bucket_region(client, &output.bucket).await?;
    let bucket_client = s3::create_client(Region::new(region)).await;

    let prefix = output_key_prefix(output.prefix.as_deref(), command_id);
    let objects = s3::list_objects(&bucket_client, &output.bucket, &prefix).await?;
    info!(
        bucket = output.bucket.as_str(),
        prefix = prefix.as_str(),
        objects = objects.len(),
        "listed command output"
    );
    for object in objects {
        let Some(key) = object.key else {
            continue;
        };
        match s3::fetch_object(&bucket_client, &output.bucket, &key).await {
            Ok(content) => log_output(&key, &content),
            Err(error) => {
                error!(key = key.as_str(), error = %error, "failed to fetch output object")
            }
        }
    }
    Ok(())
}

/// Key prefix under which a command's output objects are persisted
fn output_key_prefix(prefix: Option<&str>, command_id: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}/{command_id}"),
        None => command_id.to_string(),
    }
}

/// Logs object content in chunks small enough for a single log line
fn log_output(key: &str, content: &[u8]) {
    info!(key, "command output follows");
    for chunk in split_chunks(content, MAX_LOG_CHUNK) {
        info!("{}", String::from_utf8_lossy(chunk));
    }
}

/// Splits content into full-size chunks plus a final remainder chunk.
///
/// The remainder is always emitted, even when empty, so every object produces
/// at least one content line.
fn split_chunks(content: &[u8], max: usize) -> Vec<&[u8]> {
    let full = content.len() / max;
    let mut chunks = Vec::with_capacity(full + 1);
    for i in 0..full {
        chunks.push(&content[i * max..(i + 1) * max]);
    }
    chunks.push(&content[full * max..]);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chunks_exact_multiple() {
        let content = vec![0u8; 2 * MAX_LOG_CHUNK];
        let chunks = split_chunks(&content, MAX_LOG_CHUNK);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_LOG_CHUNK);
        assert_eq!(chunks[1].len(), MAX_LOG_CHUNK);
        assert!(chunks[2].is_empty());
    }

    #[test]
    fn test_split_chunks_remainder() {
        let content = vec![7u8; MAX_LOG_CHUNK + 100];
        let chunks = split_chunks(&content, MAX_LOG_CHUNK);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), MAX_LOG_CHUNK);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks.concat(), content);
    }

    #[test]
    fn test_split_chunks_under_limit() {
        let chunks = split_chunks(b"hello", MAX_LOG_CHUNK);
        assert_eq!(chunks, [b"hello".as_slice()]);
    }

    #[test]
    fn test_split_chunks_empty() {
        let chunks = split_chunks(&[], MAX_LOG_CHUNK);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_split_chunks_small_limit() {
        let chunks = split_chunks(b"hello", 2);
        assert_eq!(chunks, [b"he".as_slice(), b"ll", b"o"]);
    }

    #[test]
    fn test_output_key_prefix() {
        assert_eq!(output_key_prefix(None, "abc-123"), "abc-123");
        assert_eq!(output_key_prefix(Some("runs"), "abc-123"), "runs/abc-123");
    }
}
