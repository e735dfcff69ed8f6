//! Optional upload of campaign outputs to S3.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{error, info};

/// Object key for `path`: its file name, under `prefix` when one is set.
pub fn s3_key(prefix: Option<&str>, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/{name}"),
        _ => name.to_string(),
    })
}

/// Uploads one file as-is.
pub async fn upload_file(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    path: &Path,
) -> Result<()> {
    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .send()
        .await
        .with_context(|| format!("uploading s3://{bucket}/{key}"))?;

    Ok(())
}

/// Uploads every file in `files`, logging failures per file. Returns the
/// number uploaded.
#[tracing::instrument(skip(client, files), fields(files = files.len()))]
pub async fn upload_outputs(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: Option<&str>,
    files: &[PathBuf],
) -> usize {
    let mut upload_count = 0;

    for path in files {
        let Some(key) = s3_key(prefix, path) else {
            error!(path = %path.display(), "Output path has no usable file name");
            continue;
        };

        match upload_file(client, bucket, &key, path).await {
            Ok(()) => {
                info!(key = %key, "Uploaded");
                upload_count += 1;
            }
            Err(e) => error!(error = %format!("{e:#}"), key = %key, "Upload failed"),
        }
    }

    info!(upload_count, "S3 upload complete");
    upload_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_key_without_prefix() {
        let key = s3_key(None, Path::new("gtfs_data/date=2024-01-16.csv"));
        assert_eq!(key.as_deref(), Some("date=2024-01-16.csv"));
    }

    #[test]
    fn test_s3_key_trims_prefix_slashes() {
        let key = s3_key(Some("/mta/realtime/"), Path::new("out/combined.csv.gz"));
        assert_eq!(key.as_deref(), Some("mta/realtime/combined.csv.gz"));

        let key = s3_key(Some(""), Path::new("out/combined.csv"));
        assert_eq!(key.as_deref(), Some("combined.csv"));
    }
}
