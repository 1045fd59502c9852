//! S3-compatible object storage
//!
//! Objects are keyed `<root_folder>/<folder path>/<file stem>` and exposed via
//! public URLs. Keys are never overwritten: writes are create-only
//! (`If-None-Match: *`) and a taken key moves on to `_1`, `_2`, ...

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode, Url};
use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{StorageBackend, StoredObject};
use crate::core::config::ObjectStorageConfig;
use crate::core::error::{AppError, Result};
use crate::shared::paths::{file_stem, join_location, normalize_location};

type HmacSha256 = Hmac<Sha256>;

const MAX_KEY_ATTEMPTS: u32 = 10_000;

pub struct ObjectStorage {
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
    config: ObjectStorageConfig,
    http_client: Client,
}

impl ObjectStorage {
    /// Build the client without touching the network
    pub fn new(config: ObjectStorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| AppError::Internal(format!("Failed to create storage credentials: {}", e)))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let mut bucket = Bucket::new(&config.bucket, region.clone(), credentials.clone())
            .map_err(|e| AppError::Internal(format!("Failed to create bucket handle: {}", e)))?;

        // MinIO expects http://endpoint/bucket rather than http://bucket.endpoint
        bucket.set_path_style();

        let http_client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            bucket,
            region,
            credentials,
            config,
            http_client,
        })
    }

    /// Build the client, create the bucket if needed and open the root folder
    /// for public reads
    pub async fn connect(config: ObjectStorageConfig) -> Result<Self> {
        let storage = Self::new(config)?;
        storage.ensure_bucket_exists().await;
        storage.set_public_read_policy().await;

        info!(
            "Object storage initialized for endpoint: {}, bucket: {}, root folder: {}",
            storage.config.endpoint,
            storage.bucket.name(),
            storage.config.root_folder
        );
        Ok(storage)
    }

    async fn ensure_bucket_exists(&self) {
        let created = Bucket::create_with_path_style(
            &self.bucket.name(),
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await;

        match created {
            Ok(_) => info!("Bucket '{}' created", self.bucket.name()),
            Err(e) => {
                let message = e.to_string();
                if message.contains("BucketAlreadyOwnedByYou")
                    || message.contains("BucketAlreadyExists")
                    || message.contains("already own it")
                {
                    debug!("Bucket '{}' already exists", self.bucket.name());
                } else {
                    warn!(
                        "Could not create bucket '{}': {}. Assuming it exists.",
                        self.bucket.name(),
                        e
                    );
                }
            }
        }
    }

    async fn set_public_read_policy(&self) {
        let bucket_name = self.bucket.name();
        let root_folder = &self.config.root_folder;
        let policy = json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Principal": {"AWS": "*"},
                    "Action": ["s3:GetObject"],
                    "Resource": [format!("arn:aws:s3:::{bucket_name}/{root_folder}/*")]
                }
            ]
        })
        .to_string();

        match self.put_bucket_policy(&bucket_name, &policy).await {
            Ok(()) => info!("Set public read policy for {}/{}/*", bucket_name, root_folder),
            Err(e) => warn!(
                "Failed to set bucket policy for '{}': {}. Set it manually with: \
                mc anonymous set download <alias>/{}/{}",
                bucket_name, e, bucket_name, root_folder
            ),
        }
    }

    /// PUT ?policy signed with AWS Signature v4
    async fn put_bucket_policy(&self, bucket_name: &str, policy: &str) -> Result<()> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let host_header = self.host_header()?;
        let payload_hash = hex::encode(Sha256::digest(policy.as_bytes()));

        let authorization = self.authorization(
            &SignedRequest {
                method: "PUT",
                canonical_uri: &format!("/{}", bucket_name),
                canonical_query: "policy=",
                headers: &[
                    ("host", host_header.as_str()),
                    ("x-amz-content-sha256", payload_hash.as_str()),
                    ("x-amz-date", amz_date.as_str()),
                ],
                payload_hash: &payload_hash,
            },
            &now.format("%Y%m%d").to_string(),
            &amz_date,
        )?;

        let response = self
            .http_client
            .put(format!("{}/{}?policy", self.config.endpoint, bucket_name))
            .header("Host", &host_header)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("Authorization", &authorization)
            .header("Content-Type", "application/json")
            .body(policy.to_string())
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Failed to send policy request: {}", e)))?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::Storage(format!(
            "Failed to set bucket policy: {} - {}",
            status, body
        )))
    }

    fn host_header(&self) -> Result<String> {
        let endpoint = Url::parse(&self.config.endpoint)
            .map_err(|e| AppError::Internal(format!("Invalid endpoint URL: {}", e)))?;
        let host = endpoint
            .host_str()
            .ok_or_else(|| AppError::Internal("Endpoint URL has no host".to_string()))?;
        Ok(match endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// `Authorization` header value for a request signed with AWS Signature v4
    fn authorization(
        &self,
        request: &SignedRequest<'_>,
        date_stamp: &str,
        amz_date: &str,
    ) -> Result<String> {
        let signed_headers = request
            .headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = request
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method,
            request.canonical_uri,
            request.canonical_query,
            canonical_headers,
            signed_headers,
            request.payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signature = self.sign(date_stamp, &string_to_sign)?;
        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key, credential_scope, signed_headers, signature
        ))
    }

    fn sign(&self, date_stamp: &str, string_to_sign: &str) -> Result<String> {
        let secret = format!("AWS4{}", self.config.secret_key);
        let mut key = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes())?;
        for part in [
            self.config.region.as_bytes(),
            b"s3".as_slice(),
            b"aws4_request".as_slice(),
        ] {
            key = hmac_sha256(&key, part)?;
        }
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.public_endpoint,
            self.bucket.name(),
            key
        )
    }

    /// Object key following the `/<bucket>/` marker of a stored URL
    fn key_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        let marker = format!("/{}/", self.bucket.name());
        url.find(&marker)
            .map(|idx| &url[idx + marker.len()..])
            .filter(|key| !key.is_empty())
    }

    /// Key for a destination location: folder path plus file stem
    fn base_key(&self, destination: &str) -> Result<String> {
        let normalized = normalize_location(destination);
        let root = &self.config.root_folder;
        let inside = normalized
            .strip_prefix(root.as_str())
            .is_some_and(|rest| rest.starts_with('/'));
        if !inside || normalized.split('/').any(|part| part == "..") {
            return Err(AppError::Security(format!(
                "Location '{}' is outside the storage root folder",
                destination
            )));
        }

        let (folder, name) = normalized
            .rsplit_once('/')
            .ok_or_else(|| AppError::BadRequest(format!("'{}' has no file name", destination)))?;
        Ok(join_location(folder, file_stem(name)))
    }

    /// Path-style request path with every key segment URI-encoded
    fn object_path(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}/{}", self.bucket.name(), encoded)
    }

    /// Create-only PUT. Returns `false` when the key already holds an object.
    async fn create_object(&self, key: String, data: &[u8], content_type: &str) -> Result<bool> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let host_header = self.host_header()?;
        let payload_hash = hex::encode(Sha256::digest(data));
        let path = self.object_path(&key);

        let authorization = self.authorization(
            &SignedRequest {
                method: "PUT",
                canonical_uri: &path,
                canonical_query: "",
                headers: &[
                    ("content-type", content_type),
                    ("host", host_header.as_str()),
                    ("if-none-match", "*"),
                    ("x-amz-content-sha256", payload_hash.as_str()),
                    ("x-amz-date", amz_date.as_str()),
                ],
                payload_hash: &payload_hash,
            },
            &now.format("%Y%m%d").to_string(),
            &amz_date,
        )?;

        let response = self
            .http_client
            .put(format!("{}{}", self.config.endpoint, path))
            .header("Host", &host_header)
            .header("Content-Type", content_type)
            .header("If-None-Match", "*")
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("Authorization", &authorization)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| AppError::Network(format!("Failed to upload '{}': {}", key, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("Uploaded '{}' to bucket '{}'", key, self.bucket.name());
            return Ok(true);
        }
        // 409 is what some servers answer while a competing write is in flight
        if status == StatusCode::PRECONDITION_FAILED || status == StatusCode::CONFLICT {
            debug!("Key '{}' is taken ({})", key, status);
            return Ok(false);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::Storage(format!(
            "Failed to upload '{}': {} - {}",
            key, status, body
        )))
    }

    fn require_key<'a>(&self, url: &'a str) -> Result<&'a str> {
        self.key_from_url(url).ok_or_else(|| {
            AppError::Storage(format!(
                "'{}' is not an object in bucket '{}'",
                url,
                self.bucket.name()
            ))
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Inputs to a Signature v4 canonical request; headers sorted by lowercase name
struct SignedRequest<'a> {
    method: &'a str,
    canonical_uri: &'a str,
    canonical_query: &'a str,
    headers: &'a [(&'a str, &'a str)],
    payload_hash: &'a str,
}

/// `base`, then `base_1`, `base_2`, ...
fn candidate_key(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}_{}", base, attempt)
    }
}

/// First candidate key that `create` manages to write without overwriting
async fn claim_key<F, Fut>(base: &str, mut create: F) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 0..MAX_KEY_ATTEMPTS {
        let key = candidate_key(base, attempt);
        if create(key.clone()).await? {
            return Ok(key);
        }
    }
    Err(AppError::Storage(format!("No free key for '{}'", base)))
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn folder_location(&self, relative: &str) -> String {
        join_location(&self.config.root_folder, relative.trim_matches('/'))
    }

    async fn ensure_folder(&self, _location: &str) -> Result<()> {
        Ok(())
    }

    async fn save(
        &self,
        source: &Path,
        destination: &str,
        mime_type: &str,
    ) -> Result<StoredObject> {
        let base = self.base_key(destination)?;
        let data = tokio::fs::read(source).await.map_err(|e| {
            AppError::Storage(format!("Failed to read {}: {}", source.display(), e))
        })?;

        let key = claim_key(&base, |key| self.create_object(key, &data, mime_type)).await?;

        Ok(StoredObject {
            location: self.public_url(&key),
            size_bytes: data.len() as i64,
            compressed: false,
        })
    }

    async fn read(&self, location: &str, _compressed: bool) -> Result<Vec<u8>> {
        let key = self.require_key(location)?;
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to download '{}': {}", key, e)))?;
        Ok(response.to_vec())
    }

    async fn delete(&self, location: &str, _recycle: bool) -> Result<bool> {
        let Some(key) = self.key_from_url(location) else {
            warn!("'{}' does not point into bucket '{}'", location, self.bucket.name());
            return Ok(false);
        };

        match self.bucket.delete_object(key).await {
            Ok(response) => {
                let status = response.status_code();
                debug!("Delete of '{}' answered {}", key, status);
                Ok(status == 200 || status == 204)
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("404") || message.contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(AppError::Storage(format!("Failed to delete '{}': {}", key, e)))
                }
            }
        }
    }

    async fn relocate(
        &self,
        location: &str,
        destination: &str,
        compressed: bool,
    ) -> Result<StoredObject> {
        let old_key = self.require_key(location)?.to_string();
        let data = self.read(location, compressed).await?;
        let base = self.base_key(destination)?;
        let content_type = mime_guess::from_path(destination)
            .first_or_octet_stream()
            .to_string();

        let new_key = claim_key(&base, |key| self.create_object(key, &data, &content_type)).await?;
        if !self.delete(location, false).await? {
            warn!("Old object '{}' was already gone after relocation", old_key);
        }

        Ok(StoredObject {
            location: self.public_url(&new_key),
            size_bytes: data.len() as i64,
            compressed: false,
        })
    }

    async fn rename_folder(&self, old_location: &str, new_location: &str) -> Result<()> {
        // Keys are immutable and existing URLs stay valid
        debug!(
            "Object storage keeps keys under '{}' when renaming to '{}'",
            old_location, new_location
        );
        Ok(())
    }

    async fn remove_folder(&self, _location: &str) -> Result<()> {
        Ok(())
    }

    async fn thumbnail_reference(
        &self,
        location: &str,
        _compressed: bool,
        max_width: u32,
        max_height: u32,
    ) -> Result<String> {
        let proxy = self.config.image_proxy_url.as_deref().ok_or_else(|| {
            AppError::Storage("No image proxy is configured for thumbnails".to_string())
        })?;
        Ok(format!(
            "{}/insecure/rs:fit:{}:{}/plain/{}",
            proxy,
            max_width,
            max_height,
            urlencoding::encode(location)
        ))
    }
}
