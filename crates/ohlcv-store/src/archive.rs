//! Cold 아카이브 클라이언트 (S3 호환 오브젝트 스토어).
//!
//! 오브젝트 키는 Warm 디스크 레이아웃과 1:1로 대응합니다:
//! `{symbol_lowercase}/{interval}/{YYYY-MM}/data`.
//! Cloudflare R2는 `endpoint`와 `region = "auto"`로 설정합니다.

use crate::config::ArchiveConfig;
use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, GetOptions, ObjectStore, PutOptions,
    PutPayload,
};
use ohlcv_core::PartitionKey;
use secrecy::ExposeSecret;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// 아카이브에 있는 오브젝트.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedObject {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// 오브젝트 메타데이터 (HEAD 결과).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// 업로드 시 붙인 사용자 메타데이터
    pub metadata: BTreeMap<String, String>,
}

/// Cold 아카이브 클라이언트.
#[derive(Debug, Clone)]
pub struct ColdArchive {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    public_base: Option<Url>,
    url_prefix: String,
}

impl ColdArchive {
    /// 임의의 오브젝트 스토어로 아카이브를 만듭니다.
    ///
    /// `url_prefix`는 쿼리 엔진에 등록할 때 쓰는 소스 접두사입니다 (예: `s3://bucket/`).
    pub fn new(store: Arc<dyn ObjectStore>, url_prefix: impl Into<String>) -> Self {
        let mut url_prefix = url_prefix.into();
        if !url_prefix.ends_with('/') {
            url_prefix.push('/');
        }
        Self {
            store,
            signer: None,
            public_base: None,
            url_prefix,
        }
    }

    /// 설정으로 S3 호환 아카이브를 만듭니다.
    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        let options = ClientOptions::new()
            .with_timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .with_allow_http(config.allow_http);

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(config.secret_access_key.expose_secret())
            .with_client_options(options);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::object_store(config.bucket.as_str(), e))?,
        );

        info!(
            bucket = %config.bucket,
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            "Cold 아카이브 클라이언트 초기화"
        );

        let archive = Self::new(s3.clone(), format!("s3://{}/", config.bucket)).with_signer(s3);
        match &config.public_url {
            Some(base) => archive.with_public_url(base),
            None => Ok(archive),
        }
    }

    /// presigned URL 서명자를 설정합니다.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// 공개 URL 접두사를 설정합니다.
    pub fn with_public_url(mut self, base: &str) -> Result<Self> {
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let url = Url::parse(&normalized)
            .map_err(|e| StorageError::Config(format!("invalid public_url {}: {}", base, e)))?;
        self.public_base = Some(url);
        Ok(self)
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// 파티션의 오브젝트 키.
    pub fn object_key(key: &PartitionKey) -> String {
        key.relative_path()
    }

    /// 쿼리 엔진 소스로 쓸 수 있는 오브젝트 위치.
    pub fn source_for(&self, key: &PartitionKey) -> String {
        format!("{}{}", self.url_prefix, Self::object_key(key))
    }

    /// 로컬 파일을 업로드합니다. 같은 키가 있으면 덮어씁니다. 업로드한 바이트 수를 반환합니다.
    #[instrument(skip(self, metadata), fields(local = %local.display()))]
    pub async fn upload(
        &self,
        local: &Path,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<u64> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| StorageError::io(format!("read {}", local.display()), e))?;
        let size = bytes.len() as u64;

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(PARQUET_CONTENT_TYPE),
        );
        for (k, v) in metadata {
            attributes.insert(
                Attribute::Metadata(Cow::Owned(k.clone())),
                AttributeValue::from(v.clone()),
            );
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&ObjectPath::from(key), PutPayload::from(bytes), options)
            .await
            .map_err(|e| StorageError::object_store(key, e))?;

        info!(key = key, size = size, "아카이브 업로드 완료");
        Ok(size)
    }

    /// 오브젝트를 로컬 파일로 내려받습니다 (임시 파일에 받은 뒤 rename).
    #[instrument(skip(self), fields(local = %local.display()))]
    pub async fn download(&self, key: &str, local: &Path) -> Result<u64> {
        let result = self
            .store
            .get(&ObjectPath::from(key))
            .await
            .map_err(|e| StorageError::object_store(key, e))?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(format!("create {}", parent.display()), e))?;
        }

        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let tmp = local.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        let written = async {
            let context = || format!("download {} -> {}", key, tmp.display());
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| StorageError::io(context(), e))?;
            let mut stream = result.into_stream();
            let mut size = 0u64;
            while let Some(chunk) = stream
                .try_next()
                .await
                .map_err(|e| StorageError::object_store(key, e))?
            {
                size += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| StorageError::io(context(), e))?;
            }
            file.sync_all().await.map_err(|e| StorageError::io(context(), e))?;
            tokio::fs::rename(&tmp, local)
                .await
                .map_err(|e| StorageError::io(context(), e))?;
            Ok::<u64, StorageError>(size)
        }
        .await;

        match written {
            Ok(size) => {
                info!(key = key, size = size, "아카이브 다운로드 완료");
                Ok(size)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    /// 접두사 아래의 오브젝트 목록 (키 오름차순).
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<ArchivedObject>> {
        let prefix = prefix.map(ObjectPath::from);
        let metas: Vec<_> = self
            .store
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| StorageError::object_store(self.url_prefix.as_str(), e))?;

        let mut objects: Vec<ArchivedObject> = metas
            .into_iter()
            .map(|meta| ArchivedObject {
                key: meta.location.to_string(),
                size: meta.size as u64,
                modified: meta.last_modified,
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::object_store(key, e)),
        }
    }

    /// 오브젝트를 삭제합니다. 없으면 `false`.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }
        self.store
            .delete(&ObjectPath::from(key))
            .await
            .map_err(|e| StorageError::object_store(key, e))?;
        debug!(key = key, "아카이브 오브젝트 삭제");
        Ok(true)
    }

    /// 접두사 아래의 모든 오브젝트를 삭제합니다. 삭제한 개수를 반환합니다.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let objects = self.list(Some(prefix)).await?;
        for object in &objects {
            self.store
                .delete(&ObjectPath::from(object.key.as_str()))
                .await
                .map_err(|e| StorageError::object_store(object.key.as_str(), e))?;
        }
        info!(prefix = prefix, deleted = objects.len(), "아카이브 접두사 삭제");
        Ok(objects.len())
    }

    /// 오브젝트 메타데이터. 없으면 `None`.
    pub async fn metadata(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = match self.store.get_opts(&ObjectPath::from(key), options).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(StorageError::object_store(key, e)),
        };

        let metadata = result
            .attributes
            .iter()
            .filter_map(|(attr, value)| match attr {
                Attribute::Metadata(name) => {
                    let value: &str = value.as_ref();
                    Some((name.to_string(), value.to_string()))
                }
                _ => None,
            })
            .collect();

        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: result.meta.size as u64,
            modified: result.meta.last_modified,
            metadata,
        }))
    }

    /// 공개 URL. `public_url`이 설정되지 않았으면 설정 오류입니다.
    pub fn public_url(&self, key: &str) -> Result<Url> {
        let base = self
            .public_base
            .as_ref()
            .ok_or_else(|| StorageError::Config("archive public_url is not configured".into()))?;
        base.join(key.trim_start_matches('/'))
            .map_err(|e| StorageError::Config(format!("invalid object key {}: {}", key, e)))
    }

    /// 만료 시간이 있는 GET용 서명 URL.
    pub async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<Url> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| StorageError::Config("archive has no URL signer".into()))?;
        signer
            .signed_url(reqwest::Method::GET, &ObjectPath::from(key), ttl)
            .await
            .map_err(|e| StorageError::object_store(key, e))
    }
}
