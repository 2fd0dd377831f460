// 控制端点 HTTP 客户端实现

use crate::api::{
    ApiError, CompleteRequest, CompleteResponse, DirectUploadBody, DirectUploadResponse,
    InitiateRequest, InitiateResponse, PartUrlResponse, UploadApi,
};
use crate::config::ApiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 上传控制端点客户端
#[derive(Debug, Clone)]
pub struct HttpUploadApi {
    /// HTTP客户端
    client: Client,
    /// API 根地址（不含末尾斜杠）
    base_url: String,
    /// Bearer 令牌（由外部认证层提供）
    auth_token: Option<String>,
}

impl HttpUploadApi {
    /// 根据配置创建客户端
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(&config.user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "初始化上传客户端: base_url={}, timeout={}s, 令牌={}",
            config.base_url,
            config.timeout_secs,
            if config.auth_token.is_some() {
                "已设置"
            } else {
                "未设置"
            }
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_endpoint(&self, session_id: &str, action: &str) -> String {
        self.endpoint(&format!(
            "/uploads/multipart/{}/{}",
            urlencoding::encode(session_id),
            action
        ))
    }

    /// 附加认证头（预签名 URL 不需要）
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }
}

/// 检查状态码并解析 JSON 响应体
async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    debug!("{}响应: status={}, body={}", what, status, body);

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{}: {}", what, e)))
}

/// 判断 PUT 失败是否由于预签名 URL 过期
///
/// S3 兼容存储返回 403 AccessDenied，正文含 "Request has expired"
fn is_expired_response(status: u16, body: &str) -> bool {
    status == 403 && body.to_ascii_lowercase().contains("expired")
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn upload_direct(
        &self,
        body: DirectUploadBody,
    ) -> Result<DirectUploadResponse, ApiError> {
        info!(
            "直传文件: name={}, type={}, size={}",
            body.file_name, body.content_type, body.content_length
        );

        let mut query = vec![("fileName", body.file_name.clone())];
        if let Some(lesson_id) = &body.lesson_id {
            query.push(("lessonId", lesson_id.clone()));
        }

        let response = self
            .authorized(self.client.post(self.endpoint("/uploads/direct")))
            .query(&query)
            .header(CONTENT_TYPE, &body.content_type)
            .header(CONTENT_LENGTH, body.content_length)
            .body(Body::wrap_stream(body.stream))
            .send()
            .await?;

        read_json(response, "直传").await
    }

    async fn initiate_multipart(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, ApiError> {
        info!(
            "初始化分片上传: name={}, size={}",
            request.file_name, request.file_size
        );

        let response = self
            .authorized(
                self.client
                    .post(self.endpoint("/uploads/multipart/initiate")),
            )
            .json(request)
            .send()
            .await?;

        let initiated: InitiateResponse = read_json(response, "初始化").await?;
        if initiated.session_id.is_empty() {
            return Err(ApiError::Decode("初始化响应缺少 sessionId".to_string()));
        }
        Ok(initiated)
    }

    async fn part_url(&self, session_id: &str, part_number: u32) -> Result<String, ApiError> {
        let response = self
            .authorized(
                self.client
                    .get(self.session_endpoint(session_id, "part-url")),
            )
            .query(&[("partNumber", part_number)])
            .send()
            .await?;

        let issued: PartUrlResponse = read_json(response, "分片 URL").await?;
        if issued.upload_url.is_empty() {
            return Err(ApiError::Decode("分片 URL 为空".to_string()));
        }
        Ok(issued.upload_url)
    }

    async fn put_part(
        &self,
        upload_url: &str,
        data: Bytes,
        content_md5: &str,
    ) -> Result<String, ApiError> {
        let size = data.len();
        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_LENGTH, size)
            .header("Content-MD5", content_md5)
            .body(data)
            .send()
            .await?;

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_expired_response(status.as_u16(), &body) {
                warn!("预签名 URL 已过期: status={}", status);
                return Err(ApiError::UrlExpired);
            }
            error!("分片 PUT 失败: status={}, body={}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match etag {
            Some(tag) if !tag.is_empty() => {
                debug!("分片 PUT 成功: size={}, etag={}", size, tag);
                Ok(tag)
            }
            _ => Err(ApiError::MissingTag),
        }
    }

    async fn complete_multipart(
        &self,
        session_id: &str,
        request: &CompleteRequest,
    ) -> Result<CompleteResponse, ApiError> {
        info!(
            "合并分片: session={}, parts={}, size={}",
            session_id,
            request.parts.len(),
            request.file_size
        );

        let response = self
            .authorized(
                self.client
                    .post(self.session_endpoint(session_id, "complete")),
            )
            .json(request)
            .send()
            .await?;

        read_json(response, "合并").await
    }

    async fn abort_multipart(&self, session_id: &str) -> Result<(), ApiError> {
        let response = self
            .authorized(self.client.post(self.session_endpoint(session_id, "abort")))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
