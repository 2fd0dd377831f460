// 对象存储控制端点模块
//
// 上传编排器只依赖 UploadApi trait：
// - HttpUploadApi：基于 reqwest 的真实实现
// - 测试中使用内存实现模拟存储端

pub mod client;
pub mod types;

pub use client::HttpUploadApi;
pub use types::{
    ApiError, ByteStream, CompleteRequest, CompleteResponse, CompletedPart, DirectUploadBody,
    DirectUploadResponse, InitiateRequest, InitiateResponse, PartUrlResponse,
};

use async_trait::async_trait;
use bytes::Bytes;

/// 对象存储控制端点
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// `POST /uploads/direct`
    async fn upload_direct(&self, body: DirectUploadBody)
        -> Result<DirectUploadResponse, ApiError>;

    /// `POST /uploads/multipart/initiate`
    async fn initiate_multipart(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, ApiError>;

    /// `GET /uploads/multipart/{sessionId}/part-url?partNumber=N`
    ///
    /// 返回的 URL 只能使用一次
    async fn part_url(&self, session_id: &str, part_number: u32) -> Result<String, ApiError>;

    /// `PUT {uploadUrl}`，返回存储端分配的完整性标签
    async fn put_part(
        &self,
        upload_url: &str,
        data: Bytes,
        content_md5: &str,
    ) -> Result<String, ApiError>;

    /// `POST /uploads/multipart/{sessionId}/complete`
    async fn complete_multipart(
        &self,
        session_id: &str,
        request: &CompleteRequest,
    ) -> Result<CompleteResponse, ApiError>;

    /// `POST /uploads/multipart/{sessionId}/abort`
    async fn abort_multipart(&self, session_id: &str) -> Result<(), ApiError>;
}
