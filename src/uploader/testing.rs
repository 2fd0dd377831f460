// 测试用内存存储端
//
// 实现 UploadApi，记录所有调用，并可按分片注入故障

use crate::api::{
    ApiError, CompleteRequest, CompleteResponse, DirectUploadBody, DirectUploadResponse,
    InitiateRequest, InitiateResponse, UploadApi,
};
use crate::uploader::part::content_md5;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// 可注入的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 申请 URL 返回该状态码
    UrlStatus(u16),
    /// PUT 返回该状态码
    PutStatus(u16),
    /// PUT 成功但没有 ETag
    MissingTag,
    /// PUT 报告 URL 已过期
    Expired,
    /// PUT 挂起直到被取消
    Hang,
}

#[derive(Default)]
struct State {
    /// part_number -> (故障, 剩余次数)
    faults: HashMap<u32, (Fault, u32)>,
    url_requests: Vec<u32>,
    put_attempts: HashMap<u32, u32>,
    stored: HashMap<u32, Bytes>,
    tags: HashMap<u32, String>,
    initiate_calls: Vec<InitiateRequest>,
    complete_calls: Vec<CompleteRequest>,
    abort_calls: Vec<String>,
    direct_calls: Vec<(String, Bytes)>,
    /// 直传故障（状态码, 剩余次数）
    direct_fault: Option<(u16, u32)>,
    initiate_fault: Option<u16>,
    complete_fault: Option<u16>,
    abort_fault: Option<u16>,
    chunk_size: Option<u64>,
    url_counter: u64,
}

pub struct FakeStore {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    put_delay: Mutex<Option<Duration>>,
    hang_started: Notify,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            put_delay: Mutex::new(None),
            hang_started: Notify::new(),
        })
    }

    /// 为指定分片注入故障，生效 times 次
    pub fn inject(&self, part_number: u32, fault: Fault, times: u32) {
        self.state.lock().faults.insert(part_number, (fault, times));
    }

    pub fn fail_direct(&self, status: u16, times: u32) {
        self.state.lock().direct_fault = Some((status, times));
    }

    pub fn fail_initiate(&self, status: u16) {
        self.state.lock().initiate_fault = Some(status);
    }

    pub fn fail_complete(&self, status: u16) {
        self.state.lock().complete_fault = Some(status);
    }

    pub fn fail_abort(&self, status: u16) {
        self.state.lock().abort_fault = Some(status);
    }

    /// 初始化响应中携带的分片大小
    pub fn set_chunk_size(&self, chunk_size: u64) {
        self.state.lock().chunk_size = Some(chunk_size);
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock() = Some(delay);
    }

    /// 等待某个 PUT 进入挂起状态
    pub async fn wait_hang(&self) {
        self.hang_started.notified().await;
    }

    pub fn url_requests(&self) -> Vec<u32> {
        self.state.lock().url_requests.clone()
    }

    pub fn put_attempts(&self, part_number: u32) -> u32 {
        self.state
            .lock()
            .put_attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    pub fn stored_part(&self, part_number: u32) -> Option<Bytes> {
        self.state.lock().stored.get(&part_number).cloned()
    }

    pub fn initiate_calls(&self) -> Vec<InitiateRequest> {
        self.state.lock().initiate_calls.clone()
    }

    pub fn complete_calls(&self) -> Vec<CompleteRequest> {
        self.state.lock().complete_calls.clone()
    }

    pub fn abort_calls(&self) -> Vec<String> {
        self.state.lock().abort_calls.clone()
    }

    pub fn direct_calls(&self) -> Vec<(String, Bytes)> {
        self.state.lock().direct_calls.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 取出一次故障（次数减一）
    fn take_fault(&self, part_number: u32) -> Option<Fault> {
        let mut state = self.state.lock();
        match state.faults.get_mut(&part_number) {
            Some((fault, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*fault)
            }
            _ => None,
        }
    }

    fn status(status: u16) -> ApiError {
        ApiError::Status {
            status,
            body: "injected".to_string(),
        }
    }
}

/// URL 格式: fake://{session}/{part}/{n}
fn parse_part_number(url: &str) -> Option<u32> {
    url.strip_prefix("fake://")?.split('/').nth(1)?.parse().ok()
}

#[async_trait]
impl UploadApi for FakeStore {
    async fn upload_direct(
        &self,
        mut body: DirectUploadBody,
    ) -> Result<DirectUploadResponse, ApiError> {
        // 像真实传输层一样逐块消费请求体
        let mut received = BytesMut::new();
        while let Some(chunk) = body.stream.next().await {
            received.extend_from_slice(&chunk?);
        }

        let mut state = self.state.lock();
        state
            .direct_calls
            .push((body.content_type.clone(), received.clone().freeze()));

        if let Some((status, remaining)) = state.direct_fault.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Self::status(*status));
            }
        }

        Ok(DirectUploadResponse {
            storage_key: format!("direct/{}", body.file_name),
            size: received.len() as u64,
        })
    }

    async fn initiate_multipart(
        &self,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, ApiError> {
        let mut state = self.state.lock();
        state.initiate_calls.push(request.clone());
        if let Some(status) = state.initiate_fault {
            return Err(Self::status(status));
        }
        Ok(InitiateResponse {
            session_id: "sess-1".to_string(),
            storage_key: format!(
                "lessons/{}/{}",
                request.lesson_id.as_deref().unwrap_or("none"),
                request.file_name
            ),
            chunk_size: state.chunk_size,
        })
    }

    async fn part_url(&self, session_id: &str, part_number: u32) -> Result<String, ApiError> {
        {
            let mut state = self.state.lock();
            state.url_requests.push(part_number);
        }
        if let Some(Fault::UrlStatus(status)) = self.take_fault_if(part_number, |f| {
            matches!(f, Fault::UrlStatus(_))
        }) {
            return Err(Self::status(status));
        }

        let mut state = self.state.lock();
        state.url_counter += 1;
        Ok(format!(
            "fake://{}/{}/{}",
            session_id, part_number, state.url_counter
        ))
    }

    async fn put_part(
        &self,
        upload_url: &str,
        data: Bytes,
        content_md5_header: &str,
    ) -> Result<String, ApiError> {
        let part_number = parse_part_number(upload_url)
            .ok_or_else(|| ApiError::Decode(format!("bad url {}", upload_url)))?;

        *self
            .state
            .lock()
            .put_attempts
            .entry(part_number)
            .or_insert(0) += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.take_fault_if(part_number, |f| !matches!(f, Fault::UrlStatus(_))) {
            Some(Fault::PutStatus(status)) => return Err(Self::status(status)),
            Some(Fault::Expired) => return Err(ApiError::UrlExpired),
            Some(Fault::MissingTag) => return Err(ApiError::MissingTag),
            Some(Fault::Hang) => {
                self.hang_started.notify_one();
                std::future::pending::<()>().await;
            }
            _ => {}
        }

        if content_md5(&data) != content_md5_header {
            return Err(ApiError::Status {
                status: 400,
                body: "BadDigest".to_string(),
            });
        }

        let tag = format!("etag-{}-{}", part_number, &content_md5_header[..8]);
        let mut state = self.state.lock();
        state.stored.insert(part_number, data);
        state.tags.insert(part_number, tag.clone());
        Ok(tag)
    }

    async fn complete_multipart(
        &self,
        session_id: &str,
        request: &CompleteRequest,
    ) -> Result<CompleteResponse, ApiError> {
        let mut state = self.state.lock();
        state.complete_calls.push(request.clone());
        if let Some(status) = state.complete_fault {
            return Err(Self::status(status));
        }

        // 与真实存储一致：分片必须按序且标签匹配
        for (i, part) in request.parts.iter().enumerate() {
            let expected = state.tags.get(&part.part_number);
            if part.part_number as usize != i + 1 || expected != Some(&part.integrity_tag) {
                return Err(ApiError::Status {
                    status: 400,
                    body: format!("InvalidPart {} in {}", part.part_number, session_id),
                });
            }
        }

        Ok(CompleteResponse {
            storage_key: request.storage_key.clone(),
            size: request.file_size,
            finalized_at: chrono::Utc::now(),
        })
    }

    async fn abort_multipart(&self, session_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.abort_calls.push(session_id.to_string());
        match state.abort_fault {
            Some(status) => Err(Self::status(status)),
            None => Ok(()),
        }
    }
}

impl FakeStore {
    /// 只取出满足条件的故障
    fn take_fault_if(&self, part_number: u32, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let matches = {
            let state = self.state.lock();
            state
                .faults
                .get(&part_number)
                .map(|(fault, remaining)| *remaining > 0 && pred(fault))
                .unwrap_or(false)
        };
        if matches {
            self.take_fault(part_number)
        } else {
            None
        }
    }
}
