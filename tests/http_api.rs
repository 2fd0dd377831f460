// HttpUploadApi 与编排器在真实 HTTP 上的集成测试
//
// 使用 axum 模拟控制端点和对象存储

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use lesson_media_upload::api::{CompleteRequest, InitiateRequest};
use lesson_media_upload::uploader::part::content_md5;
use lesson_media_upload::{
    ApiConfig, HttpUploadApi, TransferErrorKind, TransferStrategy, UploadConfig,
    UploadOrchestrator, UploadRequest, UploadSource,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockState {
    base: String,
    auth_headers: Vec<String>,
    direct_bodies: Vec<(String, Option<String>, Bytes)>,
    reject_direct: bool,
    /// 直传接收成功但返回无法解析的响应体
    garble_direct: bool,
    initiated: Vec<InitiateRequest>,
    url_requests: Vec<u32>,
    stored: BTreeMap<u32, Bytes>,
    /// 分片 -> 剩余过期次数
    expire_parts: HashMap<u32, u32>,
    /// 分片 -> 固定返回的错误码
    fail_parts: HashMap<u32, u16>,
    completed: Vec<CompleteRequest>,
    aborted: Vec<String>,
}

type Shared = Arc<Mutex<MockState>>;

fn record_auth(state: &Shared, headers: &HeaderMap) {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.lock().auth_headers.push(value.to_string());
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectQuery {
    file_name: String,
    lesson_id: Option<String>,
}

async fn direct(
    State(state): State<Shared>,
    Query(query): Query<DirectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record_auth(&state, &headers);
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut s = state.lock();
    if s.reject_direct {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type").into_response();
    }
    let size = body.len();
    s.direct_bodies.push((content_type, query.lesson_id, body));
    if s.garble_direct {
        return (StatusCode::OK, "<html>gateway</html>").into_response();
    }
    Json(json!({
        "storageKey": format!("direct/{}", query.file_name),
        "size": size,
    }))
    .into_response()
}

async fn initiate(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(request): Json<InitiateRequest>,
) -> Response {
    record_auth(&state, &headers);
    let key = format!(
        "lessons/{}/{}",
        request.lesson_id.clone().unwrap_or_default(),
        request.file_name
    );
    state.lock().initiated.push(request);
    Json(json!({ "sessionId": "mp-1", "storageKey": key })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartQuery {
    part_number: u32,
}

async fn part_url(
    State(state): State<Shared>,
    Path(session_id): Path<String>,
    Query(query): Query<PartQuery>,
) -> Response {
    let mut s = state.lock();
    s.url_requests.push(query.part_number);
    let url = format!("{}/store/{}/{}", s.base, session_id, query.part_number);
    Json(json!({ "uploadUrl": url })).into_response()
}

async fn store_part(
    State(state): State<Shared>,
    Path((_session_id, part_number)): Path<(String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut s = state.lock();

    if let Some(remaining) = s.expire_parts.get_mut(&part_number) {
        if *remaining > 0 {
            *remaining -= 1;
            return (
                StatusCode::FORBIDDEN,
                "<Error><Code>AccessDenied</Code><Message>Request has expired</Message></Error>",
            )
                .into_response();
        }
    }
    if let Some(status) = s.fail_parts.get(&part_number) {
        let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST);
        return (status, "injected").into_response();
    }

    let md5 = headers
        .get("content-md5")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if md5 != content_md5(&body) {
        return (StatusCode::BAD_REQUEST, "BadDigest").into_response();
    }

    s.stored.insert(part_number, body);
    (
        StatusCode::OK,
        [("etag", format!("\"tag-{}\"", part_number))],
    )
        .into_response()
}

async fn complete(
    State(state): State<Shared>,
    Path(_session_id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> Response {
    let size = request.file_size;
    let key = request.storage_key.clone();
    state.lock().completed.push(request);
    Json(json!({
        "storageKey": key,
        "size": size,
        "finalizedAt": "2026-10-19T08:00:00Z",
    }))
    .into_response()
}

async fn abort(State(state): State<Shared>, Path(session_id): Path<String>) -> StatusCode {
    state.lock().aborted.push(session_id);
    StatusCode::NO_CONTENT
}

/// 启动模拟服务，返回共享状态和 API 根地址
async fn spawn_mock() -> (Shared, String) {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));

    let app = Router::new()
        .route("/api/uploads/direct", post(direct))
        .route("/api/uploads/multipart/initiate", post(initiate))
        .route("/api/uploads/multipart/:id/part-url", get(part_url))
        .route("/api/uploads/multipart/:id/complete", post(complete))
        .route("/api/uploads/multipart/:id/abort", post(abort))
        .route("/store/:id/:part", put(store_part))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let base = format!("http://{}", addr);
    state.lock().base = base.clone();
    (state, format!("{}/api", base))
}

fn orchestrator(base_url: String, upload: UploadConfig) -> UploadOrchestrator {
    let api = HttpUploadApi::new(&ApiConfig {
        base_url,
        auth_token: Some("t0k".to_string()),
        ..ApiConfig::default()
    })
    .unwrap();
    UploadOrchestrator::new(Arc::new(api), upload)
}

fn multipart_config() -> UploadConfig {
    UploadConfig {
        multipart_threshold: 1000,
        chunk_size: 300,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        ..UploadConfig::default()
    }
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

#[tokio::test]
async fn direct_upload_over_http() {
    let (state, base_url) = spawn_mock().await;
    let data = sample(64 * 1024);

    let result = orchestrator(base_url, UploadConfig::default())
        .submit(
            UploadRequest::new(
                UploadSource::from_bytes(data.clone()),
                "intro.mp4",
                "video/mp4",
                Some("lesson-1".to_string()),
            ),
            None,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, TransferStrategy::Direct);
    assert_eq!(result.storage_key, "direct/intro.mp4");
    assert_eq!(result.final_byte_size, data.len() as u64);

    let s = state.lock();
    assert_eq!(s.direct_bodies.len(), 1);
    let (content_type, lesson_id, body) = &s.direct_bodies[0];
    assert_eq!(content_type, "video/mp4");
    assert_eq!(lesson_id.as_deref(), Some("lesson-1"));
    assert_eq!(body.as_ref(), data.as_slice());
    assert_eq!(s.auth_headers, vec!["Bearer t0k".to_string()]);
}

#[tokio::test]
async fn direct_rejection_over_http() {
    let (state, base_url) = spawn_mock().await;
    state.lock().reject_direct = true;

    let err = orchestrator(base_url, UploadConfig::default())
        .submit(
            UploadRequest::new(
                UploadSource::from_bytes(sample(100)),
                "intro.mp4",
                "video/mp4",
                None,
            ),
            None,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, TransferErrorKind::Rejected);
}

#[tokio::test]
async fn garbled_direct_response_is_not_reuploaded() {
    let (state, base_url) = spawn_mock().await;
    state.lock().garble_direct = true;

    let err = orchestrator(base_url, UploadConfig::default())
        .submit(
            UploadRequest::new(
                UploadSource::from_bytes(sample(100)),
                "intro.mp4",
                "video/mp4",
                None,
            ),
            None,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, TransferErrorKind::Rejected);
    // 服务端已收到文件，不再重传
    assert_eq!(state.lock().direct_bodies.len(), 1);
}

#[tokio::test]
async fn multipart_upload_over_http() {
    let (state, base_url) = spawn_mock().await;
    let data = sample(1000);

    let result = orchestrator(base_url, multipart_config())
        .submit(
            UploadRequest::new(
                UploadSource::from_bytes(data.clone()),
                "lecture.webm",
                "video/webm",
                Some("lesson-2".to_string()),
            ),
            None,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.strategy, TransferStrategy::Multipart);
    assert_eq!(result.storage_key, "lessons/lesson-2/lecture.webm");
    assert_eq!(result.final_byte_size, 1000);

    let s = state.lock();
    assert_eq!(s.initiated.len(), 1);
    assert_eq!(s.initiated[0].file_type, "video/webm");
    assert_eq!(s.url_requests, vec![1, 2, 3, 4]);

    let assembled: Vec<u8> = s.stored.values().flat_map(|b| b.to_vec()).collect();
    assert_eq!(assembled, data);

    let completed = &s.completed[0];
    let tags: Vec<(u32, &str)> = completed
        .parts
        .iter()
        .map(|p| (p.part_number, p.integrity_tag.as_str()))
        .collect();
    assert_eq!(
        tags,
        vec![(1, "tag-1"), (2, "tag-2"), (3, "tag-3"), (4, "tag-4")]
    );
    assert!(s.aborted.is_empty());
}

#[tokio::test]
async fn expired_url_is_reissued_over_http() {
    let (state, base_url) = spawn_mock().await;
    state.lock().expire_parts.insert(2, 1);

    orchestrator(base_url, multipart_config())
        .submit(
            UploadRequest::new(
                UploadSource::from_bytes(sample(1000)),
                "lecture.mp4",
                "video/mp4",
                None,
            ),
            None,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let s = state.lock();
    assert_eq!(s.url_requests, vec![1, 2, 2, 3, 4]);
    assert_eq!(s.completed.len(), 1);
}

#[tokio::test]
async fn part_failure_aborts_over_http() {
    let (state, base_url) = spawn_mock().await;
    state.lock().fail_parts.insert(3, 400);

    let err = orchestrator(base_url, multipart_config())
        .submit(
            UploadRequest::new(
                UploadSource::from_bytes(sample(1000)),
                "lecture.mp4",
                "video/mp4",
                None,
            ),
            None,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, TransferErrorKind::PartTransfer);
    assert_eq!(err.part_number, Some(3));
    assert!(err.abort_attempted);

    let s = state.lock();
    assert_eq!(s.aborted, vec!["mp-1".to_string()]);
    assert!(s.completed.is_empty());
}
