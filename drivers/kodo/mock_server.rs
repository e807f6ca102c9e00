//! In-process Kodo stand-in for tests / 测试用Kodo模拟服务
//!
//! One axum server plays every role (UC, io_src, up, rs, rsf), so all
//! discovered hosts point back at it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::config::KodoConfig;

pub const BUCKET: &str = "test-bucket";
const LAST_MODIFIED: &str = "Tue, 14 Nov 2023 22:13:20 GMT";
const PUT_TIME: i64 = 170_000_000_000_000;

#[derive(Debug, Clone)]
pub struct MockObject {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub metadata: HashMap<String, String>,
}

pub struct MockState {
    base_url: String,
    serve_io_src: bool,
    objects: Mutex<BTreeMap<String, MockObject>>,
    uploads: Mutex<HashMap<String, BTreeMap<u32, Vec<u8>>>>,
    completed: Mutex<Vec<Vec<usize>>>,
    next_upload: AtomicUsize,
    requests: AtomicUsize,
    form_uploads: AtomicUsize,
    list_calls: AtomicUsize,
    region_queries: AtomicUsize,
    aborted: Mutex<Vec<String>>,
    /// Part number rejected by `upload_part`, 0 for none
    reject_part: AtomicU32,
    reject_complete: AtomicBool,
    hide_region: AtomicBool,
}

impl MockState {
    pub fn put_object(&self, key: &str, data: Vec<u8>, mime_type: &str) {
        self.objects.lock().insert(
            key.to_string(),
            MockObject {
                data,
                mime_type: mime_type.to_string(),
                metadata: HashMap::new(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<MockObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn form_uploads(&self) -> usize {
        self.form_uploads.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn region_queries(&self) -> usize {
        self.region_queries.load(Ordering::SeqCst)
    }

    /// Upload ids that received an abort request.
    pub fn aborted_uploads(&self) -> Vec<String> {
        self.aborted.lock().clone()
    }

    /// Multipart uploads started but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Fail every upload of `part_number` with a server error.
    pub fn reject_part(&self, part_number: u32) {
        self.reject_part.store(part_number, Ordering::SeqCst);
    }

    pub fn reject_complete(&self) {
        self.reject_complete.store(true, Ordering::SeqCst);
    }

    /// Answer region queries with an empty host list.
    pub fn hide_region(&self) {
        self.hide_region.store(true, Ordering::SeqCst);
    }

    /// Part sizes of every completed multipart upload, in order.
    pub fn completed_part_sizes(&self) -> Vec<Vec<usize>> {
        self.completed.lock().clone()
    }

    fn record(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockKodo {
    pub base_url: String,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockKodo {
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    /// UC reports a region without any io_src domain.
    pub async fn start_without_io_src() -> Self {
        Self::spawn(false).await
    }

    async fn spawn(serve_io_src: bool) -> Self {
        init_tracing();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(MockState {
            base_url: base_url.clone(),
            serve_io_src,
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
            next_upload: AtomicUsize::new(1),
            requests: AtomicUsize::new(0),
            form_uploads: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            region_queries: AtomicUsize::new(0),
            aborted: Mutex::new(Vec::new()),
            reject_part: AtomicU32::new(0),
            reject_complete: AtomicBool::new(false),
            hide_region: AtomicBool::new(false),
        });
        let app = router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url,
            state,
            handle,
        }
    }

    pub fn config(&self) -> KodoConfig {
        KodoConfig {
            bucket: BUCKET.to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            uc_hosts: vec![self.base_url.clone()],
            ..Default::default()
        }
    }
}

impl Drop for MockKodo {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// `RUST_LOG=kodo_blob=debug cargo test` shows driver logs
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/v4/query", get(query_region))
        .route("/list", post(list_files))
        .route("/copy/:src/:dst/force/:force", post(copy_object))
        .route("/delete/:entry", post(delete_object))
        .route("/", post(form_upload))
        .route("/buckets/:bucket/objects/:key/uploads", post(init_parts))
        .route(
            "/buckets/:bucket/objects/:key/uploads/:upload_id",
            post(complete_parts).delete(abort_parts),
        )
        .route(
            "/buckets/:bucket/objects/:key/uploads/:upload_id/:part_number",
            put(upload_part),
        )
        .fallback(download)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

fn api_error(code: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": message }))).into_response()
}

fn authorized(headers: &HeaderMap, prefix: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(prefix))
        .unwrap_or(false)
}

fn decode_entry(entry: &str) -> Option<String> {
    let raw = URL_SAFE.decode(entry).ok()?;
    let entry = String::from_utf8(raw).ok()?;
    let (bucket, key) = entry.split_once(':')?;
    (bucket == BUCKET).then(|| key.to_string())
}

fn decode_key(encoded: &str) -> Option<String> {
    String::from_utf8(URL_SAFE.decode(encoded).ok()?).ok()
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn strip_meta(metadata: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
    metadata
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix("x-qn-meta-").map(|k| (k.to_string(), v)))
        .collect()
}

async fn query_region(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record();
    state.region_queries.fetch_add(1, Ordering::SeqCst);
    if query.get("bucket").map(String::as_str) != Some(BUCKET) {
        return api_error(631, "no such bucket");
    }
    if state.hide_region.load(Ordering::SeqCst) {
        return Json(json!({ "hosts": [] })).into_response();
    }
    let base = state.base_url.clone();
    let io_src: Vec<String> = if state.serve_io_src { vec![base.clone()] } else { Vec::new() };
    Json(json!({
        "hosts": [{
            "region": "z0",
            "ttl": 60,
            "io": { "domains": [] },
            "io_src": { "domains": io_src },
            "up": { "domains": [base] },
            "rs": { "domains": [base] },
            "rsf": { "domains": [base] },
            "api": { "domains": [base] }
        }]
    }))
    .into_response()
}

async fn list_files(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record();
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers, "Qiniu ak:") {
        return api_error(401, "bad token");
    }
    let param = |name: &str| query.get(name).cloned().unwrap_or_default();
    let (prefix, delimiter, marker) = (param("prefix"), param("delimiter"), param("marker"));
    let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(1000);

    let mut items = Vec::new();
    let mut prefixes = BTreeSet::new();
    for (key, object) in state.objects.lock().iter() {
        if !key.starts_with(&prefix) || (!marker.is_empty() && key.as_str() <= marker.as_str()) {
            continue;
        }
        if !delimiter.is_empty() {
            if let Some(pos) = key[prefix.len()..].find(&delimiter) {
                prefixes.insert(key[..prefix.len() + pos + delimiter.len()].to_string());
                continue;
            }
        }
        items.push(json!({
            "key": key,
            "hash": md5_hex(&object.data),
            "md5": md5_hex(&object.data),
            "fsize": object.data.len(),
            "mimeType": object.mime_type,
            "putTime": PUT_TIME,
        }));
    }

    let more = items.len() > limit;
    items.truncate(limit);
    let next_marker = match items.last() {
        Some(last) if more => last["key"].as_str().unwrap_or_default().to_string(),
        _ => String::new(),
    };
    Json(json!({
        "marker": next_marker,
        "items": items,
        "commonPrefixes": prefixes,
    }))
    .into_response()
}

async fn copy_object(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path((src, dst, force)): Path<(String, String, String)>,
) -> Response {
    state.record();
    if !authorized(&headers, "Qiniu ak:") {
        return api_error(401, "bad token");
    }
    let (Some(src_key), Some(dst_key)) = (decode_entry(&src), decode_entry(&dst)) else {
        return api_error(400, "invalid entry");
    };
    let mut objects = state.objects.lock();
    let Some(object) = objects.get(&src_key).cloned() else {
        return api_error(612, "no such file or directory");
    };
    if force != "true" && objects.contains_key(&dst_key) {
        return api_error(614, "file exists");
    }
    objects.insert(dst_key, object);
    StatusCode::OK.into_response()
}

async fn delete_object(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(entry): Path<String>,
) -> Response {
    state.record();
    if !authorized(&headers, "Qiniu ak:") {
        return api_error(401, "bad token");
    }
    let Some(key) = decode_entry(&entry) else {
        return api_error(400, "invalid entry");
    };
    match state.objects.lock().remove(&key) {
        Some(_) => StatusCode::OK.into_response(),
        None => api_error(612, "no such file or directory"),
    }
}

async fn form_upload(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    state.record();
    let mut token = String::new();
    let mut key = String::new();
    let mut data = None;
    let mut mime_type = String::new();
    let mut params = Vec::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "token" => token = field.text().await.unwrap_or_default(),
            "key" => key = field.text().await.unwrap_or_default(),
            "file" => {
                mime_type = field.content_type().unwrap_or_default().to_string();
                data = field.bytes().await.ok().map(|b| b.to_vec());
            }
            _ => {
                let value = field.text().await.unwrap_or_default();
                params.push((name.clone(), value));
            }
        }
    }

    if !token.starts_with("ak:") {
        return api_error(401, "bad token");
    }
    let Some(data) = data else {
        return api_error(400, "missing file");
    };
    state.form_uploads.fetch_add(1, Ordering::SeqCst);
    let hash = md5_hex(&data);
    state.objects.lock().insert(
        key.clone(),
        MockObject {
            data,
            mime_type,
            metadata: strip_meta(params),
        },
    );
    Json(json!({ "key": key, "hash": hash })).into_response()
}

async fn init_parts(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path((_bucket, encoded_key)): Path<(String, String)>,
) -> Response {
    state.record();
    if !authorized(&headers, "UpToken ak:") || decode_key(&encoded_key).is_none() {
        return api_error(401, "bad token");
    }
    let upload_id = format!("upload-{}", state.next_upload.fetch_add(1, Ordering::SeqCst));
    state.uploads.lock().insert(upload_id.clone(), BTreeMap::new());
    Json(json!({ "uploadId": upload_id, "expireAt": 1_700_604_800i64 })).into_response()
}

async fn upload_part(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path((_bucket, _key, upload_id, part_number)): Path<(String, String, String, u32)>,
    body: Bytes,
) -> Response {
    state.record();
    if !authorized(&headers, "UpToken ak:") {
        return api_error(401, "bad token");
    }
    if state.reject_part.load(Ordering::SeqCst) == part_number {
        return api_error(500, "part rejected");
    }
    let digest = md5_hex(&body);
    let sent = headers.get("content-md5").and_then(|v| v.to_str().ok());
    if sent != Some(digest.as_str()) {
        return api_error(400, "content md5 mismatch");
    }
    let mut uploads = state.uploads.lock();
    let Some(parts) = uploads.get_mut(&upload_id) else {
        return api_error(612, "no such upload");
    };
    parts.insert(part_number, body.to_vec());
    Json(json!({ "etag": digest, "md5": digest })).into_response()
}

async fn complete_parts(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path((_bucket, encoded_key, upload_id)): Path<(String, String, String)>,
    Json(req): Json<Value>,
) -> Response {
    state.record();
    if !authorized(&headers, "UpToken ak:") {
        return api_error(401, "bad token");
    }
    let Some(key) = decode_key(&encoded_key) else {
        return api_error(400, "invalid key");
    };
    if state.reject_complete.load(Ordering::SeqCst) {
        return api_error(500, "complete rejected");
    }
    let Some(stored) = state.uploads.lock().remove(&upload_id) else {
        return api_error(612, "no such upload");
    };

    let mut data = Vec::new();
    let mut sizes = Vec::new();
    for part in req["parts"].as_array().cloned().unwrap_or_default() {
        let number = part["partNumber"].as_u64().unwrap_or_default() as u32;
        let Some(bytes) = stored.get(&number) else {
            return api_error(400, "unknown part");
        };
        if part["etag"].as_str() != Some(md5_hex(bytes).as_str()) {
            return api_error(400, "etag mismatch");
        }
        sizes.push(bytes.len());
        data.extend_from_slice(bytes);
    }

    let metadata = req["metadata"]
        .as_object()
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    state.completed.lock().push(sizes);
    state.objects.lock().insert(
        key.clone(),
        MockObject {
            data,
            mime_type: req["mimeType"].as_str().unwrap_or("application/octet-stream").to_string(),
            metadata: strip_meta(metadata),
        },
    );
    Json(json!({ "key": key })).into_response()
}

async fn abort_parts(
    State(state): State<Arc<MockState>>,
    Path((_bucket, _key, upload_id)): Path<(String, String, String)>,
) -> Response {
    state.record();
    state.uploads.lock().remove(&upload_id);
    state.aborted.lock().push(upload_id);
    StatusCode::OK.into_response()
}

/// `bytes=a-b` / `bytes=a-` clamped to the object length
fn parse_range(range: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    if start >= len {
        return None;
    }
    let end = match end {
        "" => len - 1,
        end => end.parse::<usize>().ok()?.min(len - 1),
    };
    (start <= end).then_some((start, end))
}

/// io_src: serves signed GET / HEAD for any other path
async fn download(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.record();
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let query = uri.query().unwrap_or_default();
    if !query.contains("e=") || !query.contains("token=ak:") {
        return api_error(401, "download token not specified");
    }
    let key = urlencoding::decode(uri.path().trim_start_matches('/'))
        .map(|k| k.into_owned())
        .unwrap_or_default();
    let Some(object) = state.object(&key) else {
        return api_error(404, "no such file or directory");
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|r| parse_range(r, object.data.len()));
    let (status, body) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, object.data[start..=end].to_vec()),
        None => (StatusCode::OK, object.data.clone()),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &object.mime_type)
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::ETAG, format!("\"{}\"", md5_hex(&object.data)))
        .header(header::LAST_MODIFIED, LAST_MODIFIED);
    for (name, value) in &object.metadata {
        builder = builder.header(format!("x-qn-meta-{}", name), value);
    }
    builder.body(Body::from(body)).unwrap()
}
