//! Kodo wire types / Kodo接口数据类型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// API error response / API错误响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ErrResp {
    #[serde(default)]
    pub error: String,
}

/// Region query response (`/v4/query`) / 区域查询响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegionQueryResp {
    #[serde(default)]
    pub hosts: Vec<RegionHosts>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegionHosts {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub io: ServiceDomains,
    #[serde(default)]
    pub io_src: ServiceDomains,
    #[serde(default)]
    pub up: ServiceDomains,
    #[serde(default)]
    pub rs: ServiceDomains,
    #[serde(default)]
    pub rsf: ServiceDomains,
    #[serde(default)]
    pub api: ServiceDomains,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceDomains {
    #[serde(default)]
    pub domains: Vec<String>,
}

/// File list response (`/list`) / 文件列表响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListFilesResp {
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub items: Vec<ListItem>,
    #[serde(default, rename = "commonPrefixes")]
    pub common_prefixes: Vec<String>,
}

/// Listed object / 列举出的对象
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ListItem {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub fsize: i64,
    #[serde(default, rename = "mimeType")]
    pub mime_type: String,
    /// 100ns units / 单位为100纳秒
    #[serde(default, rename = "putTime")]
    pub put_time: i64,
}

/// Upload policy, serialized into the upload token / 上传策略
#[derive(Debug, Clone, Serialize)]
pub struct PutPolicy {
    pub scope: String,
    pub deadline: i64,
}

/// Multipart v2 init response / 初始化分片上传响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InitPartsResp {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(default, rename = "expireAt")]
    pub expire_at: i64,
}

/// Multipart v2 part upload response / 上传分片响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UploadPartResp {
    pub etag: String,
    #[serde(default)]
    pub md5: String,
}

/// Uploaded part reference / 已上传分片
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadedPart {
    pub etag: String,
    #[serde(rename = "partNumber")]
    pub part_number: u32,
}

/// Multipart v2 complete request / 完成分片上传请求
#[derive(Debug, Clone, Serialize)]
pub struct CompletePartsReq {
    pub parts: Vec<UploadedPart>,
    #[serde(rename = "mimeType", skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}
