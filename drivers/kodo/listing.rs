//! Listing translator / 列举转换
//!
//! One rsf call per page. Common prefixes and objects of a page are merged
//! into one sequence sorted by key.

use anyhow::Result;
use std::sync::Arc;

use super::client::{ListFilesInput, ObjectLister};
use super::util::put_time_to_datetime;
use crate::storage::{ListObject, ListOptions, ListPage};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

pub struct ListingTranslator {
    lister: Arc<dyn ObjectLister>,
    bucket: String,
}

impl ListingTranslator {
    pub fn new(lister: Arc<dyn ObjectLister>, bucket: impl Into<String>) -> Self {
        Self {
            lister,
            bucket: bucket.into(),
        }
    }

    pub async fn list_page(&self, opts: &ListOptions) -> Result<ListPage> {
        let input = ListFilesInput {
            prefix: opts.prefix.clone(),
            delimiter: opts.delimiter.clone(),
            marker: String::from_utf8_lossy(&opts.page_token).into_owned(),
            limit: if opts.page_size == 0 {
                DEFAULT_PAGE_SIZE
            } else {
                opts.page_size
            },
        };
        let output = self.lister.list_files(&self.bucket, &input).await?;

        let mut objects = Vec::with_capacity(output.common_prefixes.len() + output.items.len());
        objects.extend(output.common_prefixes.into_iter().map(ListObject::dir));
        objects.extend(output.items.into_iter().map(|item| ListObject {
            key: item.key,
            mod_time: put_time_to_datetime(item.put_time),
            size: item.fsize,
            md5: item.md5.into_bytes(),
            is_dir: false,
        }));
        objects.sort_by(|a, b| a.key.as_bytes().cmp(b.key.as_bytes()));

        Ok(ListPage {
            objects,
            next_page_token: output.next_marker.map(String::into_bytes),
        })
    }
}
