pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use storage::{Bucket, BucketMux};

/// Mux with every bundled driver registered / 注册了所有驱动的打开器表
pub async fn default_mux() -> anyhow::Result<BucketMux> {
    let mux = BucketMux::new();
    drivers::register_all(&mux).await?;
    Ok(mux)
}
