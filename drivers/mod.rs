// Driver package / 驱动包
pub mod kodo;

use std::sync::Arc;

use crate::storage::BucketMux;

/// Register all bucket openers to the mux / 注册所有驱动
pub async fn register_all(mux: &BucketMux) -> anyhow::Result<()> {
    // Register Qiniu Kodo driver / 注册七牛云Kodo驱动
    mux.register_opener(Arc::new(kodo::KodoBucketOpener)).await?;
    Ok(())
}
