use std::{sync::Arc, time::Duration};

use common::{env_config::SweepConfig, error::Res, storage::FileStore};
use db::repo::Store;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reset_tokens: u64,
    pub revocations: u64,
    pub uploads: usize,
}

/// Removes expired reset tokens, revocations past their token's expiry and
/// uploads older than `upload_max_age`. A failing step is logged and counted
/// as zero, the other steps still run.
pub async fn sweep_once(
    store: &dyn Store,
    files: &FileStore,
    upload_max_age: Duration,
) -> SweepReport {
    SweepReport {
        reset_tokens: logged("reset tokens", store.purge_reset_tokens().await),
        revocations: logged("revocations", store.purge_revocations().await),
        uploads: logged("uploads", files.purge_stale(upload_max_age).await),
    }
}

fn logged<T: Default>(step: &str, result: Res<T>) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("Sweep of {} failed: {}", step, e);
        T::default()
    })
}

pub async fn run_sweep_loop(store: Arc<dyn Store>, files: FileStore, config: SweepConfig) {
    let upload_max_age = Duration::from_secs(config.upload_max_age_days * 24 * 60 * 60);
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        interval.tick().await;

        let report = sweep_once(store.as_ref(), &files, upload_max_age).await;
        if report != SweepReport::default() {
            log::info!(
                "Sweep removed {} reset tokens, {} revocations, {} uploads",
                report.reset_tokens,
                report.revocations,
                report.uploads
            );
        }
    }
}
