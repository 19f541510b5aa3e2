// Repository trait for archiver data access
use crate::domain::error::GatewayResult;
use crate::domain::record::ArchiveRecord;
use crate::domain::target::TargetQuery;
use async_trait::async_trait;

#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    /// Build one retrieval URL per resolved PV name for a target,
    /// expanding name patterns and resolving regex targets through the
    /// archiver's name search.
    async fn build_urls(&self, target: &TargetQuery) -> GatewayResult<Vec<String>>;

    /// Fetch one batch of URL lists, issuing a single physical request
    /// per unique URL across the whole batch. Results are returned
    /// positionally, one per URL per target; the dedup cache lives for
    /// exactly this call.
    async fn fetch_deduped(
        &self,
        urls_array: Vec<Vec<String>>,
    ) -> Vec<Vec<GatewayResult<Vec<ArchiveRecord>>>>;

    /// PV name search against the archiver's name index.
    async fn find_pv_names(&self, pattern: &str, limit: usize) -> GatewayResult<Vec<String>>;

    /// Connectivity probe; returns the archiver version string.
    async fn get_version(&self) -> GatewayResult<String>;
}
