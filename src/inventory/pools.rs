//! Pool inventory.

use std::collections::BTreeMap;
use tracing::debug;

use crate::api::ClusterApi;
use crate::error::Result;
use crate::model::Pool;

/// Collect all pools with their guest members. Storage members carry no
/// name and are skipped.
pub async fn collect(api: &dyn ClusterApi) -> Result<BTreeMap<String, Pool>> {
    let mut pools = BTreeMap::new();

    for entry in api.list_pools().await? {
        debug!("Got pool: {}", entry.poolid);
        let detail = api.pool_detail(&entry.poolid).await?;
        let members: Vec<String> = detail
            .members
            .into_iter()
            .filter_map(|member| match member.name {
                Some(name) => Some(name),
                None => {
                    debug!("Skipping member without name in pool: {}", entry.poolid);
                    None
                }
            })
            .collect();
        pools.insert(
            entry.poolid.clone(),
            Pool {
                name: entry.poolid,
                members,
            },
        );
    }

    Ok(pools)
}
