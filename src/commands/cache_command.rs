//! The `cache` command: maintenance of process caches and the store.

use crate::Result;
use crate::core::checkpoint::CheckpointStore;
use crate::services::invoker::availability;

/// Drop memoized tool probes and prune finished checkpoint sessions.
pub async fn clear() -> Result<()> {
    availability::clear_cache();

    let store_path = CheckpointStore::default_path();
    if store_path.exists() {
        let store = CheckpointStore::open(&store_path)?;
        let removed = store.prune_finished_sessions()?;
        println!("tool cache cleared; {removed} finished session(s) pruned");
    } else {
        println!("tool cache cleared; no checkpoint store present");
    }
    Ok(())
}
