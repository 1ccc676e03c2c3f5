use std::collections::HashMap;
use std::sync::Arc;

use peercache::builder::Builder;
use peercache::fmt::parse_size;
use peercache::group::GetterFunc;
use peercache::platform::Platform;

/// Contains the memory limit of a group which doesn't specify **max_memory**.
const DEFAULT_MAX_MEMORY: usize = 2 * 1024;

/// Reads the groups to create from the **groups** section of the config.
///
/// If no groups are configured, a single group named "scores" is created.
fn configured_groups(platform: &Platform) -> Vec<(String, usize)> {
    let handle = platform.config().current();
    let mut groups = Vec::new();

    if let Some(settings) = handle.query("groups").as_hash() {
        for (name, group_settings) in settings {
            let name = match name.as_str() {
                Some(name) => name,
                None => continue,
            };

            let max_memory = &group_settings["max_memory"];
            let max_memory = if let Some(size) = max_memory.as_str() {
                parse_size(size).unwrap_or_else(|error| {
                    log::warn!("Invalid max_memory for group {}: {}", name, error);
                    DEFAULT_MAX_MEMORY
                })
            } else {
                max_memory
                    .as_i64()
                    .and_then(|size| usize::try_from(size).ok())
                    .unwrap_or(DEFAULT_MAX_MEMORY)
            };

            groups.push((name.to_owned(), max_memory));
        }
    }

    if groups.is_empty() {
        groups.push(("scores".to_owned(), DEFAULT_MAX_MEMORY));
    }

    groups
}

#[tokio::main]
async fn main() {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Our "slow database" which is consulted on a cache miss...
    let db: Arc<HashMap<&str, &str>> =
        Arc::new(HashMap::from([("Tom", "630"), ("Jack", "589"), ("Sam", "567")]));

    for (name, max_memory) in configured_groups(&platform) {
        let db = db.clone();
        let _ = platform.create_group(
            &name,
            max_memory,
            GetterFunc(move |key: String| {
                let db = db.clone();
                async move {
                    log::info!("[SlowDB] search key {}", key);
                    match db.get(key.as_str()) {
                        Some(value) => Ok(value.as_bytes().to_vec()),
                        None => Err(anyhow::anyhow!("{} not exist", key)),
                    }
                }
            }),
        );
    }

    platform.require_server().event_loop().await;

    log::info!("Node stopped.\n{}", platform.groups().report());
}
