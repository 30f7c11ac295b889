//! Concurrent warming of remote index caches ahead of the search.
//!
//! The search itself is synchronous. Before it starts, listings for the
//! root names (and a configurable number of dependency levels below them)
//! are fetched in parallel into each remote source's [`SpecCache`], so the
//! search mostly hits memory.
//!
//! [`SpecCache`]: crate::cache::SpecCache

use std::collections::HashSet;
use std::sync::Arc;

use jewel_core::config::ResolverConfig;
use jewel_core::dependency::Dependency;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{ResolveError, SourceError};
use crate::resolver::{CancellationFlag, Resolution, Resolver};
use crate::source::{RemoteSource, SourceSet};

/// Warm every remote source's cache for `names` and, down to
/// `config.prefetch_depth` levels, the dependencies of their newest
/// releases. Returns how many listings were fetched or already cached.
///
/// Failures are logged and ignored; the search reports them if they matter.
pub async fn prefetch(sources: &SourceSet, names: &[String], config: &ResolverConfig) -> usize {
    let semaphore = Arc::new(Semaphore::new(config.prefetch_concurrency.max(1)));
    let mut warmed = 0;

    for remote in sources.remotes() {
        let mut seen: HashSet<String> = HashSet::new();
        let mut level: Vec<String> = names
            .iter()
            .filter(|name| seen.insert(name.to_string()))
            .cloned()
            .collect();

        for depth in 0..=config.prefetch_depth {
            if level.is_empty() {
                break;
            }
            let mut join_set = JoinSet::new();
            for name in level.drain(..) {
                let remote = remote.clone();
                let sem = semaphore.clone();
                join_set.spawn(async move {
                    let _permit = sem.acquire_owned().await;
                    let fetched = name.clone();
                    let result = tokio::task::spawn_blocking(move || warm(&remote, &name)).await;
                    (fetched, result)
                });
            }

            let mut next = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                let Ok((name, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(Ok(dependencies)) => {
                        warmed += 1;
                        if depth < config.prefetch_depth {
                            next.extend(dependencies.into_iter().filter(|d| seen.insert(d.clone())));
                        }
                    }
                    Ok(Err(e)) => debug!(package = %name, source = %remote.id(), "Prefetch failed: {e}"),
                    Err(e) => debug!(package = %name, "Prefetch task failed: {e}"),
                }
            }
            next.sort();
            level = next;
        }
    }
    warmed
}

/// Fetch the listing of `name` and the dependency names of its newest
/// release.
fn warm(remote: &RemoteSource, name: &str) -> Result<Vec<String>, SourceError> {
    let entries = remote.versions(name)?;
    let newest = entries
        .iter()
        .filter(|e| !e.version.is_prerelease())
        .max_by(|a, b| a.version.cmp(&b.version).then_with(|| b.platform.cmp(&a.platform)));
    let Some(newest) = newest else {
        return Ok(Vec::new());
    };
    let dependencies: Vec<Dependency> = match &newest.dependencies {
        Some(deps) => deps.clone(),
        None => remote
            .dependencies(name, &newest.version, &newest.platform)?
            .to_vec(),
    };
    Ok(dependencies
        .into_iter()
        .filter(|d| d.is_runtime())
        .map(|d| d.name)
        .collect())
}

/// Prefetch, then run the search on the blocking pool.
pub async fn resolve_async(
    sources: Arc<SourceSet>,
    root: Vec<Dependency>,
    config: ResolverConfig,
    cancel: CancellationFlag,
) -> Result<Resolution, ResolveError> {
    let names: Vec<String> = root.iter().map(|d| d.name.clone()).collect();
    let warmed = prefetch(&sources, &names, &config).await;
    debug!(warmed, "Prefetch finished");
    if cancel.is_cancelled() {
        return Err(ResolveError::Aborted);
    }

    tokio::task::spawn_blocking(move || {
        Resolver::new(&root, &sources, &config)?
            .with_cancellation(cancel)
            .run()
    })
    .await
    .map_err(|e| ResolveError::Task {
        message: e.to_string(),
    })?
}
