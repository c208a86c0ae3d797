//! Aggregated metrics instrumentation.
//!
//! Uses the `metrics` facade crate; the binary chooses the exporter.
//! Series are aggregated hierarchically to keep cardinality bounded:
//!
//! - system-wide gauges and counters carry no labels;
//! - project-level series carry `{project}`;
//! - database-level series carry `{project, database}`;
//! - tier-level series carry `{tier}` ∈ {"hot", "cold"}.
//!
//! No per-tenant label exists anywhere in this module: with fleets of tens
//! of thousands of tenant files, a tenant label would explode the series
//! space. The label rule is enforced by construction: these are the only
//! recording entry points, and none accepts a tenant value.
//!
//! [`FleetMetrics`] is a cheaply clonable handle that components receive at
//! construction time; there is no global registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::dbpath::DbPath;

/// Internal per-project aggregates, kept for the statistics log line.
#[derive(Debug, Clone, Default)]
pub struct ProjectStats {
    pub total_dbs: usize,
    pub active_dbs: usize,
    pub total_size: u64,
    pub total_wal_size: u64,
}

/// Internal per-database aggregates.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub tenant_count: usize,
    pub branch_count: usize,
    pub hot_tenants: usize,
    pub total_size: u64,
}

#[derive(Default)]
struct Inner {
    project_stats: RwLock<HashMap<String, ProjectStats>>,
    database_stats: RwLock<HashMap<String, DatabaseStats>>,
}

/// Handle to the aggregated metrics recorder.
///
/// Constructor-injected into every recording component; clones share state.
#[derive(Clone, Default)]
pub struct FleetMetrics {
    inner: Arc<Inner>,
}

fn tier_label(is_hot: bool) -> &'static str {
    if is_hot {
        "hot"
    } else {
        "cold"
    }
}

impl FleetMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record size observations for a database.
    pub fn record_db_metrics(&self, path: &str, size: u64, wal_size: u64, is_hot: bool) {
        let parsed = DbPath::parse(path);

        metrics::gauge!("fleetsync_db_size_bytes_total").increment(size as f64);
        metrics::gauge!("fleetsync_wal_size_bytes_total").increment(wal_size as f64);
        metrics::gauge!("fleetsync_project_size_bytes", "project" => parsed.project.clone())
            .increment(size as f64);
        metrics::gauge!(
            "fleetsync_database_size_bytes",
            "project" => parsed.project.clone(),
            "database" => parsed.database.clone()
        )
        .increment(size as f64);

        let mut projects = self.inner.project_stats.write();
        let ps = projects.entry(parsed.project.clone()).or_default();
        ps.total_size += size;
        ps.total_wal_size += wal_size;
        if is_hot {
            ps.active_dbs += 1;
        }
        drop(projects);

        let key = format!("{}/{}", parsed.project, parsed.database);
        let mut databases = self.inner.database_stats.write();
        let ds = databases.entry(key).or_default();
        ds.total_size += size;
        if is_hot {
            ds.hot_tenants += 1;
        }
    }

    /// Record one sync operation against a database.
    pub fn record_sync(&self, path: &str, duration: Duration, bytes: u64, is_hot: bool, failed: bool) {
        let tier = tier_label(is_hot);

        metrics::counter!("fleetsync_tier_sync_operations_total", "tier" => tier).increment(1);
        metrics::histogram!("fleetsync_tier_sync_duration_seconds", "tier" => tier)
            .record(duration.as_secs_f64());
        if bytes > 0 {
            metrics::counter!("fleetsync_tier_wal_bytes_total", "tier" => tier).increment(bytes);
            metrics::counter!("fleetsync_wal_bytes_written_total").increment(bytes);
        }
        if failed {
            metrics::counter!("fleetsync_tier_sync_errors_total", "tier" => tier).increment(1);
        }

        let parsed = DbPath::parse(path);
        if !parsed.project.is_empty() {
            metrics::counter!(
                "fleetsync_project_sync_operations_total",
                "project" => parsed.project.clone()
            )
            .increment(1);
            metrics::histogram!(
                "fleetsync_project_sync_duration_seconds",
                "project" => parsed.project
            )
            .record(duration.as_secs_f64());
        }
    }

    /// Publish the hot/cold database counts.
    pub fn update_tier_counts(&self, hot: usize, cold: usize) {
        metrics::gauge!("fleetsync_hot_databases_total").set(hot as f64);
        metrics::gauge!("fleetsync_cold_databases_total").set(cold as f64);
    }

    /// Publish aggregated per-project counts.
    pub fn update_project_stats(&self, project: &str, total: usize, active: usize) {
        metrics::gauge!("fleetsync_project_databases", "project" => project.to_string())
            .set(total as f64);
        metrics::gauge!("fleetsync_project_active_databases", "project" => project.to_string())
            .set(active as f64);

        let mut projects = self.inner.project_stats.write();
        let ps = projects.entry(project.to_string()).or_default();
        ps.total_dbs = total;
        ps.active_dbs = active;
    }

    /// Publish aggregated per-database counts.
    pub fn update_database_stats(
        &self,
        project: &str,
        database: &str,
        tenant_count: usize,
        branch_count: usize,
        hot_tenants: usize,
    ) {
        let labels_project = project.to_string();
        let labels_database = database.to_string();
        metrics::gauge!(
            "fleetsync_database_tenants",
            "project" => labels_project.clone(),
            "database" => labels_database.clone()
        )
        .set(tenant_count as f64);
        metrics::gauge!(
            "fleetsync_database_branches",
            "project" => labels_project.clone(),
            "database" => labels_database.clone()
        )
        .set(branch_count as f64);
        metrics::gauge!(
            "fleetsync_database_hot_tenants",
            "project" => labels_project,
            "database" => labels_database
        )
        .set(hot_tenants as f64);

        let mut databases = self.inner.database_stats.write();
        let ds = databases.entry(format!("{project}/{database}")).or_default();
        ds.tenant_count = tenant_count;
        ds.branch_count = branch_count;
        ds.hot_tenants = hot_tenants;
    }

    /// Snapshot of per-project aggregates.
    #[must_use]
    pub fn project_stats(&self) -> HashMap<String, ProjectStats> {
        self.inner.project_stats.read().clone()
    }

    /// Snapshot of per-database aggregates, keyed `project/database`.
    #[must_use]
    pub fn database_stats(&self) -> HashMap<String, DatabaseStats> {
        self.inner.database_stats.read().clone()
    }
}
