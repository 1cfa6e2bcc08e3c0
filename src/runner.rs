//! Runs configured endpoints: fetch, flatten, plan every table, then load.
//!
//! Each endpoint run is independent. A failure or timeout in one run is
//! reported and never affects the others.

use crate::config::EndpointSpec;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::flatten::{Flattener, RowSet};
use crate::load::{with_retry, LoadReconciler, LoadResult, StagingCleanups};
use crate::schema::{infer, reconcile, SchemaPlan};
use crate::table::TableRef;
use crate::warehouse::Warehouse;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Upper bound on endpoint runs in flight at once
    pub max_concurrent: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig { max_concurrent: 8 }
    }
}

/// Outcome of one endpoint run
#[derive(Debug)]
pub struct EndpointReport {
    pub endpoint: String,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Result<Vec<LoadResult>>,
}

impl EndpointReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn rows_written(&self) -> usize {
        match &self.outcome {
            Ok(results) => results.iter().map(|r| r.rows_written).sum(),
            Err(_) => 0,
        }
    }

    fn log(&self) {
        match &self.outcome {
            Ok(results) => info!(
                endpoint = %self.endpoint,
                correlation_id = %self.correlation_id,
                success = true,
                duration_ms = self.duration.as_millis() as u64,
                tables = results.len(),
                rows = self.rows_written(),
                "endpoint run finished"
            ),
            Err(err) => error!(
                endpoint = %self.endpoint,
                correlation_id = %self.correlation_id,
                success = false,
                duration_ms = self.duration.as_millis() as u64,
                error_kind = err.kind(),
                error = %err,
                "endpoint run failed"
            ),
        }
    }
}

/// `20240102030405-1a2b3c4d`
pub fn correlation_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

struct PlannedTable {
    rows: RowSet,
    target: TableRef,
    plan: SchemaPlan,
}

#[derive(Clone)]
pub struct EndpointRunner {
    config: RunnerConfig,
    fetcher: Arc<dyn Fetcher>,
    warehouse: Arc<dyn Warehouse>,
}

impl EndpointRunner {
    pub fn new(config: RunnerConfig, fetcher: Arc<dyn Fetcher>, warehouse: Arc<dyn Warehouse>) -> Self {
        EndpointRunner {
            config,
            fetcher,
            warehouse,
        }
    }

    pub async fn run_endpoint(&self, spec: Arc<EndpointSpec>) -> EndpointReport {
        let started_at = Utc::now();
        let correlation_id = correlation_id(started_at);
        let span = info_span!("endpoint", endpoint = %spec.name, correlation_id = %correlation_id);

        let clock = Instant::now();
        let cleanups = StagingCleanups::default();
        let run = self.execute(&spec, started_at, &cleanups);
        let outcome = match tokio::time::timeout(spec.timeout, run)
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(spec.timeout)),
        };
        // An abandoned replace leaves its staging drop running; finish it here
        cleanups.wait().instrument(span).await;

        let report = EndpointReport {
            endpoint: spec.name.clone(),
            correlation_id,
            started_at,
            duration: clock.elapsed(),
            outcome,
        };
        report.log();
        report
    }

    async fn execute(
        &self,
        spec: &EndpointSpec,
        fetched_at: DateTime<Utc>,
        cleanups: &StagingCleanups,
    ) -> Result<Vec<LoadResult>> {
        let document = with_retry(&spec.retry, "fetch", || self.fetcher.fetch(spec)).await?;
        debug!(table = %spec.table, "document fetched");

        let flattener = Flattener::new(spec.flatten.clone());
        let tables = flattener.flatten(&document, &spec.table.table, Some(fetched_at))?;
        if tables.is_empty() {
            return Err(Error::InvalidDocument(format!(
                "endpoint `{}` produced no rows",
                spec.name
            )));
        }
        debug!(tables = tables.len(), "document flattened");

        // Plan every table before touching any of them
        let mut planned = Vec::with_capacity(tables.len());
        for (name, rows) in tables {
            let target = spec.table.with_table(name);
            let incoming = infer(&rows);
            let existing = with_retry(&spec.retry, "get_schema", || self.warehouse.get_schema(&target))
                .await
                .map_err(Error::from)?;
            let plan = reconcile(existing.as_ref(), &incoming, spec.storage_mode);
            if !plan.compatible {
                return Err(Error::SchemaConflict {
                    table: target.to_string(),
                    conflicts: plan.conflicts,
                });
            }
            debug!(
                table = %target,
                rows = rows.len(),
                existing = plan.existing_found,
                additions = plan.additions.len(),
                "table planned"
            );
            planned.push(PlannedTable { rows, target, plan });
        }

        let reconciler = LoadReconciler::new(Arc::clone(&self.warehouse), spec.retry)
            .with_cleanups(cleanups.clone());
        let mut results = Vec::with_capacity(planned.len());
        for table in &planned {
            let result = reconciler
                .load(&table.rows, &table.plan, &table.target, spec.storage_mode)
                .await?;
            results.push(result);
        }
        Ok(results)
    }

    /// Run every endpoint concurrently and collect the reports in completion order.
    /// Returns only after every run, including staging cleanup, has finished.
    pub async fn run_all(&self, specs: Vec<Arc<EndpointSpec>>) -> Vec<EndpointReport> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for spec in specs {
            let runner = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let name = spec.name.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                runner.run_endpoint(spec).await
            });
            names.insert(handle.id(), name);
        }

        let mut reports = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, report)) => reports.push(report),
                Err(join_error) => {
                    let endpoint = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| String::from("unknown"));
                    let now = Utc::now();
                    let report = EndpointReport {
                        endpoint,
                        correlation_id: correlation_id(now),
                        started_at: now,
                        duration: Duration::ZERO,
                        outcome: Err(Error::TaskAborted(join_error.to_string())),
                    };
                    report.log();
                    reports.push(report);
                }
            }
        }
        reports
    }
}
