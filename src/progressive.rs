//! Progressive Field Loading
//!
//! Staged fetches of field subsets for one entity: Basic -> Essential ->
//! Extended -> Complete, strictly in order. Each stage issues one throttled,
//! retried call and records its elapsed time. A stage failure is isolated
//! to that stage — already-delivered fields stay available and the failing
//! stage can be retried on its own. The Extended stage is deferred briefly
//! so it does not contend with still-settling foreground work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::ClassifiedError;
use crate::errors::ApiError;
use crate::gateway::ApiGateway;

/// Pause before dispatching the Extended stage.
const EXTENDED_DEFER: Duration = Duration::from_millis(150);

/// Loading stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadStage {
    Basic,
    Essential,
    Extended,
    Complete,
}

impl LoadStage {
    fn next(self) -> LoadStage {
        match self {
            LoadStage::Basic => LoadStage::Essential,
            LoadStage::Essential => LoadStage::Extended,
            LoadStage::Extended | LoadStage::Complete => LoadStage::Complete,
        }
    }

    fn operation_name(self) -> &'static str {
        match self {
            LoadStage::Basic => "load_fields_basic",
            LoadStage::Essential => "load_fields_essential",
            LoadStage::Extended => "load_fields_extended",
            LoadStage::Complete => "load_fields_complete",
        }
    }
}

/// Fetches the field subset named by a stage.
#[async_trait]
pub trait StageFetcher: Send + Sync {
    async fn fetch(&self, stage: LoadStage) -> Result<HashMap<String, Value>, ApiError>;
}

/// Outcome of one stage attempt.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: LoadStage,
    pub elapsed: Duration,
    pub error: Option<ClassifiedError>,
}

/// Loader failure: either the underlying call failed or a caller asked for
/// a stage the linear sequence has not reached.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("stage {0:?} has not been reached yet")]
    StageNotReached(LoadStage),
    #[error(transparent)]
    Api(#[from] ClassifiedError),
}

struct LoaderState {
    current: LoadStage,
    fields: HashMap<String, Value>,
    reports: HashMap<LoadStage, StageReport>,
}

/// Orchestrates the staged loads through the gateway.
pub struct ProgressiveFieldLoader<F: StageFetcher> {
    gateway: Arc<ApiGateway>,
    fetcher: F,
    state: Mutex<LoaderState>,
}

impl<F: StageFetcher> ProgressiveFieldLoader<F> {
    pub fn new(gateway: Arc<ApiGateway>, fetcher: F) -> Self {
        Self {
            gateway,
            fetcher,
            state: Mutex::new(LoaderState {
                current: LoadStage::Basic,
                fields: HashMap::new(),
                reports: HashMap::new(),
            }),
        }
    }

    /// Run stages from the current position until Complete or the first
    /// failure. On failure the loader stays at the failing stage; fields
    /// from completed stages remain available.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), LoadError> {
        loop {
            let stage = self.state.lock().unwrap().current;
            if stage == LoadStage::Complete {
                return Ok(());
            }

            if stage == LoadStage::Extended {
                tokio::select! {
                    _ = tokio::time::sleep(EXTENDED_DEFER) => {}
                    _ = cancel.cancelled() => {
                        return Err(ClassifiedError::cancelled().into());
                    }
                }
            }

            self.run_stage(stage, cancel).await?;
        }
    }

    /// Retry a single stage independently. The stage must already have been
    /// reached by the linear sequence; success at the current stage
    /// advances it.
    pub async fn retry_stage(
        &self,
        stage: LoadStage,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        {
            let state = self.state.lock().unwrap();
            if stage > state.current || stage == LoadStage::Complete {
                return Err(LoadError::StageNotReached(stage));
            }
        }
        self.run_stage(stage, cancel).await
    }

    /// Reset to Basic, discarding fields and reports.
    pub fn restart(&self) {
        let mut state = self.state.lock().unwrap();
        state.current = LoadStage::Basic;
        state.fields.clear();
        state.reports.clear();
        debug!("Progressive loader restarted");
    }

    /// The next stage to run (Complete when finished).
    pub fn stage(&self) -> LoadStage {
        self.state.lock().unwrap().current
    }

    /// Fields accumulated from completed stages.
    pub fn fields(&self) -> HashMap<String, Value> {
        self.state.lock().unwrap().fields.clone()
    }

    /// Per-stage reports, in stage order.
    pub fn reports(&self) -> Vec<StageReport> {
        let state = self.state.lock().unwrap();
        let mut reports: Vec<StageReport> = state.reports.values().cloned().collect();
        reports.sort_by_key(|r| r.stage);
        reports
    }

    async fn run_stage(&self, stage: LoadStage, cancel: &CancellationToken) -> Result<(), LoadError> {
        let started = tokio::time::Instant::now();
        let result = self
            .gateway
            .call(stage.operation_name(), cancel, || self.fetcher.fetch(stage))
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(fields) => {
                let mut state = self.state.lock().unwrap();
                debug!(stage = ?stage, fields = fields.len(), elapsed_ms = elapsed.as_millis() as u64, "Stage loaded");
                state.fields.extend(fields);
                state.reports.insert(
                    stage,
                    StageReport {
                        stage,
                        elapsed,
                        error: None,
                    },
                );
                if state.current == stage {
                    state.current = stage.next();
                }
                Ok(())
            }
            Err(classified) => {
                let mut state = self.state.lock().unwrap();
                state.reports.insert(
                    stage,
                    StageReport {
                        stage,
                        elapsed,
                        error: Some(classified.clone()),
                    },
                );
                Err(classified.into())
            }
        }
    }
}
