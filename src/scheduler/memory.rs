//! In-memory scheduler for service-level tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    CallerCredential, CreateScriptRequest, CronScript, SchedulerError, SchedulerResult,
    ScriptService, UpdateScriptRequest,
};

#[derive(Default)]
struct State {
    scripts: BTreeMap<Uuid, CronScript>,
    creates_before_failure: Option<usize>,
    failing_updates: HashSet<Uuid>,
    deletes_before_failure: Option<usize>,
    fail_reads: bool,
    credentials: Vec<String>,
}

/// A `ScriptService` that keeps scripts in a map and can be told to fail.
#[derive(Default)]
pub struct InMemoryScriptService {
    state: Mutex<State>,
}

fn injected_failure() -> SchedulerError {
    SchedulerError::Api {
        status: 500,
        message: "injected failure".into(),
    }
}

impl InMemoryScriptService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more creates succeed, then fail every create after that.
    pub fn fail_creates_after(&self, n: usize) {
        self.state.lock().creates_before_failure = Some(n);
    }

    pub fn fail_updates_for(&self, script_id: Uuid) {
        self.state.lock().failing_updates.insert(script_id);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().deletes_before_failure = fail.then_some(0);
    }

    /// Let `n` more deletes succeed, then fail every delete after that.
    pub fn fail_deletes_after(&self, n: usize) {
        self.state.lock().deletes_before_failure = Some(n);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Insert a script directly, bypassing failure injection.
    pub fn insert(&self, script: CronScript) {
        self.state.lock().scripts.insert(script.id, script);
    }

    /// Remove a script directly, as if it was deleted out of band.
    pub fn remove(&self, script_id: Uuid) {
        self.state.lock().scripts.remove(&script_id);
    }

    pub fn script(&self, script_id: Uuid) -> Option<CronScript> {
        self.state.lock().scripts.get(&script_id).cloned()
    }

    pub fn script_ids(&self) -> Vec<Uuid> {
        self.state.lock().scripts.keys().copied().collect()
    }

    pub fn script_count(&self) -> usize {
        self.state.lock().scripts.len()
    }

    /// Tokens seen on every call, in order.
    pub fn credentials_seen(&self) -> Vec<String> {
        self.state.lock().credentials.clone()
    }
}

#[async_trait]
impl ScriptService for InMemoryScriptService {
    async fn create_script(
        &self,
        credential: &CallerCredential,
        request: CreateScriptRequest,
    ) -> SchedulerResult<Uuid> {
        let mut state = self.state.lock();
        state.credentials.push(credential.token().to_string());
        if let Some(remaining) = state.creates_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(injected_failure());
            }
            *remaining -= 1;
        }

        let id = Uuid::new_v4();
        state.scripts.insert(
            id,
            CronScript {
                id,
                script: request.script,
                cluster_ids: request.cluster_ids,
                configs: request.configs,
                enabled: true,
                frequency_s: request.frequency_s,
            },
        );
        Ok(id)
    }

    async fn update_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
        request: UpdateScriptRequest,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        state.credentials.push(credential.token().to_string());
        if state.failing_updates.contains(&script_id) {
            return Err(injected_failure());
        }

        let script = state
            .scripts
            .get_mut(&script_id)
            .ok_or(SchedulerError::NotFound(script_id))?;
        if let Some(body) = request.script {
            script.script = body;
        }
        if let Some(cluster_ids) = request.cluster_ids {
            script.cluster_ids = cluster_ids;
        }
        if let Some(configs) = request.configs {
            script.configs = configs;
        }
        if let Some(enabled) = request.enabled {
            script.enabled = enabled;
        }
        if let Some(frequency_s) = request.frequency_s {
            script.frequency_s = frequency_s;
        }
        Ok(())
    }

    async fn delete_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        state.credentials.push(credential.token().to_string());
        if let Some(remaining) = state.deletes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(injected_failure());
            }
            *remaining -= 1;
        }
        state
            .scripts
            .remove(&script_id)
            .map(|_| ())
            .ok_or(SchedulerError::NotFound(script_id))
    }

    async fn get_script(
        &self,
        credential: &CallerCredential,
        script_id: Uuid,
    ) -> SchedulerResult<CronScript> {
        let mut state = self.state.lock();
        state.credentials.push(credential.token().to_string());
        if state.fail_reads {
            return Err(injected_failure());
        }
        state
            .scripts
            .get(&script_id)
            .cloned()
            .ok_or(SchedulerError::NotFound(script_id))
    }

    async fn get_scripts(
        &self,
        credential: &CallerCredential,
        script_ids: &[Uuid],
    ) -> SchedulerResult<Vec<CronScript>> {
        let mut state = self.state.lock();
        state.credentials.push(credential.token().to_string());
        if state.fail_reads {
            return Err(injected_failure());
        }
        Ok(script_ids
            .iter()
            .filter_map(|id| state.scripts.get(id).cloned())
            .collect())
    }
}
