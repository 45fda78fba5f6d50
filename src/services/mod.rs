mod error;
mod retention_plugins;
mod retention_scripts;
pub mod script_sync;

use std::sync::Arc;

pub use error::{RetentionError, RetentionResult};
pub use retention_plugins::{RetentionPluginService, Transition, UpdateOutcome, plan_transition};
pub use retention_scripts::RetentionScriptService;
pub use script_sync::{PropagationFailure, ScriptSynchronizer};

use crate::{crypto::FieldCipher, db::DbPool, scheduler::ScriptService};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub retention_plugins: RetentionPluginService,
    pub retention_scripts: RetentionScriptService,
}

impl Services {
    pub fn new(
        db: Arc<DbPool>,
        scheduler: Arc<dyn ScriptService>,
        cipher: Arc<dyn FieldCipher>,
    ) -> Self {
        let sync = ScriptSynchronizer::new(scheduler);
        Self {
            retention_plugins: RetentionPluginService::new(
                db.clone(),
                sync.clone(),
                cipher.clone(),
            ),
            retention_scripts: RetentionScriptService::new(db, sync, cipher),
        }
    }
}
