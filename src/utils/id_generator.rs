//! Lineage, run, and checkpoint id generation.

use uuid::Uuid;

/// Generates globally-unique ids for runs, lineages, and checkpoints.
///
/// All ids are UUID v4 strings; the generator itself is stateless and
/// `Clone + Send + Sync`, so a single instance may be shared across tasks.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_run_id(&self) -> String {
        format!("run-{}", Uuid::new_v4())
    }

    pub fn generate_lineage_id(&self) -> String {
        format!("lineage-{}", Uuid::new_v4())
    }

    pub fn generate_checkpoint_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn generate_task_id(&self) -> String {
        format!("task-{}", Uuid::new_v4())
    }
}
