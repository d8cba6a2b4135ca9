use crate::pipeline::StageKind;
use crate::types::WorkItem;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StageMetrics {
    pub name: String,
    pub kind: StageKind,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainMetrics {
    pub item: WorkItem,
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
}

impl ChainMetrics {
    pub fn stage_duration_ms(&self, name: &str) -> Option<u128> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .map(|stage| stage.duration_ms)
    }
}
