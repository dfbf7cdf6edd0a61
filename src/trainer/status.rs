//! Wire shapes for `trainer_status.json` and `trainer_checkpoint.json`.
//! Both are plain JSON, re-read by the GUI and by the trainer itself on
//! resume.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrainerState {
    Training,
    Interrupted,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerStatus {
    pub state: TrainerState,
    pub coin: String,
    pub timeframe: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerCheckpoint {
    pub coin: String,
    pub tf_index: usize,
    pub timestamp: i64,
}
