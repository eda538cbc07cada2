use serde::{Deserialize, Serialize};

use crate::domain::task::Category;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub confidence: f64,
    pub rationale: String,
    /// Label the capability returned before calibration.
    pub raw_category: Category,
    pub attempts: u32,
}

impl ClassificationResult {
    pub fn was_calibrated_down(&self) -> bool {
        self.raw_category != self.category
    }
}
