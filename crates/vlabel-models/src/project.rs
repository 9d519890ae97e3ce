//! Project model.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::ProjectId;

/// An annotation project. Owns videos and the label vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Unique project ID
    pub id: ProjectId,

    /// Project name (unique across projects)
    pub name: String,

    /// Frame extraction rate in frames per second
    pub frame_extraction_rate: f64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Create a new project with the given extraction rate.
    pub fn new(name: impl Into<String>, frame_extraction_rate: f64) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            frame_extraction_rate,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_creation() {
        let project = Project::new("traffic-cams", 2.0);
        assert_eq!(project.name, "traffic-cams");
        assert!((project.frame_extraction_rate - 2.0).abs() < f64::EPSILON);
    }
}
