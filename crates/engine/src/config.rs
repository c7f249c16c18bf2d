use crate::error::TransformError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use xsltvm_output::OutputSpecification;

pub const DEFAULT_INSTRUCTION_BUDGET: usize = 10_000;
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 2_000;

/// Settings for one transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Instructions executed per `step` before the driver pauses.
    pub instruction_budget: usize,
    pub max_recursion_depth: usize,
    /// Stop in `NeedsOutputDecision` instead of choosing the detected method.
    pub defer_output_decision: bool,
    /// When set, every output call is also serialized into this file.
    pub tee_path: Option<PathBuf>,
    /// Overrides the stylesheet's `xsl:output` when present.
    pub output: Option<OutputSpecification>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            instruction_budget: DEFAULT_INSTRUCTION_BUDGET,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            defer_output_decision: false,
            tee_path: None,
            output: None,
        }
    }
}

impl TransformConfig {
    pub fn from_json(json: &str) -> Result<Self, TransformError> {
        let config: TransformConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TransformError> {
        if self.instruction_budget == 0 {
            return Err(TransformError::Config(
                "instruction_budget must be at least 1".into(),
            ));
        }
        if self.max_recursion_depth == 0 {
            return Err(TransformError::Config(
                "max_recursion_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsltvm_output::OutputMethod;

    #[test]
    fn defaults() {
        let config = TransformConfig::default();
        assert_eq!(config.instruction_budget, 10_000);
        assert_eq!(config.max_recursion_depth, 2_000);
        assert!(!config.defer_output_decision);
        assert!(config.tee_path.is_none());
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = TransformConfig::from_json(
            r#"{ "instruction_budget": 5, "output": { "method": "text" } }"#,
        )
        .unwrap();
        assert_eq!(config.instruction_budget, 5);
        assert_eq!(config.max_recursion_depth, DEFAULT_MAX_RECURSION_DEPTH);
        assert_eq!(
            config.output.and_then(|o| o.method),
            Some(OutputMethod::Text)
        );
    }

    #[test]
    fn rejects_zero_budget() {
        let err = TransformConfig::from_json(r#"{ "instruction_budget": 0 }"#).unwrap_err();
        assert!(matches!(err, TransformError::Config(_)));
        assert!(TransformConfig::from_json("{ not json").is_err());
    }
}
