//! # Engine Options
//!
//! Runtime configuration for [`TemplateEngine`](crate::engine::TemplateEngine).
//! Options deserialize from camelCase JSON so a host can ship them next to
//! its other settings.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    /// Attribute that keys an element into the directive side table while
    /// the template is being bound. Removed from the host tree afterwards.
    pub node_attribute: String,
    /// Remove attribute-directive syntax no rule claimed.
    pub strip_unclaimed: bool,
    /// Upper bound on the iterations of a single loop.
    pub max_loop_iterations: usize,
    /// Escape interpolated values as HTML text.
    pub escape_html: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            node_attribute: "data-tpl-node".to_string(),
            strip_unclaimed: true,
            max_loop_iterations: 10_000,
            escape_html: true,
        }
    }
}

impl EngineOptions {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let options: EngineOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let name = self.node_attribute.as_str();
        let valid = !name.is_empty()
            && name.starts_with(|c: char| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(EngineError::Options(serde::de::Error::custom(format!(
                "nodeAttribute `{}` is not a valid attribute name",
                name
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ERR_OPTIONS;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = EngineOptions::from_json(r#"{ "maxLoopIterations": 5, "escapeHtml": false }"#).unwrap();
        assert_eq!(options.max_loop_iterations, 5);
        assert!(!options.escape_html);
        assert_eq!(options.node_attribute, "data-tpl-node");
        assert!(options.strip_unclaimed);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = EngineOptions::from_json(r#"{ "nodeAttribute": "1 bad" }"#).unwrap_err();
        assert_eq!(err.code(), ERR_OPTIONS);

        let err = EngineOptions::from_json(r#"{ "maxLoopIterations": "many" }"#).unwrap_err();
        assert_eq!(err.code(), ERR_OPTIONS);
    }
}
