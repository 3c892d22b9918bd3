//! Error types shared by the expression layer, the rule pipeline and the
//! public engine surface.
//!
//! Only [`EngineError`] crosses the public `parse`/`bind` boundary. Expression
//! and rule failures are logged and swallowed by the engine, with the single
//! exception of static-directive misuse which is escalated.

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_STATIC_DIRECTIVE: &str = "T-ERR-STATIC-001";
pub const ERR_ALREADY_BOUND: &str = "T-ERR-BIND-001";
pub const ERR_NOT_BOUND: &str = "T-ERR-BIND-002";
pub const ERR_DISPOSED: &str = "T-ERR-LIFECYCLE-001";
pub const ERR_OPTIONS: &str = "T-ERR-OPTIONS-001";

fn guarantee(code: &str) -> &'static str {
    match code {
        ERR_STATIC_DIRECTIVE => {
            "Ref and injection targets are resolved once; they never follow a reactive value."
        }
        ERR_ALREADY_BOUND => "A container holds at most one copy of an instance.",
        ERR_NOT_BOUND => "Only bound containers can be unbound.",
        ERR_DISPOSED => "A disposed instance never touches the host tree again.",
        ERR_OPTIONS => "Engine options are validated before any template is parsed.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("'{0}' is not defined")]
    UnknownIdentifier(String),

    #[error("'{0}' is not a function")]
    NotCallable(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("invalid assignment target: {0}")]
    InvalidAssignment(String),

    #[error("asynchronous value awaited in a synchronous context: {0}")]
    Suspended(String),

    #[error("{0}")]
    Native(String),
}

impl EvalError {
    pub fn type_error(message: impl Into<String>) -> Self {
        EvalError::Type(message.into())
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

// ═══════════════════════════════════════════════════════════════════════════════
// RULE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum RuleError {
    /// A static-only directive (ref, injection) resolved its target to a
    /// reactive value.
    #[error("`{directive}` target `{expression}` evaluated to a reactive value")]
    ReactiveStaticTarget {
        directive: &'static str,
        expression: String,
    },

    #[error("`{directive}` target `{expression}` did not evaluate to a name (got {found})")]
    InvalidTarget {
        directive: &'static str,
        expression: String,
        found: &'static str,
    },

    #[error("malformed directive: {0}")]
    Malformed(String),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Engine(#[from] Box<EngineError>),
}

impl RuleError {
    /// Static-directive misuse is the one failure surfaced to callers instead
    /// of being logged and skipped.
    pub fn is_static_violation(&self) -> bool {
        match self {
            RuleError::ReactiveStaticTarget { .. } => true,
            RuleError::Engine(inner) => matches!(**inner, EngineError::StaticDirective { .. }),
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("static directive `{directive}` cannot take a reactive value (`{expression}`)")]
    StaticDirective {
        directive: String,
        expression: String,
    },

    #[error("instance is already bound to this container")]
    AlreadyBound,

    #[error("instance is not bound to this container")]
    NotBound,

    #[error("template instance has been disposed")]
    Disposed,

    #[error("invalid engine options: {0}")]
    Options(#[from] serde_json::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::StaticDirective { .. } => ERR_STATIC_DIRECTIVE,
            EngineError::AlreadyBound => ERR_ALREADY_BOUND,
            EngineError::NotBound => ERR_NOT_BOUND,
            EngineError::Disposed => ERR_DISPOSED,
            EngineError::Options(_) => ERR_OPTIONS,
        }
    }

    pub fn guarantee(&self) -> &'static str {
        guarantee(self.code())
    }
}

impl From<EngineError> for RuleError {
    fn from(err: EngineError) -> Self {
        RuleError::Engine(Box::new(err))
    }
}

impl RuleError {
    /// Split off static-directive misuse as an [`EngineError`]; every other
    /// failure is handed back for logging.
    pub fn into_static_violation(self) -> Result<EngineError, RuleError> {
        match self {
            RuleError::ReactiveStaticTarget {
                directive,
                expression,
            } => Ok(EngineError::StaticDirective {
                directive: directive.to_string(),
                expression,
            }),
            RuleError::Engine(inner) if matches!(*inner, EngineError::StaticDirective { .. }) => {
                Ok(*inner)
            }
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_violation_detection() {
        let err = RuleError::ReactiveStaticTarget {
            directive: "ref",
            expression: "box".to_string(),
        };
        assert!(err.is_static_violation());

        let nested = RuleError::Engine(Box::new(EngineError::StaticDirective {
            directive: "inject".to_string(),
            expression: "target".to_string(),
        }));
        assert!(nested.is_static_violation());

        let eval = RuleError::Eval(EvalError::UnknownIdentifier("x".to_string()));
        assert!(!eval.is_static_violation());
    }

    #[test]
    fn test_static_violation_converts_to_engine_error() {
        let err = RuleError::ReactiveStaticTarget {
            directive: "ref",
            expression: "box".to_string(),
        }
        .into_static_violation()
        .unwrap();
        assert_eq!(err.code(), ERR_STATIC_DIRECTIVE);
        assert!(err.to_string().contains("box"));
        assert!(err.guarantee().contains("reactive"));

        let other = RuleError::Malformed("x".to_string()).into_static_violation();
        assert!(other.is_err());
    }
}
