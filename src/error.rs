//! Error kinds surfaced to callers of the engine.
//!
//! One flat enum: every variant is independently distinguishable by the
//! caller and carries the context needed to act on it (a block reference,
//! a cycle, a line number, ...).

use thiserror::Error;

/// A fatal failure anywhere in the pipeline, from lexing to render.
#[derive(Debug, Error)]
pub enum Error {
    /// A public call received a malformed argument (e.g. both `name` and
    /// `content` empty in `add_template_item`).
    #[error("argument error: {0}")]
    Argument(String),

    /// An operation was invoked in the wrong lifecycle phase (e.g. mutating
    /// a bundle that has already been processed).
    #[error("state error: {0}")]
    State(String),

    /// The lexer could not finish scanning a template (unterminated
    /// delimiter).
    #[error("parse error in '{name}' at line {line}: {reason}")]
    Parse {
        name: String,
        line: usize,
        reason: String,
    },

    /// A directive was malformed: unknown name, duplicate `template`
    /// directive on one item, or a missing required parameter.
    #[error("directive error in '{name}' at line {line}: {reason}")]
    Directive {
        name: String,
        line: usize,
        reason: String,
    },

    /// The include graph contains a cycle.
    #[error("include cycle: {}", .names.join(" -> "))]
    Cycle { names: Vec<String> },

    /// A `var type="…"` string could not be resolved to a host type.
    #[error("could not resolve type '{type_name}' for var '{var_name}': {reason}")]
    TypeResolution {
        var_name: String,
        type_name: String,
        reason: String,
    },

    /// The external compiler reported at least one error.
    #[error("compilation error: {message}{}", snippet.as_deref().map(|s| format!("\n{s}")).unwrap_or_default())]
    Compilation {
        message: String,
        snippet: Option<String>,
    },

    /// `create_instance`/`render` was asked for a class without a name and
    /// the artifact has zero or more than one candidate.
    #[error("ambiguous template class: {0}")]
    Ambiguity(String),

    /// The compiled template raised a failure while rendering.
    #[error("execution error: {0}")]
    Execution(String),

    /// Propagated failure from a `SourceLoader`.
    #[error("source loader error: {0}")]
    Io(String),
}
