//! Data model: `Block`/`Directive` live in their own modules;
//! this module holds `TemplateItem` and the bundle (`Engine`) shape that
//! the façade in `engine.rs` operates on.

use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};

use crate::block::Block;
use crate::types::TypeBinding;

/// Monotonically non-decreasing lifecycle state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Init,
    Processed,
    Compiled,
}

/// Engine-level knobs that are not part of the bundle's observable data
/// model but shape codegen/compilation, threaded explicitly through the
/// pipeline rather than read from process-wide flags.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub debug_line_numbers: bool,
    pub debug: bool,
    /// Scratch directory for debug-mode source dumps.
    /// `None` defers to `<temp dir>/t4engine-scratch`.
    pub debug_scratch_dir: Option<PathBuf>,
    pub default_base_class: Option<String>,
    /// Base directory persisted-artifact search paths are resolved
    /// against. `None` defers to the current directory.
    pub base_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            debug_line_numbers: false,
            debug: false,
            debug_scratch_dir: None,
            default_base_class: None,
            base_dir: None,
        }
    }
}

/// The bundle-level aggregate.
#[derive(Debug)]
pub struct Bundle {
    pub templates: Vec<TemplateItem>,
    pub assembly_references: IndexSet<String>,
    pub imports_global: Option<IndexSet<String>>,
    pub assembly_name: Option<String>,
    pub namespace: String,
    pub status: Status,
    pub errors: Vec<String>,
    pub options: EngineOptions,
}

impl Bundle {
    pub fn new(namespace: impl Into<String>, options: EngineOptions) -> Self {
        Bundle {
            templates: Vec::new(),
            assembly_references: IndexSet::new(),
            imports_global: None,
            assembly_name: None,
            namespace: namespace.into(),
            status: Status::Init,
            errors: Vec::new(),
            options,
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.templates.iter().position(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// One template in the bundle.
#[derive(Debug, Clone)]
pub struct TemplateItem {
    pub name: String,
    pub class_name: String,
    pub base_class_name: Option<String>,
    pub content: String,
    pub blocks: Vec<Block>,
    pub imports: IndexSet<String>,
    pub vars: IndexMap<String, TypeBinding>,
    pub included: bool,
    pub processed: bool,
    pub source: Option<String>,
}

impl TemplateItem {
    pub fn new(name: &str, content: &str) -> Self {
        let class_name = derive_class_name(name);
        TemplateItem {
            name: name.to_string(),
            class_name,
            base_class_name: None,
            content: content.to_string(),
            blocks: Vec::new(),
            imports: IndexSet::new(),
            vars: IndexMap::new(),
            included: false,
            processed: false,
            source: None,
        }
    }
}

/// Derive a valid Rust identifier from a raw template name: strip
/// directory and extension, replace non-identifier characters with `_`,
/// and prefix with `_` if the result wouldn't start as a valid identifier.
pub fn derive_class_name(raw: &str) -> String {
    let stem = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw);
    let stem = match stem.rsplit_once('.') {
        Some((base, _ext)) if !base.is_empty() => base,
        _ => stem,
    };

    let mut out = String::with_capacity(stem.len() + 1);
    for (i, c) in stem.chars().enumerate() {
        if c.is_alphanumeric() || c == '_' {
            if i == 0 && !(c.is_alphabetic() || c == '_') {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().map(|c| c.is_numeric()).unwrap_or(false) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_from_plain_name() {
        let _ = env_logger::builder().is_test(true).try_init();
        assert_eq!(derive_class_name("A"), "A");
    }

    #[test]
    fn strips_dir_and_extension() {
        let _ = env_logger::builder().is_test(true).try_init();
        assert_eq!(derive_class_name("templates/foo.tt"), "foo");
    }

    #[test]
    fn replaces_invalid_chars() {
        let _ = env_logger::builder().is_test(true).try_init();
        assert_eq!(derive_class_name("my-template.tt"), "my_template");
    }

    #[test]
    fn prefixes_when_leading_char_invalid() {
        let _ = env_logger::builder().is_test(true).try_init();
        assert_eq!(derive_class_name("9lives"), "_9lives");
    }
}
