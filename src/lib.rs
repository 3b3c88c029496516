//! A compiled text-template engine: lexes T4-style templates
//! (`<#@ #>`/`<#+ #>`/`<#= #>`/`<# #>`), resolves `include`/`import`/
//! `assembly`/`var` directives across a bundle with cycle detection,
//! generates one Rust source module per template, and drives an external
//! [`host::CodeCompiler`] to produce a loadable, renderable artifact.
//!
//! The pipeline (see `DESIGN.md` for the grounding of each stage):
//! [`block`] → [`directive`] → [`resolver`] → [`types`] → [`codegen`] →
//! [`cache`]/[`engine`].

pub mod block;
pub mod cache;
pub mod codegen;
pub mod directive;
pub mod engine;
pub mod error;
pub mod host;
pub mod model;
pub mod resolver;
pub mod types;

pub use engine::{Engine, EngineDeps};
pub use error::Error;
pub use host::{
    Artifact, CodeCompiler, CodeEmitter, CompilationUnit, CompiledModule, FsSourceLoader,
    PrettyplaseEmitter, RenderContext, SourceLoader, TemplateRuntime,
};
pub use model::{Bundle, EngineOptions, Status, TemplateItem};
