//! External interfaces as Rust traits, plus the concrete helpers
//! this crate ships: `RenderContext` (the `Output`/`Data` runtime state),
//! `FsSourceLoader` (real file I/O for includes) and `PrettyplaseEmitter`
//! (the default `CodeEmitter`, formatting generated source with
//! `prettyplease` the way `ruitl`'s codegen pairs `syn` + `prettyplease`).
//!
//! The host-language compiler/loader itself (`CodeCompiler`) is an
//! external collaborator this crate only defines the seam for; no
//! implementation that actually invokes `rustc` ships here.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codegen::GeneratedClass;
use crate::error::Error;

/// Loads include sources from the filesystem.
pub trait SourceLoader: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Result<String, Error>;
    /// Resolve `relative` against the directory of `base`. When `base` has
    /// no directory component, `relative` is returned unchanged (a
    /// non-path include name resolves as itself).
    fn resolve(&self, base: &str, relative: &str) -> String;
}

/// A `SourceLoader` backed by real files on disk.
#[derive(Debug, Default, Clone)]
pub struct FsSourceLoader;

impl SourceLoader for FsSourceLoader {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }

    fn read(&self, path: &str) -> Result<String, Error> {
        fs::read_to_string(path).map_err(|e| Error::Io(format!("{path}: {e}")))
    }

    fn resolve(&self, base: &str, relative: &str) -> String {
        match Path::new(base).parent() {
            Some(dir) if dir.as_os_str().len() > 0 => {
                dir.join(relative).to_string_lossy().into_owned()
            }
            _ => relative.to_string(),
        }
    }
}

/// Turns a [`GeneratedClass`] into formatted host-language source text.
pub trait CodeEmitter: Send + Sync {
    fn emit(&self, class: &GeneratedClass) -> Result<String, Error>;
}

/// Default `CodeEmitter`: builds the class as a `syn::File` via `quote!`
/// and formats it with `prettyplease`, the same pairing `ruitl` uses for
/// its generated-code output.
#[derive(Debug, Default, Clone)]
pub struct PrettyplaseEmitter;

impl CodeEmitter for PrettyplaseEmitter {
    fn emit(&self, class: &GeneratedClass) -> Result<String, Error> {
        let file: syn::File = syn::parse_str(&class.source).map_err(|e| Error::Compilation {
            message: format!("generated code for '{}' failed to parse: {e}", class.class_name),
            snippet: None,
        })?;
        Ok(prettyplease::unparse(&file))
    }
}

/// One compilation request: every non-included item's generated source,
/// the bundle's assembly references, the persisted output name (if any),
/// and whether to compile in debug mode.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub sources: Vec<(String, String)>,
    pub references: Vec<String>,
    pub output: Option<String>,
    pub debug: bool,
}

/// The `Output`/`Data` pair every `TemplateRuntime` exposes. Rust has
/// no class inheritance, so generated classes hold one of these by
/// composition instead of extending a base class (see `DESIGN.md`,
/// "`TemplateRuntime` inheritance").
#[derive(Default)]
pub struct RenderContext {
    pub output: String,
    pub data: HashMap<String, Box<dyn Any + Send>>,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("output", &self.output)
            .field("data_keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RenderContext {
    pub fn write(&mut self, value: impl fmt::Display) {
        use std::fmt::Write as _;
        let _ = write!(self.output, "{value}");
    }

    pub fn get_data<T: 'static + Clone>(&self, name: &str) -> Option<T> {
        self.data.get(name).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn set_data<T: 'static + Send>(&mut self, name: &str, value: T) {
        self.data.insert(name.to_string(), Box::new(value));
    }
}

/// A generated template class once loaded.
pub trait TemplateRuntime: Send {
    /// User-extensible hook, run once before `render`.
    fn initialize(&mut self) {}
    /// Implemented by the generated class.
    fn render(&mut self) -> Result<String, Error>;
    fn context_mut(&mut self) -> &mut RenderContext;
}

/// One class inside a compiled [`Artifact`].
pub trait CompiledModule: Send + Sync {
    fn class_names(&self) -> Vec<String>;
    fn instantiate(&self, class_name: &str) -> Result<Box<dyn TemplateRuntime>, Error>;
}

/// A loadable module produced from the bundle's generated source,
/// identified by the fingerprint that keyed it in the artifact cache.
#[derive(Clone)]
pub struct Artifact {
    pub fingerprint: u64,
    module: Arc<dyn CompiledModule>,
}

impl Artifact {
    pub fn new(fingerprint: u64, module: Arc<dyn CompiledModule>) -> Self {
        Artifact { fingerprint, module }
    }

    pub fn class_names(&self) -> Vec<String> {
        self.module.class_names()
    }

    pub fn instantiate(&self, class_name: &str) -> Result<Box<dyn TemplateRuntime>, Error> {
        self.module.instantiate(class_name)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("fingerprint", &self.fingerprint)
            .field("classes", &self.module.class_names())
            .finish()
    }
}

/// Compiles generated sources into a loadable [`Artifact`]. This crate
/// defines the seam only. A real implementation shells out to the host
/// toolchain (or JITs) and `dlopen`s the result; see `tests/engine.rs`
/// for a test double.
pub trait CodeCompiler: Send + Sync {
    fn compile(&self, unit: &CompilationUnit) -> Result<Artifact, Error>;

    /// Load a previously persisted artifact from `path` instead of
    /// recompiling, if this compiler supports it. `Ok(None)` means "no
    /// usable artifact here", not a failure; the default never finds one.
    fn load_persisted(&self, _path: &Path) -> Result<Option<Artifact>, Error> {
        Ok(None)
    }
}

/// Where a persisted artifact is searched for on next startup.
pub fn persisted_artifact_search_paths(assembly_name: &str, base_dir: &Path) -> Vec<PathBuf> {
    let as_given = PathBuf::from(assembly_name);
    let mut paths = Vec::new();
    if as_given.is_absolute() {
        paths.push(as_given);
    } else {
        paths.push(base_dir.join(assembly_name));
        paths.push(base_dir.join("Bin").join(assembly_name));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_loader_resolve_is_identity_without_directory() {
        let _ = env_logger::builder().is_test(true).try_init();
        let loader = FsSourceLoader;
        assert_eq!(loader.resolve("main", "tail"), "tail");
    }

    #[test]
    fn fs_loader_resolve_relative_to_directory() {
        let _ = env_logger::builder().is_test(true).try_init();
        let loader = FsSourceLoader;
        let resolved = loader.resolve("templates/main.tt", "tail.tt");
        assert_eq!(resolved, PathBuf::from("templates").join("tail.tt").to_string_lossy());
    }

    #[test]
    fn render_context_write_and_get_data() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = RenderContext::default();
        ctx.write("hi ");
        ctx.write(7);
        assert_eq!(ctx.output, "hi 7");
        ctx.set_data("n", 42i32);
        assert_eq!(ctx.get_data::<i32>("n"), Some(42));
    }

    #[test]
    fn persisted_search_paths_absolute_vs_relative() {
        let _ = env_logger::builder().is_test(true).try_init();
        let base = Path::new("/app");
        let paths = persisted_artifact_search_paths("/abs/out.so", base);
        assert_eq!(paths, vec![PathBuf::from("/abs/out.so")]);

        let paths = persisted_artifact_search_paths("out.so", base);
        assert_eq!(paths, vec![base.join("out.so"), base.join("Bin").join("out.so")]);
    }
}
