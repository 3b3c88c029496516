//! Engine façade: the `Init -> Processed -> Compiled` state
//! machine callers drive, plus the two convenience entry points
//! (`process_file`/`process_template`) and the process-wide engine cache.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::cache;
use crate::codegen;
use crate::error::Error;
use crate::host::{Artifact, CodeCompiler, CodeEmitter, CompilationUnit, SourceLoader, TemplateRuntime};
use crate::model::{Bundle, EngineOptions, Status, TemplateItem};
use crate::resolver;

/// One compiled-template-pipeline instance: a [`Bundle`] plus the external
/// collaborators it needs to get from source text to a rendered string.
pub struct Engine {
    bundle: Bundle,
    loader: Arc<dyn SourceLoader>,
    emitter: Arc<dyn CodeEmitter>,
    compiler: Arc<dyn CodeCompiler>,
    artifact: Option<Artifact>,
}

impl Engine {
    pub fn new(
        namespace: impl Into<String>,
        options: EngineOptions,
        loader: Arc<dyn SourceLoader>,
        emitter: Arc<dyn CodeEmitter>,
        compiler: Arc<dyn CodeCompiler>,
    ) -> Self {
        Engine {
            bundle: Bundle::new(namespace, options),
            loader,
            emitter,
            compiler,
            artifact: None,
        }
    }

    pub fn status(&self) -> Status {
        self.bundle.status
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Add or update a template item.
    pub fn add_template_item(&mut self, name: &str, content: &str) -> Result<(), Error> {
        if self.bundle.status >= Status::Processed {
            return Err(Error::State(
                "add_template_item: bundle has already been processed".to_string(),
            ));
        }
        if name.is_empty() && content.is_empty() {
            return Err(Error::Argument(
                "add_template_item requires a non-empty name or content".to_string(),
            ));
        }
        if let Some(idx) = self.bundle.find_by_name(name) {
            self.bundle.templates[idx].content = content.to_string();
            self.bundle.templates[idx].blocks.clear();
        } else {
            self.bundle.templates.push(TemplateItem::new(name, content));
        }
        Ok(())
    }

    /// Opt this bundle into on-disk artifact persistence. Unlike
    /// `class_name`/`imports`, this is never derived automatically (see
    /// `DESIGN.md`); only an explicit call sets it.
    pub fn set_assembly_name(&mut self, name: impl Into<String>) -> Result<(), Error> {
        if self.bundle.status >= Status::Processed {
            return Err(Error::State(
                "set_assembly_name: bundle has already been processed".to_string(),
            ));
        }
        self.bundle.assembly_name = Some(name.into());
        Ok(())
    }

    /// Run the lexer + resolver over every item. Idempotent: a second
    /// call after success is a no-op.
    pub fn process(&mut self) -> Result<(), Error> {
        if self.bundle.status >= Status::Processed {
            return Ok(());
        }
        if self.bundle.templates.is_empty() {
            return Err(Error::State(
                "process() requires at least one template item".to_string(),
            ));
        }
        resolver::process(&mut self.bundle, self.loader.as_ref())?;
        self.bundle.status = Status::Processed;
        Ok(())
    }

    /// Generate + compile every item. Implicitly calls `process()` if
    /// needed. Idempotent: a second call returns without invoking the
    /// compiler again.
    pub fn compile(&mut self) -> Result<(), Error> {
        if self.bundle.status < Status::Processed {
            self.process()?;
        }
        if self.bundle.status == Status::Compiled {
            return Ok(());
        }

        if let Some(artifact) = self.load_persisted_artifact()? {
            log::debug!("loaded persisted artifact, skipping recompilation");
            self.artifact = Some(artifact);
            self.bundle.status = Status::Compiled;
            return Ok(());
        }

        let namespace = self.bundle.namespace.clone();
        let default_base = self.bundle.options.default_base_class.clone();
        let debug_line_numbers = self.bundle.options.debug_line_numbers;

        let mut all_sources = Vec::with_capacity(self.bundle.templates.len());
        let mut fingerprint_sources = Vec::new();
        for idx in 0..self.bundle.templates.len() {
            let class = {
                let item = &self.bundle.templates[idx];
                codegen::build_class(item, &namespace, default_base.as_deref(), debug_line_numbers)?
            };
            let emitted = self.emitter.emit(&class)?;
            if !self.bundle.templates[idx].included {
                fingerprint_sources.push(emitted.clone());
            }
            self.bundle.templates[idx].source = Some(emitted.clone());
            all_sources.push((class.class_name, emitted));
        }

        if self.bundle.options.debug {
            self.write_debug_scratch(&all_sources);
        }

        let key = cache::fingerprint(&fingerprint_sources);
        let unit = CompilationUnit {
            sources: all_sources,
            references: self.bundle.assembly_references.iter().cloned().collect(),
            output: self.bundle.assembly_name.clone(),
            debug: self.bundle.options.debug,
        };
        let compiler = self.compiler.clone();
        let artifact = cache::artifact_get_or_compile(key, move || compiler.compile(&unit));
        let artifact = artifact.map_err(|e| self.enrich_error(e))?;

        if self.bundle.options.debug {
            self.cleanup_debug_scratch();
        }

        self.artifact = Some(artifact);
        self.bundle.status = Status::Compiled;
        Ok(())
    }

    /// Construct a fresh instance of `class_name`, implicitly compiling
    /// first if needed.
    pub fn create_instance(&mut self, class_name: Option<&str>) -> Result<Box<dyn TemplateRuntime>, Error> {
        if self.bundle.status != Status::Compiled {
            self.compile()?;
        }
        let artifact = self.artifact.as_ref().expect("status Compiled implies an artifact is present");
        let names = artifact.class_names();
        let resolved = match class_name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                if names.len() == 1 {
                    names[0].clone()
                } else {
                    return Err(Error::Ambiguity(format!(
                        "create_instance needs an explicit class name ({} candidates: {})",
                        names.len(),
                        names.join(", "),
                    )));
                }
            }
        };
        artifact.instantiate(&resolved)
    }

    /// Instantiate, bind `data`, and render.
    pub fn render(
        &mut self,
        class_name: Option<&str>,
        data: HashMap<String, Box<dyn Any + Send>>,
    ) -> Result<String, Error> {
        let mut instance = self.create_instance(class_name)?;
        {
            let ctx = instance.context_mut();
            for (k, v) in data {
                ctx.data.insert(k, v);
            }
        }
        instance.initialize();
        instance.render().map_err(|e| match e {
            Error::Execution(_) => e,
            other => Error::Execution(other.to_string()),
        })
    }

    /// Search for a pre-existing on-disk artifact for `assembly_name` and
    /// load it through the compiler. `Ok(None)` means no persisted
    /// artifact was found (or `assembly_name` was never set); this is not
    /// an error.
    fn load_persisted_artifact(&self) -> Result<Option<Artifact>, Error> {
        let Some(assembly_name) = self.bundle.assembly_name.as_deref() else {
            return Ok(None);
        };
        let base_dir = self
            .bundle
            .options
            .base_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        for candidate in crate::host::persisted_artifact_search_paths(assembly_name, &base_dir) {
            if !candidate.is_file() {
                continue;
            }
            if let Some(artifact) = self.compiler.load_persisted(&candidate)? {
                return Ok(Some(artifact));
            }
        }
        Ok(None)
    }

    fn scratch_dir(&self) -> PathBuf {
        self.bundle
            .options
            .debug_scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("t4engine-scratch"))
    }

    /// Write original + generated sources to the scratch directory.
    /// Best-effort: a write failure is logged, never raised. Losing
    /// debug artifacts must not fail a compile.
    fn write_debug_scratch(&self, all_sources: &[(String, String)]) {
        let dir = self.scratch_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("debug scratch dir {} unavailable: {e}", dir.display());
            return;
        }
        for (item, (_, generated)) in self.bundle.templates.iter().zip(all_sources) {
            write_scratch_file(&dir.join(&item.name), &item.content);
            write_scratch_file(&dir.join(format!("{}_src", item.name)), generated);
        }
    }

    fn cleanup_debug_scratch(&self) {
        let dir = self.scratch_dir();
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            log::debug!("debug scratch dir {} not removed: {e}", dir.display());
        }
    }

    /// Best-effort ±1-line source context for a compiler diagnostic.
    /// Never raises: any lookup failure just leaves the error unenriched.
    fn enrich_error(&self, err: Error) -> Error {
        let Error::Compilation { message, snippet } = &err else {
            return err;
        };
        if snippet.is_some() {
            return err;
        }
        let Some((name, rest)) = message.split_once(':') else {
            return err;
        };
        let Some((line_str, _)) = rest.split_once(':') else {
            return err;
        };
        let Ok(line) = line_str.trim().parse::<usize>() else {
            return err;
        };
        match self.source_snippet(name.trim(), line) {
            Some(snip) => Error::Compilation { message: message.clone(), snippet: Some(snip) },
            None => err,
        }
    }

    fn source_snippet(&self, name: &str, line: usize) -> Option<String> {
        let idx = self.bundle.templates.iter().position(|t| t.name.eq_ignore_ascii_case(name))?;
        let lines: Vec<&str> = self.bundle.templates[idx].content.lines().collect();
        if line == 0 || line > lines.len() {
            return None;
        }
        let start = line.saturating_sub(2);
        let end = (line + 1).min(lines.len());
        Some(lines[start..end].join("\n"))
    }
}

fn write_scratch_file(path: &std::path::Path, content: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("debug scratch dir {} unavailable: {e}", parent.display());
            return;
        }
    }
    if let Err(e) = std::fs::write(path, content) {
        log::warn!("failed to write debug scratch file {}: {e}", path.display());
    }
}

/// The external collaborators a convenience call needs to build an
/// [`Engine`] from scratch on a cache miss.
#[derive(Clone)]
pub struct EngineDeps {
    pub loader: Arc<dyn SourceLoader>,
    pub emitter: Arc<dyn CodeEmitter>,
    pub compiler: Arc<dyn CodeCompiler>,
}

static ENGINE_CACHE: Lazy<cache::EngineCache<Mutex<Engine>>> = Lazy::new(cache::EngineCache::new);

/// Single-template quick use: create-or-reuse an engine keyed
/// on `(name, content)`, then render its sole template.
pub fn process_template(
    name: Option<&str>,
    content: &str,
    deps: EngineDeps,
    class_name: Option<&str>,
    data: HashMap<String, Box<dyn Any + Send>>,
) -> Result<String, Error> {
    let item_name = name.unwrap_or("template").to_string();
    let key = cache::content_key(&[(item_name.clone(), content.to_string())]);
    let content_owned = content.to_string();
    let item_name_for_factory = item_name.clone();

    let engine_arc = ENGINE_CACHE.get_or_insert(key, move || {
        let mut engine = Engine::new(
            item_name_for_factory.clone(),
            EngineOptions::default(),
            deps.loader,
            deps.emitter,
            deps.compiler,
        );
        engine
            .add_template_item(&item_name_for_factory, &content_owned)
            .expect("a freshly-built engine always accepts its sole item");
        Arc::new(Mutex::new(engine))
    });

    let mut engine = engine_arc.lock().expect("engine cache mutex poisoned");
    engine.render(class_name, data)
}

/// Load `path` through `deps.loader` and delegate to [`process_template`].
pub fn process_file(
    path: &str,
    deps: EngineDeps,
    class_name: Option<&str>,
    data: HashMap<String, Box<dyn Any + Send>>,
) -> Result<String, Error> {
    let content = deps.loader.read(path)?;
    process_template(Some(path), &content, deps, class_name, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Artifact, CompiledModule, FsSourceLoader, PrettyplaseEmitter, RenderContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A fake [`CompiledModule`]/[`TemplateRuntime`] pair standing in for a
    /// real `rustc`-backed artifact, which is an external collaborator
    /// this crate never implements. Renders a fixed string, which is
    /// enough to exercise the façade's state machine without a real
    /// compiler.
    struct EchoModule {
        class_name: String,
    }

    struct EchoInstance {
        ctx: RenderContext,
    }

    impl TemplateRuntime for EchoInstance {
        fn render(&mut self) -> Result<String, Error> {
            if let Some(name) = self.ctx.get_data::<String>("name") {
                Ok(format!("Hi {name}!"))
            } else {
                Ok("rendered".to_string())
            }
        }

        fn context_mut(&mut self) -> &mut RenderContext {
            &mut self.ctx
        }
    }

    impl CompiledModule for EchoModule {
        fn class_names(&self) -> Vec<String> {
            vec![self.class_name.clone()]
        }

        fn instantiate(&self, class_name: &str) -> Result<Box<dyn TemplateRuntime>, Error> {
            if class_name != self.class_name {
                return Err(Error::Ambiguity(format!("no such class '{class_name}'")));
            }
            Ok(Box::new(EchoInstance { ctx: RenderContext::default() }))
        }
    }

    struct CountingCompiler {
        calls: Arc<AtomicUsize>,
    }

    impl CodeCompiler for CountingCompiler {
        fn compile(&self, unit: &CompilationUnit) -> Result<Artifact, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let class_name = unit.sources[0].0.clone();
            Ok(Artifact::new(0, Arc::new(EchoModule { class_name })))
        }
    }

    fn deps(calls: Arc<AtomicUsize>) -> EngineDeps {
        EngineDeps {
            loader: Arc::new(FsSourceLoader),
            emitter: Arc::new(PrettyplaseEmitter),
            compiler: Arc::new(CountingCompiler { calls }),
        }
    }

    #[test]
    fn full_pipeline_renders_literal_template() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = deps(calls);
        let mut engine = Engine::new("demo", EngineOptions::default(), d.loader, d.emitter, d.compiler);
        engine.add_template_item("A", "Hello, world!").unwrap();
        let out = engine.render(None, HashMap::new()).unwrap();
        assert_eq!(out, "rendered");
        assert_eq!(engine.status(), Status::Compiled);
    }

    #[test]
    fn compile_is_idempotent_and_invokes_compiler_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = deps(calls.clone());
        let mut engine = Engine::new("demo", EngineOptions::default(), d.loader, d.emitter, d.compiler);
        engine.add_template_item("A", "x").unwrap();
        engine.compile().unwrap();
        engine.compile().unwrap();
        engine.compile().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_template_item_rejects_both_empty() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = deps(calls);
        let mut engine = Engine::new("demo", EngineOptions::default(), d.loader, d.emitter, d.compiler);
        let err = engine.add_template_item("", "").unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn add_template_item_after_process_is_a_state_error() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = deps(calls);
        let mut engine = Engine::new("demo", EngineOptions::default(), d.loader, d.emitter, d.compiler);
        engine.add_template_item("A", "x").unwrap();
        engine.process().unwrap();
        let err = engine.add_template_item("B", "y").unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn process_requires_at_least_one_item() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = deps(calls);
        let mut engine = Engine::new("demo", EngineOptions::default(), d.loader, d.emitter, d.compiler);
        let err = engine.process().unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn process_is_idempotent() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = deps(calls);
        let mut engine = Engine::new("demo", EngineOptions::default(), d.loader, d.emitter, d.compiler);
        engine.add_template_item("A", "x").unwrap();
        engine.process().unwrap();
        engine.process().unwrap();
        assert_eq!(engine.status(), Status::Processed);
    }

    #[test]
    fn ambiguous_create_instance_without_class_name() {
        let _ = env_logger::builder().is_test(true).try_init();
        struct TwoClassModule;
        impl CompiledModule for TwoClassModule {
            fn class_names(&self) -> Vec<String> {
                vec!["A".to_string(), "B".to_string()]
            }
            fn instantiate(&self, _class_name: &str) -> Result<Box<dyn TemplateRuntime>, Error> {
                unreachable!()
            }
        }
        struct TwoClassCompiler;
        impl CodeCompiler for TwoClassCompiler {
            fn compile(&self, _unit: &CompilationUnit) -> Result<Artifact, Error> {
                Ok(Artifact::new(0, Arc::new(TwoClassModule)))
            }
        }
        let mut engine = Engine::new(
            "demo",
            EngineOptions::default(),
            Arc::new(FsSourceLoader),
            Arc::new(PrettyplaseEmitter),
            Arc::new(TwoClassCompiler),
        );
        engine.add_template_item("A", "x").unwrap();
        engine.add_template_item("B", "y").unwrap();
        let err = engine.create_instance(None).unwrap_err();
        assert!(matches!(err, Error::Ambiguity(_)));
    }

    #[test]
    fn process_template_reuses_cached_engine_and_compiles_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut data = HashMap::new();
        data.insert("name".to_string(), Box::new("Bob".to_string()) as Box<dyn Any + Send>);
        let out1 = process_template(Some("greet"), "Hi <#= name #>!", deps(calls.clone()), None, data).unwrap();
        assert_eq!(out1, "Hi Bob!");

        let mut data2 = HashMap::new();
        data2.insert("name".to_string(), Box::new("Ann".to_string()) as Box<dyn Any + Send>);
        let out2 = process_template(Some("greet"), "Hi <#= name #>!", deps(calls.clone()), None, data2).unwrap();
        assert_eq!(out2, "Hi Ann!");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct PersistingCompiler {
        compile_calls: Arc<AtomicUsize>,
        load_calls: Arc<AtomicUsize>,
    }

    impl CodeCompiler for PersistingCompiler {
        fn compile(&self, _unit: &CompilationUnit) -> Result<Artifact, Error> {
            self.compile_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Artifact::new(0, Arc::new(EchoModule { class_name: "A".to_string() })))
        }

        fn load_persisted(&self, _path: &std::path::Path) -> Result<Option<Artifact>, Error> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Artifact::new(0, Arc::new(EchoModule { class_name: "A".to_string() }))))
        }
    }

    #[test]
    fn compile_loads_persisted_artifact_instead_of_recompiling() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = std::env::temp_dir().join(format!("t4engine-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let assembly_name = "persisted.so";
        std::fs::write(dir.join(assembly_name), b"stand-in artifact bytes").unwrap();

        let compile_calls = Arc::new(AtomicUsize::new(0));
        let load_calls = Arc::new(AtomicUsize::new(0));
        let compiler = Arc::new(PersistingCompiler {
            compile_calls: compile_calls.clone(),
            load_calls: load_calls.clone(),
        });

        let mut options = EngineOptions::default();
        options.base_dir = Some(dir.clone());
        let mut engine = Engine::new(
            "demo",
            options,
            Arc::new(FsSourceLoader),
            Arc::new(PrettyplaseEmitter),
            compiler,
        );
        engine.add_template_item("A", "x").unwrap();
        engine.set_assembly_name(assembly_name).unwrap();
        engine.compile().unwrap();

        assert_eq!(load_calls.load(Ordering::SeqCst), 1);
        assert_eq!(compile_calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.status(), Status::Compiled);

        std::fs::remove_dir_all(&dir).ok();
    }
}
