use crate::bytecode::{MODULE_FILE_EXT, Module, ModuleError, ParamKind};
use crate::instrument::{InstrumentError, instrument_module};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can arise while locating, decoding, admitting, or resolving
/// modules. All of these are fatal to a session: a target that cannot be
/// loaded and instrumented cannot be fuzzed.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Module '{0}' not found on the search path")]
    NotFound(String),
    #[error("Module I/O error: {0}")]
    Io(String),
    #[error("Module '{0}' is already registered")]
    Duplicate(String),
    #[error("Module format error: {0}")]
    Format(String),
    #[error("Instrumentation error: {0}")]
    Instrument(String),
    #[error("Symbol resolution error: {0}")]
    Symbol(String),
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        LoadError::Io(err.to_string())
    }
}

impl From<ModuleError> for LoadError {
    fn from(err: ModuleError) -> Self {
        LoadError::Format(err.to_string())
    }
}

impl From<InstrumentError> for LoadError {
    fn from(err: InstrumentError) -> Self {
        LoadError::Instrument(err.to_string())
    }
}

/// A resolved target callable: the admitted (instrumented) module plus the
/// selected function's index and declared signature. Resolved once at
/// session start and reused for every invocation.
#[derive(Debug, Clone)]
pub struct Target {
    pub module: Arc<Module>,
    pub function: usize,
    pub name: String,
    pub params: Vec<ParamKind>,
}

impl Target {
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module.name, self.name)
    }
}

/// Namespace a module name belongs to: everything before the last dot, or
/// the whole name when it has none. The target's namespace decides which
/// modules get coverage probes.
pub fn namespace_of(module_name: &str) -> &str {
    module_name
        .rsplit_once('.')
        .map_or(module_name, |(head, _)| head)
}

fn under_namespace(name: &str, namespace: &str) -> bool {
    name == namespace
        || name
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Loads modules on demand, instrumenting the ones under the target's
/// namespace.
///
/// Every admitted module passes the same pipeline: structural validation,
/// then instrumentation iff its dotted name falls under the configured
/// namespace (dot-boundary aware, so `demo` covers `demo.pages` but not
/// `demolition`). Admitted modules are cached, so each unit is transformed
/// at most once; `Call` instructions resolved mid-run pull dependencies
/// through the same path, which is what makes loading lazy.
#[derive(Debug)]
pub struct ModuleLoader {
    search_paths: Vec<PathBuf>,
    namespace: String,
    modules: HashMap<String, Arc<Module>>,
}

impl ModuleLoader {
    pub fn new(search_paths: Vec<PathBuf>, instrument_namespace: impl Into<String>) -> Self {
        Self {
            search_paths,
            namespace: instrument_namespace.into(),
            modules: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Admits an in-memory module (demo and test targets) through the same
    /// validate-then-instrument pipeline as file loading.
    pub fn register(&mut self, module: Module) -> Result<Arc<Module>, LoadError> {
        if self.modules.contains_key(&module.name) {
            return Err(LoadError::Duplicate(module.name.clone()));
        }
        self.admit(module)
    }

    /// Returns the admitted module with the given dotted name, reading
    /// `<name>.fmod` from the search path on first use.
    pub fn load(&mut self, name: &str) -> Result<Arc<Module>, LoadError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Arc::clone(module));
        }
        let bytes = self.read_module_file(name)?;
        let module = Module::from_bytes(&bytes)?;
        if module.name != name {
            return Err(LoadError::Format(format!(
                "file for '{name}' declares module '{}'",
                module.name
            )));
        }
        self.admit(module)
    }

    /// Resolves a function selector against a module. A selector containing
    /// `(` must match a rendered signature exactly (`parse(markup)`);
    /// otherwise the first function with that bare name wins.
    pub fn resolve(&mut self, module_name: &str, selector: &str) -> Result<Target, LoadError> {
        let module = self.load(module_name)?;
        let found = if selector.contains('(') {
            module
                .functions
                .iter()
                .enumerate()
                .find(|(_, f)| f.rendered_signature() == selector)
        } else {
            module
                .functions
                .iter()
                .enumerate()
                .find(|(_, f)| f.name == selector)
        };
        let (function, name, params) = match found {
            Some((index, f)) => (index, f.name.clone(), f.params.clone()),
            None => {
                let available: Vec<String> = module
                    .functions
                    .iter()
                    .map(|f| f.rendered_signature())
                    .collect();
                return Err(LoadError::Symbol(format!(
                    "no function matching '{selector}' in module '{module_name}' (available: {})",
                    available.join(", ")
                )));
            }
        };
        Ok(Target {
            module,
            function,
            name,
            params,
        })
    }

    fn read_module_file(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        let file_name = format!("{name}.{MODULE_FILE_EXT}");
        for dir in &self.search_paths {
            let path = dir.join(&file_name);
            if path.is_file() {
                return fs::read(&path).map_err(|e| {
                    LoadError::Io(format!("failed to read {}: {e}", path.display()))
                });
            }
        }
        Err(LoadError::NotFound(name.to_string()))
    }

    fn admit(&mut self, module: Module) -> Result<Arc<Module>, LoadError> {
        module.validate()?;
        let module = if under_namespace(&module.name, &self.namespace) {
            instrument_module(&module)?
        } else {
            module
        };
        let shared = Arc::new(module);
        self.modules.insert(shared.name.clone(), Arc::clone(&shared));
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{FunctionBuilder, Instr, ModuleBuilder, test_targets};
    use tempfile::tempdir;

    fn has_probes(module: &Module) -> bool {
        crate::instrument::is_instrumented(module)
    }

    fn trivial_module(name: &str) -> Module {
        let mut builder = ModuleBuilder::new(name);
        let mut f = FunctionBuilder::new("noop", &[]);
        f.line(1).push_int(0).ret();
        builder.function(f.finish().unwrap());
        builder.finish()
    }

    #[test]
    fn namespace_of_strips_the_last_segment() {
        assert_eq!(namespace_of("demo.pages"), "demo");
        assert_eq!(namespace_of("a.b.c"), "a.b");
        assert_eq!(namespace_of("solo"), "solo");
    }

    #[test]
    fn registered_modules_under_the_namespace_get_probes() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        let admitted = loader.register(test_targets::pages_module()).unwrap();
        assert!(has_probes(&admitted));
    }

    #[test]
    fn modules_outside_the_namespace_load_unmodified() {
        let mut loader = ModuleLoader::new(vec![], "lib");
        let admitted = loader.register(test_targets::pages_module()).unwrap();
        assert!(!has_probes(&admitted));
    }

    #[test]
    fn namespace_match_respects_dot_boundaries() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        let admitted = loader.register(trivial_module("demolition.derby")).unwrap();
        assert!(!has_probes(&admitted));
        let exact = loader.register(trivial_module("demo")).unwrap();
        assert!(has_probes(&exact));
    }

    #[test]
    fn loads_module_files_from_the_search_path() {
        let dir = tempdir().unwrap();
        let module = test_targets::pages_module();
        std::fs::write(
            dir.path().join("demo.pages.fmod"),
            module.to_bytes().unwrap(),
        )
        .unwrap();

        let mut loader = ModuleLoader::new(vec![dir.path().to_path_buf()], "demo");
        let loaded = loader.load("demo.pages").unwrap();
        assert_eq!(loaded.name, "demo.pages");
        assert!(has_probes(&loaded));
        assert!(loader.is_loaded("demo.pages"));
    }

    #[test]
    fn later_search_path_entries_are_fallbacks() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        std::fs::write(
            second.path().join("lib.text.fmod"),
            trivial_module("lib.text").to_bytes().unwrap(),
        )
        .unwrap();

        let mut loader = ModuleLoader::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            "demo",
        );
        assert!(loader.load("lib.text").is_ok());
    }

    #[test]
    fn loading_twice_reuses_the_admitted_module() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        loader.register(test_targets::pages_module()).unwrap();
        let first = loader.load("demo.pages").unwrap();
        let second = loader.load("demo.pages").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_modules_are_reported_by_name() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        let err = loader.load("demo.absent").unwrap_err();
        assert!(matches!(err, LoadError::NotFound(name) if name == "demo.absent"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        loader.register(trivial_module("demo.once")).unwrap();
        let err = loader.register(trivial_module("demo.once")).unwrap_err();
        assert!(matches!(err, LoadError::Duplicate(_)));
    }

    #[test]
    fn corrupt_module_files_fail_with_format_errors() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("demo.bad.fmod"), b"not a module").unwrap();
        let mut loader = ModuleLoader::new(vec![dir.path().to_path_buf()], "demo");
        assert!(matches!(
            loader.load("demo.bad"),
            Err(LoadError::Format(_))
        ));
    }

    #[test]
    fn file_and_declared_names_must_agree() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("demo.alias.fmod"),
            trivial_module("demo.real").to_bytes().unwrap(),
        )
        .unwrap();
        let mut loader = ModuleLoader::new(vec![dir.path().to_path_buf()], "demo");
        assert!(matches!(
            loader.load("demo.alias"),
            Err(LoadError::Format(_))
        ));
    }

    #[test]
    fn invalid_modules_are_rejected_at_admit() {
        let module = Module {
            name: "demo.broken".to_string(),
            constants: vec![],
            functions: vec![crate::bytecode::Function {
                name: "f".to_string(),
                params: vec![],
                locals: 0,
                body: vec![Instr::Jump(42)],
            }],
        };
        let mut loader = ModuleLoader::new(vec![], "demo");
        assert!(matches!(
            loader.register(module),
            Err(LoadError::Format(_))
        ));
    }

    #[test]
    fn resolves_by_bare_name_and_rendered_signature() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        loader.register(test_targets::pages_module()).unwrap();

        let by_name = loader.resolve("demo.pages", "parse").unwrap();
        assert_eq!(by_name.qualified_name(), "demo.pages::parse");
        assert_eq!(by_name.params, vec![ParamKind::Markup]);

        let by_signature = loader.resolve("demo.pages", "sum(int[])").unwrap();
        assert_eq!(by_signature.name, "sum");
    }

    #[test]
    fn resolution_failures_list_available_signatures() {
        let mut loader = ModuleLoader::new(vec![], "demo");
        loader.register(test_targets::pages_module()).unwrap();
        let err = loader.resolve("demo.pages", "parse(int)").unwrap_err();
        match err {
            LoadError::Symbol(detail) => assert!(detail.contains("parse(markup)")),
            other => panic!("expected symbol error, got {other:?}"),
        }
    }
}
