// Single-scope bundler: loads the relative module graph, rewrites module syntax
// into plain declarations and wraps the result in the requested module format

use crate::core::interfaces::*;
use crate::core::models::{ExportMode, Format};
use crate::core::plugin::Plugin;
use crate::utils::{LibpackError, Logger, Result, SyntaxError, Timer};
use super::scope::TopLevelNames;
use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

static IMPORT_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s*['"]([^'"\n]+)['"][ \t]*;?"#).expect("valid import regex")
});

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*import\s+(?:([\w$]+)\s*,?\s*)?(?:\*\s*as\s+([\w$]+)|\{([^}]*)\})?\s*from\s*['"]([^'"\n]+)['"][ \t]*;?"#,
    )
    .expect("valid import regex")
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\{([^}]*)\}\s*from\s*['"]([^'"\n]+)['"][ \t]*;?"#).expect("valid export regex")
});

static EXPORT_STAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s*\*\s*(?:as\s+([\w$]+)\s*)?from\s*['"]([^'"\n]+)['"][ \t]*;?"#)
        .expect("valid export regex")
});

static EXPORT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*export\s*\{([^}]*)\}[ \t]*;?"#).expect("valid export regex"));

static EXPORT_DEFAULT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\b\s*\*?\s*|class\s+)([\w$]+)"#)
        .expect("valid export regex")
});

static EXPORT_DEFAULT_IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s+default\s+([\w$]+)[ \t]*;?[ \t]*$"#).expect("valid export regex")
});

static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^([ \t]*)export\s+default\s+"#).expect("valid export regex"));

static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^([ \t]*)export\s+((?:async\s+)?function\b\s*\*?|class\b|const\b|let\b|var\b)(\s*)([\w$]+)"#)
        .expect("valid export regex")
});

static LEFTOVER_MODULE_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:export\b|import\b\s*[\w${*'"])"#).expect("valid leftover regex")
});

const JS_EXTENSIONS: [&str; 3] = ["js", "mjs", "cjs"];

/// Bundles a relative ES module graph into one shared scope
pub struct OxcBundler {
    fs: Arc<dyn FileSystemService>,
}

impl OxcBundler {
    pub fn new(fs: Arc<dyn FileSystemService>) -> Self {
        Self { fs }
    }

    async fn load(&self, path: &Path, input: &BundleInput, warned: &mut HashSet<String>) -> Result<SourceModule> {
        let raw = self.fs.read_file(path).await?;

        // Positions must match the file on disk, so validate before any plugin runs
        let globals = validate_syntax(path, &raw)?;

        let code = apply_transforms(&input.plugins, raw, path).await?;

        let mut resolutions = HashMap::new();
        for specifier in collect_specifiers(&code) {
            if resolutions.contains_key(&specifier) {
                continue;
            }
            let resolution = self.resolve(path, &specifier, &input.external, warned)?;
            resolutions.insert(specifier, resolution);
        }

        Ok(SourceModule {
            path: path.to_path_buf(),
            code,
            resolutions,
            globals,
        })
    }

    fn resolve(
        &self,
        importer: &Path,
        specifier: &str,
        external: &[String],
        warned: &mut HashSet<String>,
    ) -> Result<Resolution> {
        if !specifier.starts_with('.') && !specifier.starts_with('/') {
            if !external.iter().any(|name| name == specifier) && warned.insert(specifier.to_string()) {
                Logger::warn(&format!(
                    "'{}' is imported by {} but not declared external; treating it as external",
                    specifier,
                    importer.display()
                ));
            }
            return Ok(Resolution::External(specifier.to_string()));
        }

        let base = normalize(&importer.parent().unwrap_or_else(|| Path::new("")).join(specifier));
        if let Some(resolved) = self.resolve_file(&base) {
            return Ok(Resolution::Internal(resolved));
        }

        match base.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if !JS_EXTENSIONS.contains(&ext) => {
                Logger::debug(&format!(
                    "Dropping import of non-JS file '{}' from {}",
                    specifier,
                    importer.display()
                ));
                Ok(Resolution::Ignored)
            }
            _ => Err(LibpackError::build(format!(
                "Could not resolve '{}' from {}",
                specifier,
                importer.display()
            ))),
        }
    }

    fn resolve_file(&self, base: &Path) -> Option<PathBuf> {
        let has_js_extension = base
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| JS_EXTENSIONS.contains(&ext));
        if has_js_extension && self.fs.file_exists(base) {
            return Some(base.to_path_buf());
        }

        JS_EXTENSIONS
            .iter()
            .map(|ext| {
                let mut candidate = base.as_os_str().to_owned();
                candidate.push(".");
                candidate.push(ext);
                PathBuf::from(candidate)
            })
            .chain(std::iter::once(base.join("index.js")))
            .find(|candidate| self.fs.file_exists(candidate))
    }
}

#[async_trait::async_trait]
impl Bundler for OxcBundler {
    async fn bundle(&self, input: BundleInput) -> Result<Box<dyn ModuleGraph>> {
        let _timer = Timer::start(&format!("Bundling {}", input.entry.display()));
        let entry = normalize(&input.entry);
        if !self.fs.file_exists(&entry) {
            return Err(LibpackError::build(format!(
                "Could not resolve entry module {}",
                entry.display()
            )));
        }

        // Load every reachable module once
        let mut modules: Vec<SourceModule> = Vec::new();
        let mut index: HashMap<PathBuf, usize> = HashMap::new();
        let mut warned = HashSet::new();
        let mut queue = VecDeque::from([entry.clone()]);

        while let Some(path) = queue.pop_front() {
            if index.contains_key(&path) {
                continue;
            }
            let module = self.load(&path, &input, &mut warned).await?;
            queue.extend(module.internal_dependencies().filter(|dep| !index.contains_key(*dep)).cloned());
            index.insert(path, modules.len());
            modules.push(module);
        }

        Logger::debug(&format!("Loaded {} modules from {}", modules.len(), entry.display()));

        let order = dependency_order(&modules, &index);
        let mut exports_of: HashMap<PathBuf, ModuleExports> = HashMap::new();
        let mut externals = ExternalTable::default();
        let mut names = TopLevelNames::default();
        names.reserve(modules.iter().flat_map(|module| module.globals.iter().cloned()));
        let mut chunks = Vec::with_capacity(order.len());

        for (position, module_index) in order.into_iter().enumerate() {
            let module = &modules[module_index];
            let mut rewriter = ModuleRewriter {
                id: position,
                module,
                exports_of: &exports_of,
                externals: &mut externals,
                names: &mut names,
                links: HashMap::new(),
                exports: ModuleExports::default(),
                prelude: Vec::new(),
                counter: 0,
                error: None,
            };
            let body = rewriter.rewrite()?;
            let links = std::mem::take(&mut rewriter.links);
            let mut prelude = std::mem::take(&mut rewriter.prelude);
            let mut exports = rewriter.exports;

            let (body, renames) = names.deconflict(&module.path, &body, &links)?;
            if !renames.is_empty() {
                Logger::debug(&format!("Renamed {} top-level names in {}", renames.len(), module.path.display()));
                exports.rename_own(&renames);
            }
            prelude.push(body);
            chunks.push(prelude.join("\n"));
            exports_of.insert(module.path.clone(), exports);
        }

        let exports = exports_of.remove(&entry).unwrap_or_default();
        Ok(Box::new(OxcModuleGraph {
            body: chunks.join("\n\n"),
            exports,
            externals: externals.modules,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Internal(PathBuf),
    External(String),
    /// Non-JS file no plugin consumed
    Ignored,
}

struct SourceModule {
    path: PathBuf,
    code: String,
    resolutions: HashMap<String, Resolution>,
    /// Free variables of the source as written
    globals: Vec<String>,
}

impl SourceModule {
    fn internal_dependencies(&self) -> impl Iterator<Item = &PathBuf> {
        // Keep discovery order stable
        let mut specifiers: Vec<&String> = self.resolutions.keys().collect();
        specifiers.sort_by_key(|specifier| self.code.find(specifier.as_str()).unwrap_or(usize::MAX));
        specifiers
            .into_iter()
            .filter_map(|specifier| match self.resolutions.get(specifier) {
                Some(Resolution::Internal(path)) => Some(path),
                _ => None,
            })
    }
}

/// Parses the file as written and returns the globals it reads
fn validate_syntax(path: &Path, source: &str) -> Result<Vec<String>> {
    let allocator = Allocator::default();
    let source_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("cjs") => SourceType::cjs(),
        _ => SourceType::mjs(),
    };

    let result = Parser::new(&allocator, source, source_type).parse();
    let Some(error) = result.errors.first() else {
        let semantic = SemanticBuilder::new().build(&result.program).semantic;
        let globals = semantic.scoping().root_unresolved_references().keys().map(|name| name.to_string());
        return Ok(globals.collect());
    };

    let span = error
        .labels
        .as_ref()
        .and_then(|labels| labels.first())
        .map(|label| (label.offset(), label.offset() + label.len()));
    let (pos, raised_at) = match span {
        Some((start, end)) => (start, Some(end)),
        None => (source.len(), None),
    };

    Err(SyntaxError::from_offsets(error.to_string(), path.to_path_buf(), source, pos, raised_at).into())
}

async fn apply_transforms(plugins: &[Arc<dyn Plugin>], mut code: String, path: &Path) -> Result<String> {
    for plugin in plugins {
        if let Some(transformed) = plugin.transform(&code, path).await? {
            Logger::debug(&format!("Plugin '{}' transformed {}", plugin.name(), path.display()));
            code = transformed;
        }
    }
    Ok(code)
}

fn collect_specifiers(code: &str) -> Vec<String> {
    let mut specifiers = Vec::new();
    for caps in IMPORT_BARE.captures_iter(code) {
        specifiers.push(caps[1].to_string());
    }
    for caps in IMPORT_FROM.captures_iter(code) {
        specifiers.push(caps[4].to_string());
    }
    for caps in EXPORT_FROM.captures_iter(code) {
        specifiers.push(caps[2].to_string());
    }
    for caps in EXPORT_STAR.captures_iter(code) {
        specifiers.push(caps[2].to_string());
    }
    specifiers
}

/// Post-order walk from the entry: dependencies before their importers
fn dependency_order(modules: &[SourceModule], index: &HashMap<PathBuf, usize>) -> Vec<usize> {
    let mut order = Vec::with_capacity(modules.len());
    let mut visited = vec![false; modules.len()];
    let mut stack: Vec<(usize, bool)> = vec![(0, false)];

    while let Some((current, expanded)) = stack.pop() {
        if expanded {
            order.push(current);
            continue;
        }
        if visited[current] {
            continue;
        }
        visited[current] = true;
        stack.push((current, true));

        let deps: Vec<usize> = modules[current]
            .internal_dependencies()
            .filter_map(|dep| index.get(dep).copied())
            .collect();
        for dep in deps.into_iter().rev() {
            if !visited[dep] {
                stack.push((dep, false));
            }
        }
    }
    order
}

/// Lexically resolve `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExportBinding {
    exported: String,
    local: String,
    /// Declared by this module rather than passed through from a dependency
    own: bool,
}

#[derive(Debug, Clone, Default)]
struct ModuleExports {
    bindings: Vec<ExportBinding>,
    /// `export * from 'external'`, passed through to the output
    star_externals: Vec<String>,
}

impl ModuleExports {
    fn local_of(&self, exported: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|binding| binding.exported == exported)
            .map(|binding| binding.local.as_str())
    }

    fn add(&mut self, exported: impl Into<String>, local: impl Into<String>) {
        self.insert(ExportBinding {
            exported: exported.into(),
            local: local.into(),
            own: true,
        });
    }

    fn add_reexport(&mut self, exported: impl Into<String>, local: impl Into<String>) {
        self.insert(ExportBinding {
            exported: exported.into(),
            local: local.into(),
            own: false,
        });
    }

    fn insert(&mut self, binding: ExportBinding) {
        match self.bindings.iter_mut().find(|existing| existing.exported == binding.exported) {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
    }

    fn rename_own(&mut self, renames: &HashMap<String, String>) {
        for binding in self.bindings.iter_mut().filter(|binding| binding.own) {
            if let Some(renamed) = renames.get(&binding.local) {
                binding.local = renamed.clone();
            }
        }
    }

    fn named(&self) -> impl Iterator<Item = &ExportBinding> {
        self.bindings.iter().filter(|binding| binding.exported != "default")
    }

    fn has_named(&self) -> bool {
        self.named().next().is_some() || !self.star_externals.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.star_externals.is_empty()
    }
}

/// Bindings the bundle pulls from one external module
#[derive(Debug, Clone, Default)]
struct ExternalImport {
    source: String,
    defaults: Vec<String>,
    namespaces: Vec<String>,
    /// (imported, local)
    named: Vec<(String, String)>,
}

impl ExternalImport {
    fn has_bindings(&self) -> bool {
        !self.defaults.is_empty() || !self.namespaces.is_empty() || !self.named.is_empty()
    }
}

#[derive(Debug, Default)]
struct ExternalTable {
    modules: Vec<ExternalImport>,
}

impl ExternalTable {
    fn entry(&mut self, source: &str) -> &mut ExternalImport {
        let position = match self.modules.iter().position(|module| module.source == source) {
            Some(position) => position,
            None => {
                self.modules.push(ExternalImport {
                    source: source.to_string(),
                    ..Default::default()
                });
                self.modules.len() - 1
            }
        };
        &mut self.modules[position]
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// `a, b as c` → [(a, a), (b, c)]
fn parse_specifier_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let mut parts = item.split_whitespace();
            let imported = parts.next().unwrap_or_default().to_string();
            let local = match (parts.next(), parts.next()) {
                (Some("as"), Some(alias)) => alias.to_string(),
                _ => imported.clone(),
            };
            (imported, local)
        })
        .collect()
}

struct ModuleRewriter<'a> {
    id: usize,
    module: &'a SourceModule,
    exports_of: &'a HashMap<PathBuf, ModuleExports>,
    externals: &'a mut ExternalTable,
    names: &'a mut TopLevelNames,
    /// Import local → the top-level name its binding lives under
    links: HashMap<String, String>,
    exports: ModuleExports,
    /// Declarations emitted above the module body
    prelude: Vec<String>,
    counter: usize,
    error: Option<LibpackError>,
}

enum ImportTarget<'m> {
    Internal(&'m ModuleExports, &'m Path),
    External(&'m str),
    Ignored,
}

impl<'a> ModuleRewriter<'a> {
    fn rewrite(&mut self) -> Result<String> {
        let code = self.module.code.clone();
        let code = IMPORT_BARE
            .replace_all(&code, |caps: &Captures| self.side_effect_import(&caps[1]))
            .into_owned();
        let code = IMPORT_FROM
            .replace_all(&code, |caps: &Captures| self.import_bindings(caps))
            .into_owned();
        let code = EXPORT_FROM
            .replace_all(&code, |caps: &Captures| self.reexport_named(&caps[1], &caps[2]))
            .into_owned();
        let code = EXPORT_STAR
            .replace_all(&code, |caps: &Captures| {
                self.reexport_all(caps.get(1).map(|m| m.as_str()), &caps[2])
            })
            .into_owned();
        let code = EXPORT_LIST
            .replace_all(&code, |caps: &Captures| {
                for (local, exported) in parse_specifier_list(&caps[1]) {
                    self.exports.add(exported, local);
                }
                String::new()
            })
            .into_owned();
        let code = EXPORT_DEFAULT_DECL
            .replace_all(&code, |caps: &Captures| {
                if &caps[3] == "extends" {
                    return caps[0].to_string();
                }
                self.exports.add("default", &caps[3]);
                format!("{}{}{}", &caps[1], &caps[2], &caps[3])
            })
            .into_owned();
        let code = EXPORT_DEFAULT_IDENT
            .replace_all(&code, |caps: &Captures| {
                if matches!(&caps[1], "function" | "class" | "async") {
                    return caps[0].to_string();
                }
                self.exports.add("default", &caps[1]);
                String::new()
            })
            .into_owned();
        let code = EXPORT_DEFAULT
            .replace_all(&code, |caps: &Captures| {
                let local = format!("__default_{}", self.id);
                self.exports.add("default", local.clone());
                format!("{}var {} = ", &caps[1], local)
            })
            .into_owned();
        let code = EXPORT_DECL
            .replace_all(&code, |caps: &Captures| {
                self.exports.add(&caps[4], &caps[4]);
                format!("{}{}{}{}", &caps[1], &caps[2], &caps[3], &caps[4])
            })
            .into_owned();

        if let Some(error) = self.error.take() {
            return Err(error);
        }

        if let Some(leftover) = LEFTOVER_MODULE_SYNTAX.find(&code) {
            let line = code[..leftover.start()].matches('\n').count() + 1;
            return Err(LibpackError::build(format!(
                "Unsupported module syntax in {} (rewritten line {})",
                self.module.path.display(),
                line
            )));
        }

        Ok(code.trim().to_string())
    }

    fn fail(&mut self, error: LibpackError) -> String {
        if self.error.is_none() {
            self.error = Some(error);
        }
        String::new()
    }

    fn target(&self, specifier: &str) -> Result<ImportTarget<'a>> {
        let module: &'a SourceModule = self.module;
        let exports_of: &'a HashMap<PathBuf, ModuleExports> = self.exports_of;
        match module.resolutions.get(specifier) {
            Some(Resolution::Internal(path)) => match exports_of.get(path) {
                Some(exports) => Ok(ImportTarget::Internal(exports, path)),
                None => Err(LibpackError::build(format!(
                    "Circular import of {} from {} is not supported",
                    path.display(),
                    module.path.display()
                ))),
            },
            Some(Resolution::External(source)) => Ok(ImportTarget::External(source)),
            Some(Resolution::Ignored) => Ok(ImportTarget::Ignored),
            None => Err(LibpackError::build(format!(
                "Unresolved import '{}' in {}",
                specifier,
                module.path.display()
            ))),
        }
    }

    fn internal_local(&self, exports: &ModuleExports, dep: &Path, name: &str) -> Result<String> {
        exports.local_of(name).map(str::to_string).ok_or_else(|| {
            LibpackError::build(format!(
                "'{}' is not exported by {}, imported by {}",
                name,
                dep.display(),
                self.module.path.display()
            ))
        })
    }

    fn fresh_local(&mut self, prefix: &str) -> String {
        let local = format!("__{}_{}_{}", prefix, self.id, self.counter);
        self.counter += 1;
        local
    }

    fn link(&mut self, local: &str, target: &str) {
        if local != target {
            self.links.insert(local.to_string(), target.to_string());
        }
    }

    fn external_local(&mut self, source: &str, imported: &str, local: &str) -> String {
        let claimed = self.names.claim_external(source, imported, local);
        self.link(local, &claimed);
        claimed
    }

    fn side_effect_import(&mut self, specifier: &str) -> String {
        match self.target(specifier) {
            Ok(ImportTarget::External(source)) => {
                self.externals.entry(source);
                String::new()
            }
            Ok(_) => String::new(),
            Err(error) => self.fail(error),
        }
    }

    fn import_bindings(&mut self, caps: &Captures) -> String {
        let specifier = &caps[4];
        let default = caps.get(1).map(|m| m.as_str().to_string());
        let namespace = caps.get(2).map(|m| m.as_str().to_string());
        let named = caps.get(3).map(|m| parse_specifier_list(m.as_str())).unwrap_or_default();

        match self.target(specifier) {
            Ok(ImportTarget::Internal(exports, dep)) => {
                let requested = default
                    .map(|local| ("default".to_string(), local))
                    .into_iter()
                    .chain(named);
                for (imported, local) in requested {
                    match self.internal_local(exports, dep, &imported) {
                        Ok(source_local) => self.link(&local, &source_local),
                        Err(error) => return self.fail(error),
                    }
                }
                if let Some(namespace) = namespace {
                    let claimed = self.names.claim(&namespace);
                    self.link(&namespace, &claimed);
                    self.prelude.push(format!("var {} = {};", claimed, namespace_object(exports)));
                }
                String::new()
            }
            Ok(ImportTarget::External(source)) => {
                let default = default.map(|local| self.external_local(source, "default", &local));
                let namespace = namespace.map(|local| self.external_local(source, "*", &local));
                let named: Vec<(String, String)> = named
                    .into_iter()
                    .map(|(imported, local)| {
                        let local = self.external_local(source, &imported, &local);
                        (imported, local)
                    })
                    .collect();

                let external = self.externals.entry(source);
                if let Some(local) = default {
                    push_unique(&mut external.defaults, &local);
                }
                if let Some(local) = namespace {
                    push_unique(&mut external.namespaces, &local);
                }
                for pair in named {
                    if !external.named.contains(&pair) {
                        external.named.push(pair);
                    }
                }
                String::new()
            }
            Ok(ImportTarget::Ignored) => self.fail(LibpackError::build(format!(
                "Cannot import bindings from non-JS module '{}' in {}",
                specifier,
                self.module.path.display()
            ))),
            Err(error) => self.fail(error),
        }
    }

    fn reexport_named(&mut self, list: &str, specifier: &str) -> String {
        let pairs = parse_specifier_list(list);
        match self.target(specifier) {
            Ok(ImportTarget::Internal(exports, dep)) => {
                for (imported, exported) in pairs {
                    match self.internal_local(exports, dep, &imported) {
                        Ok(local) => self.exports.add_reexport(exported, local),
                        Err(error) => return self.fail(error),
                    }
                }
                String::new()
            }
            Ok(ImportTarget::External(source)) => {
                for (imported, exported) in pairs {
                    let local = self.fresh_local("reexport");
                    let local = self.external_local(source, &imported, &local);
                    let external = self.externals.entry(source);
                    if imported == "default" {
                        external.defaults.push(local.clone());
                    } else {
                        external.named.push((imported, local.clone()));
                    }
                    self.exports.add_reexport(exported, local);
                }
                String::new()
            }
            Ok(ImportTarget::Ignored) => String::new(),
            Err(error) => self.fail(error),
        }
    }

    fn reexport_all(&mut self, alias: Option<&str>, specifier: &str) -> String {
        match (self.target(specifier), alias) {
            (Ok(ImportTarget::Internal(exports, _)), None) => {
                for binding in exports.named() {
                    if self.exports.local_of(&binding.exported).is_none() {
                        self.exports.add_reexport(binding.exported.clone(), binding.local.clone());
                    }
                }
                for source in &exports.star_externals {
                    push_unique(&mut self.exports.star_externals, source);
                }
                String::new()
            }
            (Ok(ImportTarget::Internal(exports, _)), Some(alias)) => {
                let local = self.fresh_local("ns");
                let local = self.names.claim(&local);
                self.prelude.push(format!("var {} = {};", local, namespace_object(exports)));
                self.exports.add(alias, local);
                String::new()
            }
            (Ok(ImportTarget::External(source)), None) => {
                self.externals.entry(source);
                push_unique(&mut self.exports.star_externals, source);
                String::new()
            }
            (Ok(ImportTarget::External(source)), Some(alias)) => {
                let local = self.fresh_local("ns");
                let local = self.external_local(source, "*", &local);
                self.externals.entry(source).namespaces.push(local.clone());
                self.exports.add_reexport(alias, local);
                String::new()
            }
            (Ok(ImportTarget::Ignored), _) => String::new(),
            (Err(error), _) => self.fail(error),
        }
    }
}

fn namespace_object(exports: &ModuleExports) -> String {
    let fields: Vec<String> = exports
        .bindings
        .iter()
        .map(|binding| format!("{}: {}", property_key(&binding.exported), binding.local))
        .collect();
    format!("Object.freeze({{ {} }})", fields.join(", "))
}

fn property_key(name: &str) -> String {
    if name == "default" {
        "'default'".to_string()
    } else {
        name.to_string()
    }
}

fn property_access(object: &str, name: &str) -> String {
    if name == "default" {
        format!("{}['default']", object)
    } else {
        format!("{}.{}", object, name)
    }
}

/// How the entry's exports surface in a non-ES format
enum ExportShape<'g> {
    None,
    Default(&'g str),
    Named,
}

const INTEROP_HELPER: &str =
    "function __interopDefault (e) { return e && typeof e === 'object' && 'default' in e ? e['default'] : e; }\n";

/// The bundled graph, ready to be wrapped in any format
pub struct OxcModuleGraph {
    body: String,
    exports: ModuleExports,
    externals: Vec<ExternalImport>,
}

#[async_trait::async_trait]
impl ModuleGraph for OxcModuleGraph {
    async fn generate(&self, options: &GenerateOptions<'_>) -> Result<GeneratedCode> {
        let code = match options.format {
            Format::Es => self.generate_es(options.banner),
            Format::Cjs => self.generate_cjs(options.banner, self.export_shape(options.exports)?),
            Format::Amd => self.generate_amd(options.banner, self.export_shape(options.exports)?),
            Format::Iife => self.generate_iife(options, self.export_shape(options.exports)?)?,
            Format::Umd => self.generate_umd(options, self.export_shape(options.exports)?)?,
        };
        Ok(GeneratedCode { code })
    }
}

impl OxcModuleGraph {
    fn export_shape(&self, mode: ExportMode) -> Result<ExportShape<'_>> {
        let default = self.exports.local_of("default");
        match mode {
            ExportMode::Auto if self.exports.is_empty() => Ok(ExportShape::None),
            ExportMode::Auto => match default {
                Some(local) if !self.exports.has_named() => Ok(ExportShape::Default(local)),
                _ => Ok(ExportShape::Named),
            },
            ExportMode::Default => {
                if self.exports.has_named() {
                    return Err(LibpackError::config(
                        "export mode 'default' cannot be used when the entry module has named exports",
                    ));
                }
                default
                    .map(ExportShape::Default)
                    .ok_or_else(|| LibpackError::config("export mode 'default' requires a default export"))
            }
            ExportMode::Named => Ok(ExportShape::Named),
            ExportMode::None if self.exports.is_empty() => Ok(ExportShape::None),
            ExportMode::None => Err(LibpackError::config(
                "export mode 'none' cannot be used when the entry module has exports",
            )),
        }
    }

    fn generate_es(&self, banner: &str) -> String {
        let mut out = String::from(banner);
        for external in &self.externals {
            out.push_str(&es_import(external));
        }
        if !self.externals.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.body);
        out.push('\n');

        let named: Vec<String> = self
            .exports
            .named()
            .map(|binding| {
                if binding.local == binding.exported {
                    binding.local.clone()
                } else {
                    format!("{} as {}", binding.local, binding.exported)
                }
            })
            .collect();
        let default = self.exports.local_of("default");

        if !named.is_empty() || default.is_some() || !self.exports.star_externals.is_empty() {
            out.push('\n');
        }
        if !named.is_empty() {
            out.push_str(&format!("export {{ {} }};\n", named.join(", ")));
        }
        if let Some(local) = default {
            out.push_str(&format!("export default {};\n", local));
        }
        for source in &self.exports.star_externals {
            out.push_str(&format!("export * from '{}';\n", source));
        }
        out
    }

    fn generate_cjs(&self, banner: &str, shape: ExportShape<'_>) -> String {
        let mut out = format!("{}'use strict';\n\n", banner);
        if matches!(shape, ExportShape::Named) {
            out.push_str("Object.defineProperty(exports, '__esModule', { value: true });\n\n");
        }

        for (index, external) in self.externals.iter().enumerate() {
            if external.has_bindings() || self.exports.star_externals.contains(&external.source) {
                out.push_str(&format!("var {} = require('{}');\n", external_var(index), external.source));
            } else {
                out.push_str(&format!("require('{}');\n", external.source));
            }
        }
        if !self.externals.is_empty() {
            out.push('\n');
        }

        out.push_str(&self.external_bindings());
        out.push_str(&self.body);
        out.push('\n');

        match shape {
            ExportShape::None => {}
            ExportShape::Default(local) => out.push_str(&format!("\nmodule.exports = {};\n", local)),
            ExportShape::Named => out.push_str(&self.named_assignments("exports")),
        }
        out
    }

    fn factory_body(&self, shape: &ExportShape<'_>) -> String {
        let mut body = String::from("'use strict';\n\n");
        body.push_str(&self.external_bindings());
        body.push_str(&self.body);
        body.push('\n');

        match shape {
            ExportShape::None => {}
            ExportShape::Default(local) => body.push_str(&format!("\nreturn {};\n", local)),
            ExportShape::Named => {
                body.push_str("\nvar __exports = {};\n");
                body.push_str("Object.defineProperty(__exports, '__esModule', { value: true });\n");
                body.push_str(self.named_assignments("__exports").trim_start_matches('\n'));
                body.push_str("return __exports;\n");
            }
        }
        body
    }

    fn generate_amd(&self, banner: &str, shape: ExportShape<'_>) -> String {
        let header = if self.externals.is_empty() {
            "define(function () {".to_string()
        } else {
            format!(
                "define([{}], function ({}) {{",
                self.quoted_sources().join(", "),
                self.factory_params().join(", ")
            )
        };
        format!("{}{}\n{}\n}});\n", banner, header, self.factory_body(&shape))
    }

    fn generate_iife(&self, options: &GenerateOptions<'_>, shape: ExportShape<'_>) -> Result<String> {
        let binding = match shape {
            ExportShape::None => String::new(),
            _ => format!("var {} = ", require_name(options)?),
        };
        let globals = self.global_names(options.globals);

        Ok(format!(
            "{}{}(function ({}) {{\n{}\n}}({}));\n",
            options.banner,
            binding,
            self.factory_params().join(", "),
            self.factory_body(&shape),
            globals.join(", ")
        ))
    }

    fn generate_umd(&self, options: &GenerateOptions<'_>, shape: ExportShape<'_>) -> Result<String> {
        let exporting = !matches!(shape, ExportShape::None);
        let name = if exporting { require_name(options)? } else { "" };

        let cjs_args = self
            .externals
            .iter()
            .map(|external| format!("require('{}')", external.source))
            .collect::<Vec<_>>()
            .join(", ");
        let amd_deps = if self.externals.is_empty() {
            String::new()
        } else {
            format!("[{}], ", self.quoted_sources().join(", "))
        };
        let global_args = self
            .global_names(options.globals)
            .into_iter()
            .map(|global| format!("global.{}", global))
            .collect::<Vec<_>>()
            .join(", ");

        let (cjs_call, global_call) = if exporting {
            (
                format!("module.exports = factory({})", cjs_args),
                format!("global.{} = factory({})", name, global_args),
            )
        } else {
            (format!("factory({})", cjs_args), format!("factory({})", global_args))
        };

        Ok(format!(
            "{banner}(function (global, factory) {{\n  typeof exports === 'object' && typeof module !== 'undefined' ? {cjs} :\n  typeof define === 'function' && define.amd ? define({deps}factory) :\n  (global = typeof globalThis !== 'undefined' ? globalThis : global || self, {global});\n}}(this, (function ({params}) {{\n{body}\n}})));\n",
            banner = options.banner,
            cjs = cjs_call,
            deps = amd_deps,
            global = global_call,
            params = self.factory_params().join(", "),
            body = self.factory_body(&shape),
        ))
    }

    fn external_bindings(&self) -> String {
        let mut lines = Vec::new();
        let mut needs_interop = false;

        for (index, external) in self.externals.iter().enumerate() {
            let var = external_var(index);
            for local in &external.defaults {
                needs_interop = true;
                lines.push(format!("var {} = __interopDefault({});", local, var));
            }
            for local in &external.namespaces {
                lines.push(format!("var {} = {};", local, var));
            }
            for (imported, local) in &external.named {
                if imported == "default" {
                    needs_interop = true;
                    lines.push(format!("var {} = __interopDefault({});", local, var));
                } else {
                    lines.push(format!("var {} = {};", local, property_access(&var, imported)));
                }
            }
        }

        let mut out = String::new();
        if needs_interop {
            out.push_str(INTEROP_HELPER);
            out.push('\n');
        }
        if !lines.is_empty() {
            out.push_str(&lines.join("\n"));
            out.push_str("\n\n");
        }
        out
    }

    fn named_assignments(&self, target: &str) -> String {
        let mut out = String::from("\n");
        for binding in &self.exports.bindings {
            out.push_str(&format!("{} = {};\n", property_access(target, &binding.exported), binding.local));
        }
        for source in &self.exports.star_externals {
            let index = self
                .externals
                .iter()
                .position(|external| &external.source == source)
                .unwrap_or_default();
            let var = external_var(index);
            out.push_str(&format!(
                "Object.keys({var}).forEach(function (k) {{\n  if (k !== 'default' && !Object.prototype.hasOwnProperty.call({target}, k)) {target}[k] = {var}[k];\n}});\n",
                var = var,
                target = target
            ));
        }
        out
    }

    fn quoted_sources(&self) -> Vec<String> {
        self.externals
            .iter()
            .map(|external| format!("'{}'", external.source))
            .collect()
    }

    fn factory_params(&self) -> Vec<String> {
        (0..self.externals.len()).map(external_var).collect()
    }

    fn global_names(&self, globals: &BTreeMap<String, String>) -> Vec<String> {
        self.externals
            .iter()
            .map(|external| match globals.get(&external.source) {
                Some(global) => global.clone(),
                None => {
                    let guessed = guess_global_name(&external.source);
                    Logger::warn(&format!(
                        "No global name given for external '{}', guessing '{}'",
                        external.source, guessed
                    ));
                    guessed
                }
            })
            .collect()
    }
}

fn require_name<'a>(options: &GenerateOptions<'a>) -> Result<&'a str> {
    if options.name.is_empty() {
        Err(LibpackError::config(format!(
            "a module name is required for {} bundles with exports",
            options.format
        )))
    } else {
        Ok(options.name)
    }
}

fn external_var(index: usize) -> String {
    format!("__ext_{}", index)
}

/// `lodash-es` → `lodashEs`, `@scope/pkg` → `scopePkg`
fn guess_global_name(source: &str) -> String {
    let mut name = String::new();
    for (position, word) in source
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .enumerate()
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if position == 0 {
                name.push(first.to_ascii_lowercase());
            } else {
                name.push(first.to_ascii_uppercase());
            }
            name.push_str(chars.as_str());
        }
    }
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn es_import(external: &ExternalImport) -> String {
    let source = format!("'{}'", external.source);
    if !external.has_bindings() {
        return format!("import {};\n", source);
    }

    let mut out = String::new();
    let named = if external.named.is_empty() {
        None
    } else {
        let items: Vec<String> = external
            .named
            .iter()
            .map(|(imported, local)| {
                if imported == local {
                    local.clone()
                } else {
                    format!("{} as {}", imported, local)
                }
            })
            .collect();
        Some(format!("{{ {} }}", items.join(", ")))
    };

    let mut defaults = external.defaults.iter();
    match (defaults.next(), named) {
        (Some(default), Some(named)) => out.push_str(&format!("import {}, {} from {};\n", default, named, source)),
        (Some(default), None) => out.push_str(&format!("import {} from {};\n", default, source)),
        (None, Some(named)) => out.push_str(&format!("import {} from {};\n", named, source)),
        (None, None) => {}
    }
    for default in defaults {
        out.push_str(&format!("import {} from {};\n", default, source));
    }
    for namespace in &external.namespaces {
        out.push_str(&format!("import * as {} from {};\n", namespace, source));
    }
    out
}
