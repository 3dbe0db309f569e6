// Top-level name bookkeeping for the shared bundle scope

use crate::utils::{LibpackError, Result};
use oxc_allocator::Allocator;
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::{SemanticBuilder, SymbolId};
use oxc_span::{GetSpan, SourceType, Span};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Identifiers the format wrappers declare or read around the bundle body
const WRAPPER_NAMES: [&str; 6] = ["exports", "module", "require", "define", "__exports", "__interopDefault"];

/// Every name bound or read at the top of the bundle so far
#[derive(Debug)]
pub(crate) struct TopLevelNames {
    taken: HashSet<String>,
    /// local → (source, imported) for bindings pulled from externals
    externals: HashMap<String, (String, String)>,
}

impl Default for TopLevelNames {
    fn default() -> Self {
        Self {
            taken: WRAPPER_NAMES.iter().map(|name| name.to_string()).collect(),
            externals: HashMap::new(),
        }
    }
}

impl TopLevelNames {
    pub fn reserve<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taken.extend(names.into_iter().map(Into::into));
    }

    /// A top-level name for a binding the bundler declares itself
    pub fn claim(&mut self, local: &str) -> String {
        let claimed = if self.taken.contains(local) {
            self.fresh(local, &HashSet::new())
        } else {
            local.to_string()
        };
        self.taken.insert(claimed.clone());
        claimed
    }

    /// The local an external binding lives under. Two modules importing the same
    /// binding under the same name share it, anything else gets a fresh name.
    pub fn claim_external(&mut self, source: &str, imported: &str, local: &str) -> String {
        let key = (source.to_string(), imported.to_string());
        if self.externals.get(local) == Some(&key) {
            return local.to_string();
        }
        let claimed = self.claim(local);
        self.externals.insert(claimed.clone(), key);
        claimed
    }

    /// Renames the chunk's top-level bindings that are already taken to `name$N`
    /// and claims the rest. Free references named in `links` are pointed at the
    /// top-level binding they map to, through a `var` alias when a nested scope
    /// would shadow it. Returns the new code with every old → new name.
    pub fn deconflict(
        &mut self,
        path: &Path,
        code: &str,
        links: &HashMap<String, String>,
    ) -> Result<(String, HashMap<String, String>)> {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, code, SourceType::mjs()).parse();
        if let Some(error) = parsed.errors.first() {
            return Err(LibpackError::build(format!(
                "Rewriting {} produced invalid code: {}",
                path.display(),
                error
            )));
        }

        let semantic = SemanticBuilder::new().build(&parsed.program).semantic;
        let scoping = semantic.scoping();
        let nodes = semantic.nodes();
        let root = scoping.root_scope_id();

        let shorthand: HashSet<Span> = nodes
            .iter()
            .filter_map(|node| match node.kind() {
                AstKind::ObjectProperty(property) if property.shorthand => Some(property.key.span()),
                AstKind::BindingProperty(property) if property.shorthand => Some(property.key.span()),
                AstKind::AssignmentTargetPropertyIdentifier(target) => Some(target.binding.span),
                _ => None,
            })
            .collect();

        let mut in_chunk: HashSet<&str> = scoping.symbol_names().collect();
        in_chunk.extend(scoping.root_unresolved_references().keys().copied());
        let nested: HashSet<&str> = scoping
            .symbol_ids()
            .filter(|symbol| scoping.symbol_scope_id(*symbol) != root)
            .map(|symbol| scoping.symbol_name(symbol))
            .collect();

        let mut symbols: Vec<SymbolId> = scoping.iter_bindings_in(root).collect();
        symbols.sort_by_key(|symbol| scoping.symbol_span(*symbol).start);

        let mut renames = HashMap::new();
        let mut edits: Vec<(Span, String)> = Vec::new();
        let mut rename_at = |span: Span, name: &str, renamed: &str| {
            let text = if shorthand.contains(&span) {
                format!("{}: {}", name, renamed)
            } else {
                renamed.to_string()
            };
            edits.push((span, text));
        };

        for symbol in symbols {
            let name = scoping.symbol_name(symbol);
            if !self.taken.contains(name) {
                self.taken.insert(name.to_string());
                continue;
            }

            let renamed = self.fresh(name, &in_chunk);
            self.taken.insert(renamed.clone());

            rename_at(scoping.symbol_span(symbol), name, &renamed);
            for redeclaration in scoping.symbol_redeclarations(symbol) {
                rename_at(redeclaration.span, name, &renamed);
            }
            for reference in scoping.get_resolved_reference_ids(symbol) {
                let node = nodes.get_node(scoping.get_reference(*reference).node_id());
                rename_at(node.span(), name, &renamed);
            }
            renames.insert(name.to_string(), renamed);
        }

        let mut aliases = Vec::new();
        let mut sorted_links: Vec<(&String, &String)> = links.iter().collect();
        sorted_links.sort();
        for (name, target) in sorted_links {
            let Some(references) = scoping.root_unresolved_references().get(name.as_str()) else {
                renames.insert(name.clone(), target.clone());
                continue;
            };

            let local = if nested.contains(target.as_str()) {
                let alias = if self.taken.contains(name) {
                    self.fresh(name, &in_chunk)
                } else {
                    name.clone()
                };
                self.taken.insert(alias.clone());
                aliases.push(format!("var {} = {};", alias, target));
                alias
            } else {
                target.clone()
            };

            if &local != name {
                for reference in references.iter() {
                    let node = nodes.get_node(scoping.get_reference(*reference).node_id());
                    rename_at(node.span(), name, &local);
                }
            }
            renames.insert(name.clone(), local);
        }

        edits.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
        edits.dedup_by_key(|(span, _)| span.start);

        let mut output = code.to_string();
        for (span, text) in edits {
            output.replace_range(span.start as usize..span.end as usize, &text);
        }
        if !aliases.is_empty() {
            output.insert_str(0, &(aliases.join("\n") + "\n"));
        }
        Ok((output, renames))
    }

    fn fresh(&self, name: &str, in_chunk: &HashSet<&str>) -> String {
        let mut suffix = 1;
        loop {
            let candidate = format!("{}${}", name, suffix);
            if !self.taken.contains(&candidate) && !in_chunk.contains(candidate.as_str()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deconflict(names: &mut TopLevelNames, code: &str) -> (String, HashMap<String, String>) {
        names.deconflict(Path::new("mod.js"), code, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_first_declaration_keeps_its_name() {
        let mut names = TopLevelNames::default();
        let (code, renames) = deconflict(&mut names, "function helper() { return 1; }\nhelper();");

        assert_eq!(code, "function helper() { return 1; }\nhelper();");
        assert!(renames.is_empty());
    }

    #[test]
    fn test_renames_declaration_and_references() {
        let mut names = TopLevelNames::default();
        deconflict(&mut names, "function helper() {}");

        let (code, renames) = deconflict(
            &mut names,
            "var helper = 2;\nvar helper = 3;\nfunction run() { return helper + 1; }\nvar obj = { helper };",
        );

        assert_eq!(
            code,
            "var helper$1 = 2;\nvar helper$1 = 3;\nfunction run() { return helper$1 + 1; }\nvar obj = { helper: helper$1 };"
        );
        assert_eq!(renames.get("helper").map(String::as_str), Some("helper$1"));
    }

    #[test]
    fn test_shorthand_destructuring_keeps_property_key() {
        let mut names = TopLevelNames::default();
        names.reserve(["size"]);

        let (code, _) = deconflict(&mut names, "const { size } = opts;\nlet total = size;");

        assert_eq!(code, "const { size: size$1 } = opts;\nlet total = size$1;");
    }

    #[test]
    fn test_inner_scopes_are_left_alone() {
        let mut names = TopLevelNames::default();
        names.reserve(["value"]);

        let (code, renames) = deconflict(&mut names, "function run(value) { return value; }");

        assert_eq!(code, "function run(value) { return value; }");
        assert!(renames.is_empty());
    }

    #[test]
    fn test_fresh_name_avoids_names_in_the_chunk() {
        let mut names = TopLevelNames::default();
        names.reserve(["a"]);

        let (code, _) = deconflict(&mut names, "var a = 1;\nfunction f() { var a$1 = a; return a$1; }");

        assert_eq!(code, "var a$2 = 1;\nfunction f() { var a$1 = a$2; return a$1; }");
    }

    #[test]
    fn test_external_locals_are_shared_or_renamed() {
        let mut names = TopLevelNames::default();
        assert_eq!(names.claim_external("lodash", "default", "_"), "_");
        assert_eq!(names.claim_external("lodash", "default", "_"), "_");
        assert_eq!(names.claim_external("underscore", "default", "_"), "_$1");

        let renames = HashMap::from([("_".to_string(), "_$1".to_string())]);
        let (code, _) = names
            .deconflict(Path::new("mod.js"), "export_it(_.map);", &renames)
            .unwrap();
        assert_eq!(code, "export_it(_$1.map);");
    }

    #[test]
    fn test_links_point_free_references_at_their_binding() {
        let mut names = TopLevelNames::default();
        names.reserve(["add"]);
        let links = HashMap::from([("plus".to_string(), "add".to_string())]);

        let (code, renames) = names
            .deconflict(Path::new("mod.js"), "plus(1, 2);\nvar o = { plus };", &links)
            .unwrap();

        assert_eq!(code, "add(1, 2);\nvar o = { plus: add };");
        assert_eq!(renames.get("plus").map(String::as_str), Some("add"));
    }

    #[test]
    fn test_shadowed_link_goes_through_an_alias() {
        let mut names = TopLevelNames::default();
        names.reserve(["label"]);
        let links = HashMap::from([("mathLabel".to_string(), "label".to_string())]);

        let (code, _) = names
            .deconflict(
                Path::new("mod.js"),
                "const label = 'index';\nfunction show(label) { return mathLabel + label; }",
                &links,
            )
            .unwrap();

        assert_eq!(
            code,
            "var mathLabel = label;\nconst label$1 = 'index';\nfunction show(label) { return mathLabel + label; }"
        );
    }

    #[test]
    fn test_wrapper_names_are_reserved() {
        let mut names = TopLevelNames::default();
        let (code, _) = deconflict(&mut names, "var exports = {};\nexports.a = 1;");

        assert_eq!(code, "var exports$1 = {};\nexports$1.a = 1;");
    }

    #[test]
    fn test_invalid_chunk_is_a_build_error() {
        let mut names = TopLevelNames::default();
        let error = names
            .deconflict(Path::new("mod.js"), "var = ;", &HashMap::new())
            .unwrap_err();

        assert!(error.to_string().contains("mod.js"));
    }
}
