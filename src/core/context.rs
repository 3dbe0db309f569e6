// Per-invocation state shared by concurrently running targets

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Stylesheet text collected from `import './x.css'` statements
pub const STYLESHEET: &str = "stylesheet";

/// Stylesheet after the compile step of the stylesheet stage
pub const COMPILED_STYLESHEET: &str = "stylesheet.compiled";

/// Side artifacts handed from one target to a later stage
///
/// The first caller of [`SharedContext::claim`] for a name becomes the only
/// writer of that artifact for the rest of the invocation.
#[derive(Debug, Default)]
pub struct SharedContext {
    artifacts: DashMap<String, Arc<Mutex<String>>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically acquire the right to populate `name`
    ///
    /// Returns `None` when another target already holds the claim.
    pub fn claim(&self, name: &str) -> Option<ArtifactClaim> {
        match self.artifacts.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let buffer = Arc::new(Mutex::new(String::new()));
                slot.insert(buffer.clone());
                Some(ArtifactClaim {
                    name: name.to_string(),
                    buffer,
                })
            }
        }
    }

    /// Snapshot of an artifact's content
    pub fn artifact(&self, name: &str) -> Option<String> {
        self.artifacts.get(name).map(|buffer| buffer.lock().clone())
    }

    /// Replace an artifact's content outright, for sequential stages
    pub fn publish(&self, name: &str, content: String) {
        let buffer = self
            .artifacts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(String::new())))
            .clone();
        *buffer.lock() = content;
    }
}

/// Exclusive write access to one side artifact
#[derive(Debug)]
pub struct ArtifactClaim {
    name: String,
    buffer: Arc<Mutex<String>>,
}

impl ArtifactClaim {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append(&self, content: &str) {
        let mut buffer = self.buffer.lock();
        buffer.push_str(content);
        if !content.ends_with('\n') {
            buffer.push('\n');
        }
    }
}
