//! Compiler configuration.

use serde::Deserialize;

/// Default ceiling on AST nesting before compilation gives up on a subtree.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 200;

/// Options controlling a single compilation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Name recorded in the module header.
    pub source_name: String,
    /// Maximum expression nesting depth.
    pub max_nesting_depth: usize,
    /// When false, type diagnostics are dropped instead of failing compilation.
    pub type_check: bool,
    /// Globals supplied by the host at runtime (natives). Typed `any`.
    pub host_globals: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            source_name: "<main>".to_string(),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            type_check: true,
            host_globals: vec!["print".to_string()],
        }
    }
}

impl CompilerOptions {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_type_check(mut self, type_check: bool) -> Self {
        self.type_check = type_check;
        self
    }

    pub fn with_host_global(mut self, name: impl Into<String>) -> Self {
        self.host_globals.push(name.into());
        self
    }

    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
