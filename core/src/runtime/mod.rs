//! The Lua-facing half of the crate.
//!
//! # Interdependency graph
//!
//! ```text
//! registry ───▶ bridge ───▶ transform
//!     ▲                         │
//!     └─────────────────────────┘
//! ```

pub mod bridge;
pub mod registry;
pub mod transform;

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::Lua;

use crate::types::error::{Diagnostic, ErrorCode};
use self::bridge::{Config, Printer};
use self::registry::{Registry, SharedRegistry};
use self::transform::{Pipeline, PipelineError};

/* -------------------- *
 *       RUNTIME        *
 * -------------------- */
/// One embedded Lua runtime with its hook registry, living for one
/// invocation: install the environment, load the hook scripts, then
/// run the pipeline.
pub struct Runtime {
    lua: Lua,
    registry: SharedRegistry,
}

impl Runtime {
    /// Creates a runtime whose log messages go to stderr.
    pub fn new(config: Config) -> Result<Self, Diagnostic> {
        Self::with_printer(config, Rc::new(|line: &str| eprintln!("{line}")))
    }

    /// Creates a runtime with an injected message sink.
    pub fn with_printer(config: Config, printer: Printer) -> Result<Self, Diagnostic> {
        let lua = Lua::new();
        let registry: SharedRegistry = Rc::new(RefCell::new(Registry::new()));

        bridge::install(&lua, &registry, &config, printer)?;

        Ok(Self { lua, registry })
    }

    /// Loads and executes one hook file. Its top-level effect is to
    /// register hooks; registration failures abort the invocation.
    pub fn load_hook_file(&self, path: &Path) -> Result<(), Diagnostic> {
        let source = fs::read_to_string(path).map_err(|err| {
            Diagnostic::new(
                ErrorCode::ScriptError,
                format!("cannot read hook file '{}': {err}", path.display()),
            )
        })?;

        self.load_hook_chunk(&path.display().to_string(), &source)
    }

    /// Loads and executes hook code under the given chunk name.
    pub fn load_hook_chunk(&self, name: &str, source: &str) -> Result<(), Diagnostic> {
        self.lua
            .load(source)
            .set_name(format!("@{name}"))
            .exec()
            .map_err(|err| match transform::extract_diagnostic(&err) {
                Some(diag) => diag,
                None => Diagnostic::new(
                    ErrorCode::ScriptError,
                    format!("hook script '{name}' failed: {err}"),
                ),
            })
    }

    /// Runs the transformation pipeline over the given source text.
    pub fn transform(&self, source: &str) -> Result<String, PipelineError> {
        Pipeline::new(&self.lua, self.registry.clone()).run(source)
    }
}

/* -------------------- *
 *      DISCOVERY       *
 * -------------------- */
/// Finds the hook scripts of a directory: every file whose base name
/// starts with `hooks` and ends with `.lua`, in sorted filename order.
pub fn discover_hook_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();

        if let Some(name) = name.to_str() {
            if name.starts_with("hooks") && name.ends_with(".lua") {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
