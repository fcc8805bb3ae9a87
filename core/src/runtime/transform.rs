//! The transformation pipeline reducing a document to a string.
//!
//! Strict phase order: `on_setup`, `modify_initial_string`, lexing and
//! parsing, `read_new_node`, `modify_node`, `read_modified_node`,
//! `convert_node_to_string`, `modify_final_string`, `on_teardown`.
//! Reader phases hand every hook an independent copy of the node, the
//! mutator and reducer phases hand over the live node and splice the
//! returned value back into the tree. Whenever phase one was reached,
//! the teardown phase runs, no matter how the phases in between fared.

use std::error;
use std::fmt::{self, Display};

use mlua::{Error as LuaError, Function, Lua, MultiValue, Value};

use super::bridge;
use super::registry::{HookRecord, Phase, SharedRegistry};
use crate::lang::lexer::Lexer;
use crate::lang::parser::Parser;
use crate::types::error::{Diagnostic, ErrorCode};
use crate::types::tree::{Element, StringForm, CALL_LEFT_BRACE, CALL_RIGHT_BRACE};

/* -------------------- *
 *   PIPELINE ERROR     *
 * -------------------- */
/// The failure of one pipeline run: the primary diagnostic plus the
/// teardown diagnostic if the guaranteed teardown failed as well.
#[derive(Debug)]
pub struct PipelineError {
    /// The first failure that stopped the pipeline.
    pub primary: Diagnostic,
    /// A failure of the teardown phase running after the primary one.
    pub teardown: Option<Diagnostic>,
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.primary.fmt(f)?;

        if let Some(teardown) = &self.teardown {
            write!(f, "\n{teardown}")?;
        }

        Ok(())
    }
}

impl error::Error for PipelineError {}

/* -------------------- *
 *       PIPELINE       *
 * -------------------- */
/// Represents one pipeline run over one document.
pub struct Pipeline<'lua> {
    lua: &'lua Lua,
    registry: SharedRegistry,
}

impl<'lua> Pipeline<'lua> {
    /// Creates a new instance of [`Pipeline`].
    #[inline]
    #[must_use]
    pub fn new(lua: &'lua Lua, registry: SharedRegistry) -> Self {
        Self { lua, registry }
    }

    /// Runs all phases over the source text and returns the final
    /// string. Teardown runs in every case; if it fails on top of a
    /// primary failure, both diagnostics are reported.
    pub fn run(&self, source: &str) -> Result<String, PipelineError> {
        let primary = self.run_phases(source);
        let teardown = self.run_lifecycle(Phase::OnTeardown);

        match (primary, teardown) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(failed)) => Err(PipelineError { primary: failed, teardown: None }),
            (Err(primary), Ok(())) => Err(PipelineError { primary, teardown: None }),
            (Err(primary), Err(failed)) => Err(PipelineError { primary, teardown: Some(failed) }),
        }
    }

    fn run_phases(&self, source: &str) -> Result<String, Diagnostic> {
        self.run_lifecycle(Phase::OnSetup)?;

        let text = self.run_string_phase(Phase::ModifyInitialString, source.to_owned())?;
        let tokens = Lexer::new(&text).tokenize()?;
        let document = Parser::new(tokens).parse()?;
        let mut root = Element::Call(document);

        self.read_pass(Phase::ReadNewNode, &root, 0)?;
        self.modify_pass(&mut root, 0)?;
        self.read_pass(Phase::ReadModifiedNode, &root, 0)?;

        // the root keeps its bare string form even if a modifier
        // replaced it with a hand-built node
        if let Element::Call(node) = &mut root {
            node.form = StringForm::Bare;
        }

        let rendered = self.convert(root)?;
        self.run_string_phase(Phase::ModifyFinalString, rendered)
    }

    /* -------------------- *
     *  LIFECYCLE PHASES    *
     * -------------------- */
    fn run_lifecycle(&self, phase: Phase) -> Result<(), Diagnostic> {
        let hooks = self.registry.borrow().lifecycle_hooks(phase);

        for record in hooks {
            let func = self.hook_fn(&record)?;
            let returned = func
                .call::<_, MultiValue>(())
                .map_err(|err| hook_failure(&record, &err))?;

            ensure_silent(phase, &record, returned)?;
        }

        Ok(())
    }

    fn run_string_phase(&self, phase: Phase, mut text: String) -> Result<String, Diagnostic> {
        let hooks = self.registry.borrow().lifecycle_hooks(phase);

        for record in hooks {
            let func = self.hook_fn(&record)?;
            let returned = func
                .call::<_, Value>(text.as_str())
                .map_err(|err| hook_failure(&record, &err))?;

            text = match returned {
                Value::String(next) => match next.to_str() {
                    Ok(next) => next.to_owned(),
                    Err(_) => return Err(non_utf8(phase, &record)),
                },
                other => {
                    return Err(Diagnostic::new(
                        ErrorCode::HookReturnShape,
                        format!("a hook of phase '{}' must return the next text", phase.name()),
                    )
                    .with_actual(other.type_name().to_owned())
                    .with_source(record.source.clone()));
                }
            };
        }

        Ok(text)
    }

    /* -------------------- *
     *    READER PHASES     *
     * -------------------- */
    fn read_pass(&self, phase: Phase, element: &Element, depth: u32) -> Result<(), Diagnostic> {
        let Element::Call(node) = element else {
            return Ok(());
        };

        // drop the registry guard before calling out, hooks register
        let hooks = self.registry.borrow().matching(phase, &node.call);

        for (_, record) in hooks {
            let func = self.hook_fn(&record)?;
            let copy = bridge::node_to_lua(self.lua, node).map_err(runtime_fault)?;
            let returned = func
                .call::<_, MultiValue>((copy, depth))
                .map_err(|err| hook_failure(&record, &err))?;

            ensure_silent(phase, &record, returned)?;
        }

        for key in node.sorted_arg_keys() {
            for element in &node.args[&key] {
                self.read_pass(phase, element, depth + 1)?;
            }
        }
        for child in &node.content {
            self.read_pass(phase, child, depth + 1)?;
        }

        Ok(())
    }

    /* -------------------- *
     *    MUTATOR PHASE     *
     * -------------------- */
    fn modify_pass(&self, slot: &mut Element, depth: u32) -> Result<(), Diagnostic> {
        let Element::Call(node) = &*slot else {
            return Ok(());
        };

        let hooks = self.registry.borrow().matching(Phase::ModifyNode, &node.call);

        for (filter, record) in hooks {
            // a previous hook may have replaced the node with text
            let Element::Call(node) = &*slot else {
                break;
            };

            let func = self.hook_fn(&record)?;
            let live = bridge::node_to_lua(self.lua, node).map_err(runtime_fault)?;
            let returned = func
                .call::<_, MultiValue>((live, depth, filter.as_str()))
                .map_err(|err| hook_failure(&record, &err))?;

            let mut values = returned.into_iter();
            let replacement = values.next().unwrap_or(Value::Nil);
            let failure = values.next().unwrap_or(Value::Nil);

            if !matches!(failure, Value::Nil) {
                return Err(hook_error_value(&record, &failure));
            }

            match replacement {
                Value::String(text) => match text.to_str() {
                    Ok(text) => *slot = Element::Text(text.to_owned()),
                    Err(_) => return Err(non_utf8(Phase::ModifyNode, &record)),
                },
                table @ Value::Table(_) => {
                    let replaced = bridge::node_from_lua(&table).map_err(|reason| {
                        Diagnostic::new(ErrorCode::HookReturnShape, reason)
                            .with_source(record.source.clone())
                    })?;
                    *slot = Element::Call(replaced);
                }
                other => {
                    return Err(Diagnostic::new(
                        ErrorCode::HookReturnShape,
                        "a modify_node hook must return the replacement node or text",
                    )
                    .with_actual(other.type_name().to_owned())
                    .with_source(record.source.clone()));
                }
            }
        }

        if let Element::Call(node) = slot {
            for key in node.sorted_arg_keys() {
                if let Some(elements) = node.args.get_mut(&key) {
                    for element in elements.iter_mut() {
                        self.modify_pass(element, depth + 1)?;
                    }
                }
            }
            for child in node.content.iter_mut() {
                self.modify_pass(child, depth + 1)?;
            }
        }

        Ok(())
    }

    /* -------------------- *
     *    REDUCER PHASE     *
     * -------------------- */
    fn convert(&self, element: Element) -> Result<String, Diagnostic> {
        let mut node = match element {
            Element::Text(text) => return Ok(text),
            Element::Call(node) => node,
        };

        // reserved escapes reduce before any hook is consulted
        if node.call == CALL_LEFT_BRACE {
            return Ok("{".to_owned());
        }
        if node.call == CALL_RIGHT_BRACE {
            return Ok("}".to_owned());
        }

        // raw strings protect text from interpretation; their
        // reduction is the verbatim body
        if node.is_raw() {
            return Ok(node.totext());
        }

        for key in node.sorted_arg_keys() {
            if let Some(elements) = node.args.remove(&key) {
                let mut reduced = Vec::with_capacity(elements.len());
                for element in elements {
                    reduced.push(Element::Text(self.convert(element)?));
                }
                node.args.insert(key, reduced);
            }
        }

        let content = std::mem::take(&mut node.content);
        let mut reduced = Vec::with_capacity(content.len());
        for element in content {
            reduced.push(Element::Text(self.convert(element)?));
        }
        node.content = reduced;

        let converter = self.registry.borrow().converter_for(&node.call);
        let Some(record) = converter else {
            return Ok(node.to_string());
        };

        let func = self.hook_fn(&record)?;
        let reduced_node = bridge::node_to_lua(self.lua, &node).map_err(runtime_fault)?;
        let returned = func
            .call::<_, MultiValue>(reduced_node)
            .map_err(|err| hook_failure(&record, &err))?;

        let mut values = returned.into_iter();
        let rendered = values.next().unwrap_or(Value::Nil);
        let failure = values.next().unwrap_or(Value::Nil);

        if !matches!(failure, Value::Nil) {
            return Err(hook_error_value(&record, &failure));
        }

        match rendered {
            Value::String(text) => match text.to_str() {
                Ok(text) => Ok(text.to_owned()),
                Err(_) => Err(non_utf8(Phase::ConvertNodeToString, &record)),
            },
            other => Err(Diagnostic::new(
                ErrorCode::HookReturnShape,
                "a converter must return the string form of the node",
            )
            .with_actual(other.type_name().to_owned())
            .with_source(record.source.clone())),
        }
    }

    /* -------------------- *
     *        UTILS         *
     * -------------------- */
    fn hook_fn(&self, record: &HookRecord) -> Result<Function<'lua>, Diagnostic> {
        self.lua.registry_value::<Function>(&record.callback).map_err(runtime_fault)
    }
}

/* -------------------- *
 *     DIAGNOSTICS      *
 * -------------------- */
/// Recovers a structured diagnostic raised on the Rust side of a hook
/// call, e.g. a registration failure or a node access violation.
pub(crate) fn extract_diagnostic(err: &LuaError) -> Option<Diagnostic> {
    match err {
        LuaError::CallbackError { cause, .. } => extract_diagnostic(cause),
        LuaError::ExternalError(external) => external.downcast_ref::<Diagnostic>().cloned(),
        _ => None,
    }
}

fn hook_failure(record: &HookRecord, err: &LuaError) -> Diagnostic {
    if let Some(mut diag) = extract_diagnostic(err) {
        if diag.source_site().is_none() {
            diag = diag.with_source(record.source.clone());
        }
        return diag;
    }

    Diagnostic::new(ErrorCode::HookFailed, err.to_string()).with_source(record.source.clone())
}

fn hook_error_value(record: &HookRecord, value: &Value) -> Diagnostic {
    let message = match value {
        Value::String(text) => text.to_string_lossy().into_owned(),
        other => format!("hook signalled an error of type {}", other.type_name()),
    };

    Diagnostic::new(ErrorCode::HookFailed, message).with_source(record.source.clone())
}

fn ensure_silent(phase: Phase, record: &HookRecord, returned: MultiValue) -> Result<(), Diagnostic> {
    for value in returned {
        if !matches!(value, Value::Nil) {
            return Err(Diagnostic::new(
                ErrorCode::HookReturnShape,
                format!("a hook of phase '{}' must not return a value", phase.name()),
            )
            .with_actual(value.type_name().to_owned())
            .with_source(record.source.clone()));
        }
    }

    Ok(())
}

fn non_utf8(phase: Phase, record: &HookRecord) -> Diagnostic {
    Diagnostic::new(
        ErrorCode::HookReturnShape,
        format!("a hook of phase '{}' returned a non-UTF-8 string", phase.name()),
    )
    .with_source(record.source.clone())
}

fn runtime_fault(err: LuaError) -> Diagnostic {
    Diagnostic::new(ErrorCode::ScriptError, format!("Lua runtime failure: {err}"))
}
