//! Typed store of the hooks registered by the extension scripts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use mlua::RegistryKey;

use crate::types::error::{Diagnostic, ErrorCode};

/// The registry as shared by the bridge and the pipeline. Registration
/// stays possible while the pipeline holds on to it.
pub type SharedRegistry = Rc<RefCell<Registry>>;

/* -------------------- *
 *        PHASE         *
 * -------------------- */
/// The phases of the transformation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    OnSetup,
    ModifyInitialString,
    ReadNewNode,
    ModifyNode,
    ReadModifiedNode,
    ConvertNodeToString,
    ModifyFinalString,
    OnTeardown,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 8] = [
        Phase::OnSetup,
        Phase::ModifyInitialString,
        Phase::ReadNewNode,
        Phase::ModifyNode,
        Phase::ReadModifiedNode,
        Phase::ConvertNodeToString,
        Phase::ModifyFinalString,
        Phase::OnTeardown,
    ];

    /// Returns the phase name as exposed to the extension scripts.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Phase::OnSetup => "on_setup",
            Phase::ModifyInitialString => "modify_initial_string",
            Phase::ReadNewNode => "read_new_node",
            Phase::ModifyNode => "modify_node",
            Phase::ReadModifiedNode => "read_modified_node",
            Phase::ConvertNodeToString => "convert_node_to_string",
            Phase::ModifyFinalString => "modify_final_string",
            Phase::OnTeardown => "on_teardown",
        }
    }

    /// Looks a phase up by its exposed name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|phase| phase.name() == name)
    }

    /// Checks whether hooks of this phase are selected by a call name
    /// filter. The lifecycle and string phases are not.
    #[must_use]
    pub fn takes_filter(self) -> bool {
        matches!(
            self,
            Phase::ReadNewNode | Phase::ModifyNode | Phase::ReadModifiedNode | Phase::ConvertNodeToString
        )
    }
}

/* -------------------- *
 *     HOOK RECORD      *
 * -------------------- */
/// One registered hook: the Lua function plus the site that registered
/// it, kept for diagnostics about the hook.
#[derive(Clone)]
pub struct HookRecord {
    /// Human-readable registration site (chunk, line, enclosing scope).
    pub source: String,
    /// Registry handle of the Lua hook function.
    pub callback: Rc<RegistryKey>,
}

/* -------------------- *
 *       REGISTRY       *
 * -------------------- */
/// Per-invocation hook store: for every phase a mapping from filter to
/// the ordered list of hooks registered under it. The empty filter
/// matches every call. Registration stays open while the pipeline runs,
/// so a converter may register converters for calls that have not been
/// reduced yet.
#[derive(Default)]
pub struct Registry {
    hooks: HashMap<Phase, HashMap<String, Vec<HookRecord>>>,
}

impl Registry {
    /// Creates a new instance of [`Registry`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for a phase under a filter.
    pub fn register(&mut self, phase: Phase, filter: &str, record: HookRecord) -> Result<(), Diagnostic> {
        if phase.takes_filter() {
            if !filter.is_empty() && !is_valid_filter(filter) {
                return Err(Diagnostic::new(
                    ErrorCode::InvalidFilter,
                    format!("filter {filter:?} does not match the call name grammar"),
                )
                .with_expected("an empty string or a name without '{', '}', '[', '<', '=' or whitespace")
                .with_source(record.source));
            }
        } else if !filter.is_empty() {
            return Err(Diagnostic::new(
                ErrorCode::InvalidFilter,
                format!("phase '{}' does not select nodes, its hooks take no filter", phase.name()),
            )
            .with_source(record.source));
        }

        if phase == Phase::ConvertNodeToString {
            if let Some(existing) = self.filter_hooks(phase, filter).first() {
                let shown = if filter.is_empty() { "the empty filter" } else { filter };

                return Err(Diagnostic::new(
                    ErrorCode::DuplicateConverter,
                    format!("a converter for {shown} is already registered"),
                )
                .with_context(format!("the first converter was registered at {}", existing.source))
                .with_fix("merge both converters into one function")
                .with_source(record.source));
            }
        }

        self.hooks
            .entry(phase)
            .or_default()
            .entry(filter.to_owned())
            .or_default()
            .push(record);

        Ok(())
    }

    /// Returns the hooks firing for a node with the given call name:
    /// the specific-filter list first, then the empty-filter list, each
    /// in registration order. Every entry carries the filter it matched
    /// under.
    #[must_use]
    pub fn matching(&self, phase: Phase, call: &str) -> Vec<(String, HookRecord)> {
        let mut matched = Vec::new();

        for record in self.filter_hooks(phase, call) {
            matched.push((call.to_owned(), record.clone()));
        }
        for record in self.filter_hooks(phase, "") {
            matched.push((String::new(), record.clone()));
        }

        matched
    }

    /// Returns the single converter for a call name, preferring the
    /// specific filter over the empty filter.
    #[must_use]
    pub fn converter_for(&self, call: &str) -> Option<HookRecord> {
        self.filter_hooks(Phase::ConvertNodeToString, call)
            .first()
            .or_else(|| self.filter_hooks(Phase::ConvertNodeToString, "").first())
            .cloned()
    }

    /// Returns the hooks of a filterless phase in registration order.
    #[must_use]
    pub fn lifecycle_hooks(&self, phase: Phase) -> Vec<HookRecord> {
        self.filter_hooks(phase, "").to_vec()
    }

    fn filter_hooks(&self, phase: Phase, filter: &str) -> &[HookRecord] {
        self.hooks
            .get(&phase)
            .and_then(|by_filter| by_filter.get(filter))
            .map_or(&[], Vec::as_slice)
    }
}

/// Checks a non-empty filter against the call name grammar.
fn is_valid_filter(filter: &str) -> bool {
    !filter
        .chars()
        .any(|chr| chr.is_whitespace() || matches!(chr, '{' | '}' | '[' | '<' | '='))
}

#[cfg(test)]
mod tests {
    use mlua::Lua;

    use super::*;

    fn record(lua: &Lua, source: &str) -> HookRecord {
        let func = lua.create_function(|_, ()| Ok(())).unwrap();
        HookRecord {
            source: source.to_owned(),
            callback: Rc::new(lua.create_registry_value(func).unwrap()),
        }
    }

    #[test]
    fn phase_names_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_name(phase.name()), Some(phase));
        }
        assert_eq!(Phase::from_name("before_everything"), None);
    }

    #[test]
    fn specific_filter_hooks_fire_before_empty_filter_hooks() {
        let lua = Lua::new();
        let mut registry = Registry::new();

        registry.register(Phase::ReadNewNode, "", record(&lua, "first wildcard")).unwrap();
        registry.register(Phase::ReadNewNode, "item", record(&lua, "specific")).unwrap();
        registry.register(Phase::ReadNewNode, "", record(&lua, "second wildcard")).unwrap();

        let matched = registry.matching(Phase::ReadNewNode, "item");
        let sources: Vec<&str> = matched.iter().map(|(_, r)| r.source.as_str()).collect();

        assert_eq!(sources, vec!["specific", "first wildcard", "second wildcard"]);
        assert_eq!(matched[0].0, "item");
        assert_eq!(matched[1].0, "");
    }

    #[test]
    fn second_converter_for_the_same_filter_is_rejected() {
        let lua = Lua::new();
        let mut registry = Registry::new();

        registry.register(Phase::ConvertNodeToString, "item", record(&lua, "one")).unwrap();
        let err = registry
            .register(Phase::ConvertNodeToString, "item", record(&lua, "two"))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::DuplicateConverter);
        assert_eq!(err.source_site(), Some("two"));
    }

    #[test]
    fn converter_uniqueness_also_covers_the_empty_filter() {
        let lua = Lua::new();
        let mut registry = Registry::new();

        registry.register(Phase::ConvertNodeToString, "", record(&lua, "one")).unwrap();
        let err = registry.register(Phase::ConvertNodeToString, "", record(&lua, "two")).unwrap_err();

        assert_eq!(err.code(), ErrorCode::DuplicateConverter);
    }

    #[test]
    fn specific_converter_shadows_the_wildcard_converter() {
        let lua = Lua::new();
        let mut registry = Registry::new();

        registry.register(Phase::ConvertNodeToString, "", record(&lua, "wildcard")).unwrap();
        registry.register(Phase::ConvertNodeToString, "item", record(&lua, "specific")).unwrap();

        assert_eq!(registry.converter_for("item").unwrap().source, "specific");
        assert_eq!(registry.converter_for("other").unwrap().source, "wildcard");
    }

    #[test]
    fn malformed_filters_are_rejected() {
        let lua = Lua::new();
        let mut registry = Registry::new();

        for filter in ["with space", "br{ce", "open[", "less<", "eq=al"] {
            let err = registry
                .register(Phase::ModifyNode, filter, record(&lua, "site"))
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidFilter);
        }
    }

    #[test]
    fn lifecycle_phases_reject_non_empty_filters() {
        let lua = Lua::new();
        let mut registry = Registry::new();

        let err = registry.register(Phase::OnSetup, "item", record(&lua, "site")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFilter);
    }
}
