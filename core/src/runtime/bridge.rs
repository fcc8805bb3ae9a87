//! The `Litua` environment exposed to hook scripts.
//!
//! Builds the global `Litua` table inside the embedded Lua runtime:
//! the user-owned `global` table, the read-only `config` snapshot, one
//! registration function per phase plus the generic `register`, the
//! diagnostic helpers `error`/`log`/`format`, and the `json`
//! encode/decode pair. Nodes cross the boundary as tables carrying a
//! shared metatable that implements the published attribute set and
//! rejects everything else.

use std::path::PathBuf;
use std::rc::Rc;

use mlua::{Error as LuaError, Lua, LuaSerdeExt, Result as LuaResult, Table, Value, Variadic};

use super::registry::{HookRecord, Phase, SharedRegistry};
use crate::types::error::{Diagnostic, ErrorCode};
use crate::types::tree::{Element, Node};

/// Sink for user-visible messages emitted by `Litua.log`.
pub type Printer = Rc<dyn Fn(&str)>;

const NODE_METATABLE: &str = "litua.node.metatable";
const NODE_METHODS: &str = "litua.node.methods";

/* -------------------- *
 *        CONFIG        *
 * -------------------- */
/// Snapshot of one invocation, exposed read-only as `Litua.config`.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Path of the source document.
    pub source: PathBuf,
    /// Path the transformed document is written to.
    pub destination: PathBuf,
    /// Hook files loaded for this invocation, in load order.
    pub hook_files: Vec<PathBuf>,
    /// Addition to the Lua `package.path` for hook scripts.
    pub lua_path_addition: Option<String>,
}

/* -------------------- *
 *       INSTALL        *
 * -------------------- */
/// Builds the `Litua` table and assigns it to the Lua globals.
pub fn install(
    lua: &Lua,
    registry: &SharedRegistry,
    config: &Config,
    printer: Printer,
) -> Result<(), Diagnostic> {
    install_inner(lua, registry, config, printer).map_err(|err| {
        Diagnostic::new(
            ErrorCode::ScriptError,
            format!("hook environment failed to initialize: {err}"),
        )
    })
}

fn install_inner(
    lua: &Lua,
    registry: &SharedRegistry,
    config: &Config,
    printer: Printer,
) -> LuaResult<()> {
    if let Some(addition) = &config.lua_path_addition {
        lua.load(format!("package.path = package.path .. ';{addition}'"))
            .set_name("=package.path addition")
            .exec()?;
    }

    let litua = lua.create_table()?;
    litua.set("global", lua.create_table()?)?;
    litua.set("config", config_table(lua, config)?)?;
    litua.set("json", json_table(lua)?)?;

    // generic registration entry point
    let generic = registry.clone();
    litua.set(
        "register",
        lua.create_function(move |lua, (phase, filter, callback): (String, Value, Value)| {
            let Some(phase) = Phase::from_name(&phase) else {
                let known = Phase::ALL.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ");

                return Err(LuaError::external(
                    Diagnostic::new(ErrorCode::UnknownPhase, format!("there is no phase named {phase:?}"))
                        .with_expected(known)
                        .with_source(registration_site(lua)),
                ));
            };

            register_hook(lua, &generic, phase, &filter, callback)
        })?,
    )?;

    // one sugar function per phase
    for phase in Phase::ALL {
        let shared = registry.clone();

        let sugar = if phase.takes_filter() {
            lua.create_function(move |lua, (filter, callback): (Value, Value)| {
                register_hook(lua, &shared, phase, &filter, callback)
            })?
        } else {
            lua.create_function(move |lua, callback: Value| {
                register_hook(lua, &shared, phase, &Value::Nil, callback)
            })?
        };

        litua.set(phase.name(), sugar)?;
    }

    let sink = printer.clone();
    litua.set(
        "log",
        lua.create_function(move |_, (component, message): (String, String)| {
            (*sink)(&format!("LOG[{component}]: {message}"));
            Ok(())
        })?,
    )?;

    litua.set(
        "error",
        lua.create_function(|lua, (message, details): (String, Option<Table>)| -> LuaResult<()> {
            let mut diag = Diagnostic::new(ErrorCode::HookFailed, message);

            if let Some(details) = details {
                if let Some(context) = details.get::<_, Option<String>>("context")? {
                    diag = diag.with_context(context);
                }
                if let Some(expected) = details.get::<_, Option<String>>("expected")? {
                    diag = diag.with_expected(expected);
                }
                if let Some(actual) = details.get::<_, Option<String>>("actual")? {
                    diag = diag.with_actual(actual);
                }
                if let Some(fix) = details.get::<_, Option<String>>("fix")? {
                    diag = diag.with_fix(fix);
                }
                if let Some(source) = details.get::<_, Option<String>>("source")? {
                    diag = diag.with_source(source);
                }
            }

            if diag.source_site().is_none() {
                diag = diag.with_source(registration_site(lua));
            }

            Err(LuaError::external(diag))
        })?,
    )?;

    litua.set("format", lua.create_function(format_template)?)?;

    lua.globals().set("Litua", litua)?;
    Ok(())
}

/* -------------------- *
 *     REGISTRATION     *
 * -------------------- */
fn register_hook(
    lua: &Lua,
    registry: &SharedRegistry,
    phase: Phase,
    filter: &Value,
    callback: Value,
) -> LuaResult<()> {
    let site = registration_site(lua);

    let filter = match filter {
        Value::Nil => String::new(),
        Value::String(name) => name.to_str()?.to_owned(),
        other => {
            return Err(LuaError::external(
                Diagnostic::new(
                    ErrorCode::InvalidFilter,
                    format!("filter must be a string, got {}", other.type_name()),
                )
                .with_expected("a call name, or the empty string to match every call")
                .with_source(site),
            ));
        }
    };

    let callback = match callback {
        Value::Function(func) => func,
        other => {
            return Err(LuaError::external(
                Diagnostic::new(
                    ErrorCode::InvalidHook,
                    format!("hook must be a function, got {}", other.type_name()),
                )
                .with_source(site),
            ));
        }
    };

    let record = HookRecord {
        source: site,
        callback: Rc::new(lua.create_registry_value(callback)?),
    };

    registry
        .borrow_mut()
        .register(phase, &filter, record)
        .map_err(LuaError::external)
}

/// Captures the site of the Lua frame calling into the core, for later
/// diagnostics about the registered hook.
fn registration_site(lua: &Lua) -> String {
    let Some(debug) = lua.inspect_stack(1) else {
        return "(unknown source)".to_owned();
    };

    let source = debug.source();
    let file = source
        .short_src
        .map(|name| name.into_owned())
        .unwrap_or_else(|| "?".to_owned());
    let line = debug.curr_line();

    match debug.names().name.map(|name| name.into_owned()) {
        Some(scope) => format!("{file}:{line} in '{scope}'"),
        None => format!("{file}:{line} in main chunk"),
    }
}

/* -------------------- *
 *   NODE MARSHALING    *
 * -------------------- */
/// Builds the Lua table tree for a node. Every node table carries the
/// shared metatable implementing the published attribute set.
pub fn node_to_lua<'lua>(lua: &'lua Lua, node: &Node) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    table.raw_set("call", node.call.as_str())?;

    let args = lua.create_table()?;
    for (key, elements) in &node.args {
        let list = lua.create_table()?;
        for (index, element) in elements.iter().enumerate() {
            list.raw_set(index + 1, element_to_lua(lua, element)?)?;
        }
        args.raw_set(key.as_str(), list)?;
    }
    table.raw_set("args", args)?;

    let content = lua.create_table()?;
    for (index, element) in node.content.iter().enumerate() {
        content.raw_set(index + 1, element_to_lua(lua, element)?)?;
    }
    table.raw_set("content", content)?;

    table.set_metatable(Some(node_metatable(lua)?));
    Ok(table)
}

fn element_to_lua<'lua>(lua: &'lua Lua, element: &Element) -> LuaResult<Value<'lua>> {
    match element {
        Element::Text(text) => Ok(Value::String(lua.create_string(text)?)),
        Element::Call(node) => Ok(Value::Table(node_to_lua(lua, node)?)),
    }
}

/// Reads a node table handed back by a hook. Accepts hand-built plain
/// tables as well; the error describes the first shape violation.
pub fn node_from_lua(value: &Value) -> Result<Node, String> {
    let Value::Table(table) = value else {
        return Err(format!("expected a node table, got {}", value.type_name()));
    };

    let call = match table.raw_get::<_, Value>("call").map_err(|err| err.to_string())? {
        Value::String(name) => name.to_str().map_err(|err| err.to_string())?.to_owned(),
        other => {
            return Err(format!("node field 'call' must be a string, got {}", other.type_name()));
        }
    };
    if !Node::is_valid_call(&call) {
        return Err(format!("node call name {call:?} does not match the call name grammar"));
    }

    let mut node = Node::new(call);

    match table.raw_get::<_, Value>("args").map_err(|err| err.to_string())? {
        Value::Table(args) => {
            for pair in args.pairs::<Value, Value>() {
                let (key, value) = pair.map_err(|err| err.to_string())?;

                let Value::String(key) = key else {
                    return Err(format!("argument keys must be strings, got {}", key.type_name()));
                };
                let key = key.to_str().map_err(|err| err.to_string())?.to_owned();

                let Value::Table(list) = value else {
                    return Err(format!("argument {key:?} must map to a sequence of values"));
                };

                let mut elements = Vec::new();
                for item in list.sequence_values::<Value>() {
                    let item = item.map_err(|err| err.to_string())?;
                    elements.push(element_from_lua(&item)?);
                }

                node.args.insert(key, elements);
            }
        }
        Value::Nil => {}
        other => {
            return Err(format!("node field 'args' must be a table, got {}", other.type_name()));
        }
    }

    match table.raw_get::<_, Value>("content").map_err(|err| err.to_string())? {
        Value::Table(list) => {
            for item in list.sequence_values::<Value>() {
                let item = item.map_err(|err| err.to_string())?;
                node.content.push(element_from_lua(&item)?);
            }
        }
        Value::Nil => {}
        other => {
            return Err(format!("node field 'content' must be a table, got {}", other.type_name()));
        }
    }

    Ok(node)
}

fn element_from_lua(value: &Value) -> Result<Element, String> {
    match value {
        Value::String(text) => Ok(Element::Text(
            text.to_str().map_err(|err| err.to_string())?.to_owned(),
        )),
        Value::Table(_) => Ok(Element::Call(node_from_lua(value)?)),
        other => Err(format!("node children must be strings or nodes, got {}", other.type_name())),
    }
}

/* -------------------- *
 *     NODE OBJECT      *
 * -------------------- */
fn node_metatable(lua: &Lua) -> LuaResult<Table> {
    if let Value::Table(metatable) = lua.named_registry_value::<Value>(NODE_METATABLE)? {
        return Ok(metatable);
    }

    let methods = lua.create_table()?;

    methods.set(
        "copy",
        lua.create_function(|lua, this: Table| {
            let node = unmarshal(&Value::Table(this))?;
            node_to_lua(lua, &node)
        })?,
    )?;
    methods.set(
        "totext",
        lua.create_function(|_, this: Table| {
            let node = unmarshal(&Value::Table(this))?;
            Ok(node.totext())
        })?,
    )?;
    methods.set(
        "tostring",
        lua.create_function(|_, this: Table| {
            let node = unmarshal(&Value::Table(this))?;
            Ok(node.to_string())
        })?,
    )?;
    methods.set("is_node", lua.create_function(|_, _this: Table| Ok(true))?)?;

    let metatable = lua.create_table()?;

    // the fields call/args/content live in the node table itself, so
    // the metamethods only see the published methods and typos
    metatable.set(
        "__index",
        lua.create_function(|lua, (_this, key): (Table, Value)| {
            if let Value::String(name) = &key {
                let methods: Table = lua.named_registry_value(NODE_METHODS)?;
                let method: Value = methods.raw_get(name.clone())?;

                if !matches!(method, Value::Nil) {
                    return Ok(method);
                }
            }

            Err(node_access_error("read", &key))
        })?,
    )?;
    metatable.set(
        "__newindex",
        lua.create_function(|_, (this, key, value): (Table, Value, Value)| {
            if let Value::String(name) = &key {
                if matches!(name.to_str()?, "call" | "args" | "content" | "tostring") {
                    this.raw_set(key, value)?;
                    return Ok(());
                }
            }

            Err(node_access_error("write", &key))
        })?,
    )?;

    lua.set_named_registry_value(NODE_METHODS, methods)?;
    lua.set_named_registry_value(NODE_METATABLE, metatable.clone())?;

    Ok(metatable)
}

fn unmarshal(value: &Value) -> LuaResult<Node> {
    node_from_lua(value)
        .map_err(|reason| LuaError::external(Diagnostic::new(ErrorCode::HookReturnShape, reason)))
}

fn node_access_error(operation: &str, key: &Value) -> LuaError {
    let shown = match key {
        Value::String(name) => format!("{:?}", name.to_string_lossy()),
        other => format!("a {} key", other.type_name()),
    };

    LuaError::external(
        Diagnostic::new(ErrorCode::NodeAccess, format!("cannot {operation} field {shown} of a node"))
            .with_expected("one of call, args, content, copy, is_node, tostring, totext"),
    )
}

/* -------------------- *
 *       HELPERS        *
 * -------------------- */
fn config_table<'lua>(lua: &'lua Lua, config: &Config) -> LuaResult<Table<'lua>> {
    let data = lua.create_table()?;
    data.set("source", config.source.display().to_string())?;
    data.set("destination", config.destination.display().to_string())?;
    data.set("version", env!("CARGO_PKG_VERSION"))?;

    let hooks = lua.create_table()?;
    for (index, file) in config.hook_files.iter().enumerate() {
        hooks.set(index + 1, file.display().to_string())?;
    }
    data.set("hooks", hooks)?;

    // an empty proxy, so that every write runs into __newindex
    let proxy = lua.create_table()?;
    let metatable = lua.create_table()?;
    metatable.set("__index", data)?;
    metatable.set(
        "__newindex",
        lua.create_function(|_, (_this, _key, _value): (Table, Value, Value)| -> LuaResult<()> {
            Err(LuaError::RuntimeError("Litua.config is read-only".to_owned()))
        })?,
    )?;
    proxy.set_metatable(Some(metatable));

    Ok(proxy)
}

fn json_table(lua: &Lua) -> LuaResult<Table> {
    let encode = lua.create_function(|_, value: Value| {
        serde_json::to_string(&value).map_err(|err| LuaError::RuntimeError(err.to_string()))
    })?;

    let decode = lua.create_function(|lua, text: String| {
        let value = serde_json::from_str::<serde_json::Value>(&text)
            .map_err(|err| LuaError::RuntimeError(err.to_string()))?;

        lua.to_value(&value)
    })?;

    let json = lua.create_table()?;
    json.set("encode", encode)?;
    json.set("decode", decode)?;
    Ok(json)
}

/// Implements `Litua.format`: positional `%1` to `%9` substitutions
/// with per-type stringification.
fn format_template(_: &Lua, args: Variadic<Value>) -> LuaResult<String> {
    let mut args = args.into_iter();

    let template = match args.next() {
        Some(Value::String(template)) => template.to_str()?.to_owned(),
        Some(other) => {
            return Err(LuaError::external(Diagnostic::new(
                ErrorCode::HookFailed,
                format!("format template must be a string, got {}", other.type_name()),
            )));
        }
        None => {
            return Err(LuaError::external(Diagnostic::new(
                ErrorCode::HookFailed,
                "format requires a template as its first argument",
            )));
        }
    };

    let values: Vec<Value> = args.collect();
    if values.len() > 9 {
        return Err(LuaError::external(
            Diagnostic::new(
                ErrorCode::FormatOverflow,
                format!("format received {} positional arguments", values.len()),
            )
            .with_expected("at most 9, addressable as %1 to %9"),
        ));
    }

    let mut output = String::new();
    let mut chars = template.chars().peekable();

    while let Some(chr) = chars.next() {
        if chr == '%' {
            if let Some(digit) = chars.peek().and_then(|next| next.to_digit(10)) {
                if (1..=9).contains(&digit) {
                    if let Some(value) = values.get(digit as usize - 1) {
                        chars.next();
                        output.push_str(&format_value(value));
                        continue;
                    }
                }
            }
        }

        output.push(chr);
    }

    Ok(output)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_owned(),
        Value::Boolean(boolean) => boolean.to_string(),
        Value::Integer(integer) => integer.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => format!("'{}'", text.to_string_lossy().replace('\'', "\\'")),
        Value::Table(table) => {
            let mut entries = Vec::new();
            for pair in table.clone().pairs::<Value, Value>().flatten() {
                entries.push(format!("[{}] = {}", format_value(&pair.0), format_value(&pair.1)));
            }
            format!("{{ {} }}", entries.join(", "))
        }
        other => format!("<{}>", other.type_name()),
    }
}
