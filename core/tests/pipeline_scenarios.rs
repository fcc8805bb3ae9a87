//! End-to-end tests of the transformation pipeline: Lua hooks are
//! registered from inline chunks and the whole document run is
//! observed through its output, its diagnostics and its log messages.

use std::cell::RefCell;
use std::rc::Rc;

use litua::runtime::bridge::{Config, Printer};
use litua::runtime::Runtime;
use litua::types::error::ErrorCode;

fn runtime_with(hooks: &str) -> Runtime {
    let runtime = Runtime::new(Config::default()).unwrap();
    runtime.load_hook_chunk("test_hooks.lua", hooks).unwrap();
    runtime
}

fn transform(hooks: &str, source: &str) -> String {
    runtime_with(hooks).transform(source).unwrap()
}

/// A runtime whose `Litua.log` lines are captured for assertions.
fn capturing_runtime(hooks: &str) -> (Runtime, Rc<RefCell<Vec<String>>>) {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = lines.clone();
    let printer: Printer = Rc::new(move |line: &str| sink.borrow_mut().push(line.to_owned()));

    let runtime = Runtime::with_printer(Config::default(), printer).unwrap();
    runtime.load_hook_chunk("test_hooks.lua", hooks).unwrap();
    (runtime, lines)
}

/* -------------------- *
 *      SCENARIOS       *
 * -------------------- */
#[test]
fn enumeration_uses_state_shared_through_the_global_table() {
    let hooks = r#"
        Litua.on_setup(function()
            Litua.global.n = 0
        end)
        Litua.convert_node_to_string("item", function(node)
            Litua.global.n = Litua.global.n + 1
            return "(" .. Litua.global.n .. ")"
        end)
    "#;

    assert_eq!(transform(hooks, "{item} a{item} b{item} c"), "(1) a(2) b(3) c");
}

#[test]
fn converters_registered_mid_pipeline_apply_to_later_nodes() {
    let hooks = r#"
        Litua.convert_node_to_string("let", function(node)
            for key, values in pairs(node.args) do
                if key:sub(1, 1) ~= "=" then
                    local value = table.concat(values)
                    Litua.convert_node_to_string(key, function()
                        return value
                    end)
                end
            end
            return ""
        end)
    "#;

    assert_eq!(transform(hooks, "{let[who=tajpulo]}Hello {who}"), "Hello tajpulo");
}

#[test]
fn reserved_brace_calls_reduce_without_any_hooks() {
    assert_eq!(transform("", "a{left-curly-brace}b{right-curly-brace}c"), "a{b}c");
}

#[test]
fn reserved_brace_calls_ignore_the_wildcard_converter() {
    let hooks = r#"
        Litua.convert_node_to_string("", function(node)
            return "X"
        end)
        Litua.convert_node_to_string("document", function(node)
            return table.concat(node.content)
        end)
    "#;

    assert_eq!(transform(hooks, "a{left-curly-brace}b{right-curly-brace}c{p}"), "a{b}cX");
}

#[test]
fn raw_strings_project_to_their_verbatim_body() {
    let hooks = r#"
        Litua.convert_node_to_string("code", function(node)
            return node:totext()
        end)
    "#;

    assert_eq!(
        transform(hooks, "{code {< println!(\"{x}\"); >}}"),
        " println!(\"{x}\"); "
    );
}

#[test]
fn nested_xml_build_with_the_substitution_trick() {
    let hooks = r#"
        Litua.convert_node_to_string("", function(node)
            local out = "\1" .. node.call .. "\2"
            for _, part in ipairs(node.content) do
                out = out .. part
            end
            return out .. "\1/" .. node.call .. "\2"
        end)
        Litua.convert_node_to_string("document", function(node)
            local out = table.concat(node.content)
            out = out:gsub("&", "&amp;")
            out = out:gsub("\1", "<")
            out = out:gsub("\2", ">")
            return out
        end)
    "#;

    assert_eq!(
        transform(hooks, "{main {p Hello & World}}"),
        "<main><p>Hello &amp; World</p></main>"
    );
}

#[test]
fn a_second_wildcard_converter_fails_with_duplicate_converter() {
    let runtime = Runtime::new(Config::default()).unwrap();
    let err = runtime
        .load_hook_chunk(
            "test_hooks.lua",
            r#"
                Litua.convert_node_to_string("", function(node) return "a" end)
                Litua.convert_node_to_string("", function(node) return "b" end)
            "#,
        )
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DuplicateConverter);
}

/* -------------------- *
 *  DISPATCH & READERS  *
 * -------------------- */
#[test]
fn specific_hooks_fire_before_wildcard_hooks_with_depths() {
    let hooks = r#"
        Litua.read_new_node("", function(node, depth)
            Litua.log("order", "wildcard " .. node.call .. " " .. depth)
        end)
        Litua.read_new_node("item", function(node, depth)
            Litua.log("order", "specific " .. depth)
        end)
    "#;

    let (runtime, lines) = capturing_runtime(hooks);
    runtime.transform("{item}").unwrap();

    assert_eq!(
        *lines.borrow(),
        vec![
            "LOG[order]: wildcard document 0",
            "LOG[order]: specific 1",
            "LOG[order]: wildcard item 1",
        ]
    );
}

#[test]
fn hooks_of_one_filter_fire_in_registration_order() {
    let hooks = r#"
        Litua.read_new_node("item", function(node, depth)
            Litua.log("order", "first")
        end)
        Litua.read_new_node("item", function(node, depth)
            Litua.log("order", "second")
        end)
    "#;

    let (runtime, lines) = capturing_runtime(hooks);
    runtime.transform("{item}").unwrap();

    assert_eq!(*lines.borrow(), vec!["LOG[order]: first", "LOG[order]: second"]);
}

#[test]
fn traversal_covers_argument_values() {
    let hooks = r#"
        Litua.read_new_node("b", function(node, depth)
            Litua.log("seen", "b at " .. depth)
        end)
    "#;

    let (runtime, lines) = capturing_runtime(hooks);
    runtime.transform("{a[k=v {b}]}").unwrap();

    assert_eq!(*lines.borrow(), vec!["LOG[seen]: b at 2"]);
}

#[test]
fn reader_hooks_receive_an_independent_copy() {
    let hooks = r#"
        Litua.read_new_node("p", function(node, depth)
            node.call = "q"
            node.content[1] = "mutated"
        end)
    "#;

    assert_eq!(transform(hooks, "{p x}"), "{p x}");
}

#[test]
fn reader_hooks_must_not_return_a_value() {
    let hooks = r#"
        Litua.read_new_node("p", function(node, depth)
            return 5
        end)
    "#;

    let err = runtime_with(hooks).transform("{p x}").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::HookReturnShape);
}

/* -------------------- *
 *    MUTATOR PHASE     *
 * -------------------- */
#[test]
fn modify_replaces_a_node_with_text_in_place() {
    let hooks = r#"
        Litua.modify_node("b", function(node, depth, filter)
            return "X"
        end)
    "#;

    assert_eq!(transform(hooks, "a{b c}d"), "aXd");
}

#[test]
fn modify_replaces_a_node_inside_an_argument_value() {
    let hooks = r#"
        Litua.modify_node("b", function(node, depth, filter)
            return "T"
        end)
    "#;

    assert_eq!(transform(hooks, "{a[k=v {b}]}"), "{a[k=v T]}");
}

#[test]
fn modify_accepts_a_hand_built_replacement_node() {
    let hooks = r#"
        Litua.modify_node("b", function(node, depth, filter)
            return { call = "c", content = { "z" } }
        end)
    "#;

    assert_eq!(transform(hooks, "{b}"), "{c z}");
}

#[test]
fn modify_rejects_replacement_nodes_with_malformed_call_names() {
    let hooks = r#"
        Litua.modify_node("b", function(node, depth, filter)
            return { call = "a[b", content = {} }
        end)
    "#;

    let err = runtime_with(hooks).transform("{b}").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::HookReturnShape);
}

#[test]
fn modify_keeps_in_place_mutations_of_the_returned_node() {
    let hooks = r#"
        Litua.modify_node("p", function(node, depth, filter)
            node.content[1] = "yo"
            return node
        end)
    "#;

    assert_eq!(transform(hooks, "{p hi}"), "{p yo}");
}

#[test]
fn modify_hooks_see_the_filter_they_matched_under() {
    let hooks = r#"
        Litua.modify_node("", function(node, depth, filter)
            Litua.log("filter", "'" .. filter .. "' for " .. node.call)
            return node
        end)
    "#;

    let (runtime, lines) = capturing_runtime(hooks);
    runtime.transform("{p x}").unwrap();

    assert_eq!(
        *lines.borrow(),
        vec!["LOG[filter]: '' for document", "LOG[filter]: '' for p"]
    );
}

#[test]
fn modify_returning_nothing_is_fatal() {
    let hooks = r#"
        Litua.modify_node("p", function(node, depth, filter)
        end)
    "#;

    let err = runtime_with(hooks).transform("{p x}").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::HookReturnShape);
}

#[test]
fn modify_signalling_an_error_aborts_the_pipeline() {
    let hooks = r#"
        Litua.modify_node("p", function(node, depth, filter)
            return nil, "p nodes are forbidden today"
        end)
    "#;

    let err = runtime_with(hooks).transform("{p x}").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::HookFailed);
    assert!(err.primary.message().contains("forbidden today"));
}

/* -------------------- *
 *    STRING PHASES     *
 * -------------------- */
#[test]
fn initial_string_hooks_run_before_parsing() {
    let hooks = r#"
        Litua.modify_initial_string(function(text)
            return (text:gsub("AAA", "{item}"))
        end)
        Litua.convert_node_to_string("item", function(node)
            return "!"
        end)
    "#;

    assert_eq!(transform(hooks, "x AAA y"), "x ! y");
}

#[test]
fn final_string_hooks_run_over_the_serialized_document() {
    let hooks = r#"
        Litua.modify_final_string(function(text)
            return text:upper()
        end)
    "#;

    assert_eq!(transform(hooks, "{p hi}"), "{P HI}");
}

#[test]
fn string_hooks_chain_in_registration_order() {
    let hooks = r#"
        Litua.modify_final_string(function(text)
            return text .. "|one"
        end)
        Litua.modify_final_string(function(text)
            return text .. "|two"
        end)
    "#;

    assert_eq!(transform(hooks, "x"), "x|one|two");
}

#[test]
fn string_hooks_returning_non_strings_are_fatal() {
    let hooks = r#"
        Litua.modify_final_string(function(text)
            return 42
        end)
    "#;

    let err = runtime_with(hooks).transform("x").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::HookReturnShape);
}

/* -------------------- *
 *   SETUP & TEARDOWN   *
 * -------------------- */
#[test]
fn setup_hooks_must_not_return_a_value() {
    let hooks = r#"
        Litua.on_setup(function()
            return "surprise"
        end)
    "#;

    let err = runtime_with(hooks).transform("x").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::HookReturnShape);
}

#[test]
fn teardown_runs_exactly_once_on_success() {
    let hooks = r#"
        Litua.on_teardown(function()
            Litua.log("teardown", "ran")
        end)
    "#;

    let (runtime, lines) = capturing_runtime(hooks);
    runtime.transform("x").unwrap();

    assert_eq!(*lines.borrow(), vec!["LOG[teardown]: ran"]);
}

#[test]
fn teardown_still_runs_when_a_node_phase_fails() {
    let hooks = r#"
        Litua.on_teardown(function()
            Litua.log("teardown", "ran")
        end)
        Litua.modify_node("boom", function(node, depth, filter)
            error("kaboom")
        end)
    "#;

    let (runtime, lines) = capturing_runtime(hooks);
    let err = runtime.transform("{boom}").unwrap_err();

    assert!(err.primary.message().contains("kaboom"));
    assert_eq!(*lines.borrow(), vec!["LOG[teardown]: ran"]);
}

#[test]
fn a_failing_teardown_is_reported_in_addition_to_the_primary_failure() {
    let hooks = r#"
        Litua.convert_node_to_string("x", function(node)
            error("primary failure")
        end)
        Litua.on_teardown(function()
            error("teardown exploded")
        end)
    "#;

    let err = runtime_with(hooks).transform("{x}").unwrap_err();

    assert!(err.primary.message().contains("primary failure"));
    assert!(err.teardown.as_ref().unwrap().message().contains("teardown exploded"));
}

#[test]
fn a_failing_teardown_alone_fails_the_invocation() {
    let hooks = r#"
        Litua.on_teardown(function()
            error("teardown exploded")
        end)
    "#;

    let err = runtime_with(hooks).transform("x").unwrap_err();

    assert!(err.primary.message().contains("teardown exploded"));
    assert!(err.teardown.is_none());
}

/* -------------------- *
 *      DOCUMENTS       *
 * -------------------- */
#[test]
fn an_unhooked_document_reproduces_its_markup() {
    let source = "pre {text[lang=eo][style=bold] sal{em u}ton} post";
    assert_eq!(transform("", source), source);
}

#[test]
fn an_empty_document_stays_empty() {
    assert_eq!(transform("", ""), "");
}

#[test]
fn malformed_documents_surface_the_lex_error() {
    let err = runtime_with("").transform("a } b").unwrap_err();
    assert_eq!(err.primary.code(), ErrorCode::LexError);
}
