//! End-to-end rendering tests through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use prefix::script::{ErrorAction, ErrorMode, Presentation};
use prefix::{Interpreter, MapLoader, RenderError, Value};

fn render(src: &str) -> String {
    Interpreter::new().run_script(src, "", "page").unwrap()
}

fn with_layouts(layouts: &[(&str, &str)]) -> Interpreter {
    Interpreter::with_loader(layouts.iter().copied().collect::<MapLoader>())
}

fn mode(words: &str) -> ErrorMode {
    words.parse().unwrap()
}

// ── Control flow ──────────────────────────────────────────────────────────────

#[test]
fn if_chain_picks_first_true_branch() {
    assert_eq!(render("!if false:\n  'A\n!elseif true:\n  'B\n!else:\n  'C"), "B");
}

#[test]
fn elif_alias() {
    assert_eq!(render("!if 0:\n  'A\n!elif 1:\n  'B"), "B");
}

#[test]
fn failed_condition_skips_later_branches() {
    assert_eq!(
        render("!if nope():\n  'A\n!else:\n  'C"),
        "* Layout processing error: in page line 1: Call to undefined function nope()\n"
    );
}

#[test]
fn loop_over_list() {
    assert_eq!(render("!loop [1,2,3] as $x:\n  \"$x"), "123");
}

#[test]
fn foreach_alias_with_key() {
    assert_eq!(render("!foreach ['a', 'b'] as $i => $v:\n  \"$i:$v "), "0:a1:b");
}

#[test]
fn loop_continue_and_break() {
    let cont = "!loop [1,2,3] as $x:\n  !if $x == 2:\n    !continue\n  \"$x";
    let brk = "!loop [1,2,3] as $x:\n  !if $x == 2:\n    !break\n  \"$x";
    assert_eq!(render(cont), "13");
    assert_eq!(render(brk), "1");
}

#[test]
fn while_with_break() {
    assert_eq!(render("$i = 0\n!while true:\n  $i++\n  !if $i > 3:\n    !break\n  \"$i"), "123");
}

#[test]
fn return_stops_only_its_own_layout() {
    let mut p = with_layouts(&[("r", "'a\n!if true:\n  !return\n'b")]);
    assert_eq!(p.run_script("r\n'c", "", "page").unwrap(), "ac");
}

// ── Layouts ───────────────────────────────────────────────────────────────────

#[test]
fn layout_param_placeholder_and_variable() {
    let mut p = with_layouts(&[("greet", "'Hello, $$!\n\" ($_param)")]);
    assert_eq!(p.run_script("greet:world", "", "page").unwrap(), "Hello, world! (world)");
}

#[test]
fn indented_param_is_dedented() {
    let mut p = with_layouts(&[("show", "\"$_param")]);
    let out = p.run_script("show:\n    one\n      two", "", "page").unwrap();
    assert_eq!(out, "one\n  two");
}

#[test]
fn inline_layout_definition() {
    assert_eq!(render("=box:\n  <b>\n  \"$_param\n  </b>\nbox: hi"), "<b>hi</b>");
}

#[test]
fn invalid_inline_layout_name() {
    let out = render("=bad name:\n  'x");
    assert!(out.contains("Invalid layout name \"bad name\""), "{out}");
}

#[test]
fn undefined_layout_is_reported_and_siblings_continue() {
    let out = render("'a\nnosuch: x\n'b");
    assert_eq!(
        out,
        "a* Layout processing error: in page line 2: Undefined layout \"nosuch\"\nb"
    );
}

#[test]
fn long_undefined_layout_name_is_truncated() {
    let name = "x".repeat(45);
    let out = render(&name);
    assert!(out.contains(&format!("Undefined layout \"{}...\"", "x".repeat(40))), "{out}");
}

#[test]
fn recursion_stops_at_max_depth() {
    let mut p = with_layouts(&[("self", "'x\nself")]);
    p.set_max_depth(5);
    let out = p.run_layout("self", "").unwrap();
    assert_eq!(
        out,
        "xxxxx* Layout processing error: in self line 2: Recursion error when calling self\n"
    );
}

#[test]
fn run_layout_missing_is_an_error() {
    let mut p = Interpreter::new();
    assert!(matches!(p.run_layout("ghost", ""), Err(RenderError::LayoutNotFound(n)) if n == "ghost"));
}

#[test]
fn layout_inspection() {
    let mut p = with_layouts(&[("a", "'A")]);
    assert_eq!(p.layout("a").unwrap().map(|r| r.content.as_str()), Some("'A"));
    assert!(p.layout("b").unwrap().is_none());
}

// ── Parameters ────────────────────────────────────────────────────────────────

#[test]
fn param_binds_names_and_pieces() {
    let mut p = with_layouts(&[("pair", "!param comma(2):a,b\n\"$a/$b/{$_param[1]}")]);
    assert_eq!(p.run_script("pair: x, y", "", "page").unwrap(), "x/y/y");
}

#[test]
fn param_count_mismatch() {
    let mut p = with_layouts(&[("pair", "!param comma(2):a,b\n'never")]);
    let out = p.run_script("pair: only", "", "page").unwrap();
    assert!(out.contains("2 parameters was required, got 1"), "{out}");
    assert!(out.contains("never"), "errors continue by default: {out}");
}

#[test]
fn string_transform_sees_caller_scope() {
    let mut p = with_layouts(&[("item", "!param string\n\"<$_param>")]);
    let out = p.run_script("!loop ['a', 'b'] as $x:\n  item: $x", "", "page").unwrap();
    assert_eq!(out, "<a><b>");
}

#[test]
fn expr_and_code_transforms() {
    let mut p = with_layouts(&[("e", "!param expr\n\"$_param"), ("c", "!param code\n\"$_param")]);
    assert_eq!(p.run_script("$n = 21\ne: $n * 2", "", "page").unwrap(), "42");
    assert_eq!(p.run_script("c: return 1 + 2;", "", "page").unwrap(), "3");
    assert_eq!(p.run_script("c: echo 'out';", "", "page").unwrap(), "out");
}

#[test]
fn text_transforms() {
    let mut p = with_layouts(&[
        ("h", "!param unhtml\n'$$|\n\"$_param"),
        ("u", "!param urlify\n\"$_param"),
        ("w", "!param ucwords\n\"$_param"),
    ]);
    assert_eq!(p.run_script("h:<i>", "", "page").unwrap(), "<i>|&lt;i&gt;");
    assert_eq!(p.run_script("u: a b&c", "", "page").unwrap(), "a+b%26c");
    assert_eq!(p.run_script("w: hello big world", "", "page").unwrap(), "Hello Big World");
}

#[test]
fn layout_transform_renders_param() {
    let mut p = with_layouts(&[("wrap", "!param layout\n'[\n\"$_param\n']")]);
    assert_eq!(p.run_script("wrap:\n  'in\n  'side", "", "page").unwrap(), "[inside]");
}

#[test]
fn nested_param_definition() {
    let src = "!param line:\n  title: upper\n  body\n\"$title: $body";
    let mut p = with_layouts(&[("post", src)]);
    let out = p.run_script("post:\n  hello\n  text", "", "page").unwrap();
    assert_eq!(out, "HELLO: text");
}

#[test]
fn custom_transform() {
    let mut p = with_layouts(&[("t", "!param rev\n\"$_param")]);
    p.add_transform("rev", |_, s| s.chars().rev().collect()).unwrap();
    assert_eq!(p.run_script("t: abc", "", "page").unwrap(), "cba");
}

// ── Scopes ────────────────────────────────────────────────────────────────────

#[test]
fn scope_caller_links_variables() {
    let mut p = with_layouts(&[("child", "!scope caller: v\n$v = 'changed'")]);
    assert_eq!(p.run_script("$v = 'orig'\nchild\n\"$v", "", "page").unwrap(), "changed");
}

#[test]
fn scope_from_named_layout() {
    let mut p = with_layouts(&[("mid", "grand"), ("grand", "!scope from page: $v\n\"$v")]);
    assert_eq!(p.run_script("$v = 7\nmid", "", "page").unwrap(), "7");
}

#[test]
fn scope_parent_of_inline_layout() {
    let out = render("$v = 1\n=child:\n  !scope parent: v\n  $v++\nchild\n\"$v");
    assert_eq!(out, "2");
}

#[test]
fn scope_errors() {
    assert!(render("!scope caller: x").contains("There is no caller scope!"));
    assert!(render("!scope from nowhere: x").contains("Scope \"nowhere\" was not found"));
    assert!(render("!scope global").contains("variable names required"));
    assert!(render("!scope sideways: x").contains("Invalid scope type \"sideways\""));
}

#[test]
fn scope_parent_requires_active_parent() {
    let mut p = with_layouts(&[("host", "=child:\n  !scope parent: v\n  'ran")]);
    let out = p.run_script("host\nchild", "", "page").unwrap();
    assert!(out.contains("Parent layout \"host\" is not active"), "{out}");
    assert!(out.ends_with("ran"), "{out}");
}

#[test]
fn scope_parent_of_loaded_layout() {
    let mut p = with_layouts(&[("child", "!scope parent: v")]);
    let out = p.run_script("child", "", "page").unwrap();
    assert!(out.contains("Layout \"child\" has no parent layout"), "{out}");
}

#[test]
fn globals_are_shared_between_renders() {
    let mut p = Interpreter::new();
    p.set_global("count", Value::Int(0));
    for _ in 0..3 {
        p.run_script("!scope global: count\n$count++", "", "page").unwrap();
    }
    assert_eq!(p.global("count"), Some(Value::Int(3)));
}

// ── Built-in limits ───────────────────────────────────────────────────────────

#[test]
fn range_at_integer_limit_renders() {
    let out = render("!loop range(9223372036854775806, 9223372036854775807) as $x:\n  \"$x,");
    assert_eq!(out, "9223372036854775806,9223372036854775807,");
}

#[test]
fn oversized_builtin_results_are_diagnostics() {
    let out = render("$r = range(0, 9e18)\n'after");
    assert!(out.contains("range too large"), "{out}");
    assert!(out.ends_with("after"), "{out}");
    let out = render("$y = str_repeat('ab', 9223372036854775807)\n'after");
    assert!(out.contains("str_repeat: result too large"), "{out}");
    assert!(out.ends_with("after"), "{out}");
    assert_eq!(render("$y = substr('abc', 1, 9223372036854775807)\n\"$y"), "bc");
}

// ── Error modes ───────────────────────────────────────────────────────────────

#[test]
fn html_presentation_escapes() {
    let mut p = Interpreter::new();
    p.on_error(mode("html"));
    assert_eq!(
        p.run_script("!<b>", "", "page").unwrap(),
        "<p><code>Layout processing error: in page line 1:</code> Unknown command: &quot;!&lt;b&gt;&quot;</p>\n"
    );
}

#[test]
fn silent_log_uses_logger_reply() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut p = Interpreter::new();
    p.on_error(ErrorMode::new(Presentation::Silent, true, ErrorAction::Continue));
    let log = Rc::clone(&seen);
    p.set_logger(move |ctx: &str, msg: &str| {
        log.borrow_mut().push(format!("{ctx}|{msg}"));
        Some("[ref 1]".to_owned())
    });
    assert_eq!(p.run_script("'a\n!nope\n'b", "", "page").unwrap(), "a[ref 1]b");
    assert_eq!(*seen.borrow(), vec!["in page line 2|Unknown command: \"!nope\""]);
}

#[test]
fn silent_without_log_emits_nothing() {
    let mut p = Interpreter::new();
    p.on_error(mode("silent"));
    assert_eq!(p.run_script("'a\n!nope\n'b", "", "page").unwrap(), "ab");
}

#[test]
fn exit_stops_the_whole_render() {
    let mut p = with_layouts(&[("inner", "'a\n!nope\n'b")]);
    p.on_error(mode("silent exit"));
    assert_eq!(p.run_script("'x\ninner\n'y", "", "page").unwrap(), "xa");
}

#[test]
fn resume_continues_in_the_caller() {
    let mut p = with_layouts(&[("inner", "'a\n!nope\n'b")]);
    p.on_error(mode("silent resume"));
    assert_eq!(p.run_script("'x\ninner\n'y", "", "page").unwrap(), "xay");
}

#[test]
fn cancel_keeps_only_the_diagnostic() {
    let mut p = with_layouts(&[("inner", "'a\n!nope\n'b")]);
    p.on_error(mode("cancel"));
    assert_eq!(
        p.run_script("'x\ninner\n'y", "", "page").unwrap(),
        "* Layout processing error: in inner line 2: Unknown command: \"!nope\"\n"
    );
}

#[test]
fn abort_fails_the_render() {
    let mut p = with_layouts(&[("inner", "!nope")]);
    p.on_error(mode("abort"));
    let err = p.run_script("'x\ninner", "", "page").unwrap_err();
    assert!(matches!(&err, RenderError::Aborted(m) if m.ends_with("Unknown command: \"!nope\"")), "{err}");

    // The next render starts clean.
    p.on_error(ErrorMode::default());
    assert_eq!(p.run_script("'ok", "", "page").unwrap(), "ok");
}

// ── Extensions ────────────────────────────────────────────────────────────────

#[test]
fn alias_cycle_is_rejected() {
    let mut p = Interpreter::new();
    p.define_command_alias("a", "b").unwrap();
    p.define_command_alias("b", "a").unwrap();
    assert!(p.run_script("!a", "", "page").unwrap().contains("Alias loop detected for !a"));
}

#[test]
fn alias_with_placeholder() {
    let mut p = Interpreter::new();
    p.define_command("say", |_, text| text.to_owned()).unwrap();
    p.define_command_alias("tag", "say <$$>").unwrap();
    assert_eq!(p.run_script("!tag b", "", "page").unwrap(), "<b>");
}

#[test]
fn custom_command_runs_nested_layouts() {
    let mut p = with_layouts(&[("b", "<b>\n\"$_param\n</b>")]);
    p.define_command("bold", |interp, text| {
        interp.run_layout("b", text).unwrap_or_else(|e| e.to_string())
    })
    .unwrap();
    assert_eq!(p.run_script("!bold hi", "", "page").unwrap(), "<b>hi</b>");
}

#[test]
fn custom_prefix_replaces_layout_call() {
    let mut p = Interpreter::new();
    p.define_prefix('%', |interp, text| {
        interp.error(&format!("no {text}"))
    })
    .unwrap();
    assert_eq!(
        p.run_script("%thing", "", "page").unwrap(),
        "* Layout processing error: in page line 1: no thing\n"
    );
    assert!(p.remove_prefix('%'));
}

#[test]
fn custom_evaluator() {
    let mut p = Interpreter::new();
    p.set_evaluator(
        |_kind: prefix::script::EvalKind,
         code: &str,
         _ctx: &mut dyn prefix::script::EvalContext| {
            prefix::script::Evaluation::ok(Value::Str(code.to_uppercase()))
        },
    );
    assert_eq!(p.run_script("\"shout", "", "page").unwrap(), "SHOUT");
}
