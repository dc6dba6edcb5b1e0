use proptest::prelude::*;
use prefix::indent::{blocks, dedent, indent, indents};
use prefix::script::builtins::call_builtin;
use prefix::script::Value;
use prefix::Interpreter;

proptest! {
    /// Indenting a block by any amount is undone by dedent.
    #[test]
    fn dedent_undoes_indent(
        s in "[a-z#!'<$ \t\n]{0,80}",
        n in 0usize..8,
        ws in prop::sample::select(vec![' ', '\t']),
    ) {
        prop_assert_eq!(dedent(&indent(&s, n, ws)), dedent(&s));
    }

    /// indents() reports what indent() added.
    #[test]
    fn indents_count_added_padding(s in "[a-z]{1,10}(\n[a-z]{1,10}){0,5}", n in 0usize..8) {
        let lines = s.lines().count();
        prop_assert_eq!(indents(&indent(&s, n, ' ')), vec![n; lines]);
    }
}

proptest! {
    /// Line numbers skip exactly the blank lines that were dropped.
    #[test]
    fn line_gaps_count_blank_lines(lines in prop::collection::vec("([a-z']{1,6})?", 1..30)) {
        let src = lines.join("\n");
        let blank = lines.iter().filter(|l| l.is_empty()).count();

        let mut gaps = 0;
        let mut prev = 0;
        for (n, _) in blocks(&src) {
            gaps += n - prev - 1;
            prev = n;
        }
        gaps += lines.len() - prev;
        prop_assert_eq!(gaps, blank);
    }
}

proptest! {
    /// Rendering never panics, whatever the input.
    #[test]
    fn render_does_not_panic(s in "[a-z!#'<=$\"\\[\\]:(), \n]{0,120}") {
        let mut p = Interpreter::new();
        p.set_max_depth(16);
        let _ = p.run_script(&s, "", "fuzz");
    }

    /// Literal lines are emitted as-is, in order.
    #[test]
    fn literal_lines_concatenate(words in prop::collection::vec("[a-z ]{0,8}[a-z]", 0..10)) {
        let src: Vec<String> = words.iter().map(|w| format!("'{w}")).collect();
        let out = Interpreter::new().run_script(&src.join("\n"), "", "lit").unwrap();
        prop_assert_eq!(out, words.concat());
    }
}

proptest! {
    /// substr built-in: result is a subsequence of the input.
    #[test]
    fn substr_properties(
        s in "\\PC*",
        start in prop_oneof![-50i64..100i64, any::<i64>()],
        len in prop_oneof![-50i64..100i64, any::<i64>()],
    ) {
        let args = vec![Value::Str(s.clone()), Value::Int(start), Value::Int(len)];
        let out = call_builtin("substr", args);
        prop_assert!(matches!(out, Some(Ok(Value::Str(_)))), "{:?}", out);
        if let Some(Ok(Value::Str(out))) = out {
            prop_assert!(out.chars().count() <= s.chars().count());
            let mut it = s.chars();
            for c in out.chars() {
                prop_assert!(it.any(|x| x == c));
            }
        }
    }
}
