//! A single REPL session: its namespace and any buffered partial input

use std::io;
use std::thread;

use crate::repl::completion;
use crate::script::{
    parse_expression, parse_program, ErrorKind, Interpreter, Namespace, ParseError, ScriptError,
};

/// Stack reserved for the thread each evaluation runs on
const EVAL_STACK_SIZE: usize = 32 * 1024 * 1024;

/// Result of evaluating one submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOutput {
    /// Captured `print` output, echoed values and rendered tracebacks
    pub output: String,
    /// The submission opened a block that needs more lines
    pub more: bool,
}

/// Namespace and input buffer of one REPL client
#[derive(Debug)]
pub struct Session {
    id: String,
    namespace: Namespace,
    pending: String,
}

impl Session {
    pub fn new(id: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            id: id.into(),
            namespace,
            pending: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Whether earlier submissions are waiting for the rest of a block
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Evaluate `code`, continuing any buffered input
    ///
    /// Output never escapes to the host's stdio; everything a snippet
    /// prints or raises lands in the returned buffer.
    pub fn evaluate(&mut self, code: &str) -> EvalOutput {
        let source = if self.pending.is_empty() {
            code.to_string()
        } else {
            format!("{}\n{}", self.pending, code)
        };
        let mut output = String::new();
        let more = match on_eval_stack(|| self.run(source, &mut output)) {
            Ok(more) => more,
            Err(e) => {
                let err = ScriptError::new(
                    ErrorKind::RuntimeError,
                    format!("cannot start evaluation thread: {}", e),
                );
                output.push_str(&err.render());
                false
            }
        };
        EvalOutput { output, more }
    }

    /// Returns true when the source was buffered for more input
    fn run(&mut self, source: String, out: &mut String) -> bool {
        if let Ok(expr) = parse_expression(&source) {
            self.pending.clear();
            let result = {
                let mut interp = Interpreter::new(&mut self.namespace, out);
                interp.eval(&expr).and_then(|value| interp.echo_value(&value))
            };
            if let Err(e) = result {
                out.push_str(&e.render());
            }
            return false;
        }

        match parse_program(&source) {
            Err(ParseError::Incomplete) => {
                self.pending = source;
                true
            }
            Err(ParseError::Syntax { line, message }) => {
                self.pending.clear();
                out.push_str(&ScriptError::syntax(line, message).render());
                false
            }
            Ok(program) => {
                // A multi-line block stays open until a blank line closes it
                let open_block = program.last().is_some_and(|s| s.is_compound())
                    && source.lines().count() > 1
                    && !source.ends_with('\n');
                if open_block {
                    self.pending = source;
                    return true;
                }
                self.pending.clear();
                let result = Interpreter::new(&mut self.namespace, out)
                    .interactive()
                    .run(&program);
                if let Err(e) = result {
                    out.push_str(&e.render());
                }
                false
            }
        }
    }

    /// Completion candidates for `text` in this session's namespace
    pub fn complete(&self, text: &str) -> Vec<String> {
        on_eval_stack(|| completion::complete(&self.namespace, text)).unwrap_or_else(|e| {
            tracing::warn!("Completion skipped: {}", e);
            Vec::new()
        })
    }
}

/// Run `f` on a thread with a stack sized for the interpreter's depth limits
///
/// Callers may sit on small runtime worker stacks, so script code never
/// recurses on them directly.
fn on_eval_stack<T: Send>(f: impl FnOnce() -> T + Send) -> io::Result<T> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("wmipc-eval".to_string())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, f)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Value;
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new("test", Namespace::new())
    }

    /// Evaluate on a thread as small as a tokio blocking worker's
    fn evaluate_on_small_stack(code: String) -> String {
        std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || session().evaluate(&code).output)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_state_persists_between_submissions() {
        let mut s = session();
        assert_eq!(s.evaluate("y = 456").output, "");
        assert_eq!(s.evaluate("y").output, "456\n");
    }

    #[test]
    fn test_expression_none_prints_nothing() {
        let mut s = session();
        assert_eq!(s.evaluate("None").output, "");
        assert_eq!(s.evaluate("print('hi')").output, "hi\n");
    }

    #[test]
    fn test_runtime_error_renders_traceback_and_session_survives() {
        let mut s = session();
        let out = s.evaluate("1 / 0").output;
        assert_eq!(
            out,
            "Traceback (most recent call last):\n  File \"<stdin>\", line 1, in <module>\nZeroDivisionError: division by zero\n"
        );
        assert_eq!(s.evaluate("1 + 1").output, "2\n");
    }

    #[test]
    fn test_syntax_error_clears_buffer() {
        let mut s = session();
        let out = s.evaluate("x = = 1").output;
        assert!(out.contains("SyntaxError"));
        assert!(!s.has_pending());
        assert_eq!(s.evaluate("2").output, "2\n");
    }

    #[test]
    fn test_incomplete_input_is_buffered() {
        let mut s = session();
        let first = s.evaluate("def double(x):");
        assert!(first.more);
        assert_eq!(first.output, "");
        assert!(s.evaluate("    return x * 2").more);
        let done = s.evaluate("");
        assert!(!done.more);
        assert_eq!(s.evaluate("double(21)").output, "42\n");
    }

    #[test]
    fn test_multiline_blob_runs_at_once() {
        let mut s = session();
        let out = s.evaluate("for i in range(3):\n    print(i)\n");
        assert!(!out.more);
        assert_eq!(out.output, "0\n1\n2\n");
    }

    #[test]
    fn test_open_bracket_waits_for_more() {
        let mut s = session();
        assert!(s.evaluate("values = [1,").more);
        assert!(!s.evaluate("2]").more);
        assert_eq!(s.evaluate("values").output, "[1, 2]\n");
    }

    #[test]
    fn test_large_echo_hits_output_limit() {
        let mut s = session();
        let out = s.evaluate("'ab' * 1000000").output;
        assert!(out.ends_with("MemoryError: output limit exceeded\n"));
        assert!(out.len() < 1024);
        assert_eq!(s.evaluate("len('ab' * 1000000)").output, "2000000\n");
    }

    #[test]
    fn test_runaway_recursion_on_small_stack() {
        let out = evaluate_on_small_stack("def f():\n    return f()\n\nf()\n".to_string());
        assert!(out.ends_with("RecursionError: maximum recursion depth exceeded\n"));
    }

    #[test]
    fn test_deep_indentation_on_small_stack() {
        let code: String = (0..5000)
            .map(|level| format!("{}if 1:\n", " ".repeat(level)))
            .chain(std::iter::once(format!("{}pass\n", " ".repeat(5000))))
            .collect();
        let out = evaluate_on_small_stack(code);
        assert!(out.ends_with("SyntaxError: too many levels of indentation\n"));
    }

    #[test]
    fn test_nested_operator_chains_on_small_stack() {
        let mut code = "1".to_string();
        for _ in 0..45 {
            code = format!("({}{})", code, "+1".repeat(499));
        }
        let out = evaluate_on_small_stack(code);
        assert!(out.ends_with("SyntaxError: expression too deeply nested\n"));
    }

    #[test]
    fn test_namespace_seed_is_visible() {
        let ns: Namespace = [("answer", Value::Int(42))].into_iter().collect();
        let mut s = Session::new("seeded", ns);
        assert_eq!(s.evaluate("answer").output, "42\n");
    }
}
