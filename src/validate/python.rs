//! Python patch checks
//!
//! 1. Tree-sitter parse: any ERROR or MISSING node rejects the patch.
//! 2. Name resolution: every name the snippet loads must be bound somewhere
//!    in the snippet, imported, or a builtin. Scoping is flattened to the
//!    whole module, so the check only ever errs towards accepting.
//! 3. When an interpreter is on PATH, CPython compiles the snippet. The
//!    tree-sitter grammar is looser than CPython's (`print "x"`, a stray
//!    `return`, bad dedents), so a `SyntaxError` here rejects too.
//! 4. With `python_exec`, the module body then runs under a non-`__main__`
//!    name. `NameError` rejects; any other exception is a logic problem we
//!    cannot judge without tests, so it passes.

use super::Verdict;
use crate::config::ValidateSettings;
use crate::util::{program_available_on_path, run_command_with_timeout, tail_chars};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::Write;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A language mismatch surfaces as a `None` parse below
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Harness exit code for `NameError` during the definition run.
const NAME_ERROR_EXIT: i32 = 3;
/// Harness exit code for any other exception during the definition run.
const OTHER_ERROR_EXIT: i32 = 4;
/// Harness exit code for source CPython refuses to compile.
const COMPILE_ERROR_EXIT: i32 = 5;

/// argv: `<source path> <compile|exec>`
const CHECK_HARNESS: &str = r#"
import sys
path, mode = sys.argv[1], sys.argv[2]
with open(path, encoding="utf-8") as fh:
    source = fh.read()
try:
    code = compile(source, path, "exec")
except (SyntaxError, ValueError) as exc:
    line = getattr(exc, "lineno", None)
    where = " (line %s)" % line if line else ""
    sys.stderr.write("%s: %s%s\n" % (type(exc).__name__, getattr(exc, "msg", exc), where))
    sys.exit(5)
if mode != "exec":
    sys.exit(0)
try:
    exec(code, {"__name__": "__mender_check__", "__builtins__": __builtins__})
except NameError as exc:
    sys.stderr.write("NameError: %s\n" % exc)
    sys.exit(3)
except BaseException as exc:
    sys.stderr.write("%s: %s\n" % (type(exc).__name__, exc))
    sys.exit(4)
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HarnessMode {
    /// Compile only
    Compile,
    /// Compile, then run the module body
    Exec,
}

impl HarnessMode {
    fn as_arg(self) -> &'static str {
        match self {
            HarnessMode::Compile => "compile",
            HarnessMode::Exec => "exec",
        }
    }
}

const PYTHON_BUILTINS: &[&str] = &[
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BaseExceptionGroup", "BlockingIOError", "BrokenPipeError", "BufferError",
    "BytesWarning", "ChildProcessError", "ConnectionAbortedError", "ConnectionError",
    "ConnectionRefusedError", "ConnectionResetError", "DeprecationWarning", "EOFError",
    "Ellipsis", "EncodingWarning", "EnvironmentError", "Exception", "ExceptionGroup",
    "FileExistsError", "FileNotFoundError", "FloatingPointError", "FutureWarning",
    "GeneratorExit", "IOError", "ImportError", "ImportWarning", "IndentationError",
    "IndexError", "InterruptedError", "IsADirectoryError", "KeyError", "KeyboardInterrupt",
    "LookupError", "MemoryError", "ModuleNotFoundError", "NameError", "NotADirectoryError",
    "NotImplemented", "NotImplementedError", "OSError", "OverflowError",
    "PendingDeprecationWarning", "PermissionError", "ProcessLookupError", "RecursionError",
    "ReferenceError", "ResourceWarning", "RuntimeError", "RuntimeWarning",
    "StopAsyncIteration", "StopIteration", "SyntaxError", "SyntaxWarning", "SystemError",
    "SystemExit", "TabError", "TimeoutError", "TypeError", "UnboundLocalError",
    "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError", "UnicodeTranslateError",
    "UnicodeWarning", "UserWarning", "ValueError", "Warning", "ZeroDivisionError",
    "__build_class__", "__builtins__", "__debug__", "__doc__", "__file__", "__import__",
    "__loader__", "__name__", "__package__", "__spec__", "__class__", "abs", "aiter",
    "all", "anext", "any", "ascii", "bin", "bool", "breakpoint", "bytearray", "bytes",
    "callable", "chr", "classmethod", "compile", "complex", "copyright", "credits",
    "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec", "exit", "filter",
    "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex",
    "id", "input", "int", "isinstance", "issubclass", "iter", "len", "license", "list",
    "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord",
    "pow", "print", "property", "quit", "range", "repr", "reversed", "round", "set",
    "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple", "type",
    "vars", "zip",
];

pub(super) fn check(code: &str, settings: &ValidateSettings, timeout: Duration) -> Verdict {
    let Some(tree) = PYTHON_PARSER.with(|p| p.borrow_mut().parse(code, None)) else {
        return Verdict::rejected("python parser produced no tree");
    };
    let root = tree.root_node();

    if root.has_error() {
        return Verdict::rejected(describe_syntax_error(&tree, code));
    }

    let unresolved = unresolved_names(root, code);
    if !unresolved.is_empty() {
        let names: Vec<&str> = unresolved.iter().map(String::as_str).collect();
        return Verdict::rejected(format!("undefined names: {}", names.join(", ")));
    }

    let Some(interpreter) = settings
        .python_interpreters
        .iter()
        .find(|name| program_available_on_path(name))
    else {
        debug!("no python interpreter on PATH; compile check skipped");
        return Verdict::verified("syntax and name resolution passed (interpreter not found)");
    };

    let mode = if settings.python_exec {
        HarnessMode::Exec
    } else {
        HarnessMode::Compile
    };
    run_harness(code, interpreter, mode, timeout)
}

fn describe_syntax_error(tree: &Tree, code: &str) -> String {
    let mut cursor = tree.walk();
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            let snippet: String = node
                .utf8_text(code.as_bytes())
                .unwrap_or_default()
                .chars()
                .take(40)
                .collect();
            return if node.is_missing() {
                format!(
                    "syntax error at line {}, column {}: missing {}",
                    pos.row + 1,
                    pos.column + 1,
                    node.kind()
                )
            } else {
                format!(
                    "syntax error at line {}, column {}: {:?}",
                    pos.row + 1,
                    pos.column + 1,
                    snippet
                )
            };
        }
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    "syntax error".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
//  NAME RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════

fn text_of<'a>(node: Node, code: &'a str) -> &'a str {
    node.utf8_text(code.as_bytes()).unwrap_or_default()
}

#[derive(Default)]
struct Bindings {
    names: BTreeSet<String>,
    star_import: bool,
    future_annotations: bool,
}

impl Bindings {
    fn bind(&mut self, node: Node, code: &str) {
        self.names.insert(text_of(node, code).to_string());
    }

    /// Bind every identifier under `node`.
    fn bind_all(&mut self, node: Node, code: &str) {
        if node.kind() == "identifier" {
            self.bind(node, code);
            return;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.bind_all(child, code);
        }
    }

    /// Bind the names an assignment-like target introduces.
    /// Attribute and subscript targets bind nothing.
    fn bind_target(&mut self, node: Node, code: &str) {
        match node.kind() {
            "identifier" => self.bind(node, code),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "parenthesized_expression" | "list_splat_pattern" | "list_splat"
            | "as_pattern_target" | "expression_list" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.bind_target(child, code);
                }
            }
            _ => {}
        }
    }

    fn bind_parameters(&mut self, params: Node, code: &str) {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            match param.kind() {
                "identifier" => self.bind(param, code),
                "default_parameter" | "typed_default_parameter" => {
                    if let Some(name) = param.child_by_field_name("name") {
                        self.bind_target(name, code);
                    }
                }
                "typed_parameter" => {
                    let mut inner = param.walk();
                    for child in param.named_children(&mut inner) {
                        if child.kind() == "type" {
                            continue;
                        }
                        self.bind_target(child, code);
                        self.bind_all_splat(child, code);
                    }
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => self.bind_all(param, code),
                _ => {}
            }
        }
    }

    fn bind_all_splat(&mut self, node: Node, code: &str) {
        if matches!(node.kind(), "list_splat_pattern" | "dictionary_splat_pattern") {
            self.bind_all(node, code);
        }
    }

    fn collect(&mut self, node: Node, code: &str) {
        match node.kind() {
            "function_definition" | "class_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.bind(name, code);
                }
            }
            "parameters" | "lambda_parameters" => self.bind_parameters(node, code),
            "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_target(left, code);
                }
            }
            "named_expression" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.bind(name, code);
                }
            }
            "import_statement" | "import_from_statement" => {
                self.bind_all(node, code);
                let mut cursor = node.walk();
                if node
                    .named_children(&mut cursor)
                    .any(|c| c.kind() == "wildcard_import")
                {
                    self.star_import = true;
                }
            }
            "future_import_statement" => {
                if text_of(node, code).contains("annotations") {
                    self.future_annotations = true;
                }
            }
            "global_statement" | "nonlocal_statement" | "case_pattern" | "type_parameter" => {
                self.bind_all(node, code);
            }
            _ => {}
        }

        // `... as name` in with/except/import clauses, whatever node wraps it
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for (idx, child) in children.iter().enumerate() {
            if child.kind() == "as" {
                if let Some(target) = children[idx + 1..].iter().find(|c| c.is_named()) {
                    self.bind_target(*target, code);
                }
            }
            self.collect(*child, code);
        }
    }
}

/// Names loaded by the snippet that nothing binds, in sorted order.
pub(super) fn unresolved_names(root: Node, code: &str) -> BTreeSet<String> {
    let mut bindings = Bindings::default();
    bindings.collect(root, code);
    if bindings.star_import {
        return BTreeSet::new();
    }

    let mut missing = BTreeSet::new();
    find_loads(root, code, &bindings, &mut missing);
    missing
}

fn find_loads(node: Node, code: &str, bindings: &Bindings, missing: &mut BTreeSet<String>) {
    match node.kind() {
        "import_statement" | "import_from_statement" | "future_import_statement"
        | "global_statement" | "nonlocal_statement" | "case_pattern" => return,
        "type" if bindings.future_annotations => return,
        // Local variable annotations are never evaluated
        "assignment" if in_function_body(node) => {
            let annotation = node.child_by_field_name("type");
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if Some(child) != annotation {
                    find_loads(child, code, bindings, missing);
                }
            }
            return;
        }
        "identifier" => {
            if is_load(node) {
                let name = text_of(node, code);
                if !bindings.names.contains(name) && !PYTHON_BUILTINS.contains(&name) {
                    missing.insert(name.to_string());
                }
            }
            return;
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        find_loads(child, code, bindings, missing);
    }
}

fn in_function_body(node: Node) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "function_definition" => return true,
            "class_definition" => return false,
            _ => current = parent.parent(),
        }
    }
    false
}

/// Attribute names and keyword-argument names are not variable loads.
fn is_load(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return true;
    };
    let field_is = |field: &str| parent.child_by_field_name(field) == Some(node);
    match parent.kind() {
        "attribute" => !field_is("attribute"),
        "keyword_argument" => !field_is("name"),
        _ => true,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  INTERPRETER CHECK
// ═══════════════════════════════════════════════════════════════════════════

fn run_harness(code: &str, interpreter: &str, mode: HarnessMode, timeout: Duration) -> Verdict {
    // Removed on drop, on every return path
    let mut source = match tempfile::Builder::new()
        .prefix("mender-check-")
        .suffix(".py")
        .tempfile()
    {
        Ok(file) => file,
        Err(err) => {
            warn!(error = %err, "could not create temp file for python check");
            return Verdict::verified("syntax and name resolution passed (interpreter check unavailable)");
        }
    };
    if let Err(err) = source.write_all(code.as_bytes()).and_then(|_| source.flush()) {
        warn!(error = %err, "could not write temp file for python check");
        return Verdict::verified("syntax and name resolution passed (interpreter check unavailable)");
    }

    let mut cmd = Command::new(interpreter);
    cmd.arg("-c")
        .arg(CHECK_HARNESS)
        .arg(source.path())
        .arg(mode.as_arg());

    let output = match run_command_with_timeout(&mut cmd, timeout) {
        Ok(output) => output,
        Err(err) => {
            warn!(interpreter, error = %err, "python interpreter failed to start");
            return Verdict::verified("syntax and name resolution passed (interpreter failed to start)");
        }
    };

    if output.timed_out {
        warn!(mode = mode.as_arg(), "python check timed out; treating as a logic issue");
        return Verdict::verified("interpreter check did not finish before the timeout");
    }

    let stderr = tail_chars(output.stderr.trim(), 300);
    match output.exit_code() {
        Some(0) if mode == HarnessMode::Exec => {
            Verdict::verified("syntax, names and definition run passed")
        }
        Some(0) => Verdict::verified("syntax, names and compile check passed"),
        Some(COMPILE_ERROR_EXIT) => Verdict::rejected(stderr),
        Some(NAME_ERROR_EXIT) => Verdict::rejected(stderr),
        Some(OTHER_ERROR_EXIT) => {
            warn!(error = %stderr, "python runtime error while defining; not blocking");
            Verdict::verified(format!("definition run raised a non-name error: {}", stderr))
        }
        code => {
            warn!(exit_code = ?code, error = %stderr, "python interpreter exited unexpectedly");
            Verdict::verified("syntax and name resolution passed (interpreter exited unexpectedly)")
        }
    }
}
