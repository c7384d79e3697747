//! Compile-only checks for C++ and Java patches

use super::Verdict;
use crate::config::ValidateSettings;
use crate::util::{program_available_on_path, run_command_with_timeout, tail_chars, CommandRunResult};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const DIAGNOSTIC_TAIL_CHARS: usize = 300;

/// `g++ -fsyntax-only` over the snippet.
pub(super) fn check_cpp(code: &str, settings: &ValidateSettings, timeout: Duration) -> Verdict {
    let compiler = settings.cpp_compiler.as_str();
    if !program_available_on_path(compiler) {
        return Verdict::toolchain_missing(compiler);
    }

    let mut source = match tempfile::Builder::new()
        .prefix("mender-check-")
        .suffix(".cpp")
        .tempfile()
    {
        Ok(file) => file,
        Err(err) => return Verdict::rejected(format!("could not stage source: {}", err)),
    };
    if let Err(err) = source.write_all(code.as_bytes()).and_then(|_| source.flush()) {
        return Verdict::rejected(format!("could not stage source: {}", err));
    }

    let mut cmd = Command::new(compiler);
    cmd.arg("-fsyntax-only")
        .arg(format!("-std={}", settings.cpp_standard))
        .arg(source.path());

    debug!(compiler, "compiling c++ patch");
    compiler_verdict(compiler, run_command_with_timeout(&mut cmd, timeout))
}

/// `javac` over the snippet, written to `<ClassName>.java` in a scratch dir.
pub(super) fn check_java(code: &str, settings: &ValidateSettings, timeout: Duration) -> Verdict {
    let compiler = settings.java_compiler.as_str();
    if !program_available_on_path(compiler) {
        return Verdict::toolchain_missing(compiler);
    }

    let Some(class_name) = java_class_name(code) else {
        return Verdict::rejected("no class declaration found in java patch");
    };

    // Both the source and the class files go away with the directory
    let scratch = match tempfile::Builder::new().prefix("mender-java-").tempdir() {
        Ok(dir) => dir,
        Err(err) => return Verdict::rejected(format!("could not stage source: {}", err)),
    };
    let source_path = scratch.path().join(format!("{}.java", class_name));
    if let Err(err) = std::fs::write(&source_path, code) {
        return Verdict::rejected(format!("could not stage source: {}", err));
    }

    debug!(compiler, class = %class_name, "compiling java patch");
    compiler_verdict(
        compiler,
        run_command_with_timeout(&mut javac(compiler, scratch.path(), &source_path), timeout),
    )
}

fn javac(compiler: &str, out_dir: &Path, source: &Path) -> Command {
    let mut cmd = Command::new(compiler);
    cmd.arg("-d").arg(out_dir).arg(source);
    cmd
}

/// Name the source file must carry: the public class if there is one,
/// otherwise the first class declared.
fn java_class_name(code: &str) -> Option<String> {
    static PUBLIC_CLASS: OnceLock<Regex> = OnceLock::new();
    static ANY_CLASS: OnceLock<Regex> = OnceLock::new();

    let public = PUBLIC_CLASS
        .get_or_init(|| Regex::new(r"\bpublic\s+(?:final\s+|abstract\s+)*class\s+(\w+)").expect("valid regex"));
    let any = ANY_CLASS.get_or_init(|| Regex::new(r"\bclass\s+(\w+)").expect("valid regex"));

    public
        .captures(code)
        .or_else(|| any.captures(code))
        .map(|caps| caps[1].to_string())
}

fn compiler_verdict(compiler: &str, result: Result<CommandRunResult, String>) -> Verdict {
    let output = match result {
        Ok(output) => output,
        Err(err) => return Verdict::rejected(format!("{} failed to run: {}", compiler, err)),
    };

    if output.timed_out {
        return Verdict::rejected(format!("{} timed out", compiler));
    }
    if output.success() {
        return Verdict::verified(format!("{} accepted the patch", compiler));
    }

    let diagnostics = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    Verdict::rejected(tail_chars(diagnostics, DIAGNOSTIC_TAIL_CHARS))
}
