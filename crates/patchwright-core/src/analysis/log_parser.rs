//! Pure-function log parser: extracts stack traces and compiler errors from
//! raw CI build logs, seeding the `plan` stage's payload (spec.md §1,
//! "Project structure analyzer, log parser, file ranker").

use regex::Regex;
use std::sync::LazyLock;

/// A single frame of a Java stack trace: `at com.example.Foo.bar(Foo.java:42)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class_name: String,
    pub method: String,
    pub file: String,
    pub line: u32,
}

/// A `javac`/Maven-style compiler error: `[ERROR] /path/Foo.java:[12,5] message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// The structured result of parsing a build log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLog {
    pub stack_frames: Vec<StackFrame>,
    pub compiler_errors: Vec<CompilerError>,
    pub exception_types: Vec<String>,
}

static STACK_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"at\s+([\w$.]+)\.(\w+)\(([\w.]+):(\d+)\)").expect("valid regex")
});

static EXCEPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([\w.$]+(?:Exception|Error))(?::|\s|$)").expect("valid regex")
});

static COMPILER_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[ERROR\]\s+(\S+\.java):\[(\d+),\d+\]\s*(.*)").expect("valid regex")
});

/// Parse raw CI build logs into stack frames, compiler errors, and the
/// exception type names mentioned (e.g. `java.lang.NullPointerException`).
///
/// Ordering is preserved (first occurrence first); duplicates are not
/// removed, since the file ranker weighs by frequency.
pub fn parse(build_logs: &str) -> ParsedLog {
    let mut parsed = ParsedLog::default();

    for cap in STACK_FRAME_RE.captures_iter(build_logs) {
        parsed.stack_frames.push(StackFrame {
            class_name: cap[1].to_string(),
            method: cap[2].to_string(),
            file: cap[3].to_string(),
            line: cap[4].parse().unwrap_or(0),
        });
    }

    for cap in COMPILER_ERROR_RE.captures_iter(build_logs) {
        parsed.compiler_errors.push(CompilerError {
            file: cap[1].to_string(),
            line: cap[2].parse().unwrap_or(0),
            message: cap[3].trim().to_string(),
        });
    }

    for cap in EXCEPTION_RE.captures_iter(build_logs) {
        parsed.exception_types.push(cap[1].to_string());
    }

    parsed
}

impl ParsedLog {
    /// Whether anything actionable was found at all.
    pub fn is_empty(&self) -> bool {
        self.stack_frames.is_empty() && self.compiler_errors.is_empty()
    }
}

/// Whether a `pom.xml`'s contents declare a Spring Boot parent/starter,
/// used by the project analyzer to decide how heavily to weigh
/// Spring-annotation hits during file ranking.
pub fn has_spring_boot_marker(pom_contents: &str) -> bool {
    pom_contents.contains("spring-boot-starter") || pom_contents.contains("spring-boot-starter-parent")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "\
Tests run: 3, Failures: 1
java.lang.NullPointerException: Cannot invoke method
\tat com.example.service.OrderService.process(OrderService.java:88)
\tat com.example.controller.OrderController.create(OrderController.java:41)
[ERROR] /repo/src/main/java/com/example/service/OrderService.java:[85,9] cannot find symbol
";

    #[test]
    fn parses_stack_frames() {
        let parsed = parse(SAMPLE_LOG);
        assert_eq!(parsed.stack_frames.len(), 2);
        assert_eq!(parsed.stack_frames[0].file, "OrderService.java");
        assert_eq!(parsed.stack_frames[0].line, 88);
        assert_eq!(parsed.stack_frames[0].class_name, "com.example.service.OrderService");
    }

    #[test]
    fn parses_compiler_errors() {
        let parsed = parse(SAMPLE_LOG);
        assert_eq!(parsed.compiler_errors.len(), 1);
        assert_eq!(parsed.compiler_errors[0].line, 85);
        assert!(parsed.compiler_errors[0].message.contains("cannot find symbol"));
    }

    #[test]
    fn parses_exception_types() {
        let parsed = parse(SAMPLE_LOG);
        assert!(parsed
            .exception_types
            .contains(&"java.lang.NullPointerException".to_string()));
    }

    #[test]
    fn empty_log_yields_empty_parse() {
        let parsed = parse("");
        assert!(parsed.is_empty());
    }
}
