//! Pure-function file ranker (spec.md topology table, `retrieve` row):
//! "Rank candidate files (stack-trace > spring-context > build files)".

use std::collections::HashMap;

use crate::analysis::log_parser::ParsedLog;

/// A ranked candidate, ready to persist as a `candidate_files` row.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFile {
    pub file_path: String,
    pub rank_score: f64,
    pub reason: String,
}

/// Score bands, highest first: a file hit by a stack trace outranks any
/// number of Spring-context hits, which in turn outrank a build file.
const STACK_TRACE_SCORE: f64 = 100.0;
const SPRING_CONTEXT_SCORE: f64 = 10.0;
const BUILD_FILE_SCORE: f64 = 1.0;

/// A source file discovered under the working copy, along with whatever a
/// cheap scan of its contents found.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub relative_path: String,
    /// Whether the file contains a Spring annotation
    /// (`@Component`, `@Service`, `@Controller`, `@Repository`,
    /// `@Configuration`, `@Autowired`, `@Bean`).
    pub has_spring_annotation: bool,
    /// `pom.xml` or `build.gradle`(`.kts`).
    pub is_build_file: bool,
}

const SPRING_ANNOTATIONS: &[&str] = &[
    "@Component",
    "@Service",
    "@Controller",
    "@RestController",
    "@Repository",
    "@Configuration",
    "@Autowired",
    "@Bean",
];

/// Whether `contents` trips any of the Spring stereotype/wiring annotations.
pub fn has_spring_annotation(contents: &str) -> bool {
    SPRING_ANNOTATIONS.iter().any(|a| contents.contains(a))
}

pub fn is_build_file(file_name: &str) -> bool {
    matches!(file_name, "pom.xml" | "build.gradle" | "build.gradle.kts")
}

/// Rank scanned files against a parsed build log.
///
/// Stack-trace hits are matched by file name (the trace only carries a bare
/// file name like `OrderService.java`, not a full path); a file is scored
/// once per distinct stack frame that names it, so a file hit from multiple
/// frames ranks above one hit from a single frame. Spring-annotated files
/// and build files that were not already hit by the stack trace are scored
/// at their respective flat bands. Files matching none of these are
/// dropped, not zero-scored, so the `retrieve` stage only persists
/// candidates with some basis.
pub fn rank(parsed_log: &ParsedLog, scanned: &[ScannedFile]) -> Vec<RankedFile> {
    let mut stack_hits: HashMap<&str, u32> = HashMap::new();
    for frame in &parsed_log.stack_frames {
        *stack_hits.entry(frame.file.as_str()).or_insert(0) += 1;
    }
    for err in &parsed_log.compiler_errors {
        let base_name = err.file.rsplit('/').next().unwrap_or(&err.file);
        *stack_hits.entry(base_name).or_insert(0) += 1;
    }

    let mut ranked = Vec::new();

    for file in scanned {
        let base_name = file.relative_path.rsplit('/').next().unwrap_or(&file.relative_path);

        if let Some(&hits) = stack_hits.get(base_name) {
            ranked.push(RankedFile {
                file_path: file.relative_path.clone(),
                rank_score: STACK_TRACE_SCORE + f64::from(hits),
                reason: format!("named in {hits} build-log frame(s)/error(s)"),
            });
        } else if file.has_spring_annotation {
            ranked.push(RankedFile {
                file_path: file.relative_path.clone(),
                rank_score: SPRING_CONTEXT_SCORE,
                reason: "Spring-managed component".to_string(),
            });
        } else if file.is_build_file {
            ranked.push(RankedFile {
                file_path: file.relative_path.clone(),
                rank_score: BUILD_FILE_SCORE,
                reason: "build descriptor".to_string(),
            });
        }
    }

    ranked.sort_by(|a, b| b.rank_score.partial_cmp(&a.rank_score).unwrap());
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::log_parser::StackFrame;

    fn parsed_with_frame(file: &str) -> ParsedLog {
        ParsedLog {
            stack_frames: vec![StackFrame {
                class_name: "com.example.Foo".to_string(),
                method: "bar".to_string(),
                file: file.to_string(),
                line: 10,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn stack_trace_hit_outranks_spring_context() {
        let parsed = parsed_with_frame("OrderService.java");
        let scanned = vec![
            ScannedFile {
                relative_path: "src/main/java/com/example/OrderService.java".to_string(),
                has_spring_annotation: true,
                is_build_file: false,
            },
            ScannedFile {
                relative_path: "src/main/java/com/example/OtherService.java".to_string(),
                has_spring_annotation: true,
                is_build_file: false,
            },
        ];

        let ranked = rank(&parsed, &scanned);
        assert_eq!(ranked[0].file_path, "src/main/java/com/example/OrderService.java");
        assert!(ranked[0].rank_score > ranked[1].rank_score);
    }

    #[test]
    fn spring_context_outranks_build_file() {
        let parsed = ParsedLog::default();
        let scanned = vec![
            ScannedFile {
                relative_path: "pom.xml".to_string(),
                has_spring_annotation: false,
                is_build_file: true,
            },
            ScannedFile {
                relative_path: "src/main/java/com/example/Service.java".to_string(),
                has_spring_annotation: true,
                is_build_file: false,
            },
        ];

        let ranked = rank(&parsed, &scanned);
        assert_eq!(ranked[0].file_path, "src/main/java/com/example/Service.java");
        assert_eq!(ranked[1].file_path, "pom.xml");
    }

    #[test]
    fn files_matching_nothing_are_dropped() {
        let parsed = ParsedLog::default();
        let scanned = vec![ScannedFile {
            relative_path: "README.md".to_string(),
            has_spring_annotation: false,
            is_build_file: false,
        }];
        assert!(rank(&parsed, &scanned).is_empty());
    }

    #[test]
    fn has_spring_annotation_detects_known_markers() {
        assert!(has_spring_annotation("@Service\npublic class Foo {}"));
        assert!(!has_spring_annotation("public class Foo {}"));
    }

    #[test]
    fn is_build_file_matches_maven_and_gradle() {
        assert!(is_build_file("pom.xml"));
        assert!(is_build_file("build.gradle"));
        assert!(is_build_file("build.gradle.kts"));
        assert!(!is_build_file("Foo.java"));
    }
}
