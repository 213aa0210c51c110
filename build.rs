use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own sources. Everything else in the
// working tree (target/, vendored reference material) is not scanned.
const SOURCE_DIRS: [&str; 4] = ["score", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: &str =
    "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

// How a matched line is filtered before it counts as a violation.
#[derive(Clone, Copy)]
enum LineFilter {
    // Ignore matches that sit in a comment or inside a string literal.
    CodeOnly,
    // Every match is a violation.
    Any,
    // Only non-doc comments count.
    PlainComment,
    // Only comments whose letters are all uppercase count.
    ShoutingComment,
}

struct Rule {
    pattern: String,
    filter: LineFilter,
    applies_to_build_script: bool,
    summary: &'static str,
    advice: &'static str,
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            filter: LineFilter::CodeOnly,
            applies_to_build_script: true,
            summary: "underscore-prefixed bindings",
            advice: "Use the binding under its real name or remove it.",
        },
        Rule {
            pattern: format!(r"(//|/\*).*(?:{FORBIDDEN_WORDS})"),
            filter: LineFilter::Any,
            applies_to_build_script: false,
            summary: "change-log words in comments",
            advice: "Comments describe the code as it is; delete history notes.",
        },
        Rule {
            pattern: r"(//|/\*).*\*\*".to_string(),
            filter: LineFilter::PlainComment,
            applies_to_build_script: false,
            summary: "'**' in non-doc comments",
            advice: "Emphasis markup belongs in doc comments only.",
        },
        Rule {
            pattern: r"(//|/\*).*".to_string(),
            filter: LineFilter::ShoutingComment,
            applies_to_build_script: false,
            summary: "all-uppercase comments",
            advice: "Rewrite the comment in sentence case or delete it.",
        },
        Rule {
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            filter: LineFilter::Any,
            applies_to_build_script: false,
            summary: "#[allow(dead_code)] attributes",
            advice: "Use the item or remove it.",
        },
    ]
}

// Collects the offending lines of one file for one rule.
struct Violations {
    filter: LineFilter,
    lines: Vec<String>,
}

impl Violations {
    fn new(filter: LineFilter) -> Self {
        Self {
            filter,
            lines: Vec::new(),
        }
    }

    fn report(&self, path: &Path, rule: &Rule) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let mut message = format!(
            "\nERROR: found {} {} in {}:\n",
            self.lines.len(),
            rule.summary,
            path.display()
        );
        for line in &self.lines {
            message.push_str(&format!("   {line}\n"));
        }
        message.push_str(&format!("\n   {}\n", rule.advice));
        Some(message)
    }
}

impl Sink for Violations {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        let counts = match self.filter {
            LineFilter::Any => true,
            LineFilter::CodeOnly => !is_comment(line) && !underscore_in_string(line),
            LineFilter::PlainComment => !line.trim_start().starts_with("///"),
            LineFilter::ShoutingComment => comment_text(line).is_some_and(is_shouting),
        };
        if counts {
            self.lines.push(format!("{line_number}:{line}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//") || line.contains("/*")
}

// True when some string literal on the line contains an underscore.
fn underscore_in_string(line: &str) -> bool {
    line.split('"').skip(1).step_by(2).any(|part| part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line.find("/*")? + 2;
    let body = &line[start..];
    Some(body.find("*/").map_or(body, |end| &body[..end]).trim())
}

fn is_shouting(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
}

fn source_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "rs"))
        .collect();
    files.push(PathBuf::from("build.rs"));
    files
}

fn check_sources() -> Result<(), Box<dyn Error>> {
    let files = source_files();
    let mut searcher = Searcher::new();

    for rule in rules() {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern)?;
        for path in &files {
            if path == Path::new("build.rs") && !rule.applies_to_build_script {
                continue;
            }
            let mut violations = Violations::new(rule.filter);
            searcher.search_path(&matcher, path, &mut violations)?;
            if let Some(message) = violations.report(path, &rule) {
                return Err(message.into());
            }
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = check_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
