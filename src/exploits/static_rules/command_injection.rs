use once_cell::sync::Lazy;
use regex::Regex;

use super::{scan_patterns, Pattern, StaticRule};
use crate::exploits::{ExploitKind, Severity, SourceText, Vulnerability};

const OS: &str = "OS command injection";
const EVAL: &str = "Code injection (eval)";
const OWASP: &str = "A03:2021-Injection";

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(
                r"\b(exec|execSync|spawn|spawnSync|execFile|execFileSync)\s*\([^)\n]*(\+|\$\{|req\.(body|query|params))",
            )
            .unwrap(),
            kind: OS,
            severity: Severity::Critical,
            description: "child_process call built from dynamic input",
            recommendation: "Use execFile/spawn with an argument array and a fixed binary; validate input against an allowlist.",
            cwe: "CWE-78",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\b(system|shell_exec|passthru|popen|proc_open)\s*\([^)\n]*\$").unwrap(),
            kind: OS,
            severity: Severity::Critical,
            description: "PHP shell call with a variable argument",
            recommendation: "Avoid shell calls; otherwise wrap every argument in escapeshellarg().",
            cwe: "CWE-78",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\bos\.(system|popen)\s*\(|\bsubprocess\.\w+\([^)\n]*shell\s*=\s*True")
                .unwrap(),
            kind: OS,
            severity: Severity::High,
            description: "Python shell invocation",
            recommendation: "Pass an argument list to subprocess.run without shell=True.",
            cwe: "CWE-78",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r"\beval\s*\(").unwrap(),
            kind: EVAL,
            severity: Severity::Critical,
            description: "eval executes arbitrary code",
            recommendation: "Remove eval; parse data with JSON.parse or a dedicated parser.",
            cwe: "CWE-95",
            owasp: OWASP,
        },
        Pattern {
            regex: Regex::new(r#"\bnew\s+Function\s*\(|\bset(Timeout|Interval)\s*\(\s*["'`]"#).unwrap(),
            kind: EVAL,
            severity: Severity::High,
            description: "String compiled to code at runtime",
            recommendation: "Pass functions instead of code strings.",
            cwe: "CWE-95",
            owasp: OWASP,
        },
    ]
});

/// Shell execution and runtime code evaluation.
pub struct CommandInjectionRule;

impl StaticRule for CommandInjectionRule {
    fn kind(&self) -> ExploitKind {
        ExploitKind::CommandInjection
    }

    fn scan(&self, source: &SourceText) -> Vec<Vulnerability> {
        scan_patterns(source, &PATTERNS)
    }
}
