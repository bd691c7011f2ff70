//! Deterministic fixes for common, well-understood Python defects.
//!
//! Each [`FixPattern`] pairs a predicate over the lower-cased issue
//! description with a whole-file transform. The first pattern whose predicate
//! matches owns the issue: if its transform finds nothing to rewrite the
//! result is [`PatternOutcome::NoMatch`] and later patterns are not consulted.
//! A transform never hands back its input unchanged, which keeps every
//! pattern idempotent (a second application is a `NoMatch`).

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

use crate::data::Issue;

pub struct FixPattern {
    pub name: &'static str,
    /// Predicate over the lower-cased description.
    pub matches: fn(&str) -> bool,
    /// Whole-file transform; `None` when its precondition is absent.
    pub apply: fn(&str) -> Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternOutcome {
    Fixed { pattern: &'static str, code: String },
    NoMatch,
}

pub struct PatternLibrary {
    patterns: Vec<FixPattern>,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PatternLibrary {
    /// The built-in registry, in dispatch order.
    pub fn builtin() -> Self {
        Self {
            patterns: vec![
                FixPattern {
                    name: "sql-injection",
                    matches: is_sql_injection,
                    apply: parameterize_sql,
                },
                FixPattern {
                    name: "weak-hash",
                    matches: is_weak_hash,
                    apply: upgrade_hash,
                },
                FixPattern {
                    name: "hardcoded-secret",
                    matches: is_hardcoded_secret,
                    apply: secrets_from_env,
                },
                FixPattern {
                    name: "function-import",
                    matches: is_function_import,
                    apply: hoist_function_imports,
                },
                FixPattern {
                    name: "unsafe-eval",
                    matches: is_unsafe_eval,
                    apply: literal_eval,
                },
            ],
        }
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: FixPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|p| p.name).collect()
    }

    /// First pattern whose predicate accepts the issue.
    pub fn find(&self, issue: &Issue) -> Option<&FixPattern> {
        let description = issue.normalized_description();
        self.patterns.iter().find(|p| (p.matches)(&description))
    }

    pub fn try_fix(&self, code: &str, issue: &Issue) -> PatternOutcome {
        let Some(pattern) = self.find(issue) else {
            debug!(issue = %issue.summary(), "no pattern predicate matched");
            return PatternOutcome::NoMatch;
        };

        match (pattern.apply)(code) {
            Some(fixed) if fixed != code => {
                debug!(pattern = pattern.name, "pattern produced a candidate");
                PatternOutcome::Fixed {
                    pattern: pattern.name,
                    code: fixed,
                }
            }
            _ => {
                debug!(
                    pattern = pattern.name,
                    "pattern matched the issue but found nothing to rewrite"
                );
                PatternOutcome::NoMatch
            }
        }
    }
}

// Predicates

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn is_sql_injection(desc: &str) -> bool {
    desc.contains("sql") && desc.contains("injection")
}

fn is_weak_hash(desc: &str) -> bool {
    desc.contains("md5")
        || desc.contains("sha1")
        || (desc.contains("weak") && contains_any(desc, &["hash", "crypto"]))
}

fn is_hardcoded_secret(desc: &str) -> bool {
    contains_any(desc, &["hardcoded", "hard-coded", "hard coded"])
        && contains_any(desc, &["secret", "key", "password", "token", "credential"])
}

fn is_function_import(desc: &str) -> bool {
    desc.contains("import") && contains_any(desc, &["function", "inside", "local"])
}

fn is_unsafe_eval(desc: &str) -> bool {
    desc.contains("eval")
        && contains_any(
            desc,
            &["unsafe", "dangerous", "injection", "arbitrary", "use of", "insecure"],
        )
}

// sql-injection

struct Parameterized {
    literal: String,
    params: Vec<String>,
}

/// Keywords after which a value would sit in an identifier position, where
/// SQL cannot bind a parameter.
const IDENTIFIER_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "JOIN", "INTO", "UPDATE", "TABLE", "BY", "AS",
];

/// Rewrites the body of an SQL f-string into a `?`-placeholder literal.
/// Returns `None` when a placeholder cannot become a bound parameter.
fn parameterize_body(body: &str, quote: char) -> Option<Parameterized> {
    if body.contains("{{") || body.contains("}}") {
        return None;
    }

    // SQL string literals inside the f-string use the other quote character.
    let sql_quote = if quote == '"' { '\'' } else { '"' };
    let mut bindable = true;
    let mut params = Vec::new();
    let replaced = placeholder_re().replace_all(body, |caps: &Captures| {
        if let (Some(bare), Some(whole)) = (caps.name("bare"), caps.get(0)) {
            if !is_value_position(body, whole.start(), whole.end(), sql_quote) {
                bindable = false;
            }
            params.push(bare.as_str().to_string());
        } else {
            let expr = caps
                .name("sq")
                .or_else(|| caps.name("dq"))
                .map(|m| m.as_str())
                .unwrap_or("");
            params.push(expr.to_string());
        }
        "?"
    });

    let params: Vec<String> = params
        .iter()
        .map(|p| p.split(['!', ':']).next().unwrap_or("").trim().to_string())
        .collect();
    if !bindable || params.iter().any(|p| p.is_empty()) {
        return None;
    }

    Some(Parameterized {
        literal: format!("{quote}{replaced}{quote}"),
        params,
    })
}

/// A bare `{expr}` at `start..end` can become `?` only when it stands alone
/// as a value: outside any SQL string literal, not glued to other text, and
/// not where a table or column name belongs.
fn is_value_position(body: &str, start: usize, end: usize, sql_quote: char) -> bool {
    let before = &body[..start];
    if before.chars().filter(|c| *c == sql_quote).count() % 2 == 1 {
        return false;
    }

    let glued = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || "_.%$`[]".contains(c));
    if glued(before.chars().next_back()) || glued(body[end..].chars().next()) {
        return false;
    }

    let previous = before.split_whitespace().next_back().unwrap_or("");
    !IDENTIFIER_KEYWORDS.contains(&previous.to_uppercase().as_str())
}

/// Text after the closing quote of a query assignment that keeps building
/// the query, which a single-literal rewrite would leave interpolated.
fn continues_query(rest: &str) -> bool {
    let code = rest.split('#').next().unwrap_or("");
    code.contains('+')
        || code.contains('%')
        || code.contains(".format(")
        || fstring_with_field_re().is_match(code)
}

fn param_tuple(params: &[String]) -> String {
    match params {
        [single] => format!("({},)", single),
        many => format!("({})", many.join(", ")),
    }
}

fn parameterize_sql(code: &str) -> Option<String> {
    let mut lines: Vec<String> = code.split('\n').map(str::to_string).collect();

    for i in 0..lines.len() {
        let Some(caps) = sql_assign_re().captures(&lines[i]) else {
            continue;
        };
        let (body, quote) = match (caps.name("dq"), caps.name("sq")) {
            (Some(m), _) => (m.as_str(), '"'),
            (None, Some(m)) => (m.as_str(), '\''),
            _ => continue,
        };
        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("").to_string();
        if continues_query(&rest) {
            debug!("query assignment continues past its literal, leaving it alone");
            return None;
        }
        let Some(fixed) = parameterize_body(body, quote) else {
            continue;
        };

        let indent = caps.name("indent").map(|m| m.as_str()).unwrap_or("");
        let var = caps.name("var").map(|m| m.as_str()).unwrap_or("").to_string();
        let mut assignment = format!("{indent}{var} = {}{rest}", fixed.literal);

        let mut bound = fixed.params.is_empty();
        if !fixed.params.is_empty() {
            let tuple = param_tuple(&fixed.params);
            let execute_re =
                Regex::new(&format!(r"\.execute\(\s*{}\s*\)", regex::escape(&var))).ok()?;
            let reassign_re =
                Regex::new(&format!(r"^\s*{}\s*=[^=]", regex::escape(&var))).ok()?;

            for line in lines.iter_mut().skip(i + 1) {
                if reassign_re.is_match(line) {
                    break;
                }
                if execute_re.is_match(line) {
                    let replacement = format!(".execute({}, {})", var, tuple);
                    *line = execute_re
                        .replace_all(line, regex::NoExpand(&replacement))
                        .into_owned();
                    bound = true;
                }
            }

            if !bound && !rest.contains('#') {
                assignment.push_str(&format!("  # params: {}", tuple));
            }
        }

        lines[i] = assignment;
    }

    let mut rewritten = lines.join("\n");
    rewritten = inline_execute_re()
        .replace_all(&rewritten, |caps: &Captures| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("").to_string();
            let (body, quote) = match (caps.name("dq"), caps.name("sq")) {
                (Some(m), _) => (m.as_str(), '"'),
                (None, Some(m)) => (m.as_str(), '\''),
                _ => return whole,
            };
            match parameterize_body(body, quote) {
                Some(p) if p.params.is_empty() => format!(".execute({})", p.literal),
                Some(p) => format!(".execute({}, {})", p.literal, param_tuple(&p.params)),
                None => whole,
            }
        })
        .into_owned();

    if sql_fstring_re().is_match(&rewritten) {
        debug!("interpolated SQL left after rewrite");
        return None;
    }
    (rewritten != code).then_some(rewritten)
}

fn sql_assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?P<indent>[ \t]*)(?P<var>[A-Za-z_][A-Za-z0-9_]*)[ \t]*=[ \t]*[fF](?:"(?P<dq>(?i:select|insert|update|delete)\b[^"]*)"|'(?P<sq>(?i:select|insert|update|delete)\b[^']*)')(?P<rest>.*)$"#,
        )
        .expect("valid regex")
    })
}

fn inline_execute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\.execute\(\s*[fF](?:"(?P<dq>(?i:select|insert|update|delete)\b[^"\n]*)"|'(?P<sq>(?i:select|insert|update|delete)\b[^'\n]*)')\s*\)"#,
        )
        .expect("valid regex")
    })
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"'\{(?P<sq>[^{}]*)\}'|"\{(?P<dq>[^{}]*)\}"|\{(?P<bare>[^{}]*)\}"#)
            .expect("valid regex")
    })
}

fn fstring_with_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b[fF][rR]?(?:"[^"\n]*\{|'[^'\n]*\{)"#).expect("valid regex")
    })
}

fn sql_fstring_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b[fF](?:"(?i:select|insert|update|delete)\b[^"\n]*\{|'(?i:select|insert|update|delete)\b[^'\n]*\{)"#)
            .expect("valid regex")
    })
}

// weak-hash

fn upgrade_hash(code: &str) -> Option<String> {
    let step = weak_hash_re().replace_all(code, "hashlib.sha256");
    let step = weak_hash_new_re().replace_all(&step, r#"hashlib.new("sha256""#);
    let fixed = step.into_owned();
    (fixed != code).then_some(fixed)
}

fn weak_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bhashlib\.(?:md5|sha1)\b").expect("valid regex"))
}

fn weak_hash_new_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bhashlib\.new\(\s*["'](?i:md5|sha1)["']"#).expect("valid regex")
    })
}

// hardcoded-secret

/// Name segments that mark a credential on their own.
const SECRET_SEGMENTS: &[&str] = &[
    "SECRET",
    "PASSWORD",
    "PASSWD",
    "APIKEY",
    "CREDENTIAL",
    "CREDENTIALS",
];

/// Segments that only mark a credential next to a qualifier, so that
/// `CACHE_KEY_PREFIX` or `PRIMARY_KEY` stay untouched.
const QUALIFIED_SEGMENTS: &[&str] = &["KEY", "TOKEN", "PWD"];

const SECRET_QUALIFIERS: &[&str] = &[
    "API", "SECRET", "PRIVATE", "ACCESS", "AUTH", "SIGNING", "ENCRYPTION", "MASTER", "BEARER",
    "REFRESH", "SESSION", "DB", "DATABASE", "ADMIN", "USER", "SMTP", "BOT",
];

fn is_secret_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    let segments: Vec<&str> = upper.split('_').filter(|s| !s.is_empty()).collect();
    segments.iter().enumerate().any(|(i, segment)| {
        if SECRET_SEGMENTS.contains(segment) {
            return true;
        }
        if !QUALIFIED_SEGMENTS.contains(segment) {
            return false;
        }
        let before = i.checked_sub(1).and_then(|j| segments.get(j));
        let after = segments.get(i + 1);
        [before, after]
            .into_iter()
            .flatten()
            .any(|neighbor| SECRET_QUALIFIERS.contains(neighbor))
    })
}

fn secrets_from_env(code: &str) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = code
        .split('\n')
        .map(|line| {
            let Some(caps) = secret_assign_re().captures(line) else {
                return line.to_string();
            };
            let name = caps.name("name").map(|m| m.as_str()).unwrap_or("");
            let literal = caps.name("lit").map(|m| m.as_str()).unwrap_or("");
            if !is_secret_name(name) || literal.len() <= 2 {
                return line.to_string();
            }

            changed = true;
            let indent = caps.name("indent").map(|m| m.as_str()).unwrap_or("");
            let annotation = caps.name("ann").map(|m| m.as_str()).unwrap_or("");
            let comment = caps
                .name("comment")
                .map(|m| format!("  {}", m.as_str()))
                .unwrap_or_default();
            format!(
                "{indent}{name}{annotation} = os.environ.get(\"{}\"){comment}",
                name.to_uppercase()
            )
        })
        .collect();

    if !changed {
        return None;
    }
    Some(ensure_import(&lines.join("\n"), "os"))
}

fn secret_assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?P<indent>[ \t]*)(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?P<ann>[ \t]*:[ \t]*str)?[ \t]*=[ \t]*(?P<lit>[rRuU]?"[^"]*"|[rRuU]?'[^']*')[ \t]*(?P<comment>#.*)?$"#,
        )
        .expect("valid regex")
    })
}

// function-import

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_code_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn is_import_stmt(trimmed: &str) -> bool {
    trimmed.starts_with("import ") || (trimmed.starts_with("from ") && trimmed.contains(" import "))
}

fn is_def_line(trimmed: &str) -> bool {
    trimmed.starts_with("def ") || trimmed.starts_with("async def ")
}

/// Index of the nearest preceding line that opens the block `index` sits in.
fn enclosing_block(lines: &[&str], index: usize) -> Option<usize> {
    let indent = indent_of(lines[index]);
    (0..index)
        .rev()
        .find(|&j| is_code_line(lines[j]) && indent_of(lines[j]) < indent)
}

fn body_statement_count(lines: &[&str], def_index: usize) -> usize {
    let def_indent = indent_of(lines[def_index]);
    lines
        .iter()
        .skip(def_index + 1)
        .take_while(|line| !is_code_line(line) || indent_of(line) > def_indent)
        .filter(|line| is_code_line(line))
        .count()
}

fn hoist_function_imports(code: &str) -> Option<String> {
    let lines: Vec<&str> = code.split('\n').collect();

    let mut per_def: Vec<(usize, Vec<usize>)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if indent_of(line) == 0 || !is_import_stmt(trimmed) {
            continue;
        }
        if trimmed.contains(';') || trimmed.ends_with('\\') || trimmed.contains('(') {
            continue;
        }
        let Some(block) = enclosing_block(&lines, i) else {
            continue;
        };
        if !is_def_line(lines[block].trim()) {
            continue;
        }
        match per_def.iter_mut().find(|(def, _)| *def == block) {
            Some((_, imports)) => imports.push(i),
            None => per_def.push((block, vec![i])),
        }
    }

    let mut removed: HashSet<usize> = HashSet::new();
    let mut hoisted: Vec<String> = Vec::new();
    for (def, imports) in &per_def {
        if body_statement_count(&lines, *def) <= imports.len() {
            debug!(line = def + 1, "leaving import-only function body alone");
            continue;
        }
        for &i in imports {
            removed.insert(i);
            let stmt = strip_trailing_comment(lines[i].trim()).to_string();
            if !hoisted.contains(&stmt) {
                hoisted.push(stmt);
            }
        }
    }

    if removed.is_empty() {
        return None;
    }

    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, line)| *line)
        .collect();
    let top_level: HashSet<&str> = kept
        .iter()
        .filter(|line| indent_of(line) == 0)
        .map(|line| strip_trailing_comment(line.trim()))
        .collect();
    let new_imports: Vec<String> = hoisted
        .into_iter()
        .filter(|stmt| !top_level.contains(stmt.as_str()))
        .collect();

    Some(insert_top_level(&kept.join("\n"), &new_imports))
}

fn strip_trailing_comment(stmt: &str) -> &str {
    match stmt.find('#') {
        Some(pos) => stmt[..pos].trim_end(),
        None => stmt,
    }
}

// unsafe-eval

fn literal_eval(code: &str) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = code
        .split('\n')
        .map(|line| {
            let trimmed = line.trim_start();
            if is_def_line(trimmed) || trimmed.starts_with('#') {
                return line.to_string();
            }
            let fixed = bare_eval_re().replace_all(line, "${pre}ast.literal_eval(");
            if fixed != line {
                changed = true;
            }
            fixed.into_owned()
        })
        .collect();

    if !changed {
        return None;
    }
    Some(ensure_import(&lines.join("\n"), "ast"))
}

fn bare_eval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<pre>^|[^\w.])eval\(").expect("valid regex"))
}

// Import placement

/// True when a top-level `import` statement binds `module` by its own name.
pub fn has_top_level_import(code: &str, module: &str) -> bool {
    code.split('\n').any(|line| {
        line.strip_prefix("import ")
            .map(|names| {
                strip_trailing_comment(names)
                    .split(',')
                    .any(|name| name.trim() == module)
            })
            .unwrap_or(false)
    })
}

/// Adds `import <module>` at file scope unless it is already there.
pub fn ensure_import(code: &str, module: &str) -> String {
    if has_top_level_import(code, module) {
        return code.to_string();
    }
    insert_top_level(code, &[format!("import {}", module)])
}

fn insert_top_level(code: &str, statements: &[String]) -> String {
    if statements.is_empty() {
        return code.to_string();
    }

    let mut lines: Vec<String> = code.split('\n').map(str::to_string).collect();
    let (at, after_imports) = import_insertion_point(&lines);

    let mut block: Vec<String> = statements.to_vec();
    let next_is_code = lines.get(at).map(|l| !l.trim().is_empty()).unwrap_or(false);
    if !after_imports && next_is_code {
        block.push(String::new());
    }
    for (offset, stmt) in block.into_iter().enumerate() {
        lines.insert(at + offset, stmt);
    }
    lines.join("\n")
}

/// Line index where new imports go, and whether that is right after an
/// existing top-level import block.
fn import_insertion_point(lines: &[String]) -> (usize, bool) {
    let mut at = 0;

    while at < lines.len() && at < 2 {
        let line = lines[at].trim_start();
        let is_header = (at == 0 && line.starts_with("#!"))
            || (line.starts_with('#') && line.contains("coding"));
        if !is_header {
            break;
        }
        at += 1;
    }

    let mut scan = at;
    while scan < lines.len() && lines[scan].trim().is_empty() {
        scan += 1;
    }
    if let Some(end) = docstring_end(lines, scan) {
        at = end + 1;
    }

    let mut last_import: Option<usize> = None;
    let mut i = at;
    while i < lines.len() {
        let line = lines[i].as_str();
        if line.trim().is_empty() || line.starts_with('#') {
            i += 1;
            continue;
        }
        if indent_of(line) == 0 && is_import_stmt(line.trim()) {
            if line.contains('(') && !line.contains(')') {
                while i < lines.len() && !lines[i].contains(')') {
                    i += 1;
                }
            }
            last_import = Some(i);
            i += 1;
            continue;
        }
        break;
    }

    match last_import {
        Some(end) => (end + 1, true),
        None => (at, false),
    }
}

fn docstring_end(lines: &[String], start: usize) -> Option<usize> {
    let first = lines.get(start)?.trim_start();
    let body = first.trim_start_matches(['r', 'R', 'u', 'U']);
    let delimiter = ["\"\"\"", "'''"]
        .into_iter()
        .find(|d| body.starts_with(d))?;

    if body[delimiter.len()..].contains(delimiter) {
        return Some(start);
    }
    (start + 1..lines.len()).find(|&j| lines[j].contains(delimiter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Severity;

    fn issue(desc: &str) -> Issue {
        Issue::new(Severity::High, desc, "SecurityReviewer")
    }

    fn fixed(outcome: PatternOutcome) -> (&'static str, String) {
        match outcome {
            PatternOutcome::Fixed { pattern, code } => (pattern, code),
            PatternOutcome::NoMatch => panic!("expected a fix"),
        }
    }

    const SQL_CODE: &str = r#"import sqlite3

def get_user(conn, username):
    query = f"SELECT * FROM users WHERE name = '{username}'"
    cursor = conn.cursor()
    cursor.execute(query)
    return cursor.fetchone()
"#;

    #[test]
    fn test_sql_injection_parameterizes_query_and_call() {
        let library = PatternLibrary::builtin();
        let (name, code) = fixed(library.try_fix(SQL_CODE, &issue("SQL injection in get_user")));
        assert_eq!(name, "sql-injection");
        assert!(code.contains(r#"query = "SELECT * FROM users WHERE name = ?""#), "{}", code);
        assert!(code.contains("cursor.execute(query, (username,))"), "{}", code);
        assert!(!code.contains("f\"SELECT"));
    }

    #[test]
    fn test_sql_injection_is_idempotent() {
        let library = PatternLibrary::builtin();
        let sql = issue("Possible SQL injection");
        let (_, once) = fixed(library.try_fix(SQL_CODE, &sql));
        assert_eq!(library.try_fix(&once, &sql), PatternOutcome::NoMatch);
    }

    #[test]
    fn test_sql_injection_without_execute_gets_params_comment() {
        let code = "q = f'DELETE FROM t WHERE id = {item.id} AND owner = {owner}'\n";
        let (_, out) = fixed(PatternLibrary::builtin().try_fix(code, &issue("sql injection")));
        assert_eq!(
            out,
            "q = 'DELETE FROM t WHERE id = ? AND owner = ?'  # params: (item.id, owner)\n"
        );
    }

    #[test]
    fn test_sql_injection_inline_execute() {
        let code = "cur.execute(f\"UPDATE t SET a = {a:d} WHERE b = '{b}'\")\n";
        let (_, out) = fixed(PatternLibrary::builtin().try_fix(code, &issue("SQL Injection")));
        assert_eq!(out, "cur.execute(\"UPDATE t SET a = ? WHERE b = ?\", (a, b))\n");
    }

    #[test]
    fn test_sql_injection_stops_at_reassignment() {
        let code = "q = f\"SELECT * FROM a WHERE x = {x}\"\nq = other()\ncur.execute(q)\n";
        let (_, out) = fixed(PatternLibrary::builtin().try_fix(code, &issue("sql injection")));
        assert!(out.contains("cur.execute(q)\n"), "{}", out);
        assert!(out.contains("# params: (x,)"), "{}", out);
    }

    #[test]
    fn test_sql_injection_escaped_braces_is_no_match() {
        let code = "q = f\"SELECT '{{literal}}' FROM t WHERE id = {i}\"\n";
        assert_eq!(
            PatternLibrary::builtin().try_fix(code, &issue("SQL injection")),
            PatternOutcome::NoMatch
        );
    }

    #[test]
    fn test_sql_injection_with_concatenated_fragment_is_no_match() {
        let code = "def q(cur, a, b):\n    query = f\"SELECT * FROM t WHERE a = '{a}'\" + f\" AND b = '{b}'\"\n    cur.execute(query)\n";
        assert_eq!(
            PatternLibrary::builtin().try_fix(code, &issue("SQL injection")),
            PatternOutcome::NoMatch
        );

        for rest in [" + suffix", " % (a,)", ".format(a)"] {
            let code = format!("query = f\"SELECT * FROM t WHERE a = {{a}}\"{}\ncur.execute(query)\n", rest);
            assert_eq!(
                PatternLibrary::builtin().try_fix(&code, &issue("SQL injection")),
                PatternOutcome::NoMatch,
                "{}",
                code
            );
        }
    }

    #[test]
    fn test_sql_injection_inside_quoted_literal_is_no_match() {
        let code = "def search(cur, term):\n    query = f\"SELECT * FROM users WHERE name LIKE '%{term}%'\"\n    cur.execute(query)\n";
        assert_eq!(
            PatternLibrary::builtin().try_fix(code, &issue("SQL injection in search")),
            PatternOutcome::NoMatch
        );
    }

    #[test]
    fn test_sql_injection_in_identifier_position_is_no_match() {
        let library = PatternLibrary::builtin();
        let sql = issue("SQL injection");
        for query in [
            "f\"SELECT * FROM {table} WHERE id = {id}\"",
            "f\"SELECT * FROM users ORDER BY {column}\"",
            "f\"SELECT * FROM users_{suffix} WHERE id = {id}\"",
        ] {
            let code = format!("query = {}\ncur.execute(query)\n", query);
            assert_eq!(library.try_fix(&code, &sql), PatternOutcome::NoMatch, "{}", code);
        }
    }

    #[test]
    fn test_sql_injection_trailing_comment_is_not_a_continuation() {
        let code = "query = f\"SELECT * FROM t WHERE id = {id}\"  # 100% safe\ncur.execute(query)\n";
        let (_, out) = fixed(PatternLibrary::builtin().try_fix(code, &issue("SQL injection")));
        assert_eq!(
            out,
            "query = \"SELECT * FROM t WHERE id = ?\"  # 100% safe\ncur.execute(query, (id,))\n"
        );
    }

    #[test]
    fn test_matched_pattern_never_falls_through() {
        // Mentions md5 too, but sql-injection is first and has nothing to do.
        let code = "import hashlib\nh = hashlib.md5(b'x')\n";
        let outcome = PatternLibrary::builtin()
            .try_fix(code, &issue("SQL injection risk next to md5 usage"));
        assert_eq!(outcome, PatternOutcome::NoMatch);
    }

    #[test]
    fn test_unmatched_description_is_no_match() {
        let outcome = PatternLibrary::builtin().try_fix("x = 1\n", &issue("Variable names are unclear"));
        assert_eq!(outcome, PatternOutcome::NoMatch);
    }

    #[test]
    fn test_weak_hash() {
        let code = "import hashlib\n\ndef h(p):\n    a = hashlib.md5(p).hexdigest()\n    b = hashlib.new('sha1', p)\n    return a, b\n";
        let library = PatternLibrary::builtin();
        let weak = issue("Weak hashing algorithm MD5 used for passwords");
        let (name, out) = fixed(library.try_fix(code, &weak));
        assert_eq!(name, "weak-hash");
        assert!(out.contains("hashlib.sha256(p).hexdigest()"));
        assert!(out.contains("hashlib.new(\"sha256\", p)"));
        assert_eq!(library.try_fix(&out, &weak), PatternOutcome::NoMatch);
    }

    #[test]
    fn test_hardcoded_secret_moves_to_environment() {
        let code = "\"\"\"Service client.\"\"\"\nfrom __future__ import annotations\nimport requests\n\nAPI_KEY = \"sk-live-123\"  # prod\ndb_password: str = 'hunter2'\nTIMEOUT = \"30\"\n";
        let library = PatternLibrary::builtin();
        let secret = issue("Hardcoded API key in source");
        let (name, out) = fixed(library.try_fix(code, &secret));
        assert_eq!(name, "hardcoded-secret");
        assert_eq!(
            out,
            "\"\"\"Service client.\"\"\"\nfrom __future__ import annotations\nimport requests\nimport os\n\nAPI_KEY = os.environ.get(\"API_KEY\")  # prod\ndb_password: str = os.environ.get(\"DB_PASSWORD\")\nTIMEOUT = \"30\"\n"
        );
        assert_eq!(library.try_fix(&out, &secret), PatternOutcome::NoMatch);
    }

    #[test]
    fn test_ordinary_key_constants_are_not_secrets() {
        let code = "API_KEY = \"sk-abc123\"\nCACHE_KEY_PREFIX = \"user:\"\nPRIMARY_KEY = \"id\"\nTOKEN_HEADER = \"X-Token\"\n";
        let (_, out) = fixed(PatternLibrary::builtin().try_fix(code, &issue("Hardcoded API key")));
        assert_eq!(
            out,
            "import os\n\nAPI_KEY = os.environ.get(\"API_KEY\")\nCACHE_KEY_PREFIX = \"user:\"\nPRIMARY_KEY = \"id\"\nTOKEN_HEADER = \"X-Token\"\n"
        );
    }

    #[test]
    fn test_secret_name_rules() {
        for name in ["API_KEY", "secret_key", "DB_PWD", "ACCESS_TOKEN", "smtp_password", "STRIPE_APIKEY"] {
            assert!(is_secret_name(name), "{}", name);
        }
        for name in ["CACHE_KEY_PREFIX", "PRIMARY_KEY", "KEY", "TOKEN_HEADER", "PWD", "SORT_KEY"] {
            assert!(!is_secret_name(name), "{}", name);
        }
    }

    #[test]
    fn test_import_goes_after_shebang_when_file_has_no_imports() {
        let code = "#!/usr/bin/env python3\nSECRET_TOKEN = 'abc'\n";
        let (_, out) = fixed(
            PatternLibrary::builtin().try_fix(code, &issue("hard-coded secret token")),
        );
        assert_eq!(
            out,
            "#!/usr/bin/env python3\nimport os\n\nSECRET_TOKEN = os.environ.get(\"SECRET_TOKEN\")\n"
        );
    }

    #[test]
    fn test_function_import_is_hoisted() {
        let code = "import os\n\ndef load(path):\n    import json\n    import os\n    with open(path) as f:\n        return json.load(f)\n\ndef only():\n    import re\n";
        let library = PatternLibrary::builtin();
        let local = issue("Import inside function body");
        let (name, out) = fixed(library.try_fix(code, &local));
        assert_eq!(name, "function-import");
        assert_eq!(
            out,
            "import os\nimport json\n\ndef load(path):\n    with open(path) as f:\n        return json.load(f)\n\ndef only():\n    import re\n"
        );
        assert_eq!(library.try_fix(&out, &local), PatternOutcome::NoMatch);
    }

    #[test]
    fn test_conditional_import_is_left_alone() {
        let code = "def f():\n    if True:\n        import json\n    return 1\n";
        assert_eq!(
            PatternLibrary::builtin().try_fix(code, &issue("local import in function")),
            PatternOutcome::NoMatch
        );
    }

    #[test]
    fn test_unsafe_eval_becomes_literal_eval() {
        let code = "def parse(s):\n    return eval(s)\n\nobj.eval(x)\n";
        let library = PatternLibrary::builtin();
        let eval = issue("Use of eval on untrusted input");
        let (name, out) = fixed(library.try_fix(code, &eval));
        assert_eq!(name, "unsafe-eval");
        assert_eq!(
            out,
            "import ast\n\ndef parse(s):\n    return ast.literal_eval(s)\n\nobj.eval(x)\n"
        );
        assert_eq!(library.try_fix(&out, &eval), PatternOutcome::NoMatch);
    }

    #[test]
    fn test_custom_pattern_registry() {
        fn always(_: &str) -> bool {
            true
        }
        fn upper(code: &str) -> Option<String> {
            Some(code.to_uppercase())
        }
        let library = PatternLibrary::empty().with_pattern(FixPattern {
            name: "upper",
            matches: always,
            apply: upper,
        });
        assert_eq!(library.names(), vec!["upper"]);
        assert_eq!(library.try_fix("X = 1", &issue("anything")), PatternOutcome::NoMatch);
        let (_, out) = fixed(library.try_fix("x = 1", &issue("anything")));
        assert_eq!(out, "X = 1");
    }
}
