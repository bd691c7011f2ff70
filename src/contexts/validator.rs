//! Candidate validation.
//!
//! The base check parses the candidate as Python with tree-sitter and rejects
//! any tree with an error node, then walks the tree for calls that hand
//! strings to the interpreter (`eval`, `exec`, `compile`). Extra checks plug
//! in as [`ValidationStage`]s and run after the base check, in order.

use thiserror::Error;
use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

use crate::data::Validation;

/// Builtins a generated fix may not call.
pub const DENIED_CALLS: &[&str] = &["eval", "exec", "compile"];

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("python grammar unavailable: {0}")]
    Grammar(String),
    #[error("parser returned no tree")]
    NoTree,
    #[error("validation stage '{stage}' failed to run: {message}")]
    Stage { stage: String, message: String },
}

/// An additional check applied to candidates that already parse.
pub trait ValidationStage: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `Validation::Fail` for a bad candidate; `Err` only when the
    /// stage itself could not run.
    fn check(&self, code: &str) -> Result<Validation, ValidatorError>;
}

#[derive(Default)]
pub struct Validator {
    stages: Vec<Box<dyn ValidationStage>>,
}

impl Validator {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn with_stage(mut self, stage: Box<dyn ValidationStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the base check and then every stage, stopping at the first failure.
    pub fn validate(&self, code: &str) -> Result<Validation, ValidatorError> {
        let base = self.validate_base(code)?;
        if !base.is_pass() {
            return Ok(base);
        }
        self.validate_stages(code)
    }

    /// Syntax check plus the denied-call scan.
    pub fn validate_base(&self, code: &str) -> Result<Validation, ValidatorError> {
        let tree = parse_python(code)?;
        let root = tree.root_node();

        if root.has_error() {
            let reason = match first_error(root) {
                Some(node) => {
                    let pos = node.start_position();
                    if node.is_missing() {
                        format!(
                            "syntax error: missing '{}' at line {}, column {}",
                            node.kind(),
                            pos.row + 1,
                            pos.column + 1
                        )
                    } else {
                        format!(
                            "syntax error at line {}, column {}",
                            pos.row + 1,
                            pos.column + 1
                        )
                    }
                }
                None => "syntax error".to_string(),
            };
            debug!(%reason, "candidate rejected by parser");
            return Ok(Validation::fail(reason));
        }

        if let Some((name, line)) = find_denied_call(root, code.as_bytes()) {
            let reason = format!("disallowed call to {}() at line {}", name, line);
            debug!(%reason, "candidate rejected by call scan");
            return Ok(Validation::fail(reason));
        }

        Ok(Validation::Pass)
    }

    /// Runs only the configured extra stages.
    pub fn validate_stages(&self, code: &str) -> Result<Validation, ValidatorError> {
        for stage in &self.stages {
            let verdict = stage.check(code)?;
            if let Validation::Fail { reason } = verdict {
                debug!(stage = stage.name(), %reason, "candidate rejected by stage");
                return Ok(Validation::fail(format!("{}: {}", stage.name(), reason)));
            }
        }
        Ok(Validation::Pass)
    }
}

fn parse_python(code: &str) -> Result<Tree, ValidatorError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ValidatorError::Grammar(e.to_string()))?;
    parser.parse(code, None).ok_or(ValidatorError::NoTree)
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn find_denied_call(node: Node, source: &[u8]) -> Option<(String, usize)> {
    if node.kind() == "exec_statement" {
        return Some(("exec".to_string(), node.start_position().row + 1));
    }

    if node.kind() == "call" {
        if let Some(function) = node.child_by_field_name("function") {
            if let Some(name) = denied_callee(function, source) {
                return Some((name, node.start_position().row + 1));
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_denied_call(child, source) {
            return Some(found);
        }
    }
    None
}

fn denied_callee(function: Node, source: &[u8]) -> Option<String> {
    let name = match function.kind() {
        "identifier" => function.utf8_text(source).ok()?.to_string(),
        "attribute" => {
            let object = function.child_by_field_name("object")?;
            let attr = function.child_by_field_name("attribute")?;
            if object.kind() != "identifier" || object.utf8_text(source).ok()? != "builtins" {
                return None;
            }
            attr.utf8_text(source).ok()?.to_string()
        }
        _ => return None,
    };
    DENIED_CALLS.contains(&name.as_str()).then_some(name)
}
