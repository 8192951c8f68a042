//! Template System - Formula to Document Expansion
//!
//! A templater turns a raw formula into a complete LaTeX document and
//! reports whether the typeset result sits on a text baseline.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Formula is empty")]
    EmptyFormula,

    #[error("Failed to read template: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid template: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete typesetting source produced from a formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSource {
    pub text: String,
    /// Inline formulas have a baseline; display formulas do not.
    pub has_baseline: bool,
}

/// Templating collaborator contract
pub trait Templater: Send + Sync {
    fn run(&self, formula: &str) -> Result<CompiledSource, TemplateError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTemplate {
    #[serde(default = "default_preamble")]
    pub preamble: String,
    #[serde(default = "default_font_size")]
    pub font_size: String,
}

fn default_preamble() -> String {
    [
        r"\documentclass[12pt]{article}",
        r"\usepackage{amsmath}",
        r"\usepackage{amssymb}",
        r"\usepackage{amsfonts}",
        r"\pagestyle{empty}",
    ]
    .join("\n")
}

fn default_font_size() -> String {
    r"\normalsize".to_string()
}

impl Default for DocumentTemplate {
    fn default() -> Self {
        Self {
            preamble: default_preamble(),
            font_size: default_font_size(),
        }
    }
}

impl DocumentTemplate {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Strips `\[ ... \]` or `$$ ... $$` delimiters, returning the display body.
fn display_body(formula: &str) -> Option<&str> {
    [("\\[", "\\]"), ("$$", "$$")]
        .iter()
        .find_map(|&(open, close)| {
            formula
                .strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
        })
}

impl Templater for DocumentTemplate {
    fn run(&self, formula: &str) -> Result<CompiledSource, TemplateError> {
        let formula = formula.trim();
        if formula.is_empty() {
            return Err(TemplateError::EmptyFormula);
        }

        let (body, has_baseline) = match display_body(formula) {
            Some(inner) if !inner.trim().is_empty() => {
                (format!("\\[\n{}\n\\]", inner.trim()), false)
            }
            Some(_) => return Err(TemplateError::EmptyFormula),
            None => (format!("${formula}$"), true),
        };

        let text = format!(
            "{}\n\\begin{{document}}\n{}\n{}\n\\end{{document}}\n",
            self.preamble, self.font_size, body
        );

        Ok(CompiledSource { text, has_baseline })
    }
}
