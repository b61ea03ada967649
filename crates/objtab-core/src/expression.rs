//! Tokenizer for expression attributes.
//!
//! An expression such as `k_cat * Species.glc[c] / (Km + glc[c])` is a flat
//! token stream. References name instances of the attribute's context models,
//! either qualified (`Species.glc[c]`) or bare (`glc[c]`, resolved by looking
//! the id up in every context model). Every token keeps its exact source text
//! and the whitespace in front of it, so edited token strings can be stitched
//! back together without disturbing the author's layout.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ExpressionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A reference to an instance of `model`. `qualified` is true for the
    /// `Model.id` form.
    Reference { model: String, qualified: bool },
    Number,
    Function,
    Operator,
    OpenParen,
    CloseParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub leading_ws: String,
}

/// The models an expression may reference, and optionally the ids that exist
/// for each of them.
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    models: Vec<String>,
    ids_by_model: BTreeMap<String, BTreeSet<String>>,
}

impl ExpressionContext {
    pub fn new(models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ids_by_model: BTreeMap::new(),
        }
    }

    /// Register the known ids of one model. Qualified references to a model
    /// without registered ids are accepted unchecked.
    pub fn with_ids(
        mut self,
        model: &str,
        ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.ids_by_model
            .entry(model.to_string())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExpression {
    text: String,
    tokens: Vec<Token>,
    trailing_ws: String,
}

const OPERATORS: &[&str] = &[
    "**", "<=", ">=", "==", "!=", "+", "-", "*", "/", "^", "<", ">", "%",
];
const WORD_OPERATORS: &[&str] = &["and", "or", "not"];

fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_id_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Length in bytes of an identifier at the start of `s`, including an optional
/// bracketed suffix such as `[c]`.
fn scan_id(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if is_id_start(c) => {}
        _ => return 0,
    }
    let mut end = s.len();
    for (i, c) in chars {
        if !is_id_continue(c) {
            end = i;
            break;
        }
    }
    if s[end..].starts_with('[') {
        if let Some(close) = s[end..].find(']') {
            let inner = &s[end + 1..end + close];
            if !inner.is_empty() && inner.chars().all(is_id_continue) {
                end += close + 1;
            }
        }
    }
    end
}

fn scan_number(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i > 0 && i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let digits_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start {
            i = j;
        }
    }
    i
}

impl ParsedExpression {
    /// Tokenize `text` against `context`. All problems are collected.
    pub fn tokenize(text: &str, context: &ExpressionContext) -> Result<Self, ExpressionError> {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut depth: i64 = 0;
        let mut rest = text;
        let mut leading_ws = String::new();

        loop {
            let trimmed = rest.trim_start();
            leading_ws.push_str(&rest[..rest.len() - trimmed.len()]);
            rest = trimmed;
            let Some(c) = rest.chars().next() else {
                break;
            };

            let (kind, len) = if c.is_ascii_digit()
                || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit()))
            {
                (TokenKind::Number, scan_number(rest))
            } else if is_id_start(c) {
                let head = scan_id(rest);
                let word = &rest[..head];
                let after = &rest[head..];
                if after.starts_with('.') && scan_id(&after[1..]) > 0 {
                    let len = head + 1 + scan_id(&after[1..]);
                    let id = &rest[head + 1..len];
                    if !context.has_model(word) {
                        errors.push(format!(
                            "'{}' refers to '{word}', which is not one of the expression's models ({})",
                            &rest[..len],
                            context.models.join(", ")
                        ));
                    } else if let Some(ids) = context.ids_by_model.get(word) {
                        if !ids.contains(id) {
                            errors.push(format!("{word} '{id}' does not exist"));
                        }
                    }
                    (
                        TokenKind::Reference {
                            model: word.to_string(),
                            qualified: true,
                        },
                        len,
                    )
                } else if WORD_OPERATORS.contains(&word) {
                    (TokenKind::Operator, head)
                } else if after.trim_start().starts_with('(') {
                    (TokenKind::Function, head)
                } else {
                    let owners: Vec<&String> = context
                        .models
                        .iter()
                        .filter(|m| {
                            context
                                .ids_by_model
                                .get(*m)
                                .is_some_and(|ids| ids.contains(word))
                        })
                        .collect();
                    match owners.as_slice() {
                        [model] => (
                            TokenKind::Reference {
                                model: (*model).clone(),
                                qualified: false,
                            },
                            head,
                        ),
                        [] => {
                            errors.push(format!(
                                "'{word}' is not an id of any of the expression's models ({})",
                                context.models.join(", ")
                            ));
                            (
                                TokenKind::Reference {
                                    model: String::new(),
                                    qualified: false,
                                },
                                head,
                            )
                        }
                        many => {
                            let names: Vec<&str> = many.iter().map(|m| m.as_str()).collect();
                            errors.push(format!(
                                "'{word}' is ambiguous; it is an id of {}",
                                names.join(" and ")
                            ));
                            (
                                TokenKind::Reference {
                                    model: String::new(),
                                    qualified: false,
                                },
                                head,
                            )
                        }
                    }
                }
            } else if c == '(' {
                depth += 1;
                (TokenKind::OpenParen, 1)
            } else if c == ')' {
                depth -= 1;
                if depth < 0 {
                    errors.push("unbalanced ')'".to_string());
                    depth = 0;
                }
                (TokenKind::CloseParen, 1)
            } else if c == ',' {
                (TokenKind::Comma, 1)
            } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                (TokenKind::Operator, op.len())
            } else {
                errors.push(format!("unexpected character '{c}'"));
                rest = &rest[c.len_utf8()..];
                continue;
            };

            tokens.push(Token {
                kind,
                text: rest[..len].to_string(),
                leading_ws: std::mem::take(&mut leading_ws),
            });
            rest = &rest[len..];
        }

        if depth > 0 {
            errors.push(format!("{depth} unclosed '('"));
        }

        if !errors.is_empty() {
            return Err(ExpressionError::Invalid {
                expression: text.to_string(),
                errors,
            });
        }

        Ok(Self {
            text: text.to_string(),
            tokens,
            trailing_ws: leading_ws,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn token_strings(&self) -> Vec<String> {
        self.tokens.iter().map(|t| t.text.clone()).collect()
    }

    /// Models referenced by at least one token.
    pub fn referenced_models(&self) -> BTreeSet<&str> {
        self.tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Reference { model, .. } => Some(model.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Rebuild text from token strings, restoring the original whitespace
    /// between tokens.
    pub fn reconstruct(&self, token_strings: &[String]) -> Result<String, ExpressionError> {
        if token_strings.len() != self.tokens.len() {
            return Err(ExpressionError::TokenCount {
                expected: self.tokens.len(),
                got: token_strings.len(),
            });
        }
        let mut out = String::with_capacity(self.text.len());
        for (token, text) in self.tokens.iter().zip(token_strings) {
            out.push_str(&token.leading_ws);
            out.push_str(text);
        }
        out.push_str(&self.trailing_ws);
        Ok(out)
    }
}
