// Token substitution.
//
// Resolves `#name#`, `#func:arg#` and `#expr(...)expr#` tokens recursively,
// memoizing every resolved parameter in the store's cache and tracking the
// tokens being resolved to detect loops.

use std::collections::BTreeMap;

use super::{ParamStore, ParamValue};
use crate::error::ParamError;
use crate::expressions::{self, Fragment};

type Result<T> = std::result::Result<T, ParamError>;

const EXPR_OPEN: &str = "#expr(";
const EXPR_CLOSE: &str = ")expr#";
/// Longest chain of tokens resolved through one another.
const MAX_TOKEN_DEPTH: usize = 256;

/// One top-level resolution. The in-progress stack lives as long as it does.
pub(super) struct Resolver<'a> {
    store: &'a mut ParamStore,
    in_progress: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub(super) fn new(store: &'a mut ParamStore) -> Self {
        Self {
            store,
            in_progress: Vec::new(),
        }
    }

    /// Cached value of `name`, computing and caching it on first use.
    pub(super) fn get(&mut self, name: &str) -> Result<ParamValue> {
        if let Some(value) = self.store.substituted.get(name) {
            return Ok(value.clone());
        }
        let raw = self
            .store
            .unsubstituted
            .get(name)
            .cloned()
            .ok_or_else(|| ParamError::NotFound(name.to_string()))?;
        let value = self.substitute(&raw)?;
        self.store.substituted.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Substitute every token in a structure. Containers are rebuilt.
    pub(super) fn substitute(&mut self, structure: &ParamValue) -> Result<ParamValue> {
        match structure {
            ParamValue::String(s) => self.substitute_string(s),
            ParamValue::List(list) => {
                let items = list.read().clone();
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(self.substitute(item)?);
                }
                Ok(ParamValue::list(out))
            }
            ParamValue::Map(map) => {
                let entries = map.read().clone();
                let mut out = BTreeMap::new();
                for (key, value) in &entries {
                    let key = match self.substitute_string(key)? {
                        ParamValue::String(s) => s,
                        container @ (ParamValue::List(_) | ParamValue::Map(_)) => {
                            return Err(ParamError::SubstitutionType(format!(
                                "map key {key:?} resolved to a {}",
                                container.kind_name()
                            )))
                        }
                        scalar => scalar.stringify(),
                    };
                    out.insert(key, self.substitute(value)?);
                }
                Ok(ParamValue::map(out))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    fn substitute_string(&mut self, s: &str) -> Result<ParamValue> {
        tracing::trace!(structure = s, "substituting");

        // The whole string is one expression.
        if s.len() >= EXPR_OPEN.len() + EXPR_CLOSE.len()
            && s.starts_with(EXPR_OPEN)
            && s.ends_with(EXPR_CLOSE)
        {
            let body = &s[EXPR_OPEN.len()..s.len() - EXPR_CLOSE.len()];
            if !body.contains(EXPR_OPEN) && !body.contains(EXPR_CLOSE) {
                return self.resolve_token(&s[1..s.len() - 1], true);
            }
        }

        // The whole string is one `#...#` token.
        if s.len() >= 2 && s.starts_with('#') && s.ends_with('#') && !s[1..s.len() - 1].contains('#')
        {
            if s.len() == 2 {
                return Ok(ParamValue::String(s.to_string()));
            }
            return self.resolve_token(&s[1..s.len() - 1], false);
        }

        // A lone `#` is literal text.
        if s.matches('#').count() == 1 {
            return Ok(ParamValue::String(s.to_string()));
        }

        let fragments = self.split_tokens(s, false)?;
        let text: String = fragments
            .iter()
            .map(|fragment| match fragment {
                Fragment::Source(text) => text.clone(),
                Fragment::Value(value) => value.stringify(),
            })
            .collect();
        Ok(ParamValue::String(text))
    }

    /// Split `text` into literal text and resolved tokens.
    ///
    /// Inside an expression body, `#name#` reads the parameter directly and
    /// the resolved values stay live; outside, every token goes through
    /// `resolve_token` and is later spliced as text.
    fn split_tokens(&mut self, text: &str, in_expression: bool) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find('#') {
            if start > 0 {
                fragments.push(Fragment::Source(rest[..start].to_string()));
            }
            let after = &rest[start + 1..];
            if after.starts_with("expr(") {
                let end = after
                    .find(EXPR_CLOSE)
                    .ok_or_else(|| ParamError::syntax("Unmatched '#expr(' token"))?;
                // "expr(...)expr" without the trailing '#'
                let token = &after[..end + EXPR_CLOSE.len() - 1];
                fragments.push(Fragment::Value(self.resolve_token(token, true)?));
                rest = &after[end + EXPR_CLOSE.len()..];
            } else {
                let end = after
                    .find('#')
                    .ok_or_else(|| ParamError::syntax("Unmatched '#' token"))?;
                let token = &after[..end];
                if token.is_empty() {
                    fragments.push(Fragment::Source("##".to_string()));
                } else if in_expression && !token.contains(':') {
                    fragments.push(Fragment::Value(self.get(token)?));
                } else {
                    fragments.push(Fragment::Value(self.resolve_token(token, false)?));
                }
                rest = &after[end + 1..];
            }
        }
        if !rest.is_empty() {
            fragments.push(Fragment::Source(rest.to_string()));
        }
        Ok(fragments)
    }

    /// Resolve the inside of one `#...#` pair.
    fn resolve_token(&mut self, token: &str, is_expression: bool) -> Result<ParamValue> {
        if self.in_progress.iter().any(|t| t == token) {
            return Err(ParamError::Cycle {
                token: token.to_string(),
                stack: self.in_progress.clone(),
            });
        }
        if self.in_progress.len() >= MAX_TOKEN_DEPTH {
            return Err(ParamError::SubstitutionType(format!(
                "'{token}' is nested more than {MAX_TOKEN_DEPTH} substitutions deep"
            )));
        }
        self.in_progress.push(token.to_string());

        let value = if is_expression {
            // "expr(" ... ")expr"
            let body = token[5..token.len() - 5].trim();
            let fragments = self.split_tokens(body, true)?;
            let functions = self.store.functions.clone();
            expressions::evaluate(&fragments, &functions)?
        } else if let Some((function, arg)) = token.split_once(':') {
            let callable = self
                .store
                .functions
                .get(function)
                .ok_or_else(|| ParamError::syntax(format!("Unknown method: {function}")))?;
            if arg.is_empty() {
                callable(&[])?
            } else {
                let arg = self.get(arg)?;
                callable(&[arg])?
            }
        } else {
            self.get(token)?
        };

        self.in_progress.pop();
        tracing::trace!(token, value = %value, "resolved");
        Ok(value)
    }
}
