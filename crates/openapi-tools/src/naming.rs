//! Deterministic tool naming.
//!
//! Every generated name matches `^[a-z][a-zA-Z0-9]*$`.

use crate::tool::HttpMethod;
use std::collections::HashSet;

/// Name for an operation: its `operationId` in camelCase, or a name derived from method and path.
#[must_use]
pub fn tool_name(operation_id: Option<&str>, method: HttpMethod, path: &str) -> String {
    if let Some(op_id) = operation_id {
        let name = camel_case_operation_id(op_id);
        if !name.is_empty() {
            return ensure_leading_letter(name, method);
        }
    }
    path_based_name(method, path)
}

/// camelCase an `operationId`.
///
/// Any non-alphanumeric character separates tokens. The first token is lowercased entirely when
/// it is an all-caps word (`LIST_ITEMS` -> `listItems`), otherwise only its first letter
/// (`GetUser` -> `getUser`). Later tokens get an uppercase first letter.
#[must_use]
pub fn camel_case_operation_id(operation_id: &str) -> String {
    let tokens = tokenize(operation_id);
    let mut out = String::with_capacity(operation_id.len());
    for (i, token) in tokens.iter().enumerate() {
        if i == 0 {
            if is_all_caps(token) {
                out.push_str(&token.to_ascii_lowercase());
            } else {
                push_with_first(&mut out, token, false);
            }
        } else {
            push_with_first(&mut out, token, true);
        }
    }
    out
}

/// `GET /repos/{owner}/{repo}/issues` -> `getReposOwnerRepoIssues`.
#[must_use]
pub fn path_based_name(method: HttpMethod, path: &str) -> String {
    let mut out = method.as_lower().to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let segment = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(param) => param.to_string(),
            None => segment.to_ascii_lowercase(),
        };
        for token in tokenize(&segment) {
            push_with_first(&mut out, token, true);
        }
    }
    out
}

/// Reserve a unique name: the base name if free, else the capitalized method suffix
/// (`listItemsPost`), else that plus an ordinal (`listItemsPost2`, `listItemsPost3`, ...).
pub fn reserve_unique_tool_name(
    tool_names: &mut HashSet<String>,
    base: &str,
    method: HttpMethod,
) -> String {
    if tool_names.insert(base.to_string()) {
        return base.to_string();
    }

    let with_method = format!("{base}{}", method.as_pascal());
    if tool_names.insert(with_method.clone()) {
        return with_method;
    }

    let mut counter = 2;
    loop {
        let candidate = format!("{with_method}{counter}");
        if tool_names.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn tokenize(s: &str) -> Vec<&str> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

fn is_all_caps(token: &str) -> bool {
    token.bytes().any(|b| b.is_ascii_uppercase()) && !token.bytes().any(|b| b.is_ascii_lowercase())
}

fn push_with_first(out: &mut String, token: &str, upper: bool) {
    let mut chars = token.chars();
    if let Some(first) = chars.next() {
        if upper {
            out.push(first.to_ascii_uppercase());
        } else {
            out.push(first.to_ascii_lowercase());
        }
        out.push_str(chars.as_str());
    }
}

fn ensure_leading_letter(name: String, method: HttpMethod) -> String {
    if name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return name;
    }
    let mut out = method.as_lower().to_string();
    push_with_first(&mut out, &name, true);
    out
}
