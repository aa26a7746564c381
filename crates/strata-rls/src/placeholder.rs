//! Substitution of `auth.*` placeholders.
//!
//! Policy expressions reference the caller through four placeholders:
//!
//! | Placeholder | Replacement |
//! |-------------|-------------|
//! | `auth.uid()` | caller id, or `NULL` for anonymous callers |
//! | `auth.role()` | caller role |
//! | `auth.email()` | caller email, or `NULL` when unknown |
//! | `auth.jwt()->>'key'` | claim `key` as text, or `NULL` when absent |
//!
//! Every replacement is a quoted SQL literal. Placeholders are recognised
//! only in code: text inside string literals and quoted identifiers is
//! copied unchanged. Comments are dropped, so a trailing `--` comment cannot
//! swallow the parenthesis the expression is later wrapped in.

use strata_core::AuthContext;

use crate::error::RlsError;

/// Render `value` as a single-quoted SQL string literal.
///
/// Embedded single quotes are doubled, so the result always parses as one
/// literal whose value equals `value`.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Replace every `auth.*` placeholder in `expr` with the caller's value and
/// strip comments.
pub fn substitute(expr: &str, ctx: &AuthContext) -> Result<String, RlsError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = String::with_capacity(expr.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = skip_quoted(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| i + p + 1)
                    .unwrap_or(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map(|p| i + p)
                    .unwrap_or(chars.len());
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let mut end = chars.len();
                let mut j = i + 2;
                while j + 1 < chars.len() {
                    if chars[j] == '*' && chars[j + 1] == '/' {
                        end = j + 2;
                        break;
                    }
                    j += 1;
                }
                out.push(' ');
                i = end;
            }
            c if is_ident_start(c) => {
                let end = scan_word(&chars, i);
                let qualified = i > 0 && chars[i - 1] == '.';
                let word: String = chars[i..end].iter().collect();

                if !qualified && word.eq_ignore_ascii_case("auth") {
                    if let Some((placeholder, next)) = match_placeholder(&chars, end) {
                        out.push_str(&placeholder.render(ctx)?);
                        i = next;
                        continue;
                    }
                }
                out.push_str(&word);
                i = end;
            }
            c if c.is_ascii_digit() => {
                // Keep numeric literals such as `1e5` intact.
                let end = scan_word(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

#[derive(Debug, PartialEq)]
enum Placeholder {
    Uid,
    Role,
    Email,
    Jwt,
    Claim(String),
}

impl Placeholder {
    fn render(&self, ctx: &AuthContext) -> Result<String, RlsError> {
        let value = match self {
            Placeholder::Uid => non_empty(&ctx.user_id),
            Placeholder::Role => Some(ctx.role.clone()),
            Placeholder::Email => non_empty(&ctx.email),
            Placeholder::Jwt => Some(ctx.jwt_payload().to_string()),
            Placeholder::Claim(key) => ctx.claim_text(key),
        };

        match value {
            None => Ok("NULL".to_string()),
            Some(v) if v.contains('\0') => Err(RlsError::InvalidContextValue {
                placeholder: self.name(),
            }),
            Some(v) => Ok(quote_literal(&v)),
        }
    }

    fn name(&self) -> String {
        match self {
            Placeholder::Uid => "auth.uid()".to_string(),
            Placeholder::Role => "auth.role()".to_string(),
            Placeholder::Email => "auth.email()".to_string(),
            Placeholder::Jwt => "auth.jwt()".to_string(),
            Placeholder::Claim(key) => format!("auth.jwt()->>'{}'", key),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Try to match `.fn()` (and for `jwt`, an optional `->>'key'`) starting
/// right after the `auth` word. Returns the placeholder and the index of the
/// first character after it.
fn match_placeholder(chars: &[char], start: usize) -> Option<(Placeholder, usize)> {
    let mut i = skip_ws(chars, start);
    if chars.get(i) != Some(&'.') {
        return None;
    }
    i = skip_ws(chars, i + 1);
    if !chars.get(i).copied().is_some_and(is_ident_start) {
        return None;
    }
    let end = scan_word(chars, i);
    let name: String = chars[i..end].iter().collect::<String>().to_ascii_lowercase();

    i = skip_ws(chars, end);
    if chars.get(i) != Some(&'(') {
        return None;
    }
    i = skip_ws(chars, i + 1);
    if chars.get(i) != Some(&')') {
        return None;
    }
    let after_call = i + 1;

    match name.as_str() {
        "uid" => Some((Placeholder::Uid, after_call)),
        "role" => Some((Placeholder::Role, after_call)),
        "email" => Some((Placeholder::Email, after_call)),
        "jwt" => Some(match_claim(chars, after_call).unwrap_or((Placeholder::Jwt, after_call))),
        _ => None,
    }
}

/// `->>'key'` or `->'key'` after `auth.jwt()`.
fn match_claim(chars: &[char], start: usize) -> Option<(Placeholder, usize)> {
    let mut i = skip_ws(chars, start);
    if chars.get(i) != Some(&'-') || chars.get(i + 1) != Some(&'>') {
        return None;
    }
    i += 2;
    if chars.get(i) == Some(&'>') {
        i += 1;
    }
    i = skip_ws(chars, i);
    if chars.get(i) != Some(&'\'') {
        return None;
    }
    let end = skip_quoted(chars, i, '\'');
    if end < i + 2 || chars.get(end - 1) != Some(&'\'') {
        return None;
    }
    let key: String = chars[i + 1..end - 1].iter().collect::<String>().replace("''", "'");
    Some((Placeholder::Claim(key), end))
}

/// Index just past the quoted run opened at `start`. Doubled quotes are
/// escapes. An unterminated run extends to the end of input.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn skip_ws(chars: &[char], mut i: usize) -> usize {
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    i
}

fn scan_word(chars: &[char], mut i: usize) -> usize {
    while chars
        .get(i)
        .is_some_and(|&c| c.is_alphanumeric() || c == '_' || c == '$')
    {
        i += 1;
    }
    i
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}
