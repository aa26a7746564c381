//! Validation of policy expressions.

use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

/// Checks that a policy expression is a single, self-contained SQL boolean
/// expression before it is spliced into generated statements.
pub struct ExpressionValidator {
    dialect: SQLiteDialect,
}

impl Clone for ExpressionValidator {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for ExpressionValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionValidator").finish()
    }
}

impl ExpressionValidator {
    /// Create a new validator for the SQLite dialect.
    pub fn new() -> Self {
        Self {
            dialect: SQLiteDialect {},
        }
    }

    /// Validate an expression. Returns a human-readable reason on failure.
    pub fn validate(&self, expr: &str) -> Result<(), String> {
        check_balanced(expr)?;

        let probe = format!("SELECT 1 WHERE ({})", expr);
        let statements =
            Parser::parse_sql(&self.dialect, &probe).map_err(|e| e.to_string())?;

        match statements.as_slice() {
            [Statement::Query(query)] => match query.body.as_ref() {
                SetExpr::Select(select) if select.selection.is_some() => Ok(()),
                _ => Err("expression is not a WHERE predicate".to_string()),
            },
            _ => Err("expression must not contain multiple statements".to_string()),
        }
    }
}

/// Parentheses must balance outside literals and no statement separator may
/// appear, so the expression cannot escape its wrapping parentheses.
fn check_balanced(expr: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == c {
                        if chars.peek() == Some(&c) {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated quoted text".to_string());
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                return Err("comments are not allowed in policy expressions".to_string());
            }
            '/' if chars.peek() == Some(&'*') => {
                return Err("comments are not allowed in policy expressions".to_string());
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced parentheses".to_string());
                }
            }
            ';' => return Err("statement separators are not allowed".to_string()),
            '\0' => return Err("NUL characters are not allowed".to_string()),
            _ => {}
        }
    }

    if depth != 0 {
        return Err("unbalanced parentheses".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_simple_predicates() {
        let validator = ExpressionValidator::new();
        assert!(validator.validate("user_id = 'a1'").is_ok());
        assert!(validator.validate("is_public = 1 OR owner = 'x'").is_ok());
        assert!(validator
            .validate("team_id IN (SELECT team_id FROM members WHERE user_id = 'u')")
            .is_ok());
    }

    #[test]
    fn test_rejects_escaping_parentheses() {
        let validator = ExpressionValidator::new();
        assert!(validator.validate("1 = 1) OR (1 = 1").is_err());
        assert!(validator.validate("(a = 1").is_err());
    }

    #[test]
    fn test_rejects_statement_separator() {
        let validator = ExpressionValidator::new();
        let err = validator.validate("1 = 1; DROP TABLE todos").unwrap_err();
        assert!(err.contains("separator"));
    }

    #[test]
    fn test_parentheses_inside_literals_are_ignored() {
        let validator = ExpressionValidator::new();
        assert!(validator.validate("title = ')' AND note = '(('").is_ok());
        assert!(validator.validate("title = 'it''s ;'").is_ok());
    }

    #[test]
    fn test_rejects_comments() {
        let validator = ExpressionValidator::new();
        assert!(validator.validate("owner = 'a' -- trailing").is_err());
        assert!(validator.validate("owner = 'a' /* x */").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        let validator = ExpressionValidator::new();
        assert!(validator.validate("owner = = 'a'").is_err());
    }
}
