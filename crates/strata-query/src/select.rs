//! The `select=` grammar.
//!
//! ```text
//! list     := item ("," item)*
//! item     := "*" | [alias ":"] name ("!" token)* ["(" [list] ")"]
//! ```
//!
//! An item with parentheses is an embedded relation; `!inner` makes it an
//! inner join, `!left` resets that, any other token is a foreign-key hint.
//! A relation with an empty child list is only used for filtering and is
//! not emitted in the response.

use crate::error::QueryError;

/// Prefix reserved for columns the engine adds to generated statements.
pub const RESERVED_PREFIX: &str = "__strata";

/// One entry of a selection list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Star,
    /// `column` or `alias:column`
    Column(ColumnSelect),
    /// `alias:relation!hint(children)`
    Relation(RelationSelect),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSelect {
    pub name: String,
    pub alias: Option<String>,
}

impl ColumnSelect {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    /// Key of this column in the response object.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationSelect {
    pub name: String,
    pub alias: Option<String>,
    pub hint: Option<String>,
    pub inner: bool,
    pub children: Vec<SelectItem>,
}

impl RelationSelect {
    /// Key of the embedded value in the response object.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// `rel()` embeds nothing and only takes part in filtering.
    pub fn is_filter_only(&self) -> bool {
        self.children.is_empty()
    }
}

/// The relation entries of a selection list.
pub fn relations(items: &[SelectItem]) -> impl Iterator<Item = &RelationSelect> {
    items.iter().filter_map(|item| match item {
        SelectItem::Relation(rel) => Some(rel),
        _ => None,
    })
}

/// Parse a `select=` value. An empty value selects `*`.
pub fn parse_select(input: &str, max_depth: usize) -> Result<Vec<SelectItem>, QueryError> {
    if input.trim().is_empty() {
        return Ok(vec![SelectItem::Star]);
    }

    let mut parser = SelectParser {
        chars: input.chars().collect(),
        pos: 0,
        max_depth,
    };
    let items = parser.parse_list(0)?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected character"));
    }
    if items.is_empty() {
        return Err(parser.error("empty selection"));
    }
    Ok(items)
}

struct SelectParser {
    chars: Vec<char>,
    pos: usize,
    max_depth: usize,
}

impl SelectParser {
    fn parse_list(&mut self, depth: usize) -> Result<Vec<SelectItem>, QueryError> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek().is_none_or(|c| c == ')') {
            return Ok(items);
        }

        loop {
            items.push(self.parse_item(depth)?);
            self.skip_ws();
            if self.peek() == Some(',') {
                self.pos += 1;
                continue;
            }
            return Ok(items);
        }
    }

    fn parse_item(&mut self, depth: usize) -> Result<SelectItem, QueryError> {
        self.skip_ws();
        if self.peek() == Some('*') {
            self.pos += 1;
            return Ok(SelectItem::Star);
        }

        let first = self.parse_name()?;
        self.skip_ws();

        let (alias, name) = if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
            self.pos += 1;
            self.skip_ws();
            (Some(first), self.parse_name()?)
        } else {
            (None, first)
        };

        let mut hint = None;
        let mut inner = false;
        let mut modified = false;
        while self.peek() == Some('!') {
            self.pos += 1;
            let token = self.parse_name()?;
            modified = true;
            match token.as_str() {
                "inner" => inner = true,
                "left" => inner = false,
                _ if hint.is_some() => {
                    return Err(self.error("only one foreign-key hint is allowed"));
                }
                _ => hint = Some(token),
            }
            self.skip_ws();
        }

        for label in alias.iter().chain(std::iter::once(&name)) {
            if label.starts_with(RESERVED_PREFIX) {
                return Err(QueryError::parse(
                    "select",
                    label.clone(),
                    "names starting with __strata are reserved",
                ));
            }
        }

        if self.peek() != Some('(') {
            if modified {
                return Err(self.error("hints and !inner require an embedded resource"));
            }
            return Ok(SelectItem::Column(ColumnSelect { name, alias }));
        }

        if depth + 1 > self.max_depth {
            return Err(QueryError::DepthExceeded {
                context: "select",
                max: self.max_depth,
            });
        }

        self.pos += 1;
        let children = self.parse_list(depth + 1)?;
        self.skip_ws();
        if self.peek() != Some(')') {
            return Err(self.error("expected ')'"));
        }
        self.pos += 1;

        Ok(SelectItem::Relation(RelationSelect {
            name,
            alias,
            hint,
            inner,
            children,
        }))
    }

    fn parse_name(&mut self) -> Result<String, QueryError> {
        self.skip_ws();
        if self.peek() == Some('"') {
            self.pos += 1;
            let mut name = String::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated quoted name")),
                    Some('"') if self.peek_at(1) == Some('"') => {
                        name.push('"');
                        self.pos += 2;
                    }
                    Some('"') => {
                        self.pos += 1;
                        break;
                    }
                    Some(c) => {
                        name.push(c);
                        self.pos += 1;
                    }
                }
            }
            if name.is_empty() {
                return Err(self.error("empty name"));
            }
            return Ok(name);
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '-')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, reason: &str) -> QueryError {
        let fragment: String = self.chars[self.pos.min(self.chars.len())..]
            .iter()
            .take(40)
            .collect();
        let fragment = if fragment.is_empty() {
            "<end of input>".to_string()
        } else {
            fragment
        };
        QueryError::parse("select", fragment, reason)
    }
}
