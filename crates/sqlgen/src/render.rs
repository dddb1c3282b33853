use uuid::Uuid;

/// Placeholder dialect of a rendered statement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dialect {
    /// Numbered `$1` placeholders (row store).
    Pg,
    /// Positional `?` placeholders (columnar tier).
    Duck,
}

/// A bound statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Uuid(Uuid),
}

impl SqlValue {
    /// The argument in its canonical text form, for dialects and logs that
    /// carry values as strings.
    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Text(v) => v.clone(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Uuid(v) => v.hyphenated().to_string(),
        }
    }
}

/// A SQL fragment with its bound arguments, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

/// Validate a bare SQL identifier. Identifiers reach the renderer only
/// from schema metadata and configuration, never from user input, so a
/// violation is a programming error.
pub fn ident(name: &str) -> &str {
    assert!(
        !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_'),
        "invalid SQL identifier {name:?}",
    );
    name
}

/// Quote a cold-tier logical column. Attribute names may be dotted, so
/// they render as quoted identifiers under a wider character check.
pub fn quote_attr(name: &str) -> String {
    assert!(
        !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.'),
        "invalid logical column {name:?}",
    );
    format!("\"{name}\"")
}

/// Incremental statement builder pairing SQL text with its argument list.
/// `param` appends an argument and returns the dialect's placeholder.
pub struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    args: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            args: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Append literal SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a validated bare identifier.
    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(ident(name));
        self
    }

    /// Bind an argument, appending its placeholder.
    pub fn param(&mut self, value: SqlValue) -> &mut Self {
        self.args.push(value);
        match self.dialect {
            Dialect::Pg => {
                self.sql.push('$');
                self.sql.push_str(&self.args.len().to_string());
            }
            Dialect::Duck => self.sql.push('?'),
        }
        self
    }

    pub fn finish(self) -> Fragment {
        Fragment {
            sql: self.sql,
            args: self.args,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_placeholder_numbering() {
        let mut b = SqlBuilder::new(Dialect::Pg);
        b.push("a = ");
        b.param(SqlValue::I64(1));
        b.push(" AND b = ");
        b.param(SqlValue::Text("x".to_string()));
        let fragment = b.finish();
        assert_eq!(fragment.sql, "a = $1 AND b = $2");
        assert_eq!(
            fragment.args,
            vec![SqlValue::I64(1), SqlValue::Text("x".to_string())]
        );

        let mut b = SqlBuilder::new(Dialect::Duck);
        b.push("a = ");
        b.param(SqlValue::I64(1));
        b.push(" AND b = ");
        b.param(SqlValue::F64(2.5));
        assert_eq!(b.finish().sql, "a = ? AND b = ?");
    }

    #[test]
    fn test_ident_accepts_metadata_names() {
        assert_eq!(ident("entity_main"), "entity_main");
        assert_eq!(ident("text_01"), "text_01");
        assert_eq!(quote_attr("jobs.title"), "\"jobs.title\"");
    }

    #[test]
    #[should_panic(expected = "invalid SQL identifier")]
    fn test_ident_panics_on_injection() {
        ident("x; DROP TABLE y");
    }

    #[test]
    #[should_panic(expected = "invalid logical column")]
    fn test_quote_attr_panics_on_quotes() {
        quote_attr("a\"b");
    }
}
