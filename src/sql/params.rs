//! Rewrite of generic `?` placeholders into a driver's native parameter syntax.

/// Native parameter style of a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    /// `?` (no rewrite).
    Question,
    /// `$1`, `$2`, ... (PostgreSQL).
    Numbered,
    /// `%s` (MySQL-style drivers).
    Format,
}

/// Replace each `?` outside single-quoted literals with the native placeholder.
pub fn translate(sql: &str, style: Placeholder) -> String {
    if style == Placeholder::Question {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_literal = false;
    let mut n = 0u32;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                n += 1;
                match style {
                    Placeholder::Numbered => {
                        out.push('$');
                        out.push_str(&n.to_string());
                    }
                    Placeholder::Format => out.push_str("%s"),
                    Placeholder::Question => out.push('?'),
                }
            }
            _ => out.push(c),
        }
    }
    out
}
