//! Identifier and literal quoting for dynamically assembled statements.
//!
//! Catalog DDL cannot take bind parameters for names, so every role, schema
//! or extension name interpolated into SQL goes through [`quote_ident`], and
//! every string value through [`quote_literal`].

/// Quotes an identifier the way `quote_ident()` does server-side, except that
/// it always quotes: `my "role"` becomes `"my ""role"""`.
pub fn quote_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quotes a string literal. Backslashes switch the literal to the `E''`
/// escape form so the result is correct regardless of
/// `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if has_backslash {
        out.push('E');
    }
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Role name as it appears in GRANT/REVOKE targets: the PUBLIC pseudo-role
/// stays a keyword, everything else is quoted.
pub fn quote_grantee(role: &str) -> String {
    if is_public(role) {
        "PUBLIC".to_string()
    } else {
        quote_ident(role)
    }
}

pub fn is_public(role: &str) -> bool {
    role.eq_ignore_ascii_case("public")
}
