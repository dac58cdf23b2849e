//! SQL text generation for set-based statements. Identifiers are always
//! quoted; values never appear in the text, only `$n` placeholders.

use crate::bulk::request::Filter;

use super::marshal::ColumnSpec;

const RESERVED_KEYWORDS: &[&str] =
    &["group", "user", "order", "table", "index", "primary", "key"];

/// Quotes an identifier when it needs quoting: reserved words, uppercase
/// characters, or anything that is not a plain identifier character.
pub fn quote_identifier(identifier: &str) -> String {
    let needs_quoting = RESERVED_KEYWORDS.contains(&identifier.to_lowercase().as_str())
        || identifier.chars().any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '_');

    if needs_quoting {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    } else {
        identifier.to_string()
    }
}

/// Quotes a possibly schema-qualified table name part by part.
pub fn format_table_name(table: &str) -> String {
    table.split('.').map(quote_identifier).collect::<Vec<_>>().join(".")
}

/// One set-based INSERT over parallel column arrays:
/// `INSERT INTO t (a, b) SELECT * FROM UNNEST($1::int8[], $2::text[])`.
pub fn build_unnest_insert(table: &str, specs: &[ColumnSpec]) -> String {
    let columns =
        specs.iter().map(|s| quote_identifier(&s.name)).collect::<Vec<_>>().join(", ");
    let arrays = specs
        .iter()
        .enumerate()
        .map(|(i, s)| format!("${}::{}[]", i + 1, s.element_type.name()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) SELECT * FROM UNNEST({})",
        format_table_name(table),
        columns,
        arrays
    )
}

/// Single-row INSERT with positional placeholders.
pub fn build_insert(table: &str, columns: &[&str]) -> String {
    let column_list =
        columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ");
    let placeholders =
        (1..=columns.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");

    format!("INSERT INTO {} ({}) VALUES ({})", format_table_name(table), column_list, placeholders)
}

/// Single-row UPDATE: SET placeholders first, then filter placeholders.
pub fn build_update(table: &str, set_columns: &[&str], filters: &[Filter]) -> String {
    let mut placeholder = 0usize;
    let assignments = set_columns
        .iter()
        .map(|c| {
            placeholder += 1;
            format!("{} = ${}", quote_identifier(c), placeholder)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {} SET {}{}",
        format_table_name(table),
        assignments,
        where_clause(filters, placeholder)
    )
}

/// Single-row DELETE constrained by filters.
pub fn build_delete(table: &str, filters: &[Filter]) -> String {
    format!("DELETE FROM {}{}", format_table_name(table), where_clause(filters, 0))
}

fn where_clause(filters: &[Filter], placeholder_offset: usize) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let predicates = filters
        .iter()
        .enumerate()
        .map(|(i, filter)| {
            format!(
                "{} {} ${}",
                quote_identifier(&filter.column),
                filter.operator.symbol(),
                placeholder_offset + i + 1
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(" WHERE {predicates}")
}
