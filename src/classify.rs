use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::BTreeSet;

/// Statement kinds that mutate state.
pub const WRITE_OPERATIONS: &[&str] = &[
    "ADD", "ALTER", "ANALYZE", "COMMIT", "COPY", "CREATE", "DELETE", "DROP", "EXPORT", "GRANT",
    "IMPORT", "INSERT", "LOAD", "LOCK", "MERGE", "MSCK", "REDUCE", "REFRESH", "REPLACE", "RESET",
    "REVOKE", "ROLLBACK", "SET", "START", "TRUNCATE", "UNCACHE", "UNLOCK", "UPDATE", "UPSERT",
    "VACUUM", "VALUES", "WRITE",
];

/// Statement kinds that only read.
pub const READ_OPERATIONS: &[&str] = &[
    "DESC", "DESCRIBE", "EXPLAIN", "LIST", "SELECT", "SHOW", "USE",
];

/// Irreversible or schema-altering writes. Always a subset of [`WRITE_OPERATIONS`].
pub const DESTRUCTIVE_OPERATIONS: &[&str] =
    &["DELETE", "DROP", "MERGE", "REPLACE", "TRUNCATE", "VACUUM"];

/// Uppercase operation keywords found at the top level of a SQL text.
pub type OperationSet = BTreeSet<String>;

/// Collect the operation keywords at the top level of every statement in `sql`.
///
/// Best effort: never fails. Tokens inside parentheses, string literals,
/// quoted identifiers and comments are ignored, and identifiers such as
/// `insertion_logs` are single tokens, so they never count as `INSERT`.
pub fn operations(sql: &str) -> OperationSet {
    top_level_words(sql)
        .into_iter()
        .filter(|w| is_operation_keyword(w))
        .collect()
}

/// Every unquoted, purely alphabetic word outside parentheses, uppercased.
pub fn top_level_words(sql: &str) -> BTreeSet<String> {
    let dialect = GenericDialect {};
    match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => words_from_tokens(&tokens),
        // Unterminated strings and the like: fall back to a coarse scan,
        // which can only over-report keywords.
        Err(_) => fallback_words(sql),
    }
}

/// The first unquoted keyword of `sql`, uppercased. Comments are skipped.
pub fn leading_word(sql: &str) -> Option<String> {
    let dialect = GenericDialect {};
    match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens.iter().find_map(|token| match token {
            Token::Word(word) if word.quote_style.is_none() => {
                Some(word.value.to_ascii_uppercase())
            }
            _ => None,
        }),
        Err(_) => sql
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find(|w| !w.is_empty())
            .map(|w| w.to_ascii_uppercase()),
    }
}

fn words_from_tokens(tokens: &[Token]) -> BTreeSet<String> {
    let mut depth: usize = 0;
    let mut words = BTreeSet::new();

    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            // A new statement always starts at the top level.
            Token::SemiColon => depth = 0,
            Token::Word(word) if depth == 0 && word.quote_style.is_none() => {
                if !word.value.is_empty() && word.value.chars().all(|c| c.is_ascii_alphabetic()) {
                    words.insert(word.value.to_ascii_uppercase());
                }
            }
            _ => {}
        }
    }

    words
}

fn fallback_words(sql: &str) -> BTreeSet<String> {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|w| w.to_ascii_uppercase())
        .collect()
}

pub fn is_operation_keyword(word: &str) -> bool {
    WRITE_OPERATIONS.contains(&word) || READ_OPERATIONS.contains(&word)
}

pub fn is_write(word: &str) -> bool {
    WRITE_OPERATIONS.contains(&word)
}

pub fn is_destructive(word: &str) -> bool {
    DESTRUCTIVE_OPERATIONS.contains(&word)
}
