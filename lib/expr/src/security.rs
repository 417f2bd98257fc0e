//! Static checks run before an expression is ever executed.
//!
//! The grammar has no statements, assignment, loops or ambient access, so the
//! sandbox reduces to: a lexical pass that rejects constructs from richer
//! languages and bounds size and nesting, and a tree pass that only lets
//! registered functions be called.

use crate::ast::Expr;
use crate::error::{Result, SecurityViolation};
use crate::functions::FunctionRegistry;

pub const MAX_LENGTH: usize = 4096;

/// Bracket nesting plus right-nested `?` and `^` chains
pub const MAX_NESTING: usize = 64;

/// Bound on the parsed tree; long operator chains fold into deep trees
pub const MAX_TREE_DEPTH: usize = 256;

/// Words reserved for code generation, I/O, process access and looping.
pub const RESERVED_WORDS: &[&str] = &[
    "eval",
    "exec",
    "system",
    "spawn",
    "import",
    "require",
    "include",
    "fetch",
    "socket",
    "process",
    "loop",
    "while",
    "for",
    "function",
    "lambda",
    "return",
    "constructor",
    "prototype",
    "__proto__",
    "__import__",
];

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Lexical pass over the raw source. Quoted text is skipped.
pub fn scan(source: &str) -> Result<()> {
    if source.len() > MAX_LENGTH {
        return Err(SecurityViolation::TooLong {
            len: source.len(),
            max: MAX_LENGTH,
        }
        .into());
    }

    if nesting(source) > MAX_NESTING {
        return Err(SecurityViolation::TooDeep { max: MAX_NESTING }.into());
    }

    let chars: Vec<char> = source.chars().collect();
    let mut quote: Option<char> = None;
    let mut word = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if is_ident_char(c) {
            word.push(c);
            i += 1;
            continue;
        }
        check_word(&word)?;
        word.clear();

        let next = chars.get(i + 1).copied();
        let prev = if i > 0 { chars.get(i - 1).copied() } else { None };
        match c {
            '"' | '\'' => quote = Some(c),
            ';' | '{' | '}' | '`' | '$' | '#' | '@' => {
                return Err(SecurityViolation::ForbiddenConstruct(c.to_string()).into())
            }
            '=' if next == Some('>') => {
                return Err(SecurityViolation::ForbiddenConstruct("=>".to_string()).into())
            }
            '=' => {
                let compound = matches!(prev, Some('!' | '<' | '>')) || next == Some('=');
                if !compound {
                    return Err(SecurityViolation::ForbiddenConstruct("=".to_string()).into());
                }
                if next == Some('=') {
                    // consume the pair so `===` is caught as a lone `=`
                    i += 2;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    check_word(&word)
}

/// Deepest nesting the parser will recurse through. Each bracket opens a
/// level; each `?` or `^` nests the rest of its level one deeper, until the
/// enclosing bracket closes. Quoted text is skipped.
pub fn nesting(source: &str) -> usize {
    // chain length per open bracket; the bottom entry is the top level
    let mut chains: Vec<usize> = vec![0];
    let mut chained = 0usize;
    let mut max = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in source.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => chains.push(0),
            ')' | ']' => {
                if chains.len() > 1 {
                    chained -= chains.pop().unwrap_or(0);
                }
            }
            '?' | '^' => {
                if let Some(top) = chains.last_mut() {
                    *top += 1;
                    chained += 1;
                }
            }
            _ => continue,
        }
        max = max.max(chains.len() - 1 + chained);
    }
    max
}

fn check_word(word: &str) -> Result<()> {
    if word.is_empty() || word.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(());
    }
    if RESERVED_WORDS.contains(&word) {
        return Err(SecurityViolation::ForbiddenIdentifier(word.to_string()).into());
    }
    Ok(())
}

/// Tree pass: bounded depth, and every call names a registered function
pub fn check_tree(expr: &Expr, functions: &FunctionRegistry) -> Result<()> {
    if expr.depth() > MAX_TREE_DEPTH {
        return Err(SecurityViolation::TooDeep {
            max: MAX_TREE_DEPTH,
        }
        .into());
    }
    for name in expr.functions() {
        if !functions.contains(&name) {
            return Err(SecurityViolation::UnknownFunction(name).into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExprError;

    fn violation(source: &str) -> SecurityViolation {
        match scan(source) {
            Err(ExprError::Security(v)) => v,
            other => panic!("expected a violation for {:?}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_allows_ordinary_formulas() {
        for source in [
            "a + b * 2",
            "rating >= 7 && status != 'done'",
            "x <= 1 || y == 2",
            "round(avg(rating), 2)",
            "note == \"a;b{c}\"",
            "opened ? 1 : 0",
        ] {
            assert!(scan(source).is_ok(), "{}", source);
        }
    }

    #[test]
    fn test_rejects_reserved_words() {
        assert_eq!(violation("eval('1')"), SecurityViolation::ForbiddenIdentifier("eval".into()));
        assert_eq!(violation("while(true)"), SecurityViolation::ForbiddenIdentifier("while".into()));
        assert_eq!(violation("x.constructor"), SecurityViolation::ForbiddenIdentifier("constructor".into()));
        // substrings of ordinary names are fine
        assert!(scan("evaluation + opened").is_ok());
    }

    #[test]
    fn test_rejects_statement_constructs() {
        assert_eq!(violation("a = 1"), SecurityViolation::ForbiddenConstruct("=".into()));
        assert_eq!(violation("a; b"), SecurityViolation::ForbiddenConstruct(";".into()));
        assert_eq!(violation("x => x"), SecurityViolation::ForbiddenConstruct("=>".into()));
        assert_eq!(violation("{ a }"), SecurityViolation::ForbiddenConstruct("{".into()));
        assert_eq!(violation("`a`"), SecurityViolation::ForbiddenConstruct("`".into()));
        assert_eq!(violation("a === b"), SecurityViolation::ForbiddenConstruct("=".into()));
    }

    #[test]
    fn test_limits() {
        let long = "1+".repeat(MAX_LENGTH) + "1";
        assert!(matches!(violation(&long), SecurityViolation::TooLong { .. }));

        let deep = "(".repeat(MAX_NESTING + 1) + "1" + &")".repeat(MAX_NESTING + 1);
        assert_eq!(violation(&deep), SecurityViolation::TooDeep { max: MAX_NESTING });

        let ok = "(".repeat(MAX_NESTING) + "1" + &")".repeat(MAX_NESTING);
        assert!(scan(&ok).is_ok());
    }

    #[test]
    fn test_sequential_conditionals_do_not_nest() {
        let flat: Vec<String> = (0..70).map(|i| format!("(x > {} ? 1 : 0)", i)).collect();
        let flat = flat.join(" + ");
        assert_eq!(nesting(&flat), 2);
        assert!(scan(&flat).is_ok());

        let chained: String = (0..=MAX_NESTING)
            .map(|i| format!("x == {} ? {} : ", i, i))
            .collect::<String>()
            + "0";
        assert_eq!(violation(&chained), SecurityViolation::TooDeep { max: MAX_NESTING });
    }

    #[test]
    fn test_power_chains_count_as_nesting() {
        assert_eq!(nesting("2 ^ 3 ^ 2"), 2);
        assert_eq!(nesting("(2 ^ 3) + (2 ^ 1)"), 2);
        assert_eq!(nesting("'^^^(' + x"), 0);

        let tower = format!("1{}", "^1".repeat(2000));
        assert_eq!(violation(&tower), SecurityViolation::TooDeep { max: MAX_NESTING });
    }
}
