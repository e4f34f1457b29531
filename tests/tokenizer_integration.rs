//! Integration tests for splitting migration scripts into statements.

use pretty_assertions::assert_eq;
use schemaflow::sql::{Dialect, SqlError, SqlScript};

fn split(source: &str, dialect: &Dialect) -> Vec<(usize, String)> {
    SqlScript::parse(source, dialect, true)
        .expect("script parses")
        .statements()
        .iter()
        .map(|s| (s.line_number, s.sql.clone()))
        .collect()
}

/// Comments between statements are dropped and line numbers point at the
/// first line of each statement.
#[test]
fn test_comment_between_statements() {
    let statements = split("SELECT 1;\n-- comment\nSELECT 2;", &Dialect::generic());
    assert_eq!(
        statements,
        vec![(1, "SELECT 1".to_string()), (3, "SELECT 2".to_string())]
    );
}

/// One statement per delimiter outside comments and literals.
#[test]
fn test_statement_count_matches_delimiters() {
    let source = "\
INSERT INTO t VALUES ('a;b');
/* ; ; */ INSERT INTO t VALUES (1);
-- ;
UPDATE t SET v = 'x' -- trailing ;
  WHERE id = 1;
DELETE FROM t;";
    for dialect in [Dialect::generic(), Dialect::postgresql(), Dialect::mysql()] {
        assert_eq!(split(source, &dialect).len(), 4);
    }
}

/// Scripts of only comments and whitespace have no statements.
#[test]
fn test_comment_only_scripts() {
    let sources = ["", "\n\n", "-- one\n-- two\n", "/* block\n spanning */\n"];
    for source in sources {
        for dialect in [Dialect::postgresql(), Dialect::oracle(), Dialect::sqlserver()] {
            assert!(split(source, &dialect).is_empty(), "{source:?}");
        }
    }
}

/// Feeding a statement back with its delimiter yields the same statement.
#[test]
fn test_retokenize_single_statement() {
    let source = "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql;\nINSERT INTO t VALUES ('it''s');";
    let dialect = Dialect::postgresql();
    for (_, sql) in split(source, &dialect) {
        let again = split(&format!("{sql};"), &dialect);
        assert_eq!(again, vec![(1, sql)]);
    }
}

/// Each dialect splits its own procedural syntax.
#[test]
fn test_dialect_scripts() {
    let mysql = split(
        "DELIMITER $$\nCREATE PROCEDURE p()\nBEGIN\n  SELECT 1;\n  SELECT 2;\nEND $$\nDELIMITER ;\nCALL p();",
        &Dialect::mysql(),
    );
    assert_eq!(mysql.len(), 2);
    assert_eq!(mysql[1], (8, "CALL p()".to_string()));

    let sqlserver = split("SELECT 1\nGO\nSELECT 2\nGO\n", &Dialect::sqlserver());
    assert_eq!(sqlserver.len(), 2);

    let oracle = split(
        "BEGIN\n  NULL;\nEND;\n/\nSELECT 1 FROM dual;",
        &Dialect::oracle(),
    );
    assert_eq!(oracle.len(), 2);
    assert_eq!(oracle[1].0, 5);
}

/// Unterminated constructs are reported, never executed.
#[test]
fn test_unterminated_literal() {
    let err = SqlScript::parse("SELECT 'oops;\n", &Dialect::postgresql(), false).unwrap_err();
    assert!(matches!(err, SqlError::Unterminated { .. }));
}

/// Non-transactional statements mixed with transactional ones need `mixed`.
#[test]
fn test_mixed_transactionality() {
    let source = "CREATE TABLE t (id int);\nCREATE INDEX CONCURRENTLY i ON t (id);";
    let err = SqlScript::parse(source, &Dialect::postgresql(), false).unwrap_err();
    assert!(matches!(err, SqlError::MixedTransactionality { line: 2, .. }));

    let script = SqlScript::parse(source, &Dialect::postgresql(), true).unwrap();
    assert!(!script.execute_in_transaction());
}
