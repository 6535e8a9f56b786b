mod common;

use std::{fs, path::Path};

use sqlenc::{DatabaseType, RewriteOptions, SqlRewriter, SqlValue};

/// Rewrite each statement of a case file, one statement per line.
///
/// Lines starting with `--` are comments. A `-- database: Oracle` line picks
/// the dialect for the rest of the file. Rewriting stops at the first error,
/// whose message is returned instead.
fn rewrite_case(sql: &str) -> Result<Vec<String>, String> {
    let mut database_type = DatabaseType::MySql;
    let mut rewritten = Vec::new();
    for line in sql.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(comment) = line.strip_prefix("--") {
            if let Some(name) = comment.trim().strip_prefix("database:") {
                database_type = match name.trim() {
                    "MySql" => DatabaseType::MySql,
                    "PostgreSql" => DatabaseType::PostgreSql,
                    "Oracle" => DatabaseType::Oracle,
                    "SqlServer" => DatabaseType::SqlServer,
                    other => panic!("unknown database type {other}"),
                };
            }
            continue;
        }
        let rewriter = SqlRewriter::new(
            common::prefix_rule(),
            common::schema(),
            RewriteOptions {
                database_type,
                query_with_cipher_column: true,
            },
        );
        let result = rewriter.rewrite(line).map_err(|e| e.to_string())?;
        rewritten.push(result.sql);
    }
    Ok(rewritten)
}

/// Run a single .sql test and compare output.
fn run_test_case(name: &str) -> bool {
    let base_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let sql_path = base_dir.join("tests/cases").join(format!("{name}.sql"));
    let expected_out_path = base_dir.join("tests/expected").join(format!("{name}.out"));
    let expected_err_path = base_dir.join("tests/expected").join(format!("{name}.err"));

    // Decide mode: normal success test (.out) or failure test (.err)
    let expect_error = expected_err_path.exists();
    let expected_path = if expect_error {
        &expected_err_path
    } else {
        &expected_out_path
    };
    assert!(
        expected_path.exists(),
        "missing expected output or error file: {name}.out/.err"
    );

    let expected = fs::read_to_string(expected_path).expect("could not read expected file");
    let sql = fs::read_to_string(&sql_path).expect("could not read SQL test case file");
    let expected_trimmed = expected.trim().replace("\r\n", "\n");

    match (rewrite_case(&sql), expect_error) {
        (Ok(statements), false) => {
            let actual = statements.join("\n");
            if actual != expected_trimmed {
                eprintln!("\n=== ERROR IN TEST CASE ===\n{name}");
                eprintln!("=== EXPECTED ===\n{expected_trimmed}\n=== GOT ===\n{actual}");
                eprintln!("=== END ERROR ===\n");
                return false;
            }
        }
        (Err(message), true) => {
            if message != expected_trimmed {
                eprintln!("\n=== ERROR IN TEST CASE ===\n{name}");
                eprintln!("=== EXPECTED ERROR ===\n{expected_trimmed}");
                eprintln!("=== GOT ERROR ===\n{message}");
                eprintln!("=== END ERROR ===\n");
                return false;
            }
        }
        (Ok(statements), true) => {
            eprintln!("\n=== ERROR IN TEST CASE ===\n{name}");
            eprintln!("Expected a rewrite error, got:\n{}", statements.join("\n"));
            eprintln!("=== END ERROR ===\n");
            return false;
        }
        (Err(message), false) => {
            eprintln!("\n=== ERROR IN TEST CASE ===\n{name}");
            eprintln!("rewrite failed: {message}");
            eprintln!("=== END ERROR ===\n");
            return false;
        }
    }

    true
}

/// Discover all test cases (.sql)
fn test_cases() -> Vec<String> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/cases");
    let mut names = vec![];
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("sql") {
                if let Some(stem) = entry.path().file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
    }
    names.sort();
    names
}

#[test_log::test]
fn run_all_sql_tests() {
    let mut all_passed = true;
    let cases = test_cases();
    assert!(!cases.is_empty(), "no test cases found");
    println!("\trunning {} test cases", cases.len());
    for case in cases {
        let result = run_test_case(&case);
        let msg = if result { "ok" } else { "fail" };
        println!("\tcase {case} ... {msg}");
        all_passed &= result;
    }
    assert!(all_passed, "Some test cases failed");
}

#[test_log::test]
fn test_parameters_follow_rewritten_markers() -> anyhow::Result<()> {
    let rewriter =
        SqlRewriter::new(common::prefix_rule(), common::schema(), RewriteOptions::default());
    let result = rewriter.rewrite_with_parameters(
        "INSERT INTO t_user (id, pwd, email) VALUES (?, ?, ?)",
        &[SqlValue::Integer(1), SqlValue::from("p"), SqlValue::from("e")],
    )?;
    assert_eq!(
        result.sql,
        "INSERT INTO t_user (id, pwd_cipher, pwd_assisted, pwd_plain, email_cipher, email_plain) \
         VALUES (?, ?, ?, ?, ?, ?)"
    );
    assert_eq!(
        result.parameters,
        vec![
            SqlValue::Integer(1),
            SqlValue::from("enc:p"),
            SqlValue::from("assist:p"),
            SqlValue::from("p"),
            SqlValue::from("enc:e"),
            SqlValue::from("e"),
        ]
    );
    Ok(())
}

#[test_log::test]
fn test_rewrite_disjoint_and_idempotent() -> anyhow::Result<()> {
    let rewriter =
        SqlRewriter::new(common::prefix_rule(), common::schema(), RewriteOptions::default());
    for sql in [
        "SELECT pwd, email FROM t_user WHERE pwd = 'a' AND phone = 'b'",
        "INSERT INTO t_user VALUES (1, 'p', 'e', 'n')",
        "UPDATE t_user SET pwd = 'x', phone = 'y' WHERE email = 'z'",
    ] {
        let first = rewriter.rewrite(sql)?;
        let second = rewriter.rewrite(sql)?;
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.tokens, second.tokens);

        let mut spans: Vec<_> = first.tokens.iter().map(|t| t.span()).collect();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]), "{sql}: {:?} overlaps {:?}", pair[0], pair[1]);
        }
    }
    Ok(())
}

#[test_log::test]
fn test_config_query_with_plain_columns() -> anyhow::Result<()> {
    let mut config = common::config();
    config.query_with_cipher_column = false;
    let rule = sqlenc::EncryptRule::builder(config.clone())
        .algorithm("aes", common::PrefixAlgorithm::new("enc"))
        .algorithm("digest", common::PrefixAlgorithm::new("assist"))
        .build()?;
    let rewriter = SqlRewriter::new(
        rule,
        common::schema(),
        RewriteOptions {
            database_type: DatabaseType::MySql,
            query_with_cipher_column: config.query_with_cipher_column,
        },
    );
    let result = rewriter.rewrite("SELECT email, phone FROM t_user WHERE email = 'x'")?;
    assert_eq!(
        result.sql,
        "SELECT email_plain AS email, phone_cipher AS phone FROM t_user WHERE email_plain = 'x'"
    );
    Ok(())
}

#[test_log::test]
fn test_dollar_markers_rejected_outside_postgres() -> anyhow::Result<()> {
    let rewriter =
        SqlRewriter::new(common::prefix_rule(), common::schema(), RewriteOptions::default());
    let result = rewriter.rewrite_with_parameters(
        "UPDATE t_user SET phone = $1 WHERE id = $2",
        &[SqlValue::from("555"), SqlValue::Integer(1)],
    );
    let message = result.err().map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("parameter marker $1"), "{message}");

    let postgres = SqlRewriter::new(
        common::prefix_rule(),
        common::schema(),
        RewriteOptions {
            database_type: DatabaseType::PostgreSql,
            query_with_cipher_column: true,
        },
    );
    let result = postgres.rewrite_with_parameters(
        "UPDATE t_user SET phone = $1 WHERE id = $2",
        &[SqlValue::from("555"), SqlValue::Integer(1)],
    )?;
    assert_eq!(result.sql, "UPDATE t_user SET phone_cipher = $1 WHERE id = $2");
    assert_eq!(result.parameters, vec![SqlValue::from("enc:555"), SqlValue::Integer(1)]);
    Ok(())
}
