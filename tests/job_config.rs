// tests/job_config.rs

use std::error::Error;
use std::io::Write;

use tempfile::NamedTempFile;

use batchdag::config::{load_and_validate, load_from_path};
use batchdag::graph::{DependencyKind, RetryPolicy};
use batchdag::staging::CleanupPolicy;

type TestResult = Result<(), Box<dyn Error>>;

fn write_job(toml: &str) -> Result<NamedTempFile, Box<dyn Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(toml.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[test]
fn full_job_definition_parses_with_all_fields() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "nightly-core-load"
parallel_threads = 8
staging_ttl_hours = 12
sweep_interval_seconds = 60

[transaction.accounts]
chunk_size = 5000
timeout_seconds = 300
staging_schema = "account_id NUMBER(18), branch_code CHAR(4)"
cleanup_policy = "archive_then_drop"
ttl_hours = 6

[transaction.postings]

[[dependency]]
source = "accounts"
target = "postings"
kind = "sequential"
priority_weight = 60
max_wait_seconds = 120
retry = { policy = "exponential_backoff", base_delay_ms = 500, max_retries = 3, max_delay_ms = 4000 }
"#,
    )?;

    let job = load_and_validate(file.path())?;

    assert_eq!(job.job.id, "nightly-core-load");
    assert_eq!(job.job.parallel_threads, 8);
    assert_eq!(job.job.staging_ttl_hours, 12);
    assert_eq!(job.job.sweep_interval_seconds, 60);

    let accounts = &job.transaction["accounts"];
    assert_eq!(accounts.chunk_size, 5000);
    assert_eq!(accounts.timeout_seconds, 300);
    assert_eq!(accounts.cleanup_policy, Some(CleanupPolicy::ArchiveThenDrop));

    let dep = &job.dependency[0];
    assert_eq!(dep.kind, DependencyKind::Sequential);
    assert_eq!(dep.priority_weight, 60);
    assert_eq!(dep.max_wait_seconds, 120);
    assert_eq!(
        dep.retry,
        RetryPolicy::ExponentialBackoff {
            base_delay_ms: 500,
            max_retries: 3,
            max_delay_ms: 4_000,
        }
    );
    Ok(())
}

#[test]
fn omitted_fields_fall_back_to_defaults() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "minimal"

[transaction.accounts]

[transaction.postings]

[[dependency]]
source = "accounts"
target = "postings"
"#,
    )?;

    let job = load_and_validate(file.path())?;

    assert_eq!(job.job.parallel_threads, 4);
    assert_eq!(job.job.staging_ttl_hours, 24);
    assert_eq!(job.job.sweep_interval_seconds, 300);

    let accounts = &job.transaction["accounts"];
    assert_eq!(accounts.chunk_size, 1000);
    assert_eq!(accounts.timeout_seconds, 600);
    assert_eq!(accounts.cleanup_policy, None);

    let dep = &job.dependency[0];
    assert_eq!(dep.kind, DependencyKind::Sequential);
    assert_eq!(dep.priority_weight, 50);
    assert_eq!(dep.max_wait_seconds, 300);
    assert_eq!(dep.retry, RetryPolicy::None);
    Ok(())
}

#[test]
fn staging_spec_uses_job_ttl_unless_overridden() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "ttl-check"
staging_ttl_hours = 48

[transaction.a]

[transaction.b]
ttl_hours = 2
"#,
    )?;

    let job = load_and_validate(file.path())?;
    assert_eq!(job.staging_spec("a").ttl_hours, 48);
    assert_eq!(job.staging_spec("b").ttl_hours, 2);
    Ok(())
}

#[test]
fn cyclic_definition_is_rejected_with_the_cycle_path() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "cyclic"

[transaction.a]

[transaction.b]

[[dependency]]
source = "a"
target = "b"

[[dependency]]
source = "b"
target = "a"
"#,
    )?;

    let err = load_and_validate(file.path()).expect_err("cycle must be rejected");
    let msg = format!("{err:#}");
    assert!(msg.contains("cycle detected"), "unexpected message: {msg}");
    assert!(msg.contains("a -> b"), "unexpected message: {msg}");
    Ok(())
}

#[test]
fn dependency_on_an_undeclared_transaction_is_rejected() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "dangling"

[transaction.a]

[[dependency]]
source = "a"
target = "ghost"
"#,
    )?;

    let err = load_and_validate(file.path()).expect_err("unknown target must be rejected");
    assert!(format!("{err:#}").contains("ghost"));
    Ok(())
}

#[test]
fn resource_lock_dependency_requires_a_token() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "lockless"

[transaction.a]

[transaction.b]

[[dependency]]
source = "a"
target = "b"
kind = "resource_lock"
"#,
    )?;

    let err = load_and_validate(file.path()).expect_err("missing token must be rejected");
    assert!(format!("{err:#}").contains("lock_token"));
    Ok(())
}

#[test]
fn job_without_transactions_is_rejected() -> TestResult {
    let file = write_job(
        r#"
[job]
id = "empty"
"#,
    )?;

    let err = load_and_validate(file.path()).expect_err("empty job must be rejected");
    assert!(format!("{err:#}").contains("at least one"));
    Ok(())
}

#[test]
fn malformed_toml_reports_the_file_in_context() -> TestResult {
    let file = write_job("this is not toml [")?;

    let err = load_from_path(file.path()).expect_err("parse must fail");
    assert!(format!("{err:#}").contains("parsing TOML"));
    Ok(())
}
