//! Whole-pipeline tests: source files on disk through parsing,
//! preprocessing, session enumeration, and reporting.

use std::io::Write;

use kelpie::api::{prepare_source, run_session, SessionOptions, Verdict};
use kelpie::report::{format_session, session_to_json};

fn write_source(dir: &tempfile::TempDir, name: &str, source: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create source file");
    file.write_all(source.as_bytes()).expect("write source");
    path
}

#[test]
fn file_round_trip_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_source(
        &dir,
        "abs.kvl",
        "procedure abs(x: int) returns (r: int)\n\
           ensures r >= 0;\n\
         {\n\
           if (x < 0) { r := -x; } else { r := x; }\n\
         }\n",
    );
    let source = std::fs::read_to_string(&path).expect("read back");
    let program = prepare_source(&source).expect("prepare");
    let cases = run_session(&program, "abs", &SessionOptions::default());
    assert!(cases.iter().any(|c| c.verdict() == Verdict::Pass));
    assert!(cases.iter().all(|c| c.verdict() != Verdict::Fail));
}

#[test]
fn buggy_contract_is_caught_and_reported() {
    let source = "procedure bad(x: int) returns (r: int)\n\
                    ensures r > x;\n\
                  {\n\
                    r := x;\n\
                  }\n";
    let program = prepare_source(source).expect("prepare");
    let cases = run_session(&program, "bad", &SessionOptions::default());
    assert!(cases.iter().any(|c| c.verdict() == Verdict::Fail));

    let text = format_session("bad", &cases);
    assert!(text.contains("FAILURES FOUND"), "got: {}", text);
    let json = session_to_json("bad", &cases);
    assert!(json.contains("\"verdict\": \"fail\""), "got: {}", json);
}

#[test]
fn multi_procedure_program_with_calls() {
    let source = "var total: int;\n\
                  procedure add(n: int)\n\
                    requires n >= 0;\n\
                    modifies total;\n\
                    ensures total == old(total) + n;\n\
                  {\n\
                    total := total + n;\n\
                  }\n\
                  procedure main()\n\
                    modifies total;\n\
                  {\n\
                    total := 0;\n\
                    call add(2);\n\
                    call add(3);\n\
                    assert total == 5;\n\
                  }\n";
    let program = prepare_source(source).expect("prepare");
    let cases = run_session(&program, "main", &SessionOptions::default());
    assert!(cases.iter().any(|c| c.verdict() == Verdict::Pass));
    assert!(cases.iter().all(|c| c.verdict() != Verdict::Fail));
}

#[test]
fn parse_errors_surface_as_diagnostics() {
    let result = prepare_source("procedure p( { }");
    let diagnostics = result.err().expect("diagnostics");
    assert!(!diagnostics.is_empty());
}
