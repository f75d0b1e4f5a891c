//! Human-readable and machine-readable reports for test sessions.
//!
//! JSON output is formatted manually (no serialization framework): the
//! structure is small, stable, and meant for CI tooling.

use crate::api::{TestCase, Verdict};
use crate::engine::error::FailureSource;
use crate::engine::expr::format_thunk;
use crate::engine::memory::Region;

// ─── Text report ───────────────────────────────────────────────────

/// Witness bindings of a finished case: name → rendered value, local
/// scope first.
fn witnesses(case: &TestCase) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for region in [Region::Locals, Region::Globals] {
        for (name, thunk) in case.memory.store(region) {
            out.push((name.clone(), format_thunk(thunk)));
        }
    }
    out
}

pub fn format_case(index: usize, case: &TestCase) -> String {
    let mut s = format!("case #{}: {}\n", index, case.verdict());
    if let Some(failure) = &case.failure {
        s.push_str(&format!("  {}\n", failure));
    }
    let bindings = witnesses(case);
    if !bindings.is_empty() && case.verdict() != Verdict::Invalid {
        s.push_str("  witness:\n");
        for (name, value) in bindings {
            s.push_str(&format!("    {} = {}\n", name, value));
        }
    }
    s
}

pub fn format_session(entry: &str, cases: &[TestCase]) -> String {
    let mut counts = [0usize; 4];
    for case in cases {
        let slot = match case.verdict() {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Invalid => 2,
            Verdict::Nonexecutable => 3,
        };
        counts[slot] += 1;
    }
    let mut report = format!(
        "Session: {} — {} case(s): {} pass, {} fail, {} invalid, {} nonexecutable\n",
        entry,
        cases.len(),
        counts[0],
        counts[1],
        counts[2],
        counts[3],
    );
    for (i, case) in cases.iter().enumerate() {
        if case.verdict() == Verdict::Fail || case.verdict() == Verdict::Nonexecutable {
            report.push_str(&format_case(i, case));
        }
    }
    let outcome = if counts[1] > 0 {
        "FAILURES FOUND"
    } else if counts[3] > 0 {
        "INCOMPLETE (nonexecutable paths)"
    } else {
        "ALL PASSED"
    };
    report.push_str(&format!("Result: {}\n", outcome));
    report
}

// ─── JSON report ───────────────────────────────────────────────────

/// Escape a string for JSON output.
fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

fn failure_kind(case: &TestCase) -> &'static str {
    match &case.failure {
        None => "none",
        Some(f) => match &f.source {
            FailureSource::Assertion { .. } => "assertion",
            FailureSource::Unreachable => "unreachable",
            FailureSource::Unsupported(_) => "unsupported",
        },
    }
}

pub fn session_to_json(entry: &str, cases: &[TestCase]) -> String {
    let mut out = String::new();
    out.push_str("{\n");
    out.push_str(&format!("  \"entry\": \"{}\",\n", json_escape(entry)));
    out.push_str(&format!("  \"cases\": {},\n", cases.len()));
    out.push_str("  \"results\": [\n");
    for (i, case) in cases.iter().enumerate() {
        out.push_str("    {\n");
        out.push_str(&format!("      \"index\": {},\n", i));
        out.push_str(&format!("      \"verdict\": \"{}\",\n", case.verdict()));
        out.push_str(&format!("      \"failure\": \"{}\",\n", failure_kind(case)));
        if let Some(f) = &case.failure {
            out.push_str(&format!(
                "      \"message\": \"{}\",\n",
                json_escape(&f.to_string())
            ));
        }
        out.push_str("      \"witness\": {");
        let bindings = witnesses(case);
        let rendered: Vec<String> = bindings
            .iter()
            .map(|(name, value)| {
                format!("\"{}\": \"{}\"", json_escape(name), json_escape(value))
            })
            .collect();
        out.push_str(&rendered.join(", "));
        out.push_str("}\n");
        out.push_str(if i + 1 < cases.len() { "    },\n" } else { "    }\n" });
    }
    out.push_str("  ]\n");
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{prepare_source, run_session, SessionOptions};

    fn cases_for(source: &str, entry: &str) -> Vec<TestCase> {
        let program = prepare_source(source).expect("prepare");
        run_session(&program, entry, &SessionOptions::default())
    }

    #[test]
    fn text_report_counts_verdicts() {
        let cases = cases_for("procedure p() { assert true; }", "p");
        let report = format_session("p", &cases);
        assert!(report.contains("1 pass"), "got: {}", report);
        assert!(report.contains("ALL PASSED"), "got: {}", report);
    }

    #[test]
    fn json_report_is_well_formed_enough() {
        let cases = cases_for("procedure p() { assert true; }", "p");
        let json = session_to_json("p", &cases);
        assert!(json.starts_with("{\n"));
        assert!(json.contains("\"entry\": \"p\""));
        assert!(json.contains("\"verdict\": \"pass\""));
        assert!(json.trim_end().ends_with('}'));
    }

    #[test]
    fn json_escape_handles_specials() {
        assert_eq!(json_escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(json_escape("plain"), "plain");
    }

    #[test]
    fn failing_case_reports_assertion() {
        let cases = cases_for("procedure p() { assert false; }", "p");
        let report = format_session("p", &cases);
        assert!(report.contains("fail"), "got: {}", report);
        let json = session_to_json("p", &cases);
        assert!(json.contains("\"failure\": \"assertion\""), "got: {}", json);
    }
}
