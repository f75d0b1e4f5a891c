pub mod check;
pub mod exec;
pub mod test;

use std::path::Path;
use std::process;

use kelpie::diagnostic::render_diagnostics;
use kelpie::engine::preprocess::Preprocessed;

/// Load, parse, and preprocess a source file, exiting on errors.
pub fn prepare_file(path: &Path) -> (String, Preprocessed) {
    if !path.extension().is_some_and(|e| e == "kvl") {
        eprintln!("error: input must be a .kvl file");
        process::exit(2);
    }
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(2);
        }
    };
    let filename = path.display().to_string();
    match kelpie::api::prepare_source(&source) {
        Ok(program) => (source, program),
        Err(diagnostics) => {
            render_diagnostics(&diagnostics, &filename, &source);
            process::exit(1);
        }
    }
}

/// Resolve the entry procedure: explicit flag, or the single procedure
/// in the program.
pub fn resolve_entry(program: &Preprocessed, requested: Option<&str>) -> String {
    if let Some(name) = requested {
        if !program.context.procedures.contains_key(name) {
            eprintln!("error: no procedure named '{}'", name);
            process::exit(2);
        }
        return name.to_string();
    }
    let mut names = program.context.procedures.keys();
    match (names.next(), names.next()) {
        (Some(only), None) => only.clone(),
        _ => {
            eprintln!("error: program has multiple procedures; pick one with --proc");
            process::exit(2);
        }
    }
}
