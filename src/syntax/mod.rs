pub mod ast;
pub mod lexeme;
pub mod lexer;
pub mod parser;
pub mod span;

use crate::diagnostic::Diagnostic;

/// Lex and parse a source string into a [`ast::Program`].
pub fn parse_source(source: &str, file_id: u16) -> Result<ast::Program, Vec<Diagnostic>> {
    let (tokens, lex_errors) = lexer::Lexer::new(source, file_id).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    parser::Parser::new(tokens).parse_program()
}
