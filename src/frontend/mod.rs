pub mod lexer;
pub mod number;
pub mod strings;
pub mod token;
pub mod token_dumper;
