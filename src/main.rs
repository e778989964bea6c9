use std::{env, fs};

use pplexpr::bytecode::disasm::{print_bc, print_bc_compact, print_bc_stats};
use pplexpr::bytecode::stack_check;
use pplexpr::frontend::lexer::Lexer;
use pplexpr::frontend::token_dumper::{TokenDumper, state_string};
use pplexpr::{CompileOptions, compile};

struct Flags {
    tokens_only: bool,
    states: bool,
    no_color: bool,
    pretty: bool,
    compact: bool,
    stats: bool,
    check: bool,
    options: CompileOptions,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let (flag_args, input) = split_args(&args);
    let has = |flag: &str| flag_args.iter().any(|a| a == flag);

    if has("--help") || has("-h") {
        print_usage();
        return;
    }

    init_logging();

    let flags = Flags {
        tokens_only: has("--tokens"),
        states: has("--states"),
        no_color: has("--no-color"),
        pretty: has("--pretty"),
        compact: has("--compact"),
        stats: has("--stats"),
        check: has("--check"),
        options: CompileOptions::new()
            .dollar(has("--dollar"))
            .assignment(has("--assign"))
            .comma_operator(has("--comma")),
    };

    match input {
        Some(path) if has("--file") => match fs::read_to_string(path) {
            Ok(source) => {
                let mut failed = false;
                for (i, line) in source.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    failed |= !run_expression(line, i as u32 + 1, path, &flags);
                }
                if failed {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Failed to read '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        Some(text) => {
            if !run_expression(text, 1, "<command line>", &flags) {
                std::process::exit(1);
            }
        }
        None => print_usage(),
    }
}

/// Splits off the flags from the input argument. Everything after `--` is
/// input, so expressions such as `-x + 1` can be given. Otherwise the first
/// argument not starting with `-` is the input.
fn split_args(args: &[String]) -> (&[String], Option<&String>) {
    let args = args.get(1..).unwrap_or_default();
    match args.iter().position(|a| a == "--") {
        Some(sep) => (&args[..sep], args.get(sep + 1)),
        None => (args, args.iter().find(|a| !a.starts_with('-'))),
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    // PPLEXPR_LOG, then RUST_LOG, then warnings only
    let filter = EnvFilter::try_from_env("PPLEXPR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_usage() {
    println!("PPLEXPR - expression tokenizer and bytecode compiler");
    println!();
    println!("Usage:");
    println!("  pplexpr '<expr>'               Compile and disassemble an expression");
    println!("  pplexpr --file <path>          Compile every non-blank line of a file");
    println!("  pplexpr --tokens '<expr>'      Show tokens only");
    println!("  pplexpr [flags] -- '<expr>'    Input after --, even if it starts with -");
    println!();
    println!("Options:");
    println!("  --dollar                       Allow $ column references");
    println!("  --assign                       Allow assignment, ++ and --");
    println!("  --comma                        Treat a top-level comma as the sequence operator");
    println!("  --compact                      One line per instruction, no stack comments");
    println!("  --stats                        Print instruction statistics");
    println!("  --check                        Verify stack balance of the compiled code");
    println!("  --pretty, --no-color           Token dump formatting");
    println!("  --states                       With --tokens, print one state letter per byte");
    println!("  --help, -h                     Show this help");
}

/// Returns false if the expression failed to compile or check.
fn run_expression(text: &str, line: u32, file: &str, flags: &Flags) -> bool {
    if flags.tokens_only {
        return dump_tokens(text, flags);
    }

    let (expr, consumed) = match compile(text, line, line as u64, file, &flags.options) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}:{}: compile error", file, line);
            eprintln!("{}", e.render(text));
            return false;
        }
    };

    if flags.compact {
        print_bc_compact(&expr);
    } else {
        print_bc(&expr);
    }
    if consumed < text.len() {
        println!("stopped after {} bytes; left over: {:?}", consumed, &text[consumed..]);
    }
    if flags.stats {
        print_bc_stats(&expr);
    }
    if flags.check {
        match stack_check::check(&expr.code) {
            Ok(depth) => println!("stack check ok, max depth {}", depth),
            Err(e) => {
                eprintln!("{}", e);
                return false;
            }
        }
    }
    true
}

fn dump_tokens(text: &str, flags: &Flags) -> bool {
    let lexer = Lexer::new(text, flags.options.lex_flags())
        .with_max_tokens(flags.options.limits.max_tokens)
        .with_max_depth(flags.options.limits.max_nesting);

    match lexer.tokenize() {
        Ok(tokenized) => {
            let mut dumper = TokenDumper::new();

            if flags.no_color {
                dumper = dumper.no_color();
            }
            if flags.pretty {
                dumper = dumper.pretty();
            }

            dumper.dump(text, &tokenized.tokens);
            if flags.states {
                println!("{}", text);
                println!("{}", state_string(text, &tokenized.tokens));
            }
            true
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("pplexpr")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_first_plain_argument_is_input() {
        let argv = args(&["--stats", "x + 1", "y"]);
        let (flags, input) = split_args(&argv);
        assert_eq!(flags, &argv[1..]);
        assert_eq!(input.map(String::as_str), Some("x + 1"));
    }

    #[test]
    fn test_input_after_separator() {
        let argv = args(&["--assign", "--", "--i"]);
        let (flags, input) = split_args(&argv);
        assert_eq!(flags, &argv[1..2]);
        assert_eq!(input.map(String::as_str), Some("--i"));

        let argv = args(&["--", "-x + 1"]);
        assert_eq!(split_args(&argv).1.map(String::as_str), Some("-x + 1"));
    }

    #[test]
    fn test_flags_after_separator_are_input() {
        let argv = args(&["--", "-h"]);
        let (flags, input) = split_args(&argv);
        assert!(flags.is_empty());
        assert_eq!(input.map(String::as_str), Some("-h"));
    }

    #[test]
    fn test_no_input() {
        let argv = args(&["--tokens"]);
        assert_eq!(split_args(&argv).1, None);
    }
}
