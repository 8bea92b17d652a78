//! Parsing of Makefile syntax as found in `.d` files emitted by C compilers.
//!
//! Only the dependency lists are of interest; targets are read and discarded
//! without being matched against the edge's outputs.

use std::borrow::Cow;

use crate::scanner::{ParseResult, Scanner};

/// Read one path token.  Backslash-space is a literal space within a path;
/// backslash-newline ends the token (the continuation is handled by the
/// caller); any other backslash stays part of the path, as Windows-style
/// separators show up in compiler output.
fn read_path<'a>(scanner: &mut Scanner<'a>) -> Cow<'a, str> {
    let mut unescaped: Option<String> = None;
    // Start of the literal segment not yet copied into `unescaped`.
    let mut seg = scanner.ofs;
    loop {
        match scanner.read() {
            '\0' | ' ' | '\t' | '\r' | '\n' | '#' => {
                scanner.back();
                break;
            }
            '\\' => match scanner.peek() {
                '\n' => {
                    scanner.back();
                    break;
                }
                ' ' => {
                    let buf = unescaped.get_or_insert_with(String::new);
                    buf.push_str(scanner.slice(seg, scanner.ofs - 1));
                    buf.push(' ');
                    scanner.next();
                    seg = scanner.ofs;
                }
                _ => {}
            },
            _ => {}
        }
    }
    let tail = scanner.slice(seg, scanner.ofs);
    match unescaped {
        Some(mut buf) => {
            buf.push_str(tail);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(tail),
    }
}

/// Parse a `.d` file into the flat list of dependency paths, in order of
/// appearance across all of the file's rules.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Vec<Cow<'a, str>>> {
    let mut deps = Vec::new();
    // Whether we are past the ':' of the current rule.
    let mut in_deps = false;
    let mut saw_target = false;
    loop {
        match scanner.peek() {
            '\0' => {
                if saw_target && !in_deps {
                    return scanner.parse_error("expected ':'");
                }
                break;
            }
            '\n' => {
                if saw_target && !in_deps {
                    return scanner.parse_error("expected ':'");
                }
                scanner.next();
                in_deps = false;
                saw_target = false;
            }
            ' ' | '\t' | '\r' => scanner.next(),
            '#' => {
                while !matches!(scanner.peek(), '\n' | '\0') {
                    scanner.next();
                }
            }
            ':' if !in_deps => {
                scanner.next();
                in_deps = true;
            }
            '\\' => {
                scanner.next();
                if scanner.peek() == '\n' {
                    // Continuation: the rule keeps going on the next line.
                    scanner.next();
                    continue;
                }
                scanner.back();
                read_token(scanner, &mut deps, &mut in_deps, &mut saw_target);
            }
            _ => read_token(scanner, &mut deps, &mut in_deps, &mut saw_target),
        }
    }
    Ok(deps)
}

fn read_token<'a>(
    scanner: &mut Scanner<'a>,
    deps: &mut Vec<Cow<'a, str>>,
    in_deps: &mut bool,
    saw_target: &mut bool,
) {
    let path = read_path(scanner);
    if *in_deps {
        deps.push(path);
    } else if path.ends_with(':') {
        // A target with the colon attached, e.g. "out.o:".
        *in_deps = true;
    } else {
        *saw_target = true;
    }
}
