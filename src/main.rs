use std::fs;
use std::process;

use locus::run_source;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => run_repl(),
        [path] => run_file(path),
        _ => {
            eprintln!("Usage: locus [source-path]");
            process::exit(2);
        }
    }
}

/// Run a source file: rendered final value on stdout, rendered error on
/// stderr with a non-zero exit status.
fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("cannot read {path}: {err}");
            process::exit(1);
        }
    };
    match run_source(&source) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

/// Interactive mode: each line is a complete program evaluated in a fresh
/// machine.
fn run_repl() {
    println!("Locus interpreter");
    println!("Each line is a complete program, e.g.: letrec (x = 1) (.+ x 41)");
    println!("Type :quit to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("could not initialize the line editor");

    loop {
        match rl.readline("locus> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match run_source(line) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(err) => println!("{err}"),
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("error: {err:?}");
                break;
            }
        }
    }
}
