//! Command-line driver.
//!
//! Deliberately thin: read the input (a file path, or `-` for standard
//! input), run [`ninccc::compile_source`], and write the result (to
//! standard output, or to `-o PATH`). There is exactly one subcommand
//! worth having — compile — so there are no subcommands at all.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ninccc::diagnostics::render;

#[derive(Parser)]
#[command(name = "ninccc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiles a C-like source file to x86-64 Intel-syntax assembly", long_about = None)]
struct Cli {
    /// Input source file, or `-` to read standard input
    input: PathBuf,

    /// Write the generated assembly here instead of standard output
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match read_input(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("ninccc: {e}");
            return ExitCode::FAILURE;
        }
    };

    match ninccc::compile_source(&source) {
        Ok(asm) => match write_output(&cli.output, &asm) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("ninccc: {e}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            eprintln!("{}", render(&source, &err));
            ExitCode::FAILURE
        }
    }
}

fn read_input(path: &std::path::Path) -> io::Result<String> {
    if path == std::path::Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}

fn write_output(path: &Option<PathBuf>, asm: &str) -> io::Result<()> {
    match path {
        Some(path) => fs::write(path, asm),
        None => io::stdout().write_all(asm.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_input_reads_a_plain_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "int main() { return 0; }\n").unwrap();
        let source = read_input(file.path()).unwrap();
        assert!(source.contains("return 0"));
    }

    #[test]
    fn write_output_to_a_path_round_trips() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_output(&Some(file.path().to_path_buf()), ".intel_syntax noprefix\n").unwrap();
        let written = fs::read_to_string(file.path()).unwrap();
        assert_eq!(written, ".intel_syntax noprefix\n");
    }
}
