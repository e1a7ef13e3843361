use core::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use clap::Parser;

use intcode::{asm, lang};

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputType {
    Assembly,
    Intcode,
}

/// Compile a source module and its imports into assembly text or the
/// comma-separated integer encoding.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// The root module to compile; imports resolve next to it.
    #[clap(long)]
    input: String,

    /// File to write to.
    #[clap(long, default_value = "-")]
    output: String,

    /// Output format.
    #[clap(long, value_enum, default_value = "intcode")]
    output_type: OutputType,
}

enum Error {
    Io(std::io::Error),
    Compile(lang::CompileError),
    Asm(asm::Error),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Compile(e) => write!(f, "{}", e),
            Error::Asm(e) => write!(f, "{}", e),
        }
    }
}

fn write_output(output: &str, contents: &str) -> Result<(), Error> {
    if output == "-" {
        std::io::stdout()
            .write_all(contents.as_bytes())
            .map_err(Error::Io)
    } else {
        fs::write(output, contents).map_err(Error::Io)
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();
    let statements = lang::compile(Path::new(&args.input)).map_err(Error::Compile)?;
    let contents = match args.output_type {
        OutputType::Assembly => {
            let mut text = String::new();
            for statement in &statements {
                text.push_str(&statement.to_string());
                text.push('\n');
            }
            text
        }
        OutputType::Intcode => {
            let encoded = asm::encode(&statements).map_err(Error::Asm)?;
            let mut text = encoded
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            text.push('\n');
            text
        }
    };
    write_output(&args.output, &contents)
}
