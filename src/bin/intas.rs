use core::fmt;
use std::fs;
use std::io::{Read, Write};

use clap::Parser;

use intcode::{asm, scan};

/// Assemble symbolic assembly into the comma-separated integer
/// encoding.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// File to read from.
    #[clap(long, default_value = "-")]
    input: String,

    /// File to write to.
    #[clap(long, default_value = "-")]
    output: String,
}

enum Error {
    Io(std::io::Error),
    Parse(scan::ParseError),
    Asm(asm::Error),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Parse(e) => write!(f, "{}", e),
            Error::Asm(e) => write!(f, "{}", e),
        }
    }
}

fn read_input(input: &str) -> Result<(String, String), Error> {
    if input == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .map_err(Error::Io)?;
        Ok(("stdin".to_string(), source))
    } else {
        let source = fs::read_to_string(input).map_err(Error::Io)?;
        Ok((input.to_string(), source))
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

fn render(words: &[i64]) -> String {
    let mut output = words
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    output.push('\n');
    output
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();
    let (file, source) = read_input(&args.input)?;
    let statements = asm::parse::parse(&file, &source).map_err(Error::Parse)?;
    let encoded = asm::encode(&statements).map_err(Error::Asm)?;
    write_output(&args.output, &render(&encoded))
}
