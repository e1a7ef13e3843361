use core::fmt;
use std::fs;
use std::path::Path;

use clap::Parser;

use intcode::vm::{Machine, StandardDevice};
use intcode::{asm, lang, scan, vm};

/// Run a program: encoded (`.ic`), symbolic assembly (`.asm`), or
/// source (`.is`). Standard input feeds the program one byte per
/// word; each output word is written to standard output as one byte.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// The program to run.
    file: String,

    /// Show executed instructions.
    #[clap(long)]
    debug: bool,
}

enum Error {
    Io(std::io::Error),
    Parse(scan::ParseError),
    Compile(lang::CompileError),
    Asm(asm::Error),
    Vm(vm::Error),
    UnknownExtension(String),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Parse(e) => write!(f, "{}", e),
            Error::Compile(e) => write!(f, "{}", e),
            Error::Asm(e) => write!(f, "{}", e),
            Error::Vm(e) => write!(f, "{}", e),
            Error::UnknownExtension(extension) => write!(
                f,
                "Unknown extension {:?}, must be \".ic\", \".asm\", or \".is\".",
                extension
            ),
        }
    }
}

fn load(path: &Path) -> Result<Vec<i64>, Error> {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().into_owned())
        .unwrap_or_default();
    match extension.as_str() {
        "ic" => {
            let contents = fs::read_to_string(path).map_err(Error::Io)?;
            vm::parse_program(&contents).map_err(Error::Vm)
        }
        "asm" => {
            let contents = fs::read_to_string(path).map_err(Error::Io)?;
            let statements =
                asm::parse::parse(&path.to_string_lossy(), &contents).map_err(Error::Parse)?;
            asm::encode(&statements).map_err(Error::Asm)
        }
        "is" => {
            let statements = lang::compile(path).map_err(Error::Compile)?;
            asm::encode(&statements).map_err(Error::Asm)
        }
        _ => Err(Error::UnknownExtension(extension)),
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();
    let program = load(Path::new(&args.file))?;
    Machine::new(&program)
        .with_debug(args.debug)
        .run(&mut StandardDevice)
        .map_err(Error::Vm)
}
