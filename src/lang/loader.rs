//! Loading a program's modules from disk and ordering them for
//! generation.
//!
//! `load` reads the root file and chases imports transitively,
//! producing one [`Module`] per file keyed by its path.
//! `dependency_order` then sorts the collection so that every module
//! is generated after the modules it imports; an import graph with a
//! cycle never becomes ready and is diagnosed explicitly.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::scan::ParseError;

use super::{parse, Module};

/// An error raised while loading a program's modules.
#[derive(Debug)]
pub enum Error {
    /// A module file could not be read.
    Io { path: PathBuf, error: io::Error },
    /// An `import` referenced a file that does not exist.
    MissingImport { path: PathBuf, importer: PathBuf },
    /// Malformed source text.
    Parse(ParseError),
    /// No generation order exists for these modules: each one imports
    /// another of them.
    ImportCycle(Vec<PathBuf>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { path, error } => {
                write!(f, "Unable to read {:?}: {}.", path, error)
            }
            Error::MissingImport { path, importer } => write!(
                f,
                "Cannot find dependency {:?} required by {:?}.",
                path, importer
            ),
            Error::Parse(error) => write!(f, "{}", error),
            Error::ImportCycle(modules) => {
                write!(f, "Import cycle through")?;
                for (index, module) in modules.iter().enumerate() {
                    let separator = if index == 0 { " " } else { ", " };
                    write!(f, "{}{:?}", separator, module)?;
                }
                write!(f, ".")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::Parse(error)
    }
}

/// Load `root` and, transitively, every module it imports.
pub fn load(root: &Path) -> Result<BTreeMap<PathBuf, Module>, Error> {
    let mut modules = BTreeMap::new();
    load_recursive(&mut modules, root.to_path_buf())?;
    Ok(modules)
}

fn load_recursive(modules: &mut BTreeMap<PathBuf, Module>, path: PathBuf) -> Result<(), Error> {
    if modules.contains_key(&path) {
        return Ok(());
    }
    debug!("loading {}", path.display());
    let source = std::fs::read_to_string(&path).map_err(|error| Error::Io {
        path: path.clone(),
        error,
    })?;
    let module = parse::parse(&path.to_string_lossy(), &source)?;
    let dependencies: Vec<PathBuf> = module
        .imports
        .iter()
        .map(|import| import.resolve(module.dir()))
        .collect();
    modules.insert(path.clone(), module);
    for dependency in dependencies {
        if !dependency.exists() {
            return Err(Error::MissingImport {
                path: dependency,
                importer: path,
            });
        }
        load_recursive(modules, dependency)?;
    }
    Ok(())
}

/// Order the modules so that every module follows its imports.
pub fn dependency_order(modules: &BTreeMap<PathBuf, Module>) -> Result<Vec<PathBuf>, Error> {
    let mut output = Vec::new();
    let mut outstanding: BTreeSet<PathBuf> = modules.keys().cloned().collect();
    while !outstanding.is_empty() {
        let ready: Vec<PathBuf> = outstanding
            .iter()
            .filter(|path| {
                let module = &modules[*path];
                module
                    .imports
                    .iter()
                    .all(|import| !outstanding.contains(&import.resolve(module.dir())))
            })
            .cloned()
            .collect();
        if ready.is_empty() {
            return Err(Error::ImportCycle(outstanding.into_iter().collect()));
        }
        for path in ready {
            outstanding.remove(&path);
            output.push(path);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Import;

    fn module(name: &str, imports: &[&str]) -> Module {
        Module {
            name: PathBuf::from(name),
            imports: imports
                .iter()
                .map(|import| Import {
                    parts: vec![import.to_string()],
                })
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn imports_come_before_importers() {
        let mut modules = BTreeMap::new();
        modules.insert(PathBuf::from("c.is"), module("c.is", &["a", "b"]));
        modules.insert(PathBuf::from("a.is"), module("a.is", &[]));
        modules.insert(PathBuf::from("b.is"), module("b.is", &["a"]));
        let order = dependency_order(&modules).unwrap();
        assert_eq!(
            order,
            vec![
                PathBuf::from("a.is"),
                PathBuf::from("b.is"),
                PathBuf::from("c.is"),
            ]
        );
    }

    #[test]
    fn cycles_are_diagnosed() {
        let mut modules = BTreeMap::new();
        modules.insert(PathBuf::from("a.is"), module("a.is", &["b"]));
        modules.insert(PathBuf::from("b.is"), module("b.is", &["a"]));
        match dependency_order(&modules) {
            Err(Error::ImportCycle(stuck)) => assert_eq!(stuck.len(), 2),
            other => panic!("expected an import cycle, got {:?}", other),
        }
    }
}
