//! Where code units come from.
//!
//! The interpreter never parses guest source text. A [`ModuleSource`] answers
//! "is there a module file at this path" and "give me its code unit"; the
//! resolver only ever builds candidate paths (`dir/name.py`,
//! `dir/name/__init__.py`) and asks.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use ahash::AHashMap;

use crate::bytecode::{BINARY_MAGIC, Code, Opcode, parse_listing};

/// Failure to obtain a runnable code unit.
///
/// Load errors are not guest exceptions: they abort the run regardless of any
/// `try` blocks active in guest code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The file could not be read.
    Io { path: PathBuf, message: String },
    /// The bytes are not a well-formed code unit in any supported encoding.
    Decode { path: Option<PathBuf>, message: String },
    /// A textual listing has a syntax error.
    Listing { line: usize, message: String },
    /// The unit targets an instruction-set version this interpreter does not run.
    UnsupportedVersion { code: String, version: u16 },
    /// The unit uses an opcode introduced after its declared version.
    UnavailableOpcode {
        code: String,
        ip: usize,
        opcode: Opcode,
        version: u16,
    },
    /// An operand does not index into the table its opcode reads.
    OperandOutOfRange {
        code: String,
        ip: usize,
        opcode: Opcode,
        arg: u32,
    },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read {}: {message}", path.display()),
            Self::Decode { path: Some(path), message } => {
                write!(f, "invalid code unit in {}: {message}", path.display())
            }
            Self::Decode { path: None, message } => write!(f, "invalid code unit: {message}"),
            Self::Listing { line, message } => write!(f, "listing line {line}: {message}"),
            Self::UnsupportedVersion { code, version } => {
                write!(f, "code unit '{code}' targets unsupported instruction-set version {version}")
            }
            Self::UnavailableOpcode {
                code,
                ip,
                opcode,
                version,
            } => write!(
                f,
                "code unit '{code}' uses {opcode} at {ip}, which is not available in instruction-set version {version}"
            ),
            Self::OperandOutOfRange { code, ip, opcode, arg } => {
                write!(f, "code unit '{code}': operand {arg} of {opcode} at {ip} is out of range")
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl LoadError {
    /// Attaches a file path to path-less decode errors.
    fn with_path(self, path: &Path) -> Self {
        match self {
            Self::Decode { path: None, message } => Self::Decode {
                path: Some(path.to_path_buf()),
                message,
            },
            Self::Listing { line, message } => Self::Decode {
                path: Some(path.to_path_buf()),
                message: format!("line {line}: {message}"),
            },
            other => other,
        }
    }
}

/// Supplies code units to the import resolver.
pub trait ModuleSource {
    /// Whether a module file exists at `path`.
    fn is_file(&self, path: &Path) -> bool;

    /// Loads and validates the code unit stored at `path`.
    fn load(&self, path: &Path) -> Result<Code, LoadError>;
}

/// Turns the raw bytes of a module file into a code unit.
///
/// This is the seam where an external compiler plugs in.
pub trait Frontend {
    fn compile(&self, path: &Path, bytes: &[u8]) -> Result<Code, LoadError>;
}

/// Decodes the three serialized code-unit encodings.
///
/// The encoding is sniffed from the content: the binary magic header selects
/// postcard, a leading `{` selects JSON and anything else is parsed as a
/// textual listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeUnitFrontend;

impl CodeUnitFrontend {
    /// Decodes a code unit from bytes without a backing file.
    pub fn decode(bytes: &[u8]) -> Result<Code, LoadError> {
        let code = if bytes.starts_with(BINARY_MAGIC) {
            Code::from_bytes(bytes)?
        } else {
            let text = std::str::from_utf8(bytes).map_err(|err| LoadError::Decode {
                path: None,
                message: err.to_string(),
            })?;
            if text.trim_start().starts_with('{') {
                serde_json::from_str(text).map_err(|err| LoadError::Decode {
                    path: None,
                    message: err.to_string(),
                })?
            } else {
                parse_listing(text)?
            }
        };
        code.validate()?;
        Ok(code)
    }
}

impl Frontend for CodeUnitFrontend {
    fn compile(&self, path: &Path, bytes: &[u8]) -> Result<Code, LoadError> {
        let mut code = Self::decode(bytes).map_err(|err| err.with_path(path))?;
        if code.filename.is_empty() {
            code.filename = path.display().to_string();
        }
        Ok(code)
    }
}

/// Reads module files from disk.
#[derive(Debug, Clone)]
pub struct FileSystemSource<F: Frontend = CodeUnitFrontend> {
    frontend: F,
}

impl Default for FileSystemSource {
    fn default() -> Self {
        Self::new(CodeUnitFrontend)
    }
}

impl<F: Frontend> FileSystemSource<F> {
    #[must_use]
    pub fn new(frontend: F) -> Self {
        Self { frontend }
    }
}

impl<F: Frontend> ModuleSource for FileSystemSource<F> {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load(&self, path: &Path) -> Result<Code, LoadError> {
        let bytes = fs::read(path).map_err(|err| LoadError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        self.frontend.compile(path, &bytes)
    }
}

/// In-memory module files keyed by virtual path.
///
/// ```
/// use echovm::{MemorySource, ModuleSource};
/// use std::path::Path;
///
/// let mut source = MemorySource::new();
/// source.insert_listing("/lib/a.py", "LoadConst None\nReturnValue").unwrap();
/// assert!(source.is_file(Path::new("/lib/a.py")));
/// assert!(!source.is_file(Path::new("/lib/b.py")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: AHashMap<PathBuf, Code>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a code unit at `path`, filling in its filename if unset.
    pub fn insert(&mut self, path: impl Into<PathBuf>, mut code: Code) {
        let path = path.into();
        if code.filename.is_empty() {
            code.filename = path.display().to_string();
        }
        self.files.insert(path, code);
    }

    /// Parses a textual listing and registers it at `path`.
    pub fn insert_listing(&mut self, path: impl Into<PathBuf>, listing: &str) -> Result<(), LoadError> {
        let path = path.into();
        let code = parse_listing(listing).map_err(|err| err.with_path(&path))?;
        self.insert(path, code);
        Ok(())
    }
}

impl ModuleSource for MemorySource {
    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn load(&self, path: &Path) -> Result<Code, LoadError> {
        let code = self.files.get(path).ok_or_else(|| LoadError::Io {
            path: path.to_path_buf(),
            message: "no such file".to_owned(),
        })?;
        code.validate()?;
        Ok(code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeBuilder;

    fn tiny() -> Code {
        let mut b = CodeBuilder::module("t", "");
        b.load_const(1).store_name("x").return_none();
        b.build().unwrap()
    }

    #[test]
    fn sniffs_all_three_encodings() {
        let code = tiny();
        let json = serde_json::to_vec(&code).unwrap();
        let binary = code.to_bytes().unwrap();
        let listing = b"LoadConst 1\nStoreName x\nLoadConst None\nReturnValue\n";
        for bytes in [json.as_slice(), binary.as_slice(), listing.as_slice()] {
            let decoded = CodeUnitFrontend::decode(bytes).unwrap();
            assert_eq!(decoded.names, vec!["x".to_owned()]);
        }
    }

    #[test]
    fn frontend_fills_filename_and_tags_errors_with_path() {
        let path = Path::new("/virtual/m.py");
        let code = CodeUnitFrontend.compile(path, b"LoadConst None\nReturnValue").unwrap();
        assert_eq!(code.filename, "/virtual/m.py");
        let err = CodeUnitFrontend.compile(path, b"Bogus").unwrap_err();
        assert!(matches!(err, LoadError::Decode { path: Some(_), .. }), "{err}");
    }
}
