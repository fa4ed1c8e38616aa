//! Package model
//!
//! In-memory form of a driver package manifest: the fixed header fields and
//! the ordered list of files to install.
//!
//! Every entry carries exactly one file type. Instead of a flags word with
//! capability bits, the type is an [`EntryKind`] variant per capability shape,
//! so an entry can only hold an architecture, TLS class, install path or
//! symlink target when its type accepts one.

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// File types without qualifiers, path or target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlainType {
    KernelModuleSrc,
    KernelModuleCmd,
    InstallerBinary,
    UtilityBinary,
    DotDesktop,
}

/// File types that carry an install path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacedType {
    OpenglHeader,
    CudaIcd,
    XlibStaticLib,
    XlibSharedLib,
    UtilityLib,
    Documentation,
    Manpage,
    ExplicitPath,
    XmoduleSharedLib,
    GlxModuleSharedLib,
}

/// Libraries built for a specific architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchLibType {
    OpenglLib,
    CudaLib,
    LibglLa,
    VdpauLib,
    NvcuvidLib,
}

/// Symbolic links with an install path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SymlinkType {
    XlibSymlink,
    UtilityLibSymlink,
    XmoduleSymlink,
    GlxModuleSymlink,
    /// Only created when nothing exists at the destination yet
    XmoduleNewsym,
}

/// Symbolic links to architecture-specific libraries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchSymlinkType {
    OpenglSymlink,
    CudaSymlink,
    VdpauSymlink,
    NvcuvidLibSymlink,
}

/// Library architecture qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
pub enum Arch {
    #[strum(serialize = "COMPAT32")]
    Compat32,
    #[strum(serialize = "NATIVE")]
    Native,
}

/// Thread-local storage flavour of the OpenGL libraries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
pub enum TlsClass {
    #[strum(serialize = "CLASSIC")]
    Classic,
    #[strum(serialize = "NEW")]
    New,
}

/// A manifest type token, grouped by the fields that follow it on the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Plain(PlainType),
    Placed(PlacedType),
    ArchLib(ArchLibType),
    TlsLib,
    Symlink(SymlinkType),
    ArchSymlink(ArchSymlinkType),
    TlsSymlink,
    BinSymlink,
}

/// The type token is not one of the recognized manifest file types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTypeToken(pub String);

impl fmt::Display for UnknownTypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown file type '{}'", self.0)
    }
}

impl std::error::Error for UnknownTypeToken {}

impl FromStr for TypeTag {
    type Err = UnknownTypeToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ty) = s.parse() {
            return Ok(Self::Plain(ty));
        }
        if let Ok(ty) = s.parse() {
            return Ok(Self::Placed(ty));
        }
        if let Ok(ty) = s.parse() {
            return Ok(Self::ArchLib(ty));
        }
        if let Ok(ty) = s.parse() {
            return Ok(Self::Symlink(ty));
        }
        if let Ok(ty) = s.parse() {
            return Ok(Self::ArchSymlink(ty));
        }
        match s {
            "TLS_LIB" => Ok(Self::TlsLib),
            "TLS_SYMLINK" => Ok(Self::TlsSymlink),
            "UTILITY_BIN_SYMLINK" => Ok(Self::BinSymlink),
            _ => Err(UnknownTypeToken(s.to_string())),
        }
    }
}

impl TypeTag {
    /// Manifest token for this type
    pub fn token(self) -> &'static str {
        match self {
            Self::Plain(ty) => ty.into(),
            Self::Placed(ty) => ty.into(),
            Self::ArchLib(ty) => ty.into(),
            Self::TlsLib => "TLS_LIB",
            Self::Symlink(ty) => ty.into(),
            Self::ArchSymlink(ty) => ty.into(),
            Self::TlsSymlink => "TLS_SYMLINK",
            Self::BinSymlink => "UTILITY_BIN_SYMLINK",
        }
    }

    /// Followed by a `COMPAT32`/`NATIVE` token
    pub const fn accepts_arch(self) -> bool {
        matches!(
            self,
            Self::ArchLib(_) | Self::TlsLib | Self::ArchSymlink(_) | Self::TlsSymlink
        )
    }

    /// Followed by a `CLASSIC`/`NEW` token
    pub const fn accepts_class(self) -> bool {
        matches!(self, Self::TlsLib | Self::TlsSymlink)
    }

    pub const fn has_path(self) -> bool {
        !matches!(self, Self::Plain(_) | Self::BinSymlink)
    }

    pub const fn has_target(self) -> bool {
        matches!(
            self,
            Self::Symlink(_) | Self::ArchSymlink(_) | Self::TlsSymlink | Self::BinSymlink
        )
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// The type of a package entry together with the fields that type carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Plain(PlainType),
    /// A kernel module built or linked during installation; never read from a manifest
    KernelModule,
    Placed {
        ty: PlacedType,
        path: String,
    },
    ArchLib {
        ty: ArchLibType,
        arch: Arch,
        path: String,
    },
    TlsLib {
        arch: Arch,
        class: TlsClass,
        path: String,
    },
    Symlink {
        ty: SymlinkType,
        path: String,
        target: String,
    },
    ArchSymlink {
        ty: ArchSymlinkType,
        arch: Arch,
        path: String,
        target: String,
    },
    TlsSymlink {
        arch: Arch,
        class: TlsClass,
        path: String,
        target: String,
    },
    BinSymlink {
        target: String,
    },
}

impl EntryKind {
    /// Manifest type tag, `None` for the internally generated kernel module
    pub fn tag(&self) -> Option<TypeTag> {
        Some(match self {
            Self::Plain(ty) => TypeTag::Plain(*ty),
            Self::KernelModule => return None,
            Self::Placed { ty, .. } => TypeTag::Placed(*ty),
            Self::ArchLib { ty, .. } => TypeTag::ArchLib(*ty),
            Self::TlsLib { .. } => TypeTag::TlsLib,
            Self::Symlink { ty, .. } => TypeTag::Symlink(*ty),
            Self::ArchSymlink { ty, .. } => TypeTag::ArchSymlink(*ty),
            Self::TlsSymlink { .. } => TypeTag::TlsSymlink,
            Self::BinSymlink { .. } => TypeTag::BinSymlink,
        })
    }

    /// Type name as written in manifests and logs
    pub fn type_name(&self) -> &'static str {
        self.tag().map(TypeTag::token).unwrap_or("KERNEL_MODULE")
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Placed { path, .. }
            | Self::ArchLib { path, .. }
            | Self::TlsLib { path, .. }
            | Self::Symlink { path, .. }
            | Self::ArchSymlink { path, .. }
            | Self::TlsSymlink { path, .. } => Some(path),
            Self::Plain(_) | Self::KernelModule | Self::BinSymlink { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Symlink { target, .. }
            | Self::ArchSymlink { target, .. }
            | Self::TlsSymlink { target, .. }
            | Self::BinSymlink { target } => Some(target),
            _ => None,
        }
    }

    pub fn arch(&self) -> Option<Arch> {
        match self {
            Self::ArchLib { arch, .. }
            | Self::TlsLib { arch, .. }
            | Self::ArchSymlink { arch, .. }
            | Self::TlsSymlink { arch, .. } => Some(*arch),
            _ => None,
        }
    }

    pub fn tls_class(&self) -> Option<TlsClass> {
        match self {
            Self::TlsLib { class, .. } | Self::TlsSymlink { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub fn is_compat32(&self) -> bool {
        self.arch() == Some(Arch::Compat32)
    }

    pub fn is_symlink(&self) -> bool {
        self.target().is_some()
    }

    /// Files that belong to the kernel module (sources, build commands, the module itself)
    pub fn is_kernel_module_file(&self) -> bool {
        matches!(
            self,
            Self::KernelModule
                | Self::Plain(PlainType::KernelModuleSrc | PlainType::KernelModuleCmd)
        )
    }

    /// Files of the OpenGL implementation, including headers and GLX modules
    pub fn is_opengl_file(&self) -> bool {
        matches!(
            self,
            Self::Placed {
                ty: PlacedType::OpenglHeader | PlacedType::GlxModuleSharedLib,
                ..
            } | Self::ArchLib {
                ty: ArchLibType::OpenglLib | ArchLibType::LibglLa,
                ..
            } | Self::ArchSymlink {
                ty: ArchSymlinkType::OpenglSymlink,
                ..
            } | Self::Symlink {
                ty: SymlinkType::GlxModuleSymlink,
                ..
            } | Self::TlsLib { .. }
                | Self::TlsSymlink { .. }
        )
    }

    /// Shared libraries and their links, which need a linker cache refresh
    pub fn is_shared_library(&self) -> bool {
        match self {
            Self::ArchLib { ty, .. } => *ty != ArchLibType::LibglLa,
            Self::TlsLib { .. } | Self::ArchSymlink { .. } | Self::TlsSymlink { .. } => true,
            Self::Placed { ty, .. } => {
                matches!(ty, PlacedType::XlibSharedLib | PlacedType::UtilityLib)
            }
            Self::Symlink { ty, .. } => {
                matches!(ty, SymlinkType::XlibSymlink | SymlinkType::UtilityLibSymlink)
            }
            _ => false,
        }
    }

    pub fn is_opengl_header(&self) -> bool {
        matches!(
            self,
            Self::Placed {
                ty: PlacedType::OpenglHeader,
                ..
            }
        )
    }

    pub fn is_libgl_la(&self) -> bool {
        matches!(
            self,
            Self::ArchLib {
                ty: ArchLibType::LibglLa,
                ..
            }
        )
    }

    pub fn is_dot_desktop(&self) -> bool {
        matches!(self, Self::Plain(PlainType::DotDesktop))
    }
}

/// Device and inode of a file. Two paths with the same id name the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub device: u64,
    pub inode: u64,
}

impl FileId {
    /// Identity of the file at `path`, following symlinks
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            device: meta.dev(),
            inode: meta.ino(),
        })
    }
}

/// One installable file of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    file: String,
    kind: EntryKind,
    mode: u32,
    /// Identity of the package's own copy, if it existed when added
    source_id: Option<FileId>,
    dst: Option<PathBuf>,
}

impl PackageEntry {
    /// Path of the file relative to the package directory
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Final path component of [`file`](Self::file)
    pub fn name(&self) -> &str {
        basename(&self.file)
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    /// Permission bits to install the file with
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn source_id(&self) -> Option<FileId> {
        self.source_id
    }

    /// Absolute installation destination, once computed
    pub fn dst(&self) -> Option<&Path> {
        self.dst.as_deref()
    }

    pub fn set_dst(&mut self, dst: PathBuf) {
        self.dst = Some(dst);
    }

    pub fn path(&self) -> Option<&str> {
        self.kind.path()
    }

    pub fn target(&self) -> Option<&str> {
        self.kind.target()
    }

    /// Whether `path` is the package's own copy of this file
    pub fn is_source_of(&self, path: &Path) -> bool {
        self.source_id.is_some() && self.source_id == FileId::of(path)
    }
}

fn basename(file: &str) -> &str {
    file.rsplit('/').next().unwrap_or(file)
}

/// A driver package read from a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub description: String,
    pub version: String,
    pub kernel_interface_filename: String,
    pub kernel_module_name: String,
    /// Module names to unload before installing
    pub bad_modules: Vec<String>,
    /// Module filenames to remove before installing
    pub bad_module_filenames: Vec<String>,
    pub kernel_module_build_directory: String,
    pub precompiled_kernel_interface_directory: String,
    source_dir: PathBuf,
    entries: Vec<PackageEntry>,
}

impl Package {
    /// Create a package with the given header and no entries.
    ///
    /// `source_dir` is the directory entry files are relative to.
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            description: String::new(),
            version: String::new(),
            kernel_interface_filename: String::new(),
            kernel_module_name: String::new(),
            bad_modules: Vec::new(),
            bad_module_filenames: Vec::new(),
            kernel_module_build_directory: String::new(),
            precompiled_kernel_interface_directory: String::new(),
            source_dir: source_dir.into(),
            entries: Vec::new(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Build directory of the kernel module, resolved against the package directory
    pub fn build_dir(&self) -> PathBuf {
        self.source_dir.join(&self.kernel_module_build_directory)
    }

    /// Append an entry, recording the inode and device of the package's copy of `file`.
    pub fn add_entry(
        &mut self,
        file: impl Into<String>,
        kind: EntryKind,
        mode: u32,
        dst: Option<PathBuf>,
    ) {
        let file = file.into();
        let source_id = FileId::of(&self.source_dir.join(&file));

        self.entries.push(PackageEntry {
            file,
            kind,
            mode,
            source_id,
            dst,
        });
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [PackageEntry] {
        &mut self.entries
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Keep only the entries matching `keep`, preserving order. Returns how many were dropped.
    pub fn retain_entries<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&PackageEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(keep);
        before - self.entries.len()
    }

    pub fn any_entry<F>(&self, pred: F) -> bool
    where
        F: FnMut(&PackageEntry) -> bool,
    {
        self.entries.iter().any(pred)
    }
}
