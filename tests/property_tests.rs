//! Property-based tests for the manifest parser
//!
//! These tests verify:
//! - Header fields are taken verbatim
//! - An entry carries a path and a target exactly when its type has them
//! - Entry names are the last path component of the file
//! - Truncated headers and unknown type tokens report the failing line

use proptest::prelude::*;
use strum::IntoEnumIterator;

use drvinst::package::{
    Arch, ArchLibType, ArchSymlinkType, PlacedType, PlainType, SymlinkType, TlsClass, TypeTag,
};
use drvinst::{ManifestError, parse};

fn all_tags() -> Vec<TypeTag> {
    let mut tags: Vec<TypeTag> = Vec::new();
    tags.extend(PlainType::iter().map(TypeTag::Plain));
    tags.extend(PlacedType::iter().map(TypeTag::Placed));
    tags.extend(ArchLibType::iter().map(TypeTag::ArchLib));
    tags.extend(SymlinkType::iter().map(TypeTag::Symlink));
    tags.extend(ArchSymlinkType::iter().map(TypeTag::ArchSymlink));
    tags.extend([TypeTag::TlsLib, TypeTag::TlsSymlink, TypeTag::BinSymlink]);
    tags
}

fn tag_strategy() -> impl Strategy<Value = TypeTag> {
    proptest::sample::select(all_tags())
}

/// A single whitespace-free manifest token
fn token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.+-]{1,12}"
}

/// Header text: no newlines, not empty, no leading/trailing blanks
fn header_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ()._-]{0,30}[A-Za-z0-9)]"
}

fn header(description: &str, version: &str) -> String {
    format!(
        "{description}\n{version}\nnv-linux.o\nnvidia\nnvnet\nnvnet.o\nusr/src/nv\nusr/src/nv/precompiled\n"
    )
}

/// Manifest line for `tag`, with every field the type requires
fn entry_line(file: &str, mode: u32, tag: TypeTag, path: &str, target: &str) -> String {
    let mut line = format!("{} {:04o} {}", file, mode, tag);
    if tag.accepts_arch() {
        line.push(' ');
        line.push_str(&Arch::Native.to_string());
    }
    if tag.accepts_class() {
        line.push(' ');
        line.push_str(&TlsClass::New.to_string());
    }
    if tag.has_path() {
        line.push(' ');
        line.push_str(path);
    }
    if tag.has_target() {
        line.push(' ');
        line.push_str(target);
    }
    line
}

proptest! {
    #[test]
    fn header_fields_are_verbatim(description in header_text(), version in header_text()) {
        let pkg = parse(header(&description, &version).as_bytes(), "/nonexistent").unwrap();
        prop_assert_eq!(&pkg.description, &description);
        prop_assert_eq!(&pkg.version, &version);
        prop_assert_eq!(pkg.num_entries(), 0);
    }

    #[test]
    fn path_and_target_follow_the_type(
        tag in tag_strategy(),
        dirs in proptest::collection::vec(token(), 0..3),
        name in token(),
        mode in 0u32..0o7777,
        path in token(),
        target in token(),
    ) {
        let mut file = dirs.join("/");
        if !file.is_empty() {
            file.push('/');
        }
        file.push_str(&name);

        let manifest = format!(
            "{}{}\n",
            header("Driver", "1.0"),
            entry_line(&file, mode, tag, &format!("/{}", path), &target)
        );
        let pkg = parse(manifest.as_bytes(), "/nonexistent").unwrap();
        prop_assert_eq!(pkg.num_entries(), 1);

        let entry = &pkg.entries()[0];
        prop_assert_eq!(entry.kind().tag(), Some(tag));
        prop_assert_eq!(entry.file(), file.as_str());
        prop_assert_eq!(entry.name(), name.as_str());
        prop_assert_eq!(entry.mode(), mode);
        prop_assert_eq!(entry.path().is_some(), tag.has_path());
        prop_assert_eq!(entry.target().is_some(), tag.has_target());
        if tag.has_target() {
            prop_assert_eq!(entry.target(), Some(target.as_str()));
        }
        prop_assert!(entry.dst().is_none());
    }

    #[test]
    fn truncated_header_reports_missing_line(keep in 0usize..8) {
        let full = header("Driver", "1.0");
        let truncated: String = full.lines().take(keep).map(|l| format!("{l}\n")).collect();
        let err = parse(truncated.as_bytes(), "/nonexistent").unwrap_err();
        prop_assert_eq!(err, ManifestError::Invalid { line: keep + 1 });
    }

    #[test]
    fn unknown_type_reports_its_line(
        valid in 0usize..5,
        bogus in "[A-Z]{3,10}_BOGUS",
    ) {
        let mut manifest = header("Driver", "1.0");
        for i in 0..valid {
            manifest.push_str(&format!("file{} 0644 UTILITY_BINARY\n", i));
        }
        manifest.push_str(&format!("broken 0644 {}\n", bogus));

        let err = parse(manifest.as_bytes(), "/nonexistent").unwrap_err();
        prop_assert_eq!(err, ManifestError::Invalid { line: 8 + valid + 1 });
    }
}
