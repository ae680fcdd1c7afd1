//! Helpers shared by the integration tests.

#![allow(dead_code)]

use abi_sign::canonical::{
    AbiVersion, EnumMember, EnumType, FunctionSymbol, Parameter, Snapshot, SnapshotPolicy,
    StructField, StructType,
};
use std::fs;
use std::path::{Path, PathBuf};

pub const FIXTURE_REPO: &str = "tests/data/repo";

pub fn fixture(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(path)
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let dest = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &dest);
        } else {
            fs::copy(entry.path(), dest).unwrap();
        }
    }
}

/// A scratch copy of the fixture repository.
pub fn scratch_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    copy_dir(
        &Path::new(env!("CARGO_MANIFEST_DIR")).join(FIXTURE_REPO),
        dir.path(),
    );
    dir
}

pub fn empty_snapshot(version: AbiVersion) -> Snapshot {
    Snapshot {
        target: "demo".into(),
        tool_version: "test".into(),
        generated_at_utc: "2026-01-01T00:00:00Z".into(),
        abi_version: version,
        policy: SnapshotPolicy {
            symbol_prefix: "my_".into(),
            ..SnapshotPolicy::default()
        },
        functions: vec![],
        enums: vec![],
        structs: vec![],
        binding_symbols: None,
        binary_exports: None,
        warnings: vec![],
    }
}

pub fn function(name: &str, ret: &str, params: &[(&str, &str)]) -> FunctionSymbol {
    FunctionSymbol {
        name: name.into(),
        return_type: ret.into(),
        parameters: params
            .iter()
            .map(|(n, t)| Parameter {
                name: n.to_string(),
                ty: t.to_string(),
                variadic: false,
            })
            .collect(),
    }
}

pub fn enumeration(name: &str, members: &[(&str, Option<i64>)]) -> EnumType {
    EnumType {
        name: name.into(),
        members: members
            .iter()
            .map(|(n, v)| EnumMember {
                name: n.to_string(),
                value: *v,
            })
            .collect(),
    }
}

pub fn structure(name: &str, fields: &[(&str, &str)]) -> StructType {
    StructType {
        name: name.into(),
        fields: fields
            .iter()
            .map(|(n, t)| StructField {
                name: n.to_string(),
                ty: t.to_string(),
            })
            .collect(),
    }
}

/// A small but complete surface at version 1.2.3.
pub fn sample_snapshot() -> Snapshot {
    let mut snapshot = empty_snapshot(AbiVersion::new(1, 2, 3));
    snapshot.functions = vec![
        function("my_close", "void", &[("ctx", "my_context_t*")]),
        function("my_open", "my_context_t*", &[("path", "const char*")]),
    ];
    snapshot.enums = vec![enumeration(
        "my_color_t",
        &[("MY_RED", Some(0)), ("MY_GREEN", Some(1))],
    )];
    snapshot.structs = vec![structure("my_point_t", &[("x", "int"), ("y", "int")])];
    snapshot
}
