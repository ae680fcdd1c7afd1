//! Structural comparison of two snapshots.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

use crate::canonical::{EnumType, FunctionSymbol, Snapshot, StructField, StructType};
use crate::normalize::type_key;

//==============================================================================
// Change Model
//==============================================================================

/// Kind of a single surface change.
///
/// Declaration order is the order changes to the same subject are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    FunctionAdded,
    FunctionRemoved,
    FunctionSignatureChanged,
    EnumAdded,
    EnumRemoved,
    EnumMemberAdded,
    EnumMemberRemoved,
    EnumMemberValueChanged,
    StructAdded,
    StructRemoved,
    StructFieldReordered,
    StructFieldTypeChanged,
    StructTailFieldAdded,
}

/// The surface element family a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeGroup {
    Function,
    Enum,
    Struct,
}

impl ChangeKind {
    pub fn id(&self) -> &'static str {
        match self {
            ChangeKind::FunctionAdded => "function_added",
            ChangeKind::FunctionRemoved => "function_removed",
            ChangeKind::FunctionSignatureChanged => "function_signature_changed",
            ChangeKind::EnumAdded => "enum_added",
            ChangeKind::EnumRemoved => "enum_removed",
            ChangeKind::EnumMemberAdded => "enum_member_added",
            ChangeKind::EnumMemberRemoved => "enum_member_removed",
            ChangeKind::EnumMemberValueChanged => "enum_member_value_changed",
            ChangeKind::StructAdded => "struct_added",
            ChangeKind::StructRemoved => "struct_removed",
            ChangeKind::StructFieldReordered => "struct_field_reordered",
            ChangeKind::StructFieldTypeChanged => "struct_field_type_changed",
            ChangeKind::StructTailFieldAdded => "struct_tail_field_added",
        }
    }

    pub fn group(&self) -> ChangeGroup {
        match self {
            ChangeKind::FunctionAdded
            | ChangeKind::FunctionRemoved
            | ChangeKind::FunctionSignatureChanged => ChangeGroup::Function,
            ChangeKind::EnumAdded
            | ChangeKind::EnumRemoved
            | ChangeKind::EnumMemberAdded
            | ChangeKind::EnumMemberRemoved
            | ChangeKind::EnumMemberValueChanged => ChangeGroup::Enum,
            ChangeKind::StructAdded
            | ChangeKind::StructRemoved
            | ChangeKind::StructFieldReordered
            | ChangeKind::StructFieldTypeChanged
            | ChangeKind::StructTailFieldAdded => ChangeGroup::Struct,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.id() == id)
    }

    pub fn all() -> Vec<Self> {
        vec![
            ChangeKind::FunctionAdded,
            ChangeKind::FunctionRemoved,
            ChangeKind::FunctionSignatureChanged,
            ChangeKind::EnumAdded,
            ChangeKind::EnumRemoved,
            ChangeKind::EnumMemberAdded,
            ChangeKind::EnumMemberRemoved,
            ChangeKind::EnumMemberValueChanged,
            ChangeKind::StructAdded,
            ChangeKind::StructRemoved,
            ChangeKind::StructFieldReordered,
            ChangeKind::StructFieldTypeChanged,
            ChangeKind::StructTailFieldAdded,
        ]
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("Unknown change kind: {s}"))
    }
}

/// One difference between a baseline and a current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    /// Name of the function, enum or struct.
    pub subject: String,
    /// Member, field or signature details.
    pub detail: String,
}

impl Change {
    fn new(kind: ChangeKind, subject: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.to_string(),
            detail: detail.into(),
        }
    }
}

//==============================================================================
// Diff
//==============================================================================

/// Computes the ordered change list from `baseline` to `current`.
///
/// Functions come first, then enums, then structs; each group is sorted by
/// subject name, then by change kind and detail.
pub fn diff(baseline: &Snapshot, current: &Snapshot) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_functions(&baseline.functions, &current.functions, &mut changes);
    diff_enums(&baseline.enums, &current.enums, &mut changes);
    diff_structs(&baseline.structs, &current.structs, &mut changes);

    changes.sort_by(|a, b| {
        (a.kind.group(), &a.subject, a.kind, &a.detail).cmp(&(
            b.kind.group(),
            &b.subject,
            b.kind,
            &b.detail,
        ))
    });
    changes
}

fn by_name<'a, T>(items: &'a [T], name: impl Fn(&T) -> &str) -> BTreeMap<&'a str, &'a T> {
    items.iter().map(|item| (name(item), item)).collect()
}

fn diff_functions(baseline: &[FunctionSymbol], current: &[FunctionSymbol], out: &mut Vec<Change>) {
    let old = by_name(baseline, |f| &f.name);
    let new = by_name(current, |f| &f.name);

    for (name, before) in &old {
        match new.get(name) {
            None => out.push(Change::new(
                ChangeKind::FunctionRemoved,
                name,
                before.signature(),
            )),
            Some(after) if before.signature_key() != after.signature_key() => {
                out.push(Change::new(
                    ChangeKind::FunctionSignatureChanged,
                    name,
                    format!("{} -> {}", before.signature(), after.signature()),
                ))
            }
            Some(_) => {}
        }
    }
    for (name, after) in &new {
        if !old.contains_key(name) {
            out.push(Change::new(ChangeKind::FunctionAdded, name, after.signature()));
        }
    }
}

fn render_value(value: Option<i64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

fn diff_enums(baseline: &[EnumType], current: &[EnumType], out: &mut Vec<Change>) {
    let old = by_name(baseline, |e| &e.name);
    let new = by_name(current, |e| &e.name);

    for (name, before) in &old {
        let Some(after) = new.get(name) else {
            out.push(Change::new(
                ChangeKind::EnumRemoved,
                name,
                format!("{} members", before.members.len()),
            ));
            continue;
        };

        let old_members = by_name(&before.members, |m| &m.name);
        let new_members = by_name(&after.members, |m| &m.name);
        for (member, old_member) in &old_members {
            match new_members.get(member) {
                None => out.push(Change::new(
                    ChangeKind::EnumMemberRemoved,
                    name,
                    *member,
                )),
                // Resolved against unresolved counts as a change.
                Some(new_member) if new_member.value != old_member.value => {
                    out.push(Change::new(
                        ChangeKind::EnumMemberValueChanged,
                        name,
                        format!(
                            "{member}: {} -> {}",
                            render_value(old_member.value),
                            render_value(new_member.value)
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
        for (member, new_member) in &new_members {
            if !old_members.contains_key(member) {
                out.push(Change::new(
                    ChangeKind::EnumMemberAdded,
                    name,
                    format!("{member} = {}", render_value(new_member.value)),
                ));
            }
        }
    }
    for (name, after) in &new {
        if !old.contains_key(name) {
            out.push(Change::new(
                ChangeKind::EnumAdded,
                name,
                format!("{} members", after.members.len()),
            ));
        }
    }
}

fn render_fields(fields: &[StructField]) -> String {
    let fields: Vec<String> = fields
        .iter()
        .map(|f| format!("{}: {}", f.name, f.ty))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn diff_structs(baseline: &[StructType], current: &[StructType], out: &mut Vec<Change>) {
    let old = by_name(baseline, |s| &s.name);
    let new = by_name(current, |s| &s.name);

    for (name, before) in &old {
        match new.get(name) {
            None => out.push(Change::new(
                ChangeKind::StructRemoved,
                name,
                render_fields(&before.fields),
            )),
            Some(after) => diff_struct_layout(before, after, out),
        }
    }
    for (name, after) in &new {
        if !old.contains_key(name) {
            out.push(Change::new(
                ChangeKind::StructAdded,
                name,
                render_fields(&after.fields),
            ));
        }
    }
}

/// Compares two versions of one struct.
///
/// When every baseline field survives and new fields only follow the last
/// baseline field, every applicable kind is reported. Any other shape is a
/// removal plus an addition.
fn diff_struct_layout(before: &StructType, after: &StructType, out: &mut Vec<Change>) {
    let name = before.name.as_str();
    let positions: Option<Vec<usize>> = before
        .fields
        .iter()
        .map(|field| after.fields.iter().position(|f| f.name == field.name))
        .collect();

    let compatible_shape = positions.as_ref().is_some_and(|positions| {
        let kept: BTreeSet<usize> = positions.iter().copied().collect();
        let last = positions.iter().copied().max();
        (0..after.fields.len())
            .filter(|idx| !kept.contains(idx))
            .all(|idx| last.is_none_or(|last| idx > last))
    });

    let Some(positions) = positions.filter(|_| compatible_shape) else {
        let detail = format!(
            "{} -> {}",
            render_fields(&before.fields),
            render_fields(&after.fields)
        );
        out.push(Change::new(ChangeKind::StructRemoved, name, detail.clone()));
        out.push(Change::new(ChangeKind::StructAdded, name, detail));
        return;
    };

    if positions.iter().enumerate().any(|(idx, &pos)| idx != pos) {
        let order = |fields: &[StructField]| -> String {
            fields
                .iter()
                .filter(|f| before.fields.iter().any(|b| b.name == f.name))
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.push(Change::new(
            ChangeKind::StructFieldReordered,
            name,
            format!("{} -> {}", order(&before.fields), order(&after.fields)),
        ));
    }

    for (field, &pos) in before.fields.iter().zip(&positions) {
        let moved = &after.fields[pos];
        if type_key(&field.ty) != type_key(&moved.ty) {
            out.push(Change::new(
                ChangeKind::StructFieldTypeChanged,
                name,
                format!("{}: {} -> {}", field.name, field.ty, moved.ty),
            ));
        }
    }

    for field in &after.fields[before.fields.len()..] {
        out.push(Change::new(
            ChangeKind::StructTailFieldAdded,
            name,
            format!("{}: {}", field.name, field.ty),
        ));
    }
}
