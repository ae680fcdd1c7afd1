//! Header surface extraction.
//!
//! A targeted, macro-driven pattern matcher over C header text, not a C
//! parser. It recognises:
//!
//! * functions declared as `<api_macro> <ret> <call_macro> <name>(<params>);`
//! * `typedef enum [tag] { ... } name;` blocks
//! * `typedef struct [tag] { ... } name;` blocks
//! * `#define <version macro> <integer expression>`
//!
//! Everything else in the header is ignored.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::canonical::{
    AbiVersion, EnumMember, EnumType, FunctionSymbol, Parameter, StructField, StructType,
};
use crate::config::{HeaderConfig, VersionMacros};
use crate::error::{Error, Result};
use crate::expr::{eval_int_expr, eval_literal_expr};
use crate::normalize::{
    collapse_ws, join_continuations, matching_close, normalize_type, split_top_level,
    strip_comments, strip_preprocessor_lines,
};

static TYPEDEF_ENUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btypedef\s+enum(?:\s+[A-Za-z_]\w*)?\s*\{").unwrap());
static TYPEDEF_STRUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btypedef\s+struct(?:\s+[A-Za-z_]\w*)?\s*\{").unwrap());
static TYPEDEF_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*;").unwrap());
static ENUM_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z_]\w*)\s*(?:=\s*(.+))?$").unwrap());
static FUNCTION_POINTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.*?)\(\s*\*\s*([A-Za-z_]\w*)?\s*\)\s*\((.*)\)\s*$").unwrap()
});
static BITFIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(.+?)\s+([A-Za-z_]\w*)\s*:\s*(.+)$").unwrap());
static PLAIN_DECLARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(.*?)([A-Za-z_]\w*)\s*((?:\[[^\]]*\]\s*)*)$").unwrap()
});
static EXTRA_DECLARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\s*]*)([A-Za-z_]\w*)\s*((?:\[[^\]]*\]\s*)*)$").unwrap()
});

/// Words that end a type rather than name a declarator.
const TYPE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "bool",
    "_Bool", "const", "volatile", "restrict", "struct", "enum", "union",
];

/// Everything extracted from one header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderSurface {
    pub abi_version: AbiVersion,
    pub functions: Vec<FunctionSymbol>,
    pub enums: Vec<EnumType>,
    pub structs: Vec<StructType>,
    pub warnings: Vec<String>,
}

/// Name filter for enum or struct typedefs.
#[derive(Debug, Clone)]
struct TypeFilter {
    pattern: Regex,
    ignore: BTreeSet<String>,
}

impl TypeFilter {
    fn accepts(&self, name: &str) -> bool {
        !self.ignore.contains(name) && self.pattern.is_match(name)
    }
}

/// Extracts the exported surface of a header according to one target's
/// header configuration.
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    api_macro: String,
    call_macro: String,
    symbol_prefix: String,
    version_macros: VersionMacros,
    function_pattern: Regex,
    enum_filter: Option<TypeFilter>,
    struct_filter: Option<TypeFilter>,
}

impl HeaderExtractor {
    pub fn new(header: &HeaderConfig) -> Result<Self> {
        let function_pattern = Regex::new(&format!(
            r"(?s){}\s+(.*?)\s+{}\s+([A-Za-z_]\w*)\s*\((.*?)\)\s*;",
            regex::escape(&header.api_macro),
            regex::escape(&header.call_macro)
        ))
        .map_err(|err| Error::config(format!("invalid function pattern: {err}")))?;

        let prefix = &header.symbol_prefix;
        let types = &header.types;
        let filter = |enabled: bool, pattern: String, ignore: &[String]| -> Result<_> {
            if !enabled {
                return Ok(None);
            }
            let pattern = Regex::new(&pattern).map_err(|err| {
                Error::config(format!("invalid type name pattern '{pattern}': {err}"))
            })?;
            Ok(Some(TypeFilter {
                pattern,
                ignore: ignore.iter().cloned().collect(),
            }))
        };

        Ok(Self {
            api_macro: header.api_macro.clone(),
            call_macro: header.call_macro.clone(),
            symbol_prefix: prefix.clone(),
            version_macros: header.version_macros.clone(),
            function_pattern,
            enum_filter: filter(
                types.enable_enums,
                types.enum_pattern(prefix),
                &types.ignore_enums,
            )?,
            struct_filter: filter(
                types.enable_structs,
                types.struct_pattern(prefix),
                &types.ignore_structs,
            )?,
        })
    }

    /// Reads and extracts a header file. An unreadable file fails the target.
    pub fn extract_file(&self, target: &str, path: &Path) -> Result<HeaderSurface> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::extraction(target, format!("cannot read header '{}': {err}", path.display()))
        })?;
        debug!(target_name = target, path = %path.display(), "extracting header");
        Ok(self.extract(&text))
    }

    pub fn extract(&self, text: &str) -> HeaderSurface {
        let uncommented = join_continuations(&strip_comments(text));
        let declarations = strip_preprocessor_lines(&uncommented);
        let mut warnings = Vec::new();

        let abi_version = self.read_version(&uncommented, &mut warnings);
        let functions = self.extract_functions(&declarations);
        if functions.is_empty() {
            warnings.push(format!(
                "no functions matched '{} <ret> {} <name>(...)'",
                self.api_macro, self.call_macro
            ));
        }

        let enums = match &self.enum_filter {
            Some(filter) => extract_enums(&declarations, filter, &mut warnings),
            None => Vec::new(),
        };
        let structs = match &self.struct_filter {
            Some(filter) => extract_structs(&declarations, filter, &mut warnings),
            None => Vec::new(),
        };

        HeaderSurface {
            abi_version,
            functions,
            enums,
            structs,
            warnings,
        }
    }

    fn read_version(&self, text: &str, warnings: &mut Vec<String>) -> AbiVersion {
        let mut component = |name: &str| -> u32 {
            match read_define(text, name) {
                Some(value) => value,
                None => {
                    warnings.push(format!(
                        "version macro '{name}' is missing or not an integer constant; using 0"
                    ));
                    0
                }
            }
        };
        AbiVersion {
            major: component(&self.version_macros.major),
            minor: component(&self.version_macros.minor),
            patch: component(&self.version_macros.patch),
        }
    }

    fn extract_functions(&self, text: &str) -> Vec<FunctionSymbol> {
        let mut functions: Vec<FunctionSymbol> = Vec::new();
        for captures in self.function_pattern.captures_iter(text) {
            let name = &captures[2];
            if !name.starts_with(&self.symbol_prefix) {
                continue;
            }
            let function = FunctionSymbol {
                name: name.to_string(),
                return_type: normalize_type(&captures[1]),
                parameters: parse_parameters(&captures[3]),
            };
            // A redeclaration replaces the earlier one.
            match functions.iter_mut().find(|f| f.name == function.name) {
                Some(existing) => *existing = function,
                None => functions.push(function),
            }
        }
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        functions
    }
}

fn read_define(text: &str, name: &str) -> Option<u32> {
    let pattern = Regex::new(&format!(
        r"(?m)^\s*#\s*define\s+{}\s+(.+?)\s*$",
        regex::escape(name)
    ))
    .ok()?;
    let expr = pattern.captures(text)?.get(1)?.as_str().to_string();
    eval_literal_expr(&expr).and_then(|value| u32::try_from(value).ok())
}

fn parse_parameters(text: &str) -> Vec<Parameter> {
    let text = collapse_ws(text);
    if text.is_empty() || text == "void" {
        return Vec::new();
    }
    split_top_level(&text, ',')
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            if raw == "..." {
                return Parameter::variadic();
            }
            match split_declarator(raw) {
                Some((ty, Some(name))) => Parameter {
                    name,
                    ty,
                    variadic: false,
                },
                Some((ty, None)) => Parameter {
                    name: format!("arg{index}"),
                    ty,
                    variadic: false,
                },
                None => Parameter {
                    name: format!("arg{index}"),
                    ty: normalize_type(raw),
                    variadic: false,
                },
            }
        })
        .collect()
}

/// Splits a declaration into its normalized type and declarator name.
///
/// Returns `None` when no name can be identified, e.g. `unsigned int` or
/// `const char*`.
fn split_declarator(decl: &str) -> Option<(String, Option<String>)> {
    let decl = decl.trim();

    if let Some(caps) = FUNCTION_POINTER.captures(decl) {
        let ty = normalize_type(&format!("{} (*)({})", &caps[1], &caps[3]));
        return Some((ty, caps.get(2).map(|m| m.as_str().to_string())));
    }

    if !decl.contains('(') {
        if let Some(caps) = BITFIELD.captures(decl).filter(|caps| !is_type_word(&caps[2])) {
            let ty = normalize_type(&format!("{} : {}", &caps[1], &caps[3]));
            return Some((ty, Some(caps[2].to_string())));
        }
    }

    let caps = PLAIN_DECLARATOR.captures(decl)?;
    let left = &caps[1];
    let name = &caps[2];
    let ends_in_separator = left.ends_with(|c: char| c.is_whitespace() || c == '*');
    let left_words: Vec<&str> = left
        .split(|c: char| c.is_whitespace() || c == '*')
        .filter(|w| !w.is_empty())
        .collect();
    let left_is_only_qualifiers = left_words
        .iter()
        .all(|w| matches!(*w, "const" | "volatile" | "restrict"));
    let tagged_type = matches!(left_words.last(), Some(&("struct" | "enum" | "union")))
        && !left.trim_end().ends_with('*');

    if !ends_in_separator || left_is_only_qualifiers || tagged_type || is_type_word(name) {
        return None;
    }
    Some((
        normalize_type(&format!("{left}{}", &caps[3])),
        Some(name.to_string()),
    ))
}

fn is_type_word(word: &str) -> bool {
    TYPE_WORDS.contains(&word)
}

/// Finds `typedef <kind> [tag] { body } name;` blocks, matching braces so
/// nested aggregates stay inside the body.
fn typedef_blocks<'a>(text: &'a str, opener: &Regex) -> Vec<(String, &'a str)> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(found) = opener.find_at(text, search_from) {
        let open = found.end() - 1;
        let Some(close) = matching_close(text, open, '{', '}') else {
            break;
        };
        search_from = close + 1;
        if let Some(caps) = TYPEDEF_NAME.captures(&text[close + 1..]) {
            blocks.push((caps[1].to_string(), &text[open + 1..close]));
        }
    }
    blocks
}

fn extract_enums(text: &str, filter: &TypeFilter, warnings: &mut Vec<String>) -> Vec<EnumType> {
    let mut enums: Vec<EnumType> = Vec::new();

    for (name, body) in typedef_blocks(text, &TYPEDEF_ENUM) {
        if !filter.accepts(&name) || enums.iter().any(|e| e.name == name) {
            continue;
        }

        let mut members: Vec<EnumMember> = Vec::new();
        let mut resolved: HashMap<String, i64> = HashMap::new();
        let mut previous: Option<i64> = None;

        for item in split_top_level(body, ',') {
            let Some(caps) = ENUM_ITEM.captures(&item) else {
                warnings.push(format!("enum {name}: skipped unrecognised item '{item}'"));
                continue;
            };
            let member = caps[1].to_string();
            if members.iter().any(|m| m.name == member) {
                warnings.push(format!("enum {name}: duplicate member {member} ignored"));
                continue;
            }
            let value = match caps.get(2) {
                Some(expr) => eval_int_expr(expr.as_str(), |ident| resolved.get(ident).copied()),
                None if members.is_empty() => Some(0),
                None => previous.and_then(|last| last.checked_add(1)),
            };

            match value {
                Some(value) => {
                    resolved.insert(member.clone(), value);
                }
                None => warnings.push(format!(
                    "enum {name}: value of {member} could not be resolved"
                )),
            }
            previous = value;
            members.push(EnumMember {
                name: member,
                value,
            });
        }

        enums.push(EnumType { name, members });
    }

    enums.sort_by(|a, b| a.name.cmp(&b.name));
    enums
}

fn extract_structs(text: &str, filter: &TypeFilter, warnings: &mut Vec<String>) -> Vec<StructType> {
    let mut structs: Vec<StructType> = Vec::new();

    for (name, body) in typedef_blocks(text, &TYPEDEF_STRUCT) {
        if !filter.accepts(&name) || structs.iter().any(|s| s.name == name) {
            continue;
        }
        let mut parsed = Vec::new();
        for decl in split_top_level(body, ';') {
            parse_field_declaration(&decl, &mut parsed);
        }
        // Conditional branches can declare a field twice; the first wins.
        let mut fields: Vec<StructField> = Vec::with_capacity(parsed.len());
        for field in parsed {
            if fields.iter().any(|f| f.name == field.name) {
                warnings.push(format!(
                    "struct {name}: duplicate field '{}' ({}) ignored",
                    field.name, field.ty
                ));
            } else {
                fields.push(field);
            }
        }
        structs.push(StructType { name, fields });
    }

    structs.sort_by(|a, b| a.name.cmp(&b.name));
    structs
}

fn parse_field_declaration(decl: &str, fields: &mut Vec<StructField>) {
    let pieces = split_top_level(decl, ',');
    if pieces.len() > 1 && !decl.contains('(') {
        // `int x, *y, z[2]`: the base type comes from the first declarator.
        let first = PLAIN_DECLARATOR
            .captures(&pieces[0])
            .filter(|_| split_declarator(&pieces[0]).is_some());
        if let Some(caps) = first {
            let base = caps[1].trim_end_matches(|c: char| c.is_whitespace() || c == '*');
            fields.push(StructField {
                name: caps[2].to_string(),
                ty: normalize_type(&format!("{}{}", &caps[1], &caps[3])),
            });
            for piece in &pieces[1..] {
                match EXTRA_DECLARATOR.captures(piece) {
                    Some(extra) => fields.push(StructField {
                        name: extra[2].to_string(),
                        ty: normalize_type(&format!("{base} {}{}", &extra[1], &extra[3])),
                    }),
                    None => fields.push(StructField {
                        name: format!("__unnamed_{}", fields.len()),
                        ty: normalize_type(piece),
                    }),
                }
            }
            return;
        }
    }

    match split_declarator(decl) {
        Some((ty, Some(name))) => fields.push(StructField { name, ty }),
        _ => fields.push(StructField {
            name: format!("__unnamed_{}", fields.len()),
            ty: normalize_type(decl),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypesConfig;

    fn extractor() -> HeaderExtractor {
        HeaderExtractor::new(&HeaderConfig {
            path: "demo.h".into(),
            api_macro: "MY_API".into(),
            call_macro: "MY_CALL".into(),
            symbol_prefix: "my_".into(),
            version_macros: VersionMacros {
                major: "MY_ABI_MAJOR".into(),
                minor: "MY_ABI_MINOR".into(),
                patch: "MY_ABI_PATCH".into(),
            },
            types: TypesConfig::default(),
        })
        .unwrap()
    }

    #[test]
    fn reads_version_macros() {
        let surface = extractor().extract(
            "#define MY_ABI_MAJOR 1\n#define MY_ABI_MINOR (2)\n#define MY_ABI_PATCH 3u\n",
        );
        assert_eq!(surface.abi_version, AbiVersion::new(1, 2, 3));
    }

    #[test]
    fn missing_version_macro_defaults_to_zero_with_warning() {
        let surface = extractor().extract("#define MY_ABI_MAJOR 4\n#define MY_ABI_MINOR 1\n");
        assert_eq!(surface.abi_version, AbiVersion::new(4, 1, 0));
        assert!(surface.warnings.iter().any(|w| w.contains("MY_ABI_PATCH")));
    }

    #[test]
    fn extracts_prefixed_functions_only() {
        let header = r#"
            MY_API int MY_CALL my_open(const char * path, int flags);
            MY_API void MY_CALL other_close(int fd);
            MY_API void MY_CALL my_close(void);
        "#;
        let surface = extractor().extract(header);
        let names: Vec<_> = surface.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["my_close", "my_open"]);

        let open = &surface.functions[1];
        assert_eq!(open.return_type, "int");
        assert_eq!(open.parameters[0].name, "path");
        assert_eq!(open.parameters[0].ty, "const char*");
        assert!(surface.functions[0].parameters.is_empty());
    }

    #[test]
    fn parameters_cover_anonymous_variadic_and_callbacks() {
        let header = "MY_API int MY_CALL my_log(int, const char*, void (*cb)(void* ud, int), char buf[16], ...);";
        let surface = extractor().extract(header);
        let params = &surface.functions[0].parameters;

        assert_eq!(params[0].name, "arg0");
        assert_eq!(params[0].ty, "int");
        assert_eq!(params[1].name, "arg1");
        assert_eq!(params[1].ty, "const char*");
        assert_eq!(params[2].name, "cb");
        assert_eq!(params[2].ty, "void(*)(void* ud, int)");
        assert_eq!(params[3].name, "buf");
        assert_eq!(params[3].ty, "char[16]");
        assert!(params[4].variadic);
    }

    #[test]
    fn comments_and_attributes_do_not_leak_into_types() {
        let header = r#"
            /* MY_API int MY_CALL my_hidden(void); */
            MY_API __attribute__((nonnull)) struct my_ctx * MY_CALL my_ctx_new(
                unsigned int size // bytes
            );
        "#;
        let surface = extractor().extract(header);
        assert_eq!(surface.functions.len(), 1);
        assert_eq!(surface.functions[0].return_type, "struct my_ctx*");
        assert_eq!(surface.functions[0].parameters[0].name, "size");
        assert_eq!(surface.functions[0].parameters[0].ty, "unsigned int");
    }

    #[test]
    fn enum_values_fold_and_continue() {
        let header = r#"
            typedef enum my_color_e {
                MY_RED,
                MY_GREEN = 5,
                MY_BLUE,
                MY_MASK = (1 << 4) | MY_GREEN,
                MY_OTHER = SOME_EXTERNAL,
                MY_AFTER
            } my_color_t;
        "#;
        let surface = extractor().extract(header);
        let members = &surface.enums[0].members;
        let values: Vec<_> = members.iter().map(|m| m.value).collect();
        assert_eq!(
            values,
            vec![Some(0), Some(5), Some(6), Some(21), None, None]
        );
        assert_eq!(surface.enums[0].name, "my_color_t");
        assert!(surface.warnings.iter().any(|w| w.contains("MY_OTHER")));
    }

    #[test]
    fn enums_outside_pattern_are_ignored() {
        let surface = extractor().extract("typedef enum { A, B } foreign_t;");
        assert!(surface.enums.is_empty());
    }

    #[test]
    fn struct_fields_keep_declarators() {
        let header = r#"
            typedef struct my_point_s {
                int x, y;
                char name[16];
                uint32_t flags : 4;
                void (*on_event)(void* user_data, int code);
                union { int i; float f; } value;
                const char* label;
            } my_point_t;
        "#;
        let surface = extractor().extract(header);
        let fields: Vec<_> = surface.structs[0]
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.ty.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("x", "int"),
                ("y", "int"),
                ("name", "char[16]"),
                ("flags", "uint32_t:4"),
                ("on_event", "void(*)(void* user_data, int code)"),
                ("value", "union { int i; float f; }"),
                ("label", "const char*"),
            ]
        );
    }

    #[test]
    fn conditional_redeclarations_keep_the_first() {
        let header = r#"
            typedef struct my_point_s {
                int x;
            #ifdef MY_WIDE
                int64_t z;
            #else
                int32_t z;
            #endif
            } my_point_t;

            typedef enum my_mode_e {
            #if MY_LEGACY
                MY_MODE_FAST = 1,
            #else
                MY_MODE_FAST = 2,
            #endif
                MY_MODE_SAFE
            } my_mode_t;
        "#;
        let surface = extractor().extract(header);
        let point = &surface.structs[0];
        assert_eq!(point.fields.len(), 2);
        assert_eq!(point.fields[1].ty, "int64_t");

        let mode = &surface.enums[0];
        assert_eq!(
            mode.members,
            vec![
                EnumMember { name: "MY_MODE_FAST".into(), value: Some(1) },
                EnumMember { name: "MY_MODE_SAFE".into(), value: Some(2) },
            ]
        );
        assert!(surface.warnings.iter().any(|w| w.contains("duplicate field 'z'")));
        assert!(surface.warnings.iter().any(|w| w.contains("duplicate member MY_MODE_FAST")));
    }

    #[test]
    fn unnamed_fields_get_positional_names() {
        let surface = extractor().extract("typedef struct { int; } my_odd_t;");
        assert_eq!(surface.structs[0].fields[0].name, "__unnamed_0");
    }

    #[test]
    fn no_functions_is_a_warning() {
        let surface = extractor().extract("int nothing_here;");
        assert!(surface.functions.is_empty());
        assert!(surface.warnings.iter().any(|w| w.contains("no functions")));
    }
}
