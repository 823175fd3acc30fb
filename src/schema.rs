//! Table definitions
//!
//! A table is declared with a comma separated list of column declarations and
//! table options, e.g.
//!
//! ```text
//! embedding float[768] distance_metric=cosine, category text, user_id int partition key, +body text, chunk_size=256
//! ```

use crate::error::{Result, VecError};
use crate::types::ScalarType;
use crate::vector::{DistanceMetric, ElementType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MAX_VECTOR_COLUMNS: usize = 16;
const MAX_METADATA_COLUMNS: usize = 16;
const MAX_AUXILIARY_COLUMNS: usize = 16;
const MAX_PARTITION_COLUMNS: usize = 4;
/// Largest vector dimension a column may declare
pub const MAX_DIMENSIONS: usize = 8192;
/// Largest number of rows per chunk
pub const MAX_CHUNK_SIZE: usize = 65536;

/// Names of the hidden columns every table exposes
const RESERVED_NAMES: &[&str] = &["rowid", "distance", "k"];

/// What a declared column stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnKind {
    Vector {
        element: ElementType,
        dimensions: usize,
        metric: DistanceMetric,
    },
    /// Filterable typed scalar
    Metadata(ScalarType),
    /// Opaque payload, returned but never filtered
    Auxiliary(ScalarType),
    /// Rows with different partition values never share a chunk
    PartitionKey(ScalarType),
    /// A unique, non-null text key mapped onto the rowid
    PrimaryKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    /// Position among the columns of the same kind, i.e. the index of this
    /// column's array inside a chunk
    pub slot: usize,
}

/// A parsed table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// All value-carrying columns in declaration order
    pub columns: Vec<ColumnDef>,
    pub chunk_size: usize,
    /// Name of an `integer primary key` column aliasing the rowid. A `text
    /// primary key` is a regular [`ColumnKind::PrimaryKey`] column instead.
    pub rowid_alias: Option<String>,
}

impl TableSchema {
    /// Parse a definition. `default_chunk_size` applies unless a
    /// `chunk_size=` option is present.
    pub fn parse(definition: &str, default_chunk_size: usize) -> Result<Self> {
        if definition.trim().is_empty() {
            return Err(VecError::InvalidDefinition("empty table definition".into()));
        }

        let mut schema = TableSchema {
            columns: Vec::new(),
            chunk_size: check_chunk_size(default_chunk_size as i64)?,
            rowid_alias: None,
        };
        let mut names = HashSet::new();

        for (position, piece) in definition.split(',').enumerate() {
            let tokens = tokenize(piece)?;
            if tokens.is_empty() {
                return Err(VecError::InvalidDefinition(format!(
                    "empty declaration at position {}",
                    position + 1
                )));
            }

            match parse_declaration(&tokens)? {
                Declaration::ChunkSize(size) => schema.chunk_size = size,
                Declaration::RowidAlias(name) => {
                    schema.check_single_primary_key()?;
                    check_name(&name, &mut names)?;
                    schema.rowid_alias = Some(name);
                }
                Declaration::Column(name, kind) => {
                    if kind == ColumnKind::PrimaryKey {
                        schema.check_single_primary_key()?;
                    }
                    check_name(&name, &mut names)?;
                    let slot = schema.count_kind(&kind);
                    schema.columns.push(ColumnDef { name, kind, slot });
                }
            }
        }

        schema.check_limits()?;
        Ok(schema)
    }

    fn check_single_primary_key(&self) -> Result<()> {
        if self.rowid_alias.is_some() || self.primary_key().is_some() {
            return Err(VecError::InvalidDefinition(
                "only one primary key column is allowed".into(),
            ));
        }
        Ok(())
    }

    fn count_kind(&self, kind: &ColumnKind) -> usize {
        self.columns
            .iter()
            .filter(|c| std::mem::discriminant(&c.kind) == std::mem::discriminant(kind))
            .count()
    }

    fn check_limits(&self) -> Result<()> {
        let vectors = self.vector_columns().count();
        if vectors == 0 {
            return Err(VecError::InvalidDefinition(
                "at least one vector column is required".into(),
            ));
        }
        let limits = [
            (vectors, MAX_VECTOR_COLUMNS, "vector"),
            (self.metadata_columns().count(), MAX_METADATA_COLUMNS, "metadata"),
            (self.auxiliary_columns().count(), MAX_AUXILIARY_COLUMNS, "auxiliary"),
            (self.partition_columns().count(), MAX_PARTITION_COLUMNS, "partition key"),
        ];
        for (count, max, what) in limits {
            if count > max {
                return Err(VecError::InvalidDefinition(format!(
                    "too many {} columns: {} (max {})",
                    what, count, max
                )));
            }
        }
        Ok(())
    }

    /// Look up a column by name, case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, index: usize) -> &ColumnDef {
        &self.columns[index]
    }

    /// Whether `name` refers to the rowid (`rowid` or the declared alias)
    pub fn is_rowid(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case("rowid")
            || self
                .rowid_alias
                .as_deref()
                .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
    }

    pub fn vector_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| matches!(c.kind, ColumnKind::Vector { .. }))
    }

    pub fn metadata_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| matches!(c.kind, ColumnKind::Metadata(_)))
    }

    pub fn auxiliary_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| matches!(c.kind, ColumnKind::Auxiliary(_)))
    }

    pub fn partition_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| matches!(c.kind, ColumnKind::PartitionKey(_)))
    }

    /// The `text primary key` column, if declared
    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.kind == ColumnKind::PrimaryKey)
    }
}

fn check_chunk_size(value: i64) -> Result<usize> {
    if value <= 0 || value % 8 != 0 || value as u64 > MAX_CHUNK_SIZE as u64 {
        return Err(VecError::InvalidDefinition(format!(
            "chunk_size must be a positive multiple of 8 no larger than {}, got {}",
            MAX_CHUNK_SIZE, value
        )));
    }
    Ok(value as usize)
}

fn check_name(name: &str, seen: &mut HashSet<String>) -> Result<()> {
    let lower = name.to_ascii_lowercase();
    if RESERVED_NAMES.contains(&lower.as_str()) {
        return Err(VecError::InvalidDefinition(format!(
            "column name '{}' is reserved",
            name
        )));
    }
    if !seen.insert(lower) {
        return Err(VecError::InvalidDefinition(format!(
            "duplicate column name '{}'",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(i64),
    Plus,
    Equals,
    OpenBracket,
    CloseBracket,
}

fn tokenize(piece: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = piece.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '[' => {
                chars.next();
                tokens.push(Token::OpenBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::CloseBracket);
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut end = start + c.len_utf8();
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let text = &piece[start..end];
                let number = text.parse::<i64>().map_err(|_| {
                    VecError::InvalidDefinition(format!("invalid number '{}'", text))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                chars.next();
                let mut end = start + c.len_utf8();
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Ident(piece[start..end].to_string()));
            }
            other => {
                return Err(VecError::InvalidDefinition(format!(
                    "unexpected character '{}'",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

enum Declaration {
    ChunkSize(usize),
    RowidAlias(String),
    Column(String, ColumnKind),
}

fn parse_declaration(tokens: &[Token]) -> Result<Declaration> {
    match tokens {
        [Token::Ident(_), Token::Equals, ..] | [Token::Equals, ..] => parse_table_option(tokens),
        [Token::Plus, rest @ ..] => parse_auxiliary(rest),
        [Token::Ident(name), Token::Ident(ty), Token::OpenBracket, ..] => {
            parse_vector(name, ty, &tokens[2..])
        }
        [Token::Ident(name), Token::Ident(ty), Token::Ident(a), Token::Ident(b)]
            if a.eq_ignore_ascii_case("partition") && b.eq_ignore_ascii_case("key") =>
        {
            match parse_scalar_type(ty) {
                Some(st @ (ScalarType::Integer | ScalarType::Text)) => {
                    Ok(Declaration::Column(name.clone(), ColumnKind::PartitionKey(st)))
                }
                _ => Err(VecError::InvalidDefinition(format!(
                    "invalid partition key type '{}', expected integer or text",
                    ty
                ))),
            }
        }
        [Token::Ident(name), Token::Ident(ty), Token::Ident(a), Token::Ident(b)]
            if a.eq_ignore_ascii_case("primary") && b.eq_ignore_ascii_case("key") =>
        {
            match parse_scalar_type(ty) {
                Some(ScalarType::Integer) => Ok(Declaration::RowidAlias(name.clone())),
                Some(ScalarType::Text) => Ok(Declaration::Column(name.clone(), ColumnKind::PrimaryKey)),
                _ => Err(VecError::InvalidDefinition(format!(
                    "invalid primary key type '{}'",
                    ty
                ))),
            }
        }
        [Token::Ident(name), Token::Ident(ty)] => {
            if is_vector_type(ty) && parse_scalar_type(ty).is_none() {
                return Err(VecError::InvalidDefinition(format!(
                    "vector column '{}' is missing its dimensions",
                    name
                )));
            }
            match parse_scalar_type(ty) {
                Some(st @ (ScalarType::Integer | ScalarType::Float | ScalarType::Text | ScalarType::Boolean)) => {
                    Ok(Declaration::Column(name.clone(), ColumnKind::Metadata(st)))
                }
                _ => Err(VecError::InvalidDefinition(format!(
                    "invalid type '{}' for metadata column '{}'",
                    ty, name
                ))),
            }
        }
        _ => Err(VecError::InvalidDefinition(format!(
            "could not parse declaration '{}'",
            render(tokens)
        ))),
    }
}

fn parse_table_option(tokens: &[Token]) -> Result<Declaration> {
    match tokens {
        [Token::Ident(key), Token::Equals, Token::Number(value)] => {
            if !key.eq_ignore_ascii_case("chunk_size") {
                return Err(VecError::InvalidDefinition(format!(
                    "unknown table option '{}'",
                    key
                )));
            }
            Ok(Declaration::ChunkSize(check_chunk_size(*value)?))
        }
        [Token::Equals, ..] => Err(VecError::InvalidDefinition(
            "table option is missing its key".into(),
        )),
        [Token::Ident(key), Token::Equals] => Err(VecError::InvalidDefinition(format!(
            "table option '{}' is missing its value",
            key
        ))),
        _ => Err(VecError::InvalidDefinition(format!(
            "malformed table option '{}'",
            render(tokens)
        ))),
    }
}

fn parse_auxiliary(tokens: &[Token]) -> Result<Declaration> {
    match tokens {
        [Token::Ident(name), Token::Ident(ty)] => match parse_scalar_type(ty) {
            Some(st @ (ScalarType::Integer | ScalarType::Float | ScalarType::Text | ScalarType::Blob)) => {
                Ok(Declaration::Column(name.clone(), ColumnKind::Auxiliary(st)))
            }
            _ => Err(VecError::InvalidDefinition(format!(
                "invalid type '{}' for auxiliary column '{}'",
                ty, name
            ))),
        },
        [Token::Ident(name)] => Err(VecError::InvalidDefinition(format!(
            "auxiliary column '{}' is missing its type",
            name
        ))),
        _ => Err(VecError::InvalidDefinition(
            "auxiliary column requires a name and a type".into(),
        )),
    }
}

fn parse_vector(name: &str, ty: &str, tokens: &[Token]) -> Result<Declaration> {
    let element = match ty.to_ascii_lowercase().as_str() {
        "float" | "f32" | "float32" => ElementType::Float32,
        "int8" | "i8" => ElementType::Int8,
        "bit" => ElementType::Bit,
        _ => {
            return Err(VecError::InvalidDefinition(format!(
                "invalid vector type '{}'",
                ty
            )))
        }
    };

    let (dimensions, rest) = match tokens {
        [Token::OpenBracket, Token::Number(n), Token::CloseBracket, rest @ ..] => (*n, rest),
        _ => {
            return Err(VecError::InvalidDefinition(format!(
                "vector column '{}' has malformed dimensions",
                name
            )))
        }
    };
    if dimensions <= 0 || dimensions as u64 > MAX_DIMENSIONS as u64 {
        return Err(VecError::InvalidDefinition(format!(
            "vector column '{}' dimension must be between 1 and {}, got {}",
            name, MAX_DIMENSIONS, dimensions
        )));
    }
    let dimensions = dimensions as usize;
    if element == ElementType::Bit && dimensions % 8 != 0 {
        return Err(VecError::InvalidDefinition(format!(
            "bit vector column '{}' dimension must be divisible by 8, got {}",
            name, dimensions
        )));
    }

    let metric = match rest {
        [] => DistanceMetric::default_for(element),
        [Token::Ident(key), Token::Equals, Token::Ident(value)]
            if key.eq_ignore_ascii_case("distance_metric") =>
        {
            let metric = DistanceMetric::parse(value).ok_or_else(|| {
                VecError::InvalidDefinition(format!("unknown distance metric '{}'", value))
            })?;
            if metric == DistanceMetric::Hamming || !metric.supports(element) {
                return Err(VecError::InvalidDefinition(format!(
                    "distance metric '{}' cannot be declared on {} column '{}'",
                    value,
                    element.name(),
                    name
                )));
            }
            metric
        }
        _ => {
            return Err(VecError::InvalidDefinition(format!(
                "malformed options for vector column '{}': '{}'",
                name,
                render(rest)
            )))
        }
    };

    Ok(Declaration::Column(
        name.to_string(),
        ColumnKind::Vector {
            element,
            dimensions,
            metric,
        },
    ))
}

fn is_vector_type(ty: &str) -> bool {
    matches!(
        ty.to_ascii_lowercase().as_str(),
        "f32" | "float32" | "int8" | "i8" | "bit"
    )
}

fn parse_scalar_type(ty: &str) -> Option<ScalarType> {
    match ty.to_ascii_lowercase().as_str() {
        "integer" | "int" => Some(ScalarType::Integer),
        "float" | "double" | "real" => Some(ScalarType::Float),
        "text" => Some(ScalarType::Text),
        "boolean" | "bool" => Some(ScalarType::Boolean),
        "blob" => Some(ScalarType::Blob),
        _ => None,
    }
}

fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match t {
            Token::Ident(s) => s.clone(),
            Token::Number(n) => n.to_string(),
            Token::Plus => "+".into(),
            Token::Equals => "=".into(),
            Token::OpenBracket => "[".into(),
            Token::CloseBracket => "]".into(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(def: &str) -> Result<TableSchema> {
        TableSchema::parse(def, 1024)
    }

    #[test]
    fn test_full_definition() {
        let schema = parse(
            "embedding float[4] distance_metric=cosine, category text, user_id int partition key, +body text, chunk_size=256",
        )
        .unwrap();

        assert_eq!(schema.chunk_size, 256);
        assert_eq!(schema.columns.len(), 4);
        assert_eq!(
            schema.columns[0].kind,
            ColumnKind::Vector {
                element: ElementType::Float32,
                dimensions: 4,
                metric: DistanceMetric::Cosine
            }
        );
        assert_eq!(schema.columns[1].kind, ColumnKind::Metadata(ScalarType::Text));
        assert_eq!(schema.columns[2].kind, ColumnKind::PartitionKey(ScalarType::Integer));
        assert_eq!(schema.columns[3].kind, ColumnKind::Auxiliary(ScalarType::Text));
        assert_eq!(schema.column_index("BODY"), Some(3));
    }

    #[test]
    fn test_slots_count_per_kind() {
        let schema = parse("a float[4], b int8[8], m1 integer, m2 float, +x blob").unwrap();
        let slots: Vec<usize> = schema.columns.iter().map(|c| c.slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_bit_column_defaults_to_hamming() {
        let schema = parse("a bit[64]").unwrap();
        assert!(matches!(
            schema.columns[0].kind,
            ColumnKind::Vector { metric: DistanceMetric::Hamming, .. }
        ));
        assert!(parse("a bit[12]").is_err());
        assert!(parse("a bit[64] distance_metric=cosine").is_err());
    }

    #[test]
    fn test_rowid_alias() {
        let schema = parse("id integer primary key, a float[4]").unwrap();
        assert_eq!(schema.rowid_alias.as_deref(), Some("id"));
        assert!(schema.is_rowid("ID"));
        assert!(schema.is_rowid("rowid"));
        assert_eq!(schema.columns.len(), 1);
    }

    #[test]
    fn test_text_primary_key() {
        let schema = parse("id text primary key, a float[4]").unwrap();
        assert_eq!(schema.rowid_alias, None);
        assert_eq!(schema.primary_key().map(|c| c.name.as_str()), Some("id"));
        assert_eq!(schema.columns[0].kind, ColumnKind::PrimaryKey);
        assert!(!schema.is_rowid("id"));

        for def in [
            "id text primary key, other text primary key, a float[4]",
            "id text primary key, n integer primary key, a float[4]",
            "n integer primary key, id text primary key, a float[4]",
            "id float primary key, a float[4]",
        ] {
            assert!(
                matches!(parse(def), Err(VecError::InvalidDefinition(_))),
                "expected failure for {}",
                def
            );
        }
    }

    #[test]
    fn test_malformed_table_options() {
        for def in [
            "chunk_size 8, a float[4]",
            "chunk_size=, a float[4]",
            "=8, a float[4]",
            "chunk_size=8 extra, a float[4]",
            "chunk_size=12, a float[4]",
            "chunk_size=131072, a float[4]",
            "chunk_size=1152921504606846976, a float[4]",
        ] {
            assert!(
                matches!(parse(def), Err(VecError::InvalidDefinition(_))),
                "expected failure for {}",
                def
            );
        }
        assert!(parse("chunk_size=8, a float[4]").is_ok());
        assert_eq!(
            parse(&format!("chunk_size={}, a float[4]", MAX_CHUNK_SIZE)).unwrap().chunk_size,
            MAX_CHUNK_SIZE
        );
        assert!(matches!(
            TableSchema::parse("a float[4]", 12),
            Err(VecError::InvalidDefinition(_))
        ));
        assert!(matches!(
            TableSchema::parse("a float[4]", 0),
            Err(VecError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_malformed_partition_keys() {
        for def in [
            "p partition key, a float[4]",
            "p int key, a float[4]",
            "p int partition, a float[4]",
            "p blob partition key, a float[4]",
        ] {
            assert!(parse(def).is_err(), "expected failure for {}", def);
        }
        assert!(parse("p int partition key, a float[4]").is_ok());
        assert!(parse("p text partition key, a float[4]").is_ok());
    }

    #[test]
    fn test_malformed_auxiliary_columns() {
        for def in ["+ text, a float[4]", "+aux, a float[4]", "+aux varchar, a float[4]"] {
            assert!(parse(def).is_err(), "expected failure for {}", def);
        }
        for ty in ["text", "integer", "float", "blob"] {
            assert!(parse(&format!("+aux {}, a float[4]", ty)).is_ok());
        }
    }

    #[test]
    fn test_malformed_vector_columns() {
        for def in [
            "a f32, v float[4]",
            "a int8, v float[4]",
            "a float[, v float[4]",
            "a [4], v float[4]",
            "a float[0]",
            "a float[-1]",
            "a float[8193]",
            "a float[1152921504606846976]",
            "a float[4] distance_metric l2",
            "a float[4] distance_metric=",
            "a float[4] distance_metric=invalid",
        ] {
            assert!(
                matches!(parse(def), Err(VecError::InvalidDefinition(_))),
                "expected failure for {}",
                def
            );
        }
        let schema = parse("a float, v float[4]").unwrap();
        assert_eq!(schema.columns[0].kind, ColumnKind::Metadata(ScalarType::Float));
        assert!(parse(&format!("a float[{}]", MAX_DIMENSIONS)).is_ok());
        for metric in ["l2", "cosine", "L1", "dot"] {
            assert!(parse(&format!("a float[4] distance_metric={}", metric)).is_ok());
        }
        assert!(parse("a int8[4]").is_ok());
    }

    #[test]
    fn test_malformed_definitions() {
        for def in [
            "",
            "   ",
            ",",
            "a float[4],",
            ", a float[4]",
            "a float[4],, b float[4]",
            "123",
            "@#$",
        ] {
            assert!(parse(def).is_err(), "expected failure for {:?}", def);
        }
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        assert!(parse("distance float[4]").is_err());
        assert!(parse("a float[4], A text").is_err());
    }
}
