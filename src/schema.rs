//! Column storage classes, per-chunk type maps, and the typed table schema.
//!
//! [`ColumnTypeGuess`] is the closed set of storage classes a column can be
//! assigned. [`ColumnTypeMap`] keeps guesses in file column order and is the
//! unit exchanged between the sampler and the combiner (and, as JSON, between
//! separate runs). [`TableSchema`] is the final, renamed and typed description
//! of the empty table the loader fills; it persists as YAML and renders as
//! `CREATE TABLE` DDL.

use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use itertools::Itertools;
use log::warn;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
};

pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";
pub const VARCHAR_SHORT_MAX: usize = 32;
pub const VARCHAR_MEDIUM_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnTypeGuess {
    Integer,
    Double,
    Boolean,
    VarcharShort,
    VarcharMedium,
    Text,
}

impl ColumnTypeGuess {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnTypeGuess::Integer => "integer",
            ColumnTypeGuess::Double => "double",
            ColumnTypeGuess::Boolean => "boolean",
            ColumnTypeGuess::VarcharShort => "varchar_short",
            ColumnTypeGuess::VarcharMedium => "varchar_medium",
            ColumnTypeGuess::Text => "text",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "integer",
            "double",
            "boolean",
            "varchar_short",
            "varchar_medium",
            "text",
        ]
    }

    /// Column type as written in MySQL DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnTypeGuess::Integer => "INTEGER",
            ColumnTypeGuess::Double => "DOUBLE",
            ColumnTypeGuess::Boolean => "BOOLEAN",
            ColumnTypeGuess::VarcharShort => "VARCHAR(32)",
            ColumnTypeGuess::VarcharMedium => "VARCHAR(255)",
            ColumnTypeGuess::Text => "MEDIUMTEXT",
        }
    }

    /// Text class wide enough for a value of `max_len` characters.
    pub fn for_text_length(max_len: usize) -> Self {
        if max_len <= VARCHAR_SHORT_MAX {
            ColumnTypeGuess::VarcharShort
        } else if max_len <= VARCHAR_MEDIUM_MAX {
            ColumnTypeGuess::VarcharMedium
        } else {
            ColumnTypeGuess::Text
        }
    }

    /// Position in the merge order; higher wins. Boolean sits below every
    /// other class so any conflict promotes away from it.
    pub fn generality(&self) -> u8 {
        match self {
            ColumnTypeGuess::Boolean => 0,
            ColumnTypeGuess::Integer => 1,
            ColumnTypeGuess::Double => 2,
            ColumnTypeGuess::VarcharShort => 3,
            ColumnTypeGuess::VarcharMedium => 4,
            ColumnTypeGuess::Text => 5,
        }
    }

    /// The more general of two guesses.
    pub fn wider(self, other: Self) -> Self {
        if other.generality() > self.generality() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ColumnTypeGuess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnTypeGuess {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => Ok(ColumnTypeGuess::Integer),
            "double" | "float" => Ok(ColumnTypeGuess::Double),
            "boolean" | "bool" => Ok(ColumnTypeGuess::Boolean),
            "varchar_short" | "varchar(32)" => Ok(ColumnTypeGuess::VarcharShort),
            "varchar_medium" | "varchar(255)" | "varchar" => Ok(ColumnTypeGuess::VarcharMedium),
            "text" | "mediumtext" => Ok(ColumnTypeGuess::Text),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnTypeGuess::variants().join(", ")
            )),
        }
    }
}

impl Serialize for ColumnTypeGuess {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnTypeGuess {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnTypeGuess::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// Column name to storage class, in file column order. Two maps are equal
/// only if they list the same columns in the same order.
#[derive(Debug, Clone, Default)]
pub struct ColumnTypeMap {
    entries: IndexMap<String, ColumnTypeGuess>,
}

impl ColumnTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the guess for `column`, keeping its original position if it was
    /// already present.
    pub fn insert(&mut self, column: impl Into<String>, guess: ColumnTypeGuess) {
        self.entries.insert(column.into(), guess);
    }

    pub fn get(&self, column: &str) -> Option<ColumnTypeGuess> {
        self.entries.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnTypeGuess)> {
        self.entries.iter().map(|(name, guess)| (name.as_str(), *guess))
    }
}

impl PartialEq for ColumnTypeMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for ColumnTypeMap {}

impl FromIterator<(String, ColumnTypeGuess)> for ColumnTypeMap {
    fn from_iter<I: IntoIterator<Item = (String, ColumnTypeGuess)>>(iter: I) -> Self {
        let mut map = ColumnTypeMap::new();
        for (column, guess) in iter {
            map.insert(column, guess);
        }
        map
    }
}

impl fmt::Display for ColumnTypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .iter()
            .map(|(column, guess)| format!("{column}: {guess}"))
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

impl Serialize for ColumnTypeMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (column, guess) in &self.entries {
            map.serialize_entry(column, guess)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnTypeMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let textual = TextualTypeMap::deserialize(deserializer)?;
        textual
            .0
            .into_iter()
            .map(|(column, token)| {
                ColumnTypeGuess::from_str(&token)
                    .map(|guess| (column, guess))
                    .map_err(|err| de::Error::custom(err.to_string()))
            })
            .collect()
    }
}

/// A chunk type map whose values have not been validated yet, as read from
/// JSON produced by another run. Keeps document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextualTypeMap(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for TextualTypeMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = TextualTypeMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of column names to type tokens")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, token)) = access.next_entry::<String, String>()? {
                    entries.push((column, token));
                }
                Ok(TextualTypeMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub datatype: ColumnTypeGuess,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "name_mapping"
    )]
    pub rename: Option<String>,
}

impl ColumnMeta {
    pub fn output_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl TableSchema {
    /// Builds the schema for `headers`, pairing each raw header with its safe
    /// identifier and its merged type.
    ///
    /// `overrides` is keyed by safe name or raw header and wins over the
    /// merged type. Columns with neither get `fallback`. Override keys that
    /// name no column are logged and ignored.
    pub fn from_types(
        table: impl Into<String>,
        headers: &[String],
        safe_names: &[String],
        types: &ColumnTypeMap,
        overrides: &ColumnTypeMap,
        fallback: ColumnTypeGuess,
    ) -> Self {
        let table = table.into();
        for (column, guess) in overrides.iter() {
            let known = safe_names.iter().any(|safe| safe == column)
                || headers.iter().any(|header| header == column);
            if !known {
                warn!("Type override {column}: {guess} matches no column of table '{table}'");
            }
        }
        let columns = headers
            .iter()
            .zip(safe_names)
            .map(|(header, safe)| ColumnMeta {
                name: header.clone(),
                datatype: overrides
                    .get(safe)
                    .or_else(|| overrides.get(header))
                    .or_else(|| types.get(header))
                    .unwrap_or(fallback),
                rename: (safe != header).then(|| safe.clone()),
            })
            .collect();
        TableSchema {
            table,
            columns,
            schema_version: Some(CURRENT_SCHEMA_VERSION.to_string()),
        }
    }

    /// DDL for the empty, typed table the loader fills. Every column is
    /// nullable because `\N` may appear anywhere.
    pub fn create_table_sql(&self) -> String {
        let body = self
            .columns
            .iter()
            .map(|column| {
                format!(
                    "  {} {} NULL",
                    quote_identifier(column.output_name()),
                    column.datatype.sql_type()
                )
            })
            .join(",\n");
        format!(
            "CREATE TABLE {} (\n{body}\n);\n",
            quote_identifier(&self.table)
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(BufWriter::new(file), self).context("Writing schema YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let schema = serde_yaml::from_reader(BufReader::new(file)).context("Parsing schema YAML")?;
        Ok(schema)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
