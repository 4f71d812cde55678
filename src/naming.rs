//! Safe SQL identifiers for column headers and table names.
//!
//! [`normalize_name`] is pure and idempotent: its output only holds
//! `[a-z0-9_]`, never starts with a digit and never contains `__`.

use std::{collections::HashMap, path::Path, sync::LazyLock};

use clap::ValueEnum;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

static CAMEL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid camel-case regex"));
static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid camel-case regex"));

const KNOWN_EXTENSIONS: &[&str] = &["gz", "bz2", "tsv", "csv", "txt", "vcf"];
const LOWERCASE_AS_IS: &[&str] = &["uniprot_id", "grch"];

/// Acronyms kept whole instead of being split at case changes.
pub fn default_acronyms() -> Vec<String> {
    ["uniprot", "grch", "refseq"]
        .iter()
        .map(|acronym| acronym.to_string())
        .collect()
}

/// What to do when two headers normalize to the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NameCollisionPolicy {
    /// Append `_2`, `_3`, ... to later duplicates.
    #[default]
    Suffix,
    /// Fail with [`PipelineError::ColumnNameCollision`].
    Error,
}

pub fn normalize_name(raw: &str, acronyms: &[String]) -> String {
    let mut name = raw.replace(' ', "_").replace('(', "_").replace(')', "");
    name = name.replace('%', "pc");
    for acronym in acronyms {
        name = force_casing(&name, acronym);
    }
    if LOWERCASE_AS_IS
        .iter()
        .any(|exact| name.eq_ignore_ascii_case(exact))
    {
        return name.to_ascii_lowercase();
    }

    let split = CAMEL_WORD.replace_all(&name, "${1}_${2}");
    let split = CAMEL_BOUNDARY.replace_all(&split, "${1}_${2}");
    let lowered = split.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    let mut name = kept.trim_start_matches(|c: char| c.is_ascii_digit()).to_string();
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    name
}

/// Rewrites every case-insensitive occurrence of `acronym` in `name` with the
/// acronym's own casing.
fn force_casing(name: &str, acronym: &str) -> String {
    if acronym.is_empty() || !acronym.is_ascii() {
        return name.to_string();
    }
    let needle = acronym.to_ascii_lowercase();
    let haystack = name.to_ascii_lowercase();
    let mut out = String::with_capacity(name.len());
    let mut last = 0;
    for (start, _) in haystack.match_indices(&needle) {
        out.push_str(&name[last..start]);
        out.push_str(acronym);
        last = start + needle.len();
    }
    out.push_str(&name[last..]);
    out
}

/// Normalizes every header, keeping order. Headers that normalize to nothing
/// become `column_<position>`.
pub fn normalize_names(
    raws: &[String],
    acronyms: &[String],
    policy: NameCollisionPolicy,
) -> Result<Vec<String>, PipelineError> {
    let mut taken: HashMap<String, usize> = HashMap::with_capacity(raws.len());
    let mut names = Vec::with_capacity(raws.len());

    for (idx, raw) in raws.iter().enumerate() {
        let mut name = normalize_name(raw, acronyms);
        if name.is_empty() {
            name = format!("column_{}", idx + 1);
            warn!("Header {raw:?} has no usable characters; using '{name}'");
        }
        if let Some(&owner) = taken.get(&name) {
            match policy {
                NameCollisionPolicy::Error => {
                    return Err(PipelineError::ColumnNameCollision {
                        first: raws[owner].clone(),
                        second: raw.clone(),
                        normalized: name,
                    });
                }
                NameCollisionPolicy::Suffix => {
                    let mut counter = 2;
                    let mut candidate = format!("{name}_{counter}");
                    while taken.contains_key(&candidate) {
                        counter += 1;
                        candidate = format!("{name}_{counter}");
                    }
                    warn!(
                        "Header {raw:?} collides with {:?} as '{name}'; renamed to '{candidate}'",
                        raws[owner]
                    );
                    name = candidate;
                }
            }
        }
        taken.insert(name.clone(), idx);
        names.push(name);
    }
    Ok(names)
}

/// Table name derived from a file name, e.g. `GeneInfo.tsv.gz` → `gene_info`.
pub fn table_name_for(path: &Path, acronyms: &[String]) -> String {
    let mut stem = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    while let Some((base, ext)) = stem.rsplit_once('.') {
        if base.is_empty() || !KNOWN_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) {
            break;
        }
        stem = base.to_string();
    }
    let name = normalize_name(&stem, acronyms);
    if name.is_empty() {
        "table".to_string()
    } else {
        name
    }
}
