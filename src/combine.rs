//! Merging per-chunk type guesses into one type per column.

use std::str::FromStr;

use log::debug;

use crate::{
    error::PipelineError,
    schema::{ColumnTypeGuess, ColumnTypeMap, TextualTypeMap},
};

/// Merges chunk maps into the final type map.
///
/// A column's winner is the most general guess any chunk produced for it
/// (see [`ColumnTypeGuess::generality`]). Columns keep the order in which
/// they were first seen across chunks.
pub fn combine(chunks: &[Option<ColumnTypeMap>]) -> Result<ColumnTypeMap, PipelineError> {
    match chunks {
        [] => Err(PipelineError::NoDtypeData(
            "no chunk samples were provided".to_string(),
        )),
        [single] => single.clone().ok_or_else(|| {
            PipelineError::NoDtypeData("the only chunk sample holds no rows".to_string())
        }),
        [None, Some(second)] => Ok(second.clone()),
        _ => {
            let present: Vec<&ColumnTypeMap> = chunks.iter().flatten().collect();
            if present.is_empty() {
                return Err(PipelineError::NoDtypeData(format!(
                    "none of the {} chunk samples holds rows",
                    chunks.len()
                )));
            }
            let mut merged = ColumnTypeMap::new();
            for map in present {
                for (column, guess) in map.iter() {
                    let winner = match merged.get(column) {
                        Some(current) => current.wider(guess),
                        None => guess,
                    };
                    merged.insert(column, winner);
                }
            }
            debug!("Combined {} chunk sample(s) into {}", chunks.len(), merged);
            Ok(merged)
        }
    }
}

/// Like [`combine`], for chunk maps whose type tokens are still text (for
/// example read from JSON written by another run). Every unparseable token
/// is reported, grouped by the first offending column.
pub fn combine_tokens(chunks: &[Option<TextualTypeMap>]) -> Result<ColumnTypeMap, PipelineError> {
    let mut invalid: Vec<(String, Vec<String>)> = Vec::new();
    let mut parsed = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let Some(TextualTypeMap(entries)) = chunk else {
            parsed.push(None);
            continue;
        };
        let mut map = ColumnTypeMap::new();
        for (column, token) in entries {
            match ColumnTypeGuess::from_str(token) {
                Ok(guess) => map.insert(column.as_str(), guess),
                Err(_) => match invalid.iter_mut().find(|(name, _)| name == column) {
                    Some((_, values)) => {
                        if !values.contains(token) {
                            values.push(token.clone());
                        }
                    }
                    None => invalid.push((column.clone(), vec![token.clone()])),
                },
            }
        }
        parsed.push(Some(map));
    }

    if let Some((column, values)) = invalid.into_iter().next() {
        return Err(PipelineError::UnsupportedDtype { column, values });
    }
    combine(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ColumnTypeGuess::*;

    fn map(entries: &[(&str, ColumnTypeGuess)]) -> Option<ColumnTypeMap> {
        Some(
            entries
                .iter()
                .map(|(name, guess)| (name.to_string(), *guess))
                .collect(),
        )
    }

    fn textual(entries: &[(&str, &str)]) -> Option<TextualTypeMap> {
        Some(TextualTypeMap(
            entries
                .iter()
                .map(|(name, token)| (name.to_string(), token.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn empty_input_has_no_data() {
        assert!(matches!(combine(&[]), Err(PipelineError::NoDtypeData(_))));
        assert!(matches!(combine(&[None]), Err(PipelineError::NoDtypeData(_))));
        assert!(matches!(
            combine(&[None, None, None]),
            Err(PipelineError::NoDtypeData(_))
        ));
    }

    #[test]
    fn single_chunk_is_returned_unchanged() {
        let only = map(&[("a", Boolean), ("b", Text)]);
        assert_eq!(combine(&[only.clone()]).unwrap(), only.unwrap());
    }

    #[test]
    fn leading_empty_chunk_is_skipped() {
        let second = map(&[("a", Integer)]);
        assert_eq!(combine(&[None, second.clone()]).unwrap(), second.unwrap());
    }

    #[test]
    fn most_general_guess_wins() {
        let merged = combine(&[
            map(&[("a", Integer), ("b", Boolean)]),
            map(&[("a", Double), ("b", Integer)]),
            map(&[("a", Integer), ("c", VarcharMedium)]),
        ])
        .unwrap();
        assert_eq!(merged.get("a"), Some(Double));
        assert_eq!(merged.get("b"), Some(Integer));
        assert_eq!(merged.get("c"), Some(VarcharMedium));
        assert_eq!(merged.columns().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn text_beats_everything() {
        let merged = combine(&[
            map(&[("x", VarcharShort)]),
            None,
            map(&[("x", Text)]),
            map(&[("x", VarcharMedium)]),
        ])
        .unwrap();
        assert_eq!(merged.get("x"), Some(Text));
    }

    #[test]
    fn textual_chunks_are_parsed_before_merging() {
        let merged = combine_tokens(&[
            textual(&[("a", "int"), ("b", "varchar_short")]),
            textual(&[("a", "float"), ("b", "text")]),
        ])
        .unwrap();
        assert_eq!(merged.get("a"), Some(Double));
        assert_eq!(merged.get("b"), Some(Text));
    }

    #[test]
    fn unknown_tokens_name_the_column() {
        let err = combine_tokens(&[
            textual(&[("a", "integer"), ("b", "decimal")]),
            textual(&[("a", "integer"), ("b", "money")]),
        ])
        .unwrap_err();
        match err {
            PipelineError::UnsupportedDtype { column, values } => {
                assert_eq!(column, "b");
                assert_eq!(values, vec!["decimal".to_string(), "money".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
