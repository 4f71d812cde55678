use loadprep::{
    combine::{combine, combine_tokens},
    error::PipelineError,
    schema::{ColumnTypeGuess, ColumnTypeMap, TextualTypeMap},
};

fn parse_chunks(json: &str) -> Vec<Option<TextualTypeMap>> {
    serde_json::from_str(json).expect("chunk JSON")
}

#[test]
fn json_chunks_with_empty_sentinel_are_merged() {
    let chunks = parse_chunks(
        r#"[
            {"id": "integer", "score": "integer", "label": "varchar_short"},
            null,
            {"id": "integer", "score": "double", "label": "text", "extra": "boolean"}
        ]"#,
    );
    let merged = combine_tokens(&chunks).expect("combine");
    assert_eq!(
        merged.columns().collect::<Vec<_>>(),
        vec!["id", "score", "label", "extra"]
    );
    assert_eq!(merged.get("score"), Some(ColumnTypeGuess::Double));
    assert_eq!(merged.get("label"), Some(ColumnTypeGuess::Text));
    assert_eq!(merged.get("extra"), Some(ColumnTypeGuess::Boolean));
}

#[test]
fn first_chunk_empty_returns_second_verbatim() {
    let chunks = parse_chunks(r#"[null, {"b": "double", "a": "boolean"}]"#);
    let merged = combine_tokens(&chunks).expect("combine");
    assert_eq!(merged.columns().collect::<Vec<_>>(), vec!["b", "a"]);
}

#[test]
fn unsupported_token_is_reported_with_column() {
    let chunks = parse_chunks(r#"[{"a": "integer"}, {"a": "uuid"}]"#);
    let err = combine_tokens(&chunks).unwrap_err();
    assert!(matches!(
        &err,
        PipelineError::UnsupportedDtype { column, values } if column == "a" && values == &["uuid"]
    ));
    assert!(err.to_string().contains("unsupported dtypes"));
}

#[test]
fn merged_map_serializes_in_column_order() {
    let first: ColumnTypeMap = [
        ("pos".to_string(), ColumnTypeGuess::Integer),
        ("ref".to_string(), ColumnTypeGuess::VarcharShort),
    ]
    .into_iter()
    .collect();
    let second: ColumnTypeMap = [
        ("ref".to_string(), ColumnTypeGuess::VarcharMedium),
        ("pos".to_string(), ColumnTypeGuess::Integer),
    ]
    .into_iter()
    .collect();
    let merged = combine(&[Some(first), Some(second), None]).expect("combine");
    assert_eq!(
        serde_json::to_string(&merged).expect("json"),
        r#"{"pos":"integer","ref":"varchar_medium"}"#
    );
}

#[test]
fn boolean_loses_to_any_other_class() {
    for other in [
        ColumnTypeGuess::Integer,
        ColumnTypeGuess::Double,
        ColumnTypeGuess::VarcharShort,
        ColumnTypeGuess::VarcharMedium,
        ColumnTypeGuess::Text,
    ] {
        let chunks: [Option<ColumnTypeMap>; 3] = [
            Some([("c".to_string(), ColumnTypeGuess::Boolean)].into_iter().collect()),
            Some([("c".to_string(), other)].into_iter().collect()),
            Some([("c".to_string(), ColumnTypeGuess::Boolean)].into_iter().collect()),
        ];
        let merged = combine(&chunks).expect("combine");
        assert_eq!(merged.get("c"), Some(other));
    }
}
