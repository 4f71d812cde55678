mod common;

use common::{TestWorkspace, tsv};
use encoding_rs::UTF_8;
use loadprep::{
    cancel::CancellationToken,
    combine::combine,
    io_utils::QuotingMode,
    patterns::default_null_tokens,
    sampler::{SampleOptions, SampleStrategy, sample},
    schema::ColumnTypeGuess,
};

fn options(row_cap: usize, chunk_cap: usize) -> SampleOptions {
    SampleOptions {
        separator: b'\t',
        quote: b'"',
        quoting: QuotingMode::Minimal,
        skip_rows: 0,
        row_cap,
        chunk_cap,
        null_tokens: default_null_tokens(),
        encoding: UTF_8,
    }
}

/// Header plus `rows` data lines; `value` is an integer for the first half
/// and a float for the second half.
fn mixed_file(workspace: &TestWorkspace, rows: usize) -> std::path::PathBuf {
    let mut lines = vec!["id\tvalue\tflag".to_string()];
    for idx in 0..rows {
        let value = if idx < rows / 2 {
            idx.to_string()
        } else {
            format!("{idx}.5")
        };
        lines.push(format!("{idx}\t{value}\t{}", idx % 2));
    }
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    workspace.write("mixed.tsv", &tsv(&refs))
}

#[test]
fn small_file_is_sampled_in_one_pass() {
    let workspace = TestWorkspace::new();
    let path = mixed_file(&workspace, 10);
    let result = sample(&path, &options(100, 5), &CancellationToken::new()).expect("sample");
    assert_eq!(result.strategy, SampleStrategy::WholeFile);
    assert_eq!(result.chunks.len(), 1);
    assert_eq!(result.rows_read, 10);
    let types = combine(&result.chunks).expect("combine");
    assert_eq!(types.get("id"), Some(ColumnTypeGuess::Integer));
    assert_eq!(types.get("value"), Some(ColumnTypeGuess::Double));
    assert_eq!(types.get("flag"), Some(ColumnTypeGuess::Boolean));
}

#[test]
fn chunked_sampling_matches_whole_file_types() {
    let workspace = TestWorkspace::new();
    let path = mixed_file(&workspace, 40);
    let chunked = sample(&path, &options(10, 0), &CancellationToken::new()).expect("chunked");
    assert_eq!(
        chunked.strategy,
        SampleStrategy::Chunked {
            chunk_rows: 10,
            chunks: 5
        }
    );
    // 41 lines make five planned chunks, but only four hold rows.
    assert_eq!(chunked.chunks.len(), 4);
    assert_eq!(
        chunked.chunks[0].as_ref().and_then(|map| map.get("value")),
        Some(ColumnTypeGuess::Integer)
    );
    assert_eq!(
        chunked.chunks[3].as_ref().and_then(|map| map.get("value")),
        Some(ColumnTypeGuess::Double)
    );

    let whole = sample(&path, &options(10, 1), &CancellationToken::new()).expect("whole");
    assert_eq!(whole.strategy, SampleStrategy::WholeFile);
    assert_eq!(
        combine(&chunked.chunks).expect("combine chunked"),
        combine(&whole.chunks).expect("combine whole")
    );
}

#[test]
fn chunk_cap_limits_rows_read() {
    let workspace = TestWorkspace::new();
    let path = mixed_file(&workspace, 40);
    let capped = sample(&path, &options(10, 2), &CancellationToken::new()).expect("sample");
    assert_eq!(capped.chunks.len(), 2);
    assert_eq!(capped.rows_read, 20);
    let types = combine(&capped.chunks).expect("combine");
    assert_eq!(types.get("value"), Some(ColumnTypeGuess::Integer));
}

#[test]
fn zero_row_cap_reads_only_the_header() {
    let workspace = TestWorkspace::new();
    let path = mixed_file(&workspace, 5);
    let result = sample(&path, &options(0, 5), &CancellationToken::new()).expect("sample");
    assert_eq!(result.strategy, SampleStrategy::HeaderOnly);
    assert_eq!(result.header, vec!["id", "value", "flag"]);
    assert_eq!(result.chunks, vec![None]);
    assert_eq!(result.rows_read, 0);
}

#[test]
fn header_only_file_yields_empty_chunk() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("empty.tsv", "a\tb\n");
    let result = sample(&path, &options(100, 5), &CancellationToken::new()).expect("sample");
    assert_eq!(result.chunks, vec![None]);
    assert!(combine(&result.chunks).is_err());
}

#[test]
fn leading_lines_and_nulls_are_skipped() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "report.tsv",
        &tsv(&[
            "# exported 2024-01-01",
            "# second comment",
            "gene\tscore\tempty",
            "BRCA1\t\\N\t",
            "TP53\t0.25\t\\N",
            "EGFR\tna\t.",
        ]),
    );
    let mut opts = options(100, 5);
    opts.skip_rows = 2;
    let result = sample(&path, &opts, &CancellationToken::new()).expect("sample");
    assert_eq!(result.header, vec!["gene", "score", "empty"]);
    let types = combine(&result.chunks).expect("combine");
    assert_eq!(types.get("gene"), Some(ColumnTypeGuess::VarcharShort));
    assert_eq!(types.get("score"), Some(ColumnTypeGuess::Double));
    assert_eq!(types.get("empty"), None);
}

#[test]
fn quoted_fields_keep_embedded_separators() {
    let workspace = TestWorkspace::new();
    let long = "x".repeat(40);
    let path = workspace.write(
        "quoted.csv",
        &format!("name,comment\n\"Smith, J\",\"{long}\"\n\"Doe\",short\n"),
    );
    let mut opts = options(100, 5);
    opts.separator = b',';
    let result = sample(&path, &opts, &CancellationToken::new()).expect("sample");
    let types = combine(&result.chunks).expect("combine");
    assert_eq!(types.get("name"), Some(ColumnTypeGuess::VarcharShort));
    assert_eq!(types.get("comment"), Some(ColumnTypeGuess::VarcharMedium));
}

#[test]
fn cancelled_sampling_fails() {
    let workspace = TestWorkspace::new();
    let path = mixed_file(&workspace, 5);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = sample(&path, &options(100, 5), &cancel).unwrap_err();
    assert!(err.to_string().contains("cancelled"));
}
