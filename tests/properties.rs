use admission_ingest::{
    data::Value,
    dataset::{ParseMode, TabularDataset},
    encoding::{EncodingResolver, FixedDetector},
    quality::{Rule, RuleOutcome},
};
use encoding_rs::{UTF_8, WINDOWS_1252};
use proptest::prelude::*;

fn line_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>().prop_filter("no newline", |b| *b != b'\n'), 0..24)
}

proptest! {
    #[test]
    fn resolver_preserves_line_count(lines in prop::collection::vec(line_bytes(), 0..30)) {
        let mut bytes = b"IDADE,CGC_HOSP\n".to_vec();
        for line in &lines {
            bytes.extend_from_slice(line);
            bytes.push(b'\n');
        }
        let resolver = EncodingResolver::new(vec![WINDOWS_1252])
            .with_detector(Box::new(FixedDetector(UTF_8)));
        let resolved = resolver.resolve(&bytes).expect("resolve");
        prop_assert_eq!(resolved.report.total_lines, lines.len() + 1);
        prop_assert_eq!(resolved.text.matches('\n').count(), lines.len() + 1);
    }

    #[test]
    fn clean_lines_round_trip_unchanged(lines in prop::collection::vec("[A-Za-z0-9 ,;]{1,20}", 1..20)) {
        let text = lines.join("\n");
        let resolver = EncodingResolver::default().with_detector(Box::new(FixedDetector(UTF_8)));
        let resolved = resolver.resolve(text.as_bytes()).expect("resolve");
        prop_assert!(resolved.lossless);
        prop_assert_eq!(resolved.text, text);
    }

    #[test]
    fn incompleteness_stays_within_bounds(
        cells in prop::collection::vec(prop::sample::select(vec!["NA", "", " ", "J189", "0"]), 0..60)
    ) {
        let mut dataset = TabularDataset::new(vec!["DIAG_SECUN".to_string()]).expect("dataset");
        for cell in &cells {
            dataset.push_row(vec![Value::from_raw(cell)]).expect("row");
        }
        let finding = Rule::Incompleteness { column: "DIAG_SECUN".to_string() }.evaluate(&dataset);
        match finding.outcome {
            RuleOutcome::Metric { absent, total, percentage } => {
                prop_assert_eq!(total, cells.len());
                prop_assert!(absent <= total);
                prop_assert!((0.0..=100.0).contains(&percentage));
                let expected = cells.iter().filter(|c| c.trim().is_empty() || **c == "NA").count();
                prop_assert_eq!(absent, expected);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn lenient_parse_keeps_every_row(widths in prop::collection::vec(1usize..6, 0..25)) {
        let mut text = String::from("A,B,C\n");
        for width in &widths {
            let row = (0..*width).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
            text.push_str(&row);
            text.push('\n');
        }
        let dataset = TabularDataset::parse(&text, b',', ParseMode::Lenient).expect("parse");
        prop_assert_eq!(dataset.row_count(), widths.len());
        prop_assert!(dataset.rows().iter().all(|row| row.len() == 3));
        let stats = dataset.parse_stats();
        prop_assert_eq!(stats.padded_rows, widths.iter().filter(|w| **w < 3).count());
        prop_assert_eq!(stats.truncated_rows, widths.iter().filter(|w| **w > 3).count());
    }
}
