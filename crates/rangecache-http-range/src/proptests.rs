use crate::{coalesce_ranges, format_range_header, parse_content_range, ByteRange};
use proptest::prelude::*;

fn ranges_strategy() -> impl Strategy<Value = Vec<ByteRange>> {
    prop::collection::vec((0u64..1 << 40, 0u64..1 << 20), 1..16).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(start, len)| ByteRange::new(start, start + len))
            .collect()
    })
}

proptest! {
    #[test]
    fn coalesced_ranges_are_sorted_and_separated(input in ranges_strategy()) {
        let mut ranges = input.clone();
        coalesce_ranges(&mut ranges);

        for pair in ranges.windows(2) {
            // Abutting ranges must have been merged.
            prop_assert!(pair[0].end + 1 < pair[1].start);
        }
        for r in &input {
            prop_assert!(ranges.iter().any(|c| c.start <= r.start && r.end <= c.end));
        }
        let input_bytes: u64 = input.iter().map(|r| r.len()).sum();
        prop_assert!(ranges.iter().map(|r| r.len()).sum::<u64>() <= input_bytes);
    }

    #[test]
    fn formatted_header_lists_every_range_in_order(mut ranges in ranges_strategy()) {
        coalesce_ranges(&mut ranges);
        let header = format_range_header(&ranges).unwrap();
        let list = header.strip_prefix("bytes=").unwrap();
        let parsed: Vec<ByteRange> = list
            .split(',')
            .map(|part| {
                let (start, end) = part.split_once('-').unwrap();
                ByteRange::new(start.parse().unwrap(), end.parse().unwrap())
            })
            .collect();
        prop_assert_eq!(parsed, ranges);
    }

    #[test]
    fn content_range_accepts_both_separators(start in 0u64..1 << 40, len in 0u64..1 << 20, slack in 1u64..1024) {
        let end = start + len;
        let total = end + slack;
        let spaced = parse_content_range(&format!("bytes {start}-{end}/{total}")).unwrap();
        let equals = parse_content_range(&format!("bytes={start}-{end}/{total}")).unwrap();
        prop_assert_eq!(spaced, equals);
        prop_assert_eq!(spaced.start, start);
        prop_assert_eq!(spaced.end, end);
        prop_assert_eq!(spaced.total, Some(total));
    }
}
