use crate::model::Record;
use crate::report::ReportRow;

/// Zip records, accelerator values and remote values by task index.
///
/// The row count is the shortest of the three; the number of batch entries
/// left without a row is returned alongside the rows.
pub fn merge(records: &[Record], accel: &[u32], remote: &[u32]) -> (Vec<ReportRow>, usize) {
    let rows: Vec<ReportRow> = records
        .iter()
        .zip(accel)
        .zip(remote)
        .map(|((record, &accel_value), &remote_value)| ReportRow {
            record: record.clone(),
            accel_value,
            remote_value,
        })
        .collect();
    let dropped = records.len() - rows.len();
    (rows, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(format!("p{}", i), i as i32, 60.0)).collect()
    }

    #[test]
    fn test_equal_lengths_keep_every_row() {
        let (rows, dropped) = merge(&records(3), &[1, 2, 3], &[42, 99, 7]);
        assert_eq!(dropped, 0);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].record.name, "p1");
        assert_eq!(rows[1].accel_value, 2);
        assert_eq!(rows[1].remote_value, 99);
    }

    #[test]
    fn test_short_remote_array_drops_tail() {
        let (rows, dropped) = merge(&records(5), &[1, 2, 3, 4, 5], &[9, 8]);
        assert_eq!(rows.len(), 2);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn test_short_accel_array_drops_tail() {
        let (rows, dropped) = merge(&records(3), &[1], &[9, 8, 7]);
        assert_eq!(rows.len(), 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_longer_result_arrays_are_truncated() {
        let (rows, dropped) = merge(&records(2), &[1, 2, 3, 4], &[5, 6, 7]);
        assert_eq!(rows.len(), 2);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_empty_batch() {
        let (rows, dropped) = merge(&[], &[], &[]);
        assert!(rows.is_empty());
        assert_eq!(dropped, 0);
    }
}
