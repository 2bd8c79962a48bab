use crate::boundary::Boundary;

use super::model::{Batch, Record};

// ---------------------------------------------------------------------------
// Spatial predicate: which records fall strictly inside the boundary
// ---------------------------------------------------------------------------

/// Whether a record's point lies strictly inside `boundary`.
///
/// Depends only on the coordinates; a missing `value` never excludes a record.
pub fn is_within(record: &Record, boundary: &Boundary) -> bool {
    boundary.contains(record.longitude, record.latitude)
}

/// Consume a batch and return the records inside `boundary`, in read order.
///
/// Each point is tested on its own, so splitting a file into different chunk
/// sizes yields the same overall selection.
pub fn filter_batch(batch: Batch, boundary: &Boundary) -> Vec<Record> {
    batch
        .records
        .into_iter()
        .filter(|r| is_within(r, boundary))
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::boundary::BoundarySource;
    use crate::data::model::MeasuredValue;

    fn square() -> Boundary {
        BoundarySource::bounding_box(0.0, 0.0, 1.0, 1.0)
            .unwrap()
            .load()
            .unwrap()
    }

    fn record(id: usize, value: MeasuredValue, lon: f64, lat: f64) -> Record {
        Record {
            id: id.to_string(),
            value,
            longitude: lon,
            latitude: lat,
            timestamp: String::new(),
        }
    }

    #[test]
    fn keeps_order_and_ignores_value_validity() {
        let batch = Batch {
            offset: 0,
            records: vec![
                record(0, MeasuredValue::Number(1.0), 0.2, 0.2),
                record(1, MeasuredValue::Number(2.0), 2.0, 0.2),
                record(2, MeasuredValue::Missing, 0.7, 0.9),
                record(3, MeasuredValue::Number(4.0), 0.0, 0.5),
            ],
        };
        let kept = filter_batch(batch, &square());
        let ids: Vec<&str> = kept.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2"]);
        assert!(kept[1].value.is_missing());
    }

    #[test]
    fn empty_batch_yields_nothing() {
        let batch = Batch {
            offset: 12,
            records: Vec::new(),
        };
        assert!(filter_batch(batch, &square()).is_empty());
    }

    proptest! {
        #[test]
        fn filtering_is_idempotent_and_chunk_invariant(
            points in prop::collection::vec((-0.5f64..1.5, -0.5f64..1.5), 0..200),
            chunk in 1usize..50,
        ) {
            let boundary = square();
            let records: Vec<Record> = points
                .iter()
                .enumerate()
                .map(|(i, (x, y))| record(i, MeasuredValue::Number(i as f64), *x, *y))
                .collect();

            let whole = Batch { offset: 0, records: records.clone() };
            let once = filter_batch(whole.clone(), &boundary);
            let twice = filter_batch(whole, &boundary);
            prop_assert_eq!(&once, &twice);

            let mut chunked = Vec::new();
            for (n, slice) in records.chunks(chunk).enumerate() {
                let batch = Batch { offset: (n * chunk) as u64, records: slice.to_vec() };
                chunked.extend(filter_batch(batch, &boundary));
            }
            prop_assert_eq!(once, chunked);
        }
    }
}
