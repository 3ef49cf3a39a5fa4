// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

use chrono::NaiveDateTime;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};


/// A labeled time interval within a recording.
///
/// `onset` and `duration` are in seconds relative to recording start.
/// `orig_time` is the absolute timestamp of the recording the interval
/// belongs to, where the source file provides one. Descriptions are free
/// text and NOT unique - many annotations may share one description.
#[derive(Clone,
         Debug,
         PartialEq,
         Serialize,
         Deserialize,
         CopyGetters,
         Getters)]
pub struct Annotation {
  #[getset(get_copy = "pub")]
  onset:       f64,
  #[getset(get_copy = "pub")]
  duration:    f64,
  #[getset(get = "pub")]
  description: String,
  #[getset(get_copy = "pub")]
  orig_time:   Option<NaiveDateTime>,
}

impl Annotation {
  pub fn new(onset: f64,
             duration: f64,
             description: String,
             orig_time: Option<NaiveDateTime>)
             -> Self {
    Self { onset,
           duration,
           description,
           orig_time }
  }
}


/// Columnar table of annotations. Row order is source order.
///
/// All four columns exist even when the table holds zero rows, so column
/// access on an empty table yields empty slices rather than errors.
#[derive(Clone,
         Debug,
         Default,
         PartialEq,
         Serialize,
         Deserialize,
         Getters)]
#[getset(get = "pub")]
pub struct AnnotationTable {
  onsets:       Vec<f64>,
  durations:    Vec<f64>,
  descriptions: Vec<String>,
  orig_times:   Vec<Option<NaiveDateTime>>,
}

impl AnnotationTable {
  /// Builds a table from raw annotation records, one row per record,
  /// preserving input order. No deduplication, no sorting, no validation
  /// of onset or duration ranges takes place.
  pub fn from_records(records: &[Annotation]) -> Self {
    let mut onsets = Vec::with_capacity(records.len());
    let mut durations = Vec::with_capacity(records.len());
    let mut descriptions = Vec::with_capacity(records.len());
    let mut orig_times = Vec::with_capacity(records.len());

    for record in records {
      onsets.push(record.onset());
      durations.push(record.duration());
      descriptions.push(record.description().clone());
      orig_times.push(record.orig_time());
    }

    Self { onsets,
           durations,
           descriptions,
           orig_times }
  }

  pub fn len(&self) -> usize {
    assert!(self.onsets.len() == self.durations.len()
            && self.onsets.len() == self.descriptions.len()
            && self.onsets.len() == self.orig_times.len(),
            "annotation table columns out of sync");
    self.onsets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Reassembles row `idx` as an `Annotation` record, or `None` if the
  /// table has no such row.
  pub fn record(&self, idx: usize) -> Option<Annotation> {
    if idx >= self.len() {
      return None;
    }
    Some(Annotation::new(self.onsets[idx],
                         self.durations[idx],
                         self.descriptions[idx].clone(),
                         self.orig_times[idx]))
  }

  /// Distinct description values, in order of first appearance.
  pub fn unique_descriptions(&self) -> Vec<String> {
    let mut unique = Vec::new();
    for description in &self.descriptions {
      if !unique.contains(description) {
        unique.push(description.clone());
      }
    }
    unique
  }

  /// Onsets of all rows whose description equals `description`, in table
  /// order. An unmatched description yields an empty vector, not an error.
  pub fn onsets_for(&self, description: &str) -> Vec<f64> {
    self.rows_matching(description)
        .map(|idx| self.onsets[idx])
        .collect()
  }

  /// Durations of all rows whose description equals `description`, in
  /// table order. An unmatched description yields an empty vector.
  pub fn durations_for(&self, description: &str) -> Vec<f64> {
    self.rows_matching(description)
        .map(|idx| self.durations[idx])
        .collect()
  }

  /// Origin timestamps of all rows whose description equals `description`,
  /// in table order. An unmatched description yields an empty vector.
  pub fn orig_times_for(&self,
                        description: &str)
                        -> Vec<Option<NaiveDateTime>> {
    self.rows_matching(description)
        .map(|idx| self.orig_times[idx])
        .collect()
  }

  /// Indices of all rows with the given description. Matching is exact and
  /// case sensitive.
  fn rows_matching<'a>(&'a self,
                       description: &'a str)
                       -> impl Iterator<Item = usize> + 'a {
    self.descriptions
        .iter()
        .enumerate()
        .filter(move |(_, current)| current.as_str() == description)
        .map(|(idx, _)| idx)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;
  use pretty_assertions::assert_eq;


  fn stim_records() -> Vec<Annotation> {
    let start = NaiveDate::from_ymd_opt(2021, 5, 29).unwrap()
                                                    .and_hms_opt(9, 59, 44)
                                                    .unwrap();
    vec![Annotation::new(2.0, 0.5, "stim".to_string(), Some(start)),
         Annotation::new(3.2, 0.0, "blink".to_string(), None),
         Annotation::new(5.0, 0.5, "stim".to_string(), Some(start)),]
  }

  #[test]
  fn annotation_test() {
    let annotation = Annotation::new(1.5, 0.25, "rest".to_string(), None);
    assert_eq!(1.5, annotation.onset());
    assert_eq!(0.25, annotation.duration());
    assert_eq!("rest", annotation.description());
    assert_eq!(None, annotation.orig_time());
  }

  #[test]
  fn round_trip_test() {
    let records = stim_records();
    let table = AnnotationTable::from_records(&records);

    assert_eq!(records.len(), table.len());
    assert_eq!(false, table.is_empty());
    for (idx, record) in records.iter().enumerate() {
      assert_eq!(Some(record.clone()), table.record(idx));
    }
    assert_eq!(None, table.record(records.len()));
  }

  #[test]
  fn empty_table_test() {
    let table = AnnotationTable::from_records(&[]);

    assert_eq!(0, table.len());
    assert_eq!(true, table.is_empty());
    // all four columns survive on an empty table
    assert_eq!(&Vec::<f64>::new(), table.onsets());
    assert_eq!(&Vec::<f64>::new(), table.durations());
    assert_eq!(&Vec::<String>::new(), table.descriptions());
    assert_eq!(&Vec::<Option<NaiveDateTime>>::new(), table.orig_times());
    assert_eq!(Vec::<String>::new(), table.unique_descriptions());
    assert_eq!(Vec::<f64>::new(), table.onsets_for("stim"));

    assert_eq!(table, AnnotationTable::default());
  }

  #[test]
  fn column_filter_test() {
    let table = AnnotationTable::from_records(&stim_records());

    assert_eq!(vec![2.0, 5.0], table.onsets_for("stim"));
    assert_eq!(vec![0.5, 0.5], table.durations_for("stim"));
    assert_eq!(vec![3.2], table.onsets_for("blink"));
    assert_eq!(vec![None], table.orig_times_for("blink"));

    let orig_times = table.orig_times_for("stim");
    assert_eq!(2, orig_times.len());
    assert!(orig_times.iter().all(Option::is_some));

    // query misses stay silent
    assert_eq!(Vec::<f64>::new(), table.onsets_for("nonexistent"));
    assert_eq!(Vec::<f64>::new(), table.durations_for("nonexistent"));
    assert_eq!(0, table.orig_times_for("nonexistent").len());
    // matching is case sensitive
    assert_eq!(Vec::<f64>::new(), table.onsets_for("Stim"));
  }

  #[test]
  fn unique_descriptions_test() {
    let table = AnnotationTable::from_records(&stim_records());
    assert_eq!(vec!["stim".to_string(), "blink".to_string()],
               table.unique_descriptions());
  }
}
