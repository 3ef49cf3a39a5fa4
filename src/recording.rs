// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

use super::{annotation::AnnotationTable,
            reader::{Format, RawRecording},
            unit};
use chrono::NaiveDateTime;
use eyre::Result;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap,
          path::{Path, PathBuf}};


/// Channel subset selector for data queries.
///
/// Unknown channel names are silently dropped during resolution - asking
/// for channels a recording does not have yields an empty selection, never
/// an error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChannelSelection {
  All,
  Single(String),
  Multiple(Vec<String>),
}

impl ChannelSelection {
  /// Resolves the selection against an ordered channel name list, keeping
  /// selection order for explicit lists.
  fn resolve(&self, names: &[String]) -> Vec<usize> {
    match self {
      Self::All => (0..names.len()).collect(),
      Self::Single(name) => names.iter()
                                 .position(|current| current == name)
                                 .into_iter()
                                 .collect(),
      Self::Multiple(selected) => {
        selected.iter()
                .filter_map(|name| {
                  names.iter().position(|current| current == name)
                })
                .collect()
      }
    }
  }
}

impl From<&str> for ChannelSelection {
  fn from(name: &str) -> Self {
    Self::Single(name.to_string())
  }
}

impl From<String> for ChannelSelection {
  fn from(name: String) -> Self {
    Self::Single(name)
  }
}

impl From<Vec<String>> for ChannelSelection {
  fn from(names: Vec<String>) -> Self {
    Self::Multiple(names)
  }
}

impl From<&[&str]> for ChannelSelection {
  fn from(names: &[&str]) -> Self {
    Self::Multiple(names.iter().map(|name| name.to_string()).collect())
  }
}


/// One windowed query result: the selected channel names, the time values
/// of the returned samples and the channel major sample matrix. The time
/// axis is always carried along with the samples.
#[derive(Clone,
         Debug,
         Default,
         PartialEq,
         Serialize,
         Deserialize,
         Getters)]
#[getset(get = "pub")]
pub struct DataSlice {
  channels: Vec<String>,
  times:    Vec<f64>,
  samples:  Vec<Vec<f64>>,
}

impl DataSlice {
  /// Number of samples per channel in this slice.
  pub fn num_samples(&self) -> usize {
    assert!(self.samples
                .iter()
                .all(|channel| channel.len() == self.times.len()),
            "number of timestamps not equivalent to number of samples");
    self.times.len()
  }

  pub fn is_empty(&self) -> bool {
    self.num_samples() == 0
  }
}


/// Holds one loaded EEG recording and provides access to it.
///
/// All metadata is derived once at construction time; the object is
/// immutable afterwards. A `Recording::default()` is the inert variant
/// with every metadata field empty and a zero row annotation table whose
/// columns remain queryable.
#[derive(Debug, Default, CopyGetters, Getters)]
pub struct Recording {
  #[getset(get = "pub")]
  path:               Option<PathBuf>,
  #[getset(get_copy = "pub")]
  format:             Option<Format>,
  #[getset(get = "pub")]
  raw:                RawRecording,
  #[getset(get = "pub")]
  channel_names:      Vec<String>,
  #[getset(get = "pub")]
  times:              Vec<f64>,
  #[getset(get_copy = "pub")]
  tmin:               f64,
  #[getset(get_copy = "pub")]
  tmax:               f64,
  #[getset(get_copy = "pub")]
  sampling_frequency: f64,
  #[getset(get = "pub")]
  annotations:        AnnotationTable,
}

impl Recording {
  // CONSTRUCTION ---------------------------------------------------------- //
  /// Loads the recording file at `path`, dispatching on its extension.
  /// Any reader failure aborts construction; nothing is caught or retried.
  pub fn load(path: &Path) -> Result<Self> {
    let (format, raw) = RawRecording::load(path)?;
    Ok(Self::assemble(Some(path.to_owned()), Some(format), raw))
  }

  /// Builds a recording from an already decoded `RawRecording`, e.g. a
  /// synthetic one.
  pub fn from_raw(raw: RawRecording) -> Self {
    Self::assemble(None, None, raw)
  }

  fn assemble(path: Option<PathBuf>,
              format: Option<Format>,
              raw: RawRecording)
              -> Self {
    let channel_names = raw.channel_names();
    let sampling_frequency = raw.sampling_frequency();

    let times: Vec<f64> = if sampling_frequency > 0.0 {
      (0..raw.num_samples()).map(|idx| idx as f64 / sampling_frequency)
                            .collect()
    } else {
      Vec::new()
    };
    let (tmin, tmax) = time_bounds(&times);

    let annotations = AnnotationTable::from_records(raw.annotations());

    Self { path,
           format,
           raw,
           channel_names,
           times,
           tmin,
           tmax,
           sampling_frequency,
           annotations }
  }

  // METADATA FUNCTIONS ---------------------------------------------------- //
  /// Distinct event descriptions occurring in the annotation table.
  pub fn event_names(&self) -> Vec<String> {
    self.annotations.unique_descriptions()
  }

  /// Human readable physical unit per channel, resolved through the fixed
  /// unit table. Fails on a channel whose unit code is not registered.
  pub fn channel_units(&self) -> Result<HashMap<String, &'static str>> {
    let mut units = HashMap::with_capacity(self.raw.num_channels());
    for channel in self.raw.channels() {
      units.insert(channel.name().clone(),
                   unit::unit_to_human(channel.unit())?);
    }
    Ok(units)
  }

  /// Decimal unit multiplier exponent per channel.
  pub fn channel_unit_multipliers(&self) -> HashMap<String, i32> {
    self.raw
        .channels()
        .iter()
        .map(|channel| (channel.name().clone(), channel.unit_mul()))
        .collect()
  }

  // DATA QUERY FUNCTIONS -------------------------------------------------- //
  /// Returns the signal matrix for the selected channels.
  ///
  /// With `period` unset, all samples are returned. With
  /// `period = [start, end]`, `start` is clamped to the recording minimum
  /// and `end` to the recording maximum time, and the window covers the
  /// samples closest to the clamped bounds. A requested end which reaches
  /// or exceeds the recording's true maximum extends the window through
  /// the final sample, so nearest index rounding never truncates the
  /// upper edge.
  pub fn data(&self,
              period: Option<[f64; 2]>,
              picks: ChannelSelection)
              -> DataSlice {
    let indices = picks.resolve(&self.channel_names);
    let (start, stop) = match period {
      Some(period) => self.sample_range(period),
      None => (0, self.times.len()),
    };

    DataSlice { channels: indices.iter()
                                 .map(|&idx| self.channel_names[idx].clone())
                                 .collect(),
                times:    self.times[start..stop].to_vec(),
                samples:  indices.iter()
                                 .map(|&idx| {
                                   self.raw.samples()[idx][start..stop]
                                                           .to_vec()
                                 })
                                 .collect(), }
  }

  /// Returns one signal matrix per annotation row whose description
  /// equals `event_name`, in table order, each covering
  /// `[onset - pre, onset + duration + post]` clamped to the recording
  /// bounds. An unmatched event name yields an empty vector, not an
  /// error.
  pub fn data_by_event(&self,
                       event_name: &str,
                       pre: f64,
                       post: f64,
                       picks: ChannelSelection)
                       -> Vec<DataSlice> {
    let onsets = self.event_onset_times(event_name);
    let durations = self.event_durations(event_name);

    onsets.iter()
          .zip(durations.iter())
          .map(|(&onset, &duration)| {
            let tmin = (onset - pre).max(self.tmin);
            let tmax = (onset + duration + post).min(self.tmax);
            self.data(Some([tmin, tmax]), picks.clone())
          })
          .collect()
  }

  // EVENT QUERY FUNCTIONS ------------------------------------------------- //
  /// Onset times of all events with the given name, in table order.
  pub fn event_onset_times(&self, event_name: &str) -> Vec<f64> {
    self.annotations.onsets_for(event_name)
  }

  /// Durations of all events with the given name, in table order.
  pub fn event_durations(&self, event_name: &str) -> Vec<f64> {
    self.annotations.durations_for(event_name)
  }

  /// Origin timestamps of all events with the given name, in table order.
  pub fn event_timestamps(&self,
                          event_name: &str)
                          -> Vec<Option<NaiveDateTime>> {
    self.annotations.orig_times_for(event_name)
  }

  // ----------------------------------------------------------------------- //
  /// Maps a requested time period to a half open sample index range. The
  /// requested bounds are clamped to the recording bounds first, then
  /// snapped to the closest sample indices; an end at or past the true
  /// maximum opens the range through the final sample.
  fn sample_range(&self, period: [f64; 2]) -> (usize, usize) {
    if self.times.is_empty() {
      return (0, 0);
    }

    let tmin = period[0].max(self.tmin);
    let tmax = period[1].min(self.tmax);

    let start = self.closest_sample(tmin);
    let stop = if period[1] >= self.tmax {
      self.times.len()
    } else {
      self.closest_sample(tmax)
    };

    (start, stop.max(start))
  }

  /// Index of the sample whose time is closest to `time`; the first such
  /// index on ties.
  fn closest_sample(&self, time: f64) -> usize {
    let mut closest = 0;
    let mut best = f64::INFINITY;
    for (idx, &current) in self.times.iter().enumerate() {
      let distance = (current - time).abs();
      if distance < best {
        best = distance;
        closest = idx;
      }
    }
    closest
  }
}

/// Minimum and maximum of a time axis, by scanning. An empty axis has
/// bounds (0, 0).
fn time_bounds(times: &[f64]) -> (f64, f64) {
  if times.is_empty() {
    return (0.0, 0.0);
  }
  times.iter()
       .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &time| {
         (lo.min(time), hi.max(time))
       })
}
