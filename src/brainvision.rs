// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

use super::{annotation::Annotation,
            reader::{ChannelInfo, RawRecording},
            unit};
use bvreader::bv_reader::BVFile;
use chrono::{NaiveDate, NaiveDateTime};
use eyre::{eyre, Result};
use std::{fs, path::Path};


/// Decodes the BrainVision file set at `path` (the `.vhdr` header file)
/// into a `RawRecording`.
///
/// Header and data decoding is delegated to the bvreader crate, including
/// scaling to physical units. The channel unit strings and the marker file
/// name are read from the header text since the data reader does not
/// surface them; markers from the `.vmrk` file become the recording's
/// annotation records. A missing marker file leaves the recording without
/// annotations - it is not an error.
pub fn load(path: &Path) -> Result<RawRecording> {
  let path_str = path.to_str().ok_or_else(|| {
                                 eyre!("path is not valid unicode ({})",
                                       path.display())
                               })?;

  let mut file = BVFile::from_header(path_str).map_err(|err| {
                   eyre!("failed to parse BrainVision header: {:?} ({})",
                         err,
                         path.display())
                 })?;
  file.validate().map_err(|err| {
                    eyre!("invalid BrainVision file: {:?} ({})",
                          err,
                          path.display())
                  })?;
  file.bv_data
      .scale_channels(&file.bv_header.channel_info)
      .map_err(|err| {
        eyre!("failed to scale channels to physical units: {:?} ({})",
              err,
              path.display())
      })?;

  // sampling interval is in microseconds
  let sampling_frequency =
    1_000_000.0 / file.bv_header.sampling_interval as f64;

  let header_text = fs::read_to_string(path)?;
  let units = channel_units(&header_text);

  let channels = file.bv_header
                     .channel_info
                     .iter()
                     .enumerate()
                     .map(|(idx, info)| {
                       let dimension = units.get(idx)
                                            .map(String::as_str)
                                            .unwrap_or("µV");
                       let (unit, unit_mul) = unit::parse_dimension(dimension);
                       ChannelInfo::new(info.label.clone(), unit, unit_mul)
                     })
                     .collect();

  let samples = file.bv_data
                    .data
                    .iter()
                    .map(|channel| {
                      channel.iter().map(|&value| value as f64).collect()
                    })
                    .collect();

  let (annotations, start_datetime) = match marker_file(&header_text) {
    Some(name) => {
      let marker_path = path.with_file_name(name.as_str());
      if marker_path.is_file() {
        parse_markers(&fs::read_to_string(&marker_path)?,
                      sampling_frequency)
      } else {
        log::debug!("marker file {} not found, recording has no \
                     annotations",
                    marker_path.display());
        (Vec::new(), None)
      }
    }
    None => (Vec::new(), None),
  };

  RawRecording::new(channels,
                    sampling_frequency,
                    samples,
                    annotations,
                    start_datetime)
}

/// Extracts the per channel unit strings from the `[Channel Infos]` section
/// of the header text. Channel lines have the shape
/// `Ch<n>=<name>,<reference>,<resolution>,<unit>`; a missing unit field
/// means microvolts.
fn channel_units(header_text: &str) -> Vec<String> {
  let mut units = Vec::new();
  let mut in_section = false;

  for line in header_text.lines() {
    let line = line.trim();
    if line.starts_with('[') {
      in_section = line.eq_ignore_ascii_case("[Channel Infos]");
      continue;
    }
    if !in_section || line.is_empty() || line.starts_with(';') {
      continue;
    }

    if let Some((key, value)) = line.split_once('=') {
      if key.starts_with("Ch") {
        let unit = value.split(',').nth(3).unwrap_or("").trim();
        units.push(if unit.is_empty() {
                     "µV".to_string()
                   } else {
                     unit.to_string()
                   });
      }
    }
  }

  units
}

/// Extracts the marker file name from the `[Common Infos]` section of the
/// header text.
fn marker_file(header_text: &str) -> Option<String> {
  let mut in_section = false;

  for line in header_text.lines() {
    let line = line.trim();
    if line.starts_with('[') {
      in_section = line.eq_ignore_ascii_case("[Common Infos]");
      continue;
    }
    if !in_section {
      continue;
    }

    if let Some((key, value)) = line.split_once('=') {
      if key.trim() == "MarkerFile" && !value.trim().is_empty() {
        return Some(value.trim().to_string());
      }
    }
  }

  None
}

/// Parses the `[Marker Infos]` section of a `.vmrk` file.
///
/// Marker lines have the shape
/// `Mk<n>=<type>,<description>,<position>,<points>,<channel>[,<timestamp>]`
/// with 1-based sample positions. Every marker becomes one annotation
/// labeled `<type>/<description>`; the New Segment marker additionally
/// carries the recording start timestamp, which all annotations share as
/// their origin time.
fn parse_markers(marker_text: &str,
                 sampling_frequency: f64)
                 -> (Vec<Annotation>, Option<NaiveDateTime>) {
  let mut rows: Vec<(f64, f64, String)> = Vec::new();
  let mut start_datetime = None;
  let mut in_section = false;

  for line in marker_text.lines() {
    let line = line.trim();
    if line.starts_with('[') {
      in_section = line.eq_ignore_ascii_case("[Marker Infos]");
      continue;
    }
    if !in_section || line.is_empty() || line.starts_with(';') {
      continue;
    }

    let (key, value) = match line.split_once('=') {
      Some(entry) => entry,
      None => continue,
    };
    if !key.starts_with("Mk") {
      continue;
    }

    let fields: Vec<&str> = value.split(',').collect();
    if fields.len() < 4 {
      continue;
    }
    let position = match fields[2].trim().parse::<u64>() {
      Ok(position) => position as f64,
      Err(_) => continue,
    };
    let points = fields[3].trim().parse::<u64>().unwrap_or(0) as f64;

    let onset = (position - 1.0).max(0.0) / sampling_frequency;
    let duration = points / sampling_frequency;
    let description = format!("{}/{}", fields[0].trim(), fields[1].trim());

    if fields[0].trim() == "New Segment" && fields.len() >= 6 {
      start_datetime =
        parse_marker_datetime(fields[5].trim()).or(start_datetime);
    }

    rows.push((onset, duration, description));
  }

  let annotations =
    rows.into_iter()
        .map(|(onset, duration, description)| {
          Annotation::new(onset, duration, description, start_datetime)
        })
        .collect();

  (annotations, start_datetime)
}

/// Parses the New Segment timestamp field, `yyyymmddhhmmssuuuuuu` with six
/// digits of microseconds. Malformed stamps yield `None`.
fn parse_marker_datetime(stamp: &str) -> Option<NaiveDateTime> {
  if stamp.len() < 14 || !stamp.is_ascii() {
    return None;
  }

  let year: i32 = stamp[0..4].parse().ok()?;
  let month: u32 = stamp[4..6].parse().ok()?;
  let day: u32 = stamp[6..8].parse().ok()?;
  let hour: u32 = stamp[8..10].parse().ok()?;
  let minute: u32 = stamp[10..12].parse().ok()?;
  let second: u32 = stamp[12..14].parse().ok()?;
  let micro: u32 = stamp[14..].parse().unwrap_or(0);

  NaiveDate::from_ymd_opt(year, month, day)?.and_hms_micro_opt(hour,
                                                               minute,
                                                               second,
                                                               micro)
}
