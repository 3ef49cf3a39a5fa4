// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

use super::{annotation::Annotation, brainvision, edf};
use chrono::NaiveDateTime;
use eyre::{bail, ensure, eyre, Result};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::path::Path;


/// Supported recording file formats. The set is closed; dispatch happens on
/// the file extension and anything unknown is rejected up front.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Format {
  BrainVision,
  Edf,
}

impl Format {
  /// Determines the format of the file at `path` from its extension.
  /// Extensions match ASCII case insensitively; an unsupported extension
  /// is an error naming that extension.
  pub fn from_path(path: &Path) -> Result<Self> {
    let extension =
      path.extension()
          .unwrap_or_default()
          .to_str()
          .ok_or_else(|| {
            eyre!("file extension is not valid unicode ({})", path.display())
          })?;

    match extension.to_lowercase().as_str() {
      "vhdr" => Ok(Self::BrainVision),
      "edf" => Ok(Self::Edf),
      other => bail!("unsupported file extension '.{}' ({})",
                     other,
                     path.display()),
    }
  }
}


/// Metadata record of one channel: its name, the FIFF code of its physical
/// unit and the decimal exponent its stored values carry relative to that
/// unit.
#[derive(Clone,
         Debug,
         PartialEq,
         Serialize,
         Deserialize,
         CopyGetters,
         Getters)]
pub struct ChannelInfo {
  #[getset(get = "pub")]
  name:     String,
  #[getset(get_copy = "pub")]
  unit:     i32,
  #[getset(get_copy = "pub")]
  unit_mul: i32,
}

impl ChannelInfo {
  pub fn new(name: String, unit: i32, unit_mul: i32) -> Self {
    Self { name,
           unit,
           unit_mul }
  }
}


/// Decoded content of one recording file: channel metadata, sampling
/// frequency, channel major sample buffers in physical units, the raw
/// annotation records in source order and the recording start datetime
/// where the file provides one.
#[derive(Clone, Debug, Default, PartialEq, CopyGetters, Getters)]
pub struct RawRecording {
  #[getset(get = "pub")]
  channels:           Vec<ChannelInfo>,
  #[getset(get_copy = "pub")]
  sampling_frequency: f64,
  #[getset(get = "pub")]
  samples:            Vec<Vec<f64>>,
  #[getset(get = "pub")]
  annotations:        Vec<Annotation>,
  #[getset(get_copy = "pub")]
  start_datetime:     Option<NaiveDateTime>,
}

impl RawRecording {
  /// Assembles a recording from already decoded parts. This is the seam
  /// the format readers feed and the way synthetic recordings are built.
  pub fn new(channels: Vec<ChannelInfo>,
             sampling_frequency: f64,
             samples: Vec<Vec<f64>>,
             annotations: Vec<Annotation>,
             start_datetime: Option<NaiveDateTime>)
             -> Result<Self> {
    ensure!(channels.len() == samples.len(),
            "expected one sample buffer per channel, got {} channels and \
             {} buffers",
            channels.len(),
            samples.len());
    ensure!(sampling_frequency >= 0.0,
            "sampling frequency must not be negative");
    if let Some(first) = samples.first() {
      ensure!(samples.iter().all(|buffer| buffer.len() == first.len()),
              "all channels must hold the same number of samples");
    }

    Ok(Self { channels,
              sampling_frequency,
              samples,
              annotations,
              start_datetime })
  }

  /// Decodes the recording file at `path`, dispatching on its extension.
  pub fn load(path: &Path) -> Result<(Format, Self)> {
    ensure!(path.exists() && path.is_file(),
            "path does not exist or is not a valid file ({})",
            path.display());

    let format = Format::from_path(path)?;
    let raw = match format {
      Format::BrainVision => {
        log::info!("loading {} with the BrainVision reader", path.display());
        brainvision::load(path)?
      }
      Format::Edf => {
        log::info!("loading {} with the EDF reader", path.display());
        edf::load(path)?
      }
    };

    Ok((format, raw))
  }

  pub fn num_channels(&self) -> usize {
    self.channels.len()
  }

  /// Number of samples per channel. All channels hold the same number of
  /// samples, which `new` enforces on construction.
  pub fn num_samples(&self) -> usize {
    self.samples.first().map_or(0, Vec::len)
  }

  pub fn channel_names(&self) -> Vec<String> {
    self.channels
        .iter()
        .map(|channel| channel.name().clone())
        .collect()
  }
}
