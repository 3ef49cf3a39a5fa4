// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

use super::{annotation::Annotation,
            reader::{ChannelInfo, RawRecording},
            unit};
use chrono::{NaiveDate, NaiveDateTime};
use eyre::{ensure, eyre, Result};
use std::{fmt::Display,
          fs::File,
          io::{BufReader, Read},
          path::Path,
          str::FromStr};


/// Signal label reserved by EDF+ for the timestamped annotation lists.
const ANNOTATION_LABEL: &str = "EDF Annotations";


/// Fixed width EDF main header. Field widths are part of the format: the
/// header occupies the first 256 bytes of the file.
#[derive(Clone, Debug, PartialEq)]
pub struct EdfHeader {
  pub version:         String, // 8 bytes
  pub patient_id:      String, // 80 bytes
  pub recording_id:    String, // 80 bytes
  pub start_date:      String, // 8 bytes, dd.mm.yy
  pub start_time:      String, // 8 bytes, hh.mm.ss
  pub header_bytes:    usize,  // 8 bytes
  pub num_records:     i64,    // 8 bytes, -1 if unknown
  pub record_duration: f64,    // 8 bytes, seconds
  pub num_signals:     usize,  // 4 bytes
}

/// Fixed width per signal header, 256 bytes per signal, stored column wise
/// after the main header.
#[derive(Clone, Debug, PartialEq)]
pub struct EdfSignalHeader {
  pub label:              String,
  pub physical_dimension: String,
  pub physical_min:       f64,
  pub physical_max:       f64,
  pub digital_min:        i64,
  pub digital_max:        i64,
  pub samples_per_record: usize,
}

impl EdfSignalHeader {
  pub fn is_annotation(&self) -> bool {
    self.label == ANNOTATION_LABEL
  }

  pub fn sample_frequency(&self, record_duration: f64) -> f64 {
    self.samples_per_record as f64 / record_duration
  }

  pub fn gain(&self) -> f64 {
    (self.physical_max - self.physical_min)
    / (self.digital_max - self.digital_min) as f64
  }

  pub fn offset(&self) -> f64 {
    self.physical_max - self.gain() * self.digital_max as f64
  }
}


/// Decodes the EDF file at `path` into a `RawRecording`.
///
/// All data records are materialized and converted to physical units via
/// each signal's gain and offset. `EDF Annotations` signals (EDF+) are
/// excluded from the data channels; their timestamped annotation lists
/// become the recording's annotation records. Files whose data signals
/// disagree on the per record sample count are rejected, since the
/// recording model carries a single sampling frequency.
pub fn load(path: &Path) -> Result<RawRecording> {
  let mut file = BufReader::new(File::open(path)?);

  let header = read_header(&mut file)?;
  let signal_headers = read_signal_headers(&mut file, header.num_signals)?;

  ensure!(header.header_bytes == 256 * (1 + header.num_signals),
          "header byte count {} does not match {} signals ({})",
          header.header_bytes,
          header.num_signals,
          path.display());
  ensure!(header.num_records >= 0,
          "number of data records is unknown ({})",
          path.display());
  ensure!(header.record_duration > 0.0,
          "data record duration must be positive ({})",
          path.display());
  for signal in &signal_headers {
    ensure!(signal.digital_max != signal.digital_min,
            "signal '{}' has an empty digital range ({})",
            signal.label,
            path.display());
  }

  let data_signals: Vec<usize> =
    (0..signal_headers.len()).filter(|&idx| !signal_headers[idx].is_annotation())
                             .collect();
  ensure!(!data_signals.is_empty(),
          "file contains 0 data channels ({})",
          path.display());

  let samples_per_record = signal_headers[data_signals[0]].samples_per_record;
  ensure!(data_signals.iter().all(|&idx| {
            signal_headers[idx].samples_per_record == samples_per_record
          }),
          "data channels with mixed sampling frequencies are not supported \
           ({})",
          path.display());
  let sampling_frequency =
    signal_headers[data_signals[0]].sample_frequency(header.record_duration);

  // materialize all data records, collecting annotation signal bytes on
  // the side for TAL parsing below
  let num_records = header.num_records as usize;
  let mut samples: Vec<Vec<f64>> =
    (0..data_signals.len()).map(|_| {
                             Vec::with_capacity(num_records
                                                * samples_per_record)
                           })
                           .collect();
  let mut tal_bytes = Vec::new();

  for _ in 0..num_records {
    let mut slot = 0;
    for signal in &signal_headers {
      let mut buffer = vec![0u8; 2 * signal.samples_per_record];
      file.read_exact(&mut buffer)?;

      if signal.is_annotation() {
        tal_bytes.extend_from_slice(&buffer);
        continue;
      }

      let (gain, offset) = (signal.gain(), signal.offset());
      let channel = &mut samples[slot];
      for pair in buffer.chunks_exact(2) {
        let digital = i16::from_le_bytes([pair[0], pair[1]]);
        channel.push(gain * digital as f64 + offset);
      }
      slot += 1;
    }
  }

  let channels = data_signals.iter()
                             .map(|&idx| {
                               let signal = &signal_headers[idx];
                               let (unit, unit_mul) =
                                 unit::parse_dimension(&signal.physical_dimension);
                               ChannelInfo::new(signal.label.clone(),
                                                unit,
                                                unit_mul)
                             })
                             .collect();

  let start_datetime =
    parse_start_datetime(&header.start_date, &header.start_time);
  let annotations = parse_annotations(&tal_bytes, start_datetime);

  log::debug!("decoded {} channels x {} samples at {} Hz from {}",
              data_signals.len(),
              num_records * samples_per_record,
              sampling_frequency,
              path.display());

  RawRecording::new(channels,
                    sampling_frequency,
                    samples,
                    annotations,
                    start_datetime)
}

fn read_fixed_string<R: Read>(reader: &mut R, size: usize) -> Result<String> {
  let mut buffer = vec![0u8; size];
  reader.read_exact(&mut buffer)?;
  Ok(String::from_utf8_lossy(&buffer).trim().to_string())
}

fn parse_field<T>(field: &str, what: &str) -> Result<T>
  where T: FromStr,
        T::Err: Display {
  field.trim()
       .parse()
       .map_err(|err| eyre!("invalid {} '{}': {}", what, field, err))
}

fn read_header<R: Read>(reader: &mut R) -> Result<EdfHeader> {
  let version = read_fixed_string(reader, 8)?;
  let patient_id = read_fixed_string(reader, 80)?;
  let recording_id = read_fixed_string(reader, 80)?;
  let start_date = read_fixed_string(reader, 8)?;
  let start_time = read_fixed_string(reader, 8)?;
  let header_bytes = parse_field(&read_fixed_string(reader, 8)?,
                                 "header byte count")?;
  let _reserved = read_fixed_string(reader, 44)?;
  let num_records = parse_field(&read_fixed_string(reader, 8)?,
                                "number of data records")?;
  let record_duration = parse_field(&read_fixed_string(reader, 8)?,
                                    "data record duration")?;
  let num_signals = parse_field(&read_fixed_string(reader, 4)?,
                                "number of signals")?;

  Ok(EdfHeader { version,
                 patient_id,
                 recording_id,
                 start_date,
                 start_time,
                 header_bytes,
                 num_records,
                 record_duration,
                 num_signals })
}

fn read_signal_headers<R: Read>(reader: &mut R,
                                num_signals: usize)
                                -> Result<Vec<EdfSignalHeader>> {
  let mut labels = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    labels.push(read_fixed_string(reader, 16)?);
  }
  for _ in 0..num_signals {
    let _transducer_type = read_fixed_string(reader, 80)?;
  }
  let mut physical_dimensions = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    physical_dimensions.push(read_fixed_string(reader, 8)?);
  }
  let mut physical_mins = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    physical_mins.push(parse_field(&read_fixed_string(reader, 8)?,
                                   "physical minimum")?);
  }
  let mut physical_maxs = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    physical_maxs.push(parse_field(&read_fixed_string(reader, 8)?,
                                   "physical maximum")?);
  }
  let mut digital_mins = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    digital_mins.push(parse_field(&read_fixed_string(reader, 8)?,
                                  "digital minimum")?);
  }
  let mut digital_maxs = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    digital_maxs.push(parse_field(&read_fixed_string(reader, 8)?,
                                  "digital maximum")?);
  }
  for _ in 0..num_signals {
    let _prefiltering = read_fixed_string(reader, 80)?;
  }
  let mut samples_per_records = Vec::with_capacity(num_signals);
  for _ in 0..num_signals {
    samples_per_records.push(parse_field(&read_fixed_string(reader, 8)?,
                                         "samples per record")?);
  }
  for _ in 0..num_signals {
    let _reserved = read_fixed_string(reader, 32)?;
  }

  let mut signal_headers = Vec::with_capacity(num_signals);
  for idx in 0..num_signals {
    signal_headers.push(EdfSignalHeader { label: labels[idx].clone(),
                                          physical_dimension:
                                            physical_dimensions[idx].clone(),
                                          physical_min: physical_mins[idx],
                                          physical_max: physical_maxs[idx],
                                          digital_min: digital_mins[idx],
                                          digital_max: digital_maxs[idx],
                                          samples_per_record:
                                            samples_per_records[idx] });
  }

  Ok(signal_headers)
}

/// Parses the `dd.mm.yy` / `hh.mm.ss` start fields. Two digit years are
/// resolved with the EDF clipping rule: 85 through 99 belong to the 1900s,
/// everything below to the 2000s. Malformed fields yield `None`; a missing
/// start timestamp is not an error.
fn parse_start_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
  let mut fields = date.split('.');
  let day: u32 = fields.next()?.trim().parse().ok()?;
  let month: u32 = fields.next()?.trim().parse().ok()?;
  let year: i32 = fields.next()?.trim().parse().ok()?;
  let year = if year >= 85 { 1900 + year } else { 2000 + year };

  let mut fields = time.split('.');
  let hour: u32 = fields.next()?.trim().parse().ok()?;
  let minute: u32 = fields.next()?.trim().parse().ok()?;
  let second: u32 = fields.next()?.trim().parse().ok()?;

  NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour,
                                                         minute,
                                                         second)
}

/// Parses EDF+ timestamped annotation lists (TALs).
///
/// TALs are separated by NUL bytes. Each TAL starts with
/// `onset[<0x15>duration]`, followed by 0x14 separated descriptions. The
/// timekeeping TAL at the head of every record carries no description and
/// is dropped here, as is any TAL that fails to parse.
fn parse_annotations(tal_bytes: &[u8],
                     orig_time: Option<NaiveDateTime>)
                     -> Vec<Annotation> {
  let mut annotations = Vec::new();

  for tal in tal_bytes.split(|&byte| byte == 0u8) {
    if tal.is_empty() {
      continue;
    }
    let tal = String::from_utf8_lossy(tal);

    let mut fields = tal.split('\u{14}');
    let timing = match fields.next() {
      Some(timing) => timing,
      None => continue,
    };
    let (onset, duration) = match parse_timing(timing) {
      Some(timing) => timing,
      None => continue,
    };

    for description in fields {
      if description.is_empty() {
        continue;
      }
      annotations.push(Annotation::new(onset,
                                       duration,
                                       description.to_string(),
                                       orig_time));
    }
  }

  annotations
}

fn parse_timing(timing: &str) -> Option<(f64, f64)> {
  let mut fields = timing.split('\u{15}');
  let onset: f64 = fields.next()?.parse().ok()?;
  let duration = match fields.next() {
    Some(duration) => duration.parse().ok()?,
    None => 0.0,
  };
  Some((onset, duration))
}


#[cfg(test)]
mod tests {
  use super::{super::{reader::Format,
                      recording::{ChannelSelection, Recording}},
              *};
  use pretty_assertions::assert_eq;
  use std::fs;


  fn fixed(field: &str, size: usize) -> Vec<u8> {
    let mut buffer = vec![b' '; size];
    buffer[..field.len()].copy_from_slice(field.as_bytes());
    buffer
  }

  /// Assembles an EDF+ file with two data channels and one annotation
  /// signal: 10 records of 1 s at 100 Hz, start 2000-01-02 10:00:00, two
  /// "stim" events at 2 s and 5 s with 0.5 s duration. Physical and
  /// digital ranges coincide, so samples convert with gain 1 and offset 0.
  fn synthetic_edf() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend(fixed("0", 8));
    bytes.extend(fixed("X X X X", 80));
    bytes.extend(fixed("Startdate 02-JAN-2000 X X X", 80));
    bytes.extend(fixed("02.01.00", 8));
    bytes.extend(fixed("10.00.00", 8));
    bytes.extend(fixed("1024", 8));
    bytes.extend(fixed("EDF+C", 44));
    bytes.extend(fixed("10", 8));
    bytes.extend(fixed("1", 8));
    bytes.extend(fixed("3", 4));

    for label in &["Cz", "Pz", "EDF Annotations"] {
      bytes.extend(fixed(label, 16));
    }
    for _ in 0..3 {
      bytes.extend(fixed("", 80));
    }
    for dimension in &["uV", "uV", ""] {
      bytes.extend(fixed(dimension, 8));
    }
    for _ in 0..3 {
      bytes.extend(fixed("-32768", 8));
    }
    for _ in 0..3 {
      bytes.extend(fixed("32767", 8));
    }
    for _ in 0..3 {
      bytes.extend(fixed("-32768", 8));
    }
    for _ in 0..3 {
      bytes.extend(fixed("32767", 8));
    }
    for _ in 0..3 {
      bytes.extend(fixed("", 80));
    }
    for samples in &["100", "100", "30"] {
      bytes.extend(fixed(samples, 8));
    }
    for _ in 0..3 {
      bytes.extend(fixed("", 32));
    }

    for record in 0..10i16 {
      for channel in 1..=2i16 {
        for sample in 0..100i16 {
          let value = (record * 100 + sample) * channel;
          bytes.extend(&value.to_le_bytes());
        }
      }

      let mut tal = format!("+{}\u{14}\u{14}", record).into_bytes();
      if record == 0 {
        tal.extend("+2\u{15}0.5\u{14}stim\u{14}".as_bytes());
        tal.extend("+5\u{15}0.5\u{14}stim\u{14}".as_bytes());
      }
      tal.resize(60, 0);
      bytes.extend(tal);
    }

    bytes
  }

  fn write_edf(dir: &tempfile::TempDir, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join("synthetic.edf");
    fs::write(&path, bytes).unwrap();
    path
  }

  #[test]
  fn load_test() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_edf(&dir, &synthetic_edf());

    let raw = load(&path).unwrap();
    assert_eq!(vec!["Cz".to_string(), "Pz".to_string()],
               raw.channel_names());
    assert_eq!(100.0, raw.sampling_frequency());
    assert_eq!(1000, raw.num_samples());

    // gain 1, offset 0: physical values equal the digital fixture values
    assert_eq!(0.0, raw.samples()[0][0]);
    assert_eq!(999.0, raw.samples()[0][999]);
    assert_eq!(1998.0, raw.samples()[1][999]);

    // channel metadata derived from the physical dimension strings
    assert_eq!(107, raw.channels()[0].unit());
    assert_eq!(-6, raw.channels()[0].unit_mul());

    let start = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()
                                                   .and_hms_opt(10, 0, 0)
                                                   .unwrap();
    assert_eq!(Some(start), raw.start_datetime());

    assert_eq!(2, raw.annotations().len());
    assert_eq!(2.0, raw.annotations()[0].onset());
    assert_eq!(0.5, raw.annotations()[0].duration());
    assert_eq!("stim", raw.annotations()[0].description());
    assert_eq!(Some(start), raw.annotations()[0].orig_time());
    assert_eq!(5.0, raw.annotations()[1].onset());
  }

  #[test]
  fn recording_end_to_end_test() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_edf(&dir, &synthetic_edf());

    let recording = Recording::load(&path).unwrap();
    assert_eq!(&Some(path), recording.path());
    assert_eq!(Some(Format::Edf), recording.format());
    assert_eq!(0.0, recording.tmin());
    assert_eq!(9.99, recording.tmax());
    assert_eq!(vec!["stim".to_string()], recording.event_names());
    assert_eq!(vec![2.0, 5.0], recording.event_onset_times("stim"));

    let units = recording.channel_units().unwrap();
    assert_eq!(Some(&"volt"), units.get("Cz"));

    let windows =
      recording.data_by_event("stim", 1.0, 1.0, ChannelSelection::All);
    assert_eq!(2, windows.len());
    assert_eq!(Some(&1.0), windows[0].times().first());
    assert_eq!(2, windows[0].samples().len());
  }

  #[test]
  fn reject_unknown_record_count_test() {
    let mut bytes = synthetic_edf();
    bytes.splice(236..244, fixed("-1", 8));

    let dir = tempfile::tempdir().unwrap();
    let path = write_edf(&dir, &bytes);
    assert!(load(&path).is_err());
  }

  #[test]
  fn reject_mixed_sampling_frequencies_test() {
    let mut bytes = synthetic_edf();
    // second data signal's samples per record field
    bytes.splice(912..920, fixed("50", 8));

    let dir = tempfile::tempdir().unwrap();
    let path = write_edf(&dir, &bytes);
    assert!(load(&path).is_err());
  }

  #[test]
  fn reject_truncated_file_test() {
    let bytes = synthetic_edf();
    let dir = tempfile::tempdir().unwrap();
    let path = write_edf(&dir, &bytes[..512]);
    assert!(load(&path).is_err());
  }

  #[test]
  fn read_header_test() {
    let bytes = synthetic_edf();
    let header = read_header(&mut &bytes[..]).unwrap();

    assert_eq!("0", header.version);
    assert_eq!("X X X X", header.patient_id);
    assert_eq!("Startdate 02-JAN-2000 X X X", header.recording_id);
    assert_eq!("02.01.00", header.start_date);
    assert_eq!("10.00.00", header.start_time);
    assert_eq!(1024, header.header_bytes);
    assert_eq!(10, header.num_records);
    assert_eq!(1.0, header.record_duration);
    assert_eq!(3, header.num_signals);
  }

  #[test]
  fn start_datetime_test() {
    let expected = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()
                                                      .and_hms_opt(10, 0, 0)
                                                      .unwrap();
    assert_eq!(Some(expected),
               parse_start_datetime("02.01.00", "10.00.00"));

    // EDF clipping rule: years 85 and up belong to the 1900s
    let expected = NaiveDate::from_ymd_opt(1985, 12, 31).unwrap()
                                                        .and_hms_opt(23,
                                                                     59,
                                                                     59)
                                                        .unwrap();
    assert_eq!(Some(expected),
               parse_start_datetime("31.12.85", "23.59.59"));

    assert_eq!(None, parse_start_datetime("", ""));
    assert_eq!(None, parse_start_datetime("31.02.00", "10.00.00"));
    assert_eq!(None, parse_start_datetime("xx.yy.zz", "10.00.00"));
  }

  #[test]
  fn parse_annotations_test() {
    let tal =
      b"+0\x14\x14\x00+2\x150.5\x14stim\x14\x00+3.25\x14blink\x14\x00\x00";
    let annotations = parse_annotations(tal, None);

    assert_eq!(2, annotations.len());
    assert_eq!(2.0, annotations[0].onset());
    assert_eq!(0.5, annotations[0].duration());
    assert_eq!("stim", annotations[0].description());
    assert_eq!(3.25, annotations[1].onset());
    assert_eq!(0.0, annotations[1].duration());
    assert_eq!("blink", annotations[1].description());

    assert_eq!(0, parse_annotations(b"", None).len());
    assert_eq!(0, parse_annotations(b"\x00\x00\x00", None).len());
  }

  #[test]
  fn signal_header_test() {
    let signal = EdfSignalHeader { label: "Cz".to_string(),
                                   physical_dimension: "uV".to_string(),
                                   physical_min: -100.0,
                                   physical_max: 100.0,
                                   digital_min: -32768,
                                   digital_max: 32767,
                                   samples_per_record: 256 };

    assert_eq!(false, signal.is_annotation());
    assert_eq!(256.0, signal.sample_frequency(1.0));
    assert!((signal.gain() - 0.00305).abs() < 0.001);
    assert!((signal.gain() * 32767.0 + signal.offset() - 100.0).abs()
            < 1e-9);
  }
}
