// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

use eyre::{eyre, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;


lazy_static! {
  /// Fixed table of FIFF physical unit codes and their human readable
  /// names. The table is not exhaustive; codes missing here are reported as
  /// errors by `unit_to_human` rather than papered over with a fallback.
  static ref UNIT_NAMES: HashMap<i32, &'static str> =
    [(-1, "<No unit>"),
     (0, "unitless"),
     (1, "meter"),
     (2, "kilogram"),
     (3, "second"),
     (4, "ampere"),
     (5, "Kelvin"),
     (6, "mole"),
     (7, "radian"),
     (8, "steradian"),
     (9, "candela"),
     (10, "mol/m^3"),
     (101, "herz"),
     (102, "Newton"),
     (103, "pascal"),
     (104, "joule"),
     (105, "watt"),
     (106, "coulomb"),
     (107, "volt"),
     (108, "farad"),
     (109, "ohm"),
     (110, "one per ohm"),
     (111, "weber"),
     (112, "tesla"),
     (113, "Henry"),
     (114, "celcius"),
     (115, "lumen"),
     (116, "lux"),
     (117, "V/m^2"),
     (201, "T/m"),
     (202, "Am"),
     (203, "Am/m^2"),
     (204, "Am/m^3")].iter()
                     .copied()
                     .collect();
}


/// Converts a FIFF unit code to its human readable form. Fails if no unit
/// is registered for `code`.
pub fn unit_to_human(code: i32) -> Result<&'static str> {
  UNIT_NAMES.get(&code)
            .copied()
            .ok_or_else(|| eyre!("no unit registered for code {}", code))
}

/// Maps a physical dimension string as it occurs in recording file headers
/// (e.g. `"uV"`) to a FIFF unit code and a decimal multiplier exponent.
/// Dimensions with no registered unit map to the no-unit code.
pub(crate) fn parse_dimension(dimension: &str) -> (i32, i32) {
  match dimension.trim() {
    "V" => (107, 0),
    "mV" => (107, -3),
    "uV" | "µV" => (107, -6),
    "nV" => (107, -9),
    "K" => (5, 0),
    "C" | "°C" | "degC" => (114, 0),
    "Hz" => (101, 0),
    "s" | "sec" => (3, 0),
    "m" => (1, 0),
    "T" => (112, 0),
    _ => (-1, 0),
  }
}
