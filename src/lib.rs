// Copyright 2021 bmc::labs Gmbh. All rights reserved.
//
// Authors:
//   Florian Eich <florian@bmc-labs.com>
//   Jonas Reitemeyer <alumni@bmc-labs.com>

mod annotation;
mod brainvision;
mod edf;
mod reader;
mod recording;
mod unit;

pub use annotation::{Annotation, AnnotationTable};
pub use reader::{ChannelInfo, Format, RawRecording};
pub use recording::{ChannelSelection, DataSlice, Recording};
pub use unit::unit_to_human;
