//! IEEE C37.118.2 message model.
//!
//! Frames wrap one of six message kinds behind a shared sync/size/id/time
//! header and a trailing CRC. Data messages have a configuration-dependent
//! layout: the number of phasor, analog and digital channels per PMU and
//! their numeric encodings are fixed by the most recent Config-2 on the
//! stream, carried here as [`PmuConfig1::format`] bits.

use enum_as_inner::EnumAsInner;
use num_complex::Complex32;

/// High byte of every frame's first word.
pub const SYNC_BYTE: u8 = 0xAA;

/// `FORMAT` bit: phasors are polar instead of rectangular.
pub const FORMAT_POLAR: u16 = 1 << 0;
/// `FORMAT` bit: phasors are f32 instead of scaled i16.
pub const FORMAT_PHASOR_FLOAT: u16 = 1 << 1;
/// `FORMAT` bit: analogs are f32 instead of i16.
pub const FORMAT_ANALOG_FLOAT: u16 = 1 << 2;
/// `FORMAT` bit: frequency values are f32 instead of i16.
pub const FORMAT_FREQ_FLOAT: u16 = 1 << 3;

/// A phasor in one of the four wire layouts.
///
/// The integer polar layout carries an unsigned magnitude and a signed
/// phase in milliradians; the float polar layout uses radians.
#[derive(Debug, Clone, Copy, PartialEq, EnumAsInner)]
pub enum Phasor {
    RectangularInt { real: i16, imag: i16 },
    PolarInt { magnitude: u16, phase: i16 },
    RectangularFloat { real: f32, imag: f32 },
    PolarFloat { magnitude: f32, phase: f32 },
}

impl Phasor {
    /// Layout selector as encoded in the low two `FORMAT` bits.
    pub const fn layout(&self) -> u16 {
        match self {
            Phasor::RectangularInt { .. } => 0,
            Phasor::PolarInt { .. } => 1,
            Phasor::RectangularFloat { .. } => 2,
            Phasor::PolarFloat { .. } => 3,
        }
    }

    pub fn to_complex(&self) -> Complex32 {
        match *self {
            Phasor::RectangularInt { real, imag } => Complex32::new(real as f32, imag as f32),
            Phasor::PolarInt { magnitude, phase } => {
                Complex32::from_polar(magnitude as f32, phase as f32 / 1000.0)
            }
            Phasor::RectangularFloat { real, imag } => Complex32::new(real, imag),
            Phasor::PolarFloat { magnitude, phase } => Complex32::from_polar(magnitude, phase),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, EnumAsInner)]
pub enum Analog {
    Int(i16),
    Float(f32),
}

impl Analog {
    pub fn to_float(&self) -> f32 {
        match *self {
            Analog::Int(v) => v as f32,
            Analog::Float(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, EnumAsInner)]
pub enum Freq {
    Int(i16),
    Float(f32),
}

/// Measurements of one PMU inside a Data message.
#[derive(Debug, Clone, PartialEq)]
pub struct PmuData {
    pub stat: u16,
    pub phasors: Vec<Phasor>,
    pub freq: Freq,
    pub dfreq: Freq,
    pub analogs: Vec<Analog>,
    pub digital: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub pmus: Vec<PmuData>,
}

/// Free-form human readable description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub data: String,
}

/// Fixed 16-byte, space-padded ASCII channel name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Name1(pub String);

impl Name1 {
    /// Normalize to the 16-character wire form: truncated or space-padded.
    pub fn padded(s: &str) -> Self {
        let mut out: String = s.chars().take(16).collect();
        while out.len() < 16 {
            out.push(' ');
        }
        Self(out)
    }
}

/// Length-prefixed name used by Config-3 structures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Name3(pub String);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: Name1,
    pub unit: u32,
}

/// A digital status word: sixteen bit labels and one unit mask word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitalInfo {
    pub names: [Name1; 16],
    pub unit: u32,
}

impl Default for DigitalInfo {
    fn default() -> Self {
        Self {
            names: std::array::from_fn(|_| Name1::default()),
            unit: 0,
        }
    }
}

/// Per-PMU configuration block of a Config-1/2 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmuConfig1 {
    pub stn: Name1,
    pub idcode: u16,
    pub format: u16,
    pub phinfo: Vec<ChannelInfo>,
    pub aninfo: Vec<ChannelInfo>,
    pub dginfo: Vec<DigitalInfo>,
    pub fnom: u16,
    pub cfgcnt: u16,
}

impl PmuConfig1 {
    pub const fn phasor_polar(&self) -> bool {
        self.format & FORMAT_POLAR != 0
    }

    pub const fn phasor_float(&self) -> bool {
        self.format & FORMAT_PHASOR_FLOAT != 0
    }

    pub const fn analog_float(&self) -> bool {
        self.format & FORMAT_ANALOG_FLOAT != 0
    }

    pub const fn freq_float(&self) -> bool {
        self.format & FORMAT_FREQ_FLOAT != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config1 {
    pub time_base: u32,
    pub pmus: Vec<PmuConfig1>,
    pub data_rate: u16,
}

/// Identical layout to Config-1; a Config-2 describes the data currently
/// being produced and installs the decoding context for the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config2(pub Config1);

/// Config-3 is part of the 2011 revision; its codec is not implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub cmd: u16,
    pub ext: Vec<u8>,
}

impl Command {
    pub const DATA_START: u16 = 0x1;
    pub const DATA_STOP: u16 = 0x2;
    pub const GET_HEADER: u16 = 0x3;
    pub const GET_CONFIG1: u16 = 0x4;
    pub const GET_CONFIG2: u16 = 0x5;
    pub const GET_CONFIG3: u16 = 0x6;
}

/// The message payload of a frame.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Message {
    Data(Data),
    Header(Header),
    Config1(Config1),
    Config2(Config2),
    Command(Command),
    Config3(Config3),
}

impl Message {
    /// Type nibble of the sync word.
    pub const fn type_code(&self) -> u8 {
        match self {
            Message::Data(_) => 0x0,
            Message::Header(_) => 0x1,
            Message::Config1(_) => 0x2,
            Message::Config2(_) => 0x3,
            Message::Command(_) => 0x4,
            Message::Config3(_) => 0x5,
        }
    }
}

/// A complete C37.118 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: u8,
    pub idcode: u16,
    /// Second-of-century timestamp.
    pub soc: u32,
    /// Fraction-of-second word, including the time quality byte.
    pub fracsec: u32,
    pub message: Message,
}
