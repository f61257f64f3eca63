//! Wire codec for C37.118 frames.
//!
//! All scalars are big-endian. A [`Decoder`] walks a byte buffer and never
//! reads past its end; a failed decode reports a classified [`CodecError`]
//! and leaves nothing installed. An [`Encoder`] appends to a caller-owned
//! buffer; the frame-size field is reserved up front with a [`Placeholder`]
//! and backpatched once the message body is written, so the reservation
//! always refers to the buffer being built, never a detached copy.
//!
//! Data messages cannot be coded without a [`Context`], the configuration
//! snapshot taken from the stream's Config-2.

use enum_as_inner::EnumAsInner;

use super::types::*;

/// Bytes from sync through fracsec, before the message body.
const HEADER_LEN: usize = 14;
const CRC_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, EnumAsInner)]
pub enum CodecError {
    /// Buffer shorter than the encoding requires.
    #[error("frame buffer too short")]
    MissingBytes,
    /// A Data frame was coded without an installed configuration.
    #[error("no configuration installed for data frames")]
    MissingConfig,
    /// Out-of-range enum, sync mismatch, or a count that contradicts the
    /// installed configuration.
    #[error("invalid field value")]
    InvalidValue,
    #[error("frame checksum mismatch")]
    InvalidChecksum,
    /// The frame-size field points before the bytes already consumed.
    #[error("frame size slices past the buffer start")]
    InvalidSlice,
    /// Config-3 codec support.
    #[error("unimplemented frame type")]
    Unimplemented,
    #[error("codec failure")]
    Other,
}

/// CRC-CCITT over `frame`: polynomial 0x1021, initial value 0xFFFF, no
/// reflection, no final xor.
pub fn calculate_crc(frame: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in frame {
        let temp = (crc >> 8) ^ byte as u16;
        crc <<= 8;
        let mut quick = temp ^ (temp >> 4);
        crc ^= quick;
        quick <<= 5;
        crc ^= quick;
        quick <<= 7;
        crc ^= quick;
    }
    crc
}

/// Configuration snapshot driving the layout of Data messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    config: Config2,
}

impl Context {
    pub fn new(config: Config2) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config2 {
        &self.config
    }

    pub fn num_pmu(&self) -> usize {
        self.config.0.pmus.len()
    }

    fn pmu(&self, index: usize) -> Result<&PmuConfig1, CodecError> {
        self.config.0.pmus.get(index).ok_or(CodecError::InvalidValue)
    }
}

/// Cursor-based frame reader.
pub struct Decoder<'a> {
    buf: &'a [u8],
    cursor: usize,
    context: Option<&'a Context>,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], context: Option<&'a Context>) -> Self {
        Self {
            buf,
            cursor: 0,
            context,
        }
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn require(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::MissingBytes);
        }
        let bytes = &self.buf[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.require(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.require(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.u16()? as i16)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.require(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn name1(&mut self) -> Result<Name1, CodecError> {
        let bytes = self.require(16)?;
        Ok(Name1(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Length-prefixed string, the `Name3` wire form.
    pub fn name3(&mut self) -> Result<Name3, CodecError> {
        let len = self.u8()? as usize;
        let bytes = self.require(len)?;
        Ok(Name3(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn phasor(&mut self, cfg: &PmuConfig1) -> Result<Phasor, CodecError> {
        Ok(match (cfg.phasor_polar(), cfg.phasor_float()) {
            (false, false) => Phasor::RectangularInt {
                real: self.i16()?,
                imag: self.i16()?,
            },
            (true, false) => Phasor::PolarInt {
                magnitude: self.u16()?,
                phase: self.i16()?,
            },
            (false, true) => Phasor::RectangularFloat {
                real: self.f32()?,
                imag: self.f32()?,
            },
            (true, true) => Phasor::PolarFloat {
                magnitude: self.f32()?,
                phase: self.f32()?,
            },
        })
    }

    fn analog(&mut self, cfg: &PmuConfig1) -> Result<Analog, CodecError> {
        Ok(if cfg.analog_float() {
            Analog::Float(self.f32()?)
        } else {
            Analog::Int(self.i16()?)
        })
    }

    fn freq(&mut self, cfg: &PmuConfig1) -> Result<Freq, CodecError> {
        Ok(if cfg.freq_float() {
            Freq::Float(self.f32()?)
        } else {
            Freq::Int(self.i16()?)
        })
    }

    fn pmu_data(&mut self, cfg: &PmuConfig1) -> Result<PmuData, CodecError> {
        let stat = self.u16()?;
        let phasors = (0..cfg.phinfo.len())
            .map(|_| self.phasor(cfg))
            .collect::<Result<_, _>>()?;
        let freq = self.freq(cfg)?;
        let dfreq = self.freq(cfg)?;
        let analogs = (0..cfg.aninfo.len())
            .map(|_| self.analog(cfg))
            .collect::<Result<_, _>>()?;
        let digital = (0..cfg.dginfo.len())
            .map(|_| self.u16())
            .collect::<Result<_, _>>()?;
        Ok(PmuData {
            stat,
            phasors,
            freq,
            dfreq,
            analogs,
            digital,
        })
    }

    fn data(&mut self) -> Result<Data, CodecError> {
        let ctx = self.context.ok_or(CodecError::MissingConfig)?;
        let mut pmus = Vec::with_capacity(ctx.num_pmu());
        for index in 0..ctx.num_pmu() {
            pmus.push(self.pmu_data(ctx.pmu(index)?)?);
        }
        Ok(Data { pmus })
    }

    fn header_msg(&mut self) -> Result<Header, CodecError> {
        let bytes = self.require(self.remaining())?;
        Ok(Header {
            data: String::from_utf8_lossy(bytes).into_owned(),
        })
    }

    fn pmu_config1(&mut self) -> Result<PmuConfig1, CodecError> {
        let stn = self.name1()?;
        let idcode = self.u16()?;
        let format = self.u16()?;
        let phnmr = self.u16()? as usize;
        let annmr = self.u16()? as usize;
        let dgnmr = self.u16()? as usize;

        let phnam: Vec<Name1> = (0..phnmr).map(|_| self.name1()).collect::<Result<_, _>>()?;
        let annam: Vec<Name1> = (0..annmr).map(|_| self.name1()).collect::<Result<_, _>>()?;
        let mut dgnam = Vec::with_capacity(dgnmr);
        for _ in 0..dgnmr {
            let mut names: [Name1; 16] = std::array::from_fn(|_| Name1::default());
            for name in &mut names {
                *name = self.name1()?;
            }
            dgnam.push(names);
        }
        let phunit: Vec<u32> = (0..phnmr).map(|_| self.u32()).collect::<Result<_, _>>()?;
        let anunit: Vec<u32> = (0..annmr).map(|_| self.u32()).collect::<Result<_, _>>()?;
        let dgunit: Vec<u32> = (0..dgnmr).map(|_| self.u32()).collect::<Result<_, _>>()?;
        let fnom = self.u16()?;
        let cfgcnt = self.u16()?;

        Ok(PmuConfig1 {
            stn,
            idcode,
            format,
            phinfo: phnam
                .into_iter()
                .zip(phunit)
                .map(|(name, unit)| ChannelInfo { name, unit })
                .collect(),
            aninfo: annam
                .into_iter()
                .zip(anunit)
                .map(|(name, unit)| ChannelInfo { name, unit })
                .collect(),
            dginfo: dgnam
                .into_iter()
                .zip(dgunit)
                .map(|(names, unit)| DigitalInfo { names, unit })
                .collect(),
            fnom,
            cfgcnt,
        })
    }

    fn config1(&mut self) -> Result<Config1, CodecError> {
        let time_base = self.u32()?;
        let num_pmu = self.u16()? as usize;
        let pmus = (0..num_pmu)
            .map(|_| self.pmu_config1())
            .collect::<Result<_, _>>()?;
        let data_rate = self.u16()?;
        Ok(Config1 {
            time_base,
            pmus,
            data_rate,
        })
    }

    fn command(&mut self) -> Result<Command, CodecError> {
        let cmd = self.u16()?;
        let ext = self.require(self.remaining())?.to_vec();
        Ok(Command { cmd, ext })
    }

    /// Decode one complete frame at the cursor, validating sync, type,
    /// length and CRC. On success the cursor moves past the frame, so
    /// consecutive frames in one buffer decode back to back.
    pub fn frame(&mut self) -> Result<Frame, CodecError> {
        let start = self.cursor;
        let sync = self.u16()?;
        let framesize = self.u16()? as usize;
        let idcode = self.u16()?;
        let soc = self.u32()?;
        let fracsec = self.u32()?;

        if sync & 0xFF00 != (SYNC_BYTE as u16) << 8 {
            return Err(CodecError::InvalidValue);
        }
        if framesize < HEADER_LEN + CRC_LEN {
            return Err(CodecError::InvalidSlice);
        }
        if start + framesize > self.buf.len() {
            return Err(CodecError::MissingBytes);
        }

        let content_end = start + framesize - CRC_LEN;
        let calculated = calculate_crc(&self.buf[start..content_end]);

        let mut body = Decoder::new(
            &self.buf[start + HEADER_LEN..content_end],
            self.context,
        );
        let message = match (sync >> 4) & 0xF {
            0x0 => Message::Data(body.data()?),
            0x1 => Message::Header(body.header_msg()?),
            0x2 => Message::Config1(body.config1()?),
            0x3 => Message::Config2(Config2(body.config1()?)),
            0x4 => Message::Command(body.command()?),
            0x5 => return Err(CodecError::Unimplemented),
            _ => return Err(CodecError::InvalidValue),
        };

        let stored = u16::from_be_bytes([self.buf[content_end], self.buf[content_end + 1]]);
        if stored != calculated {
            return Err(CodecError::InvalidChecksum);
        }

        self.cursor = start + framesize;
        Ok(Frame {
            version: (sync & 0xF) as u8,
            idcode,
            soc,
            fracsec,
            message,
        })
    }
}

/// A reserved region in the encoder's output, committed later.
///
/// Dropping a placeholder that was never passed back to the encoder trips
/// a debug assertion; every reservation must be resolved before the
/// encoding is used.
#[must_use]
pub struct Placeholder {
    pos: usize,
    width: usize,
    resolved: bool,
}

impl Drop for Placeholder {
    fn drop(&mut self) {
        debug_assert!(self.resolved, "placeholder dropped without commit");
    }
}

/// Cursor-based frame writer appending to a caller-owned buffer.
pub struct Encoder<'a> {
    out: &'a mut Vec<u8>,
    context: Option<&'a Context>,
}

impl<'a> Encoder<'a> {
    pub fn new(out: &'a mut Vec<u8>, context: Option<&'a Context>) -> Self {
        Self { out, context }
    }

    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    fn name1(&mut self, name: &Name1) {
        let mut buffer = [b' '; 16];
        let bytes = name.0.as_bytes();
        let len = bytes.len().min(16);
        buffer[..len].copy_from_slice(&bytes[..len]);
        self.out.extend_from_slice(&buffer);
    }

    /// Length-prefixed string, the `Name3` wire form. Truncated at 255
    /// bytes.
    pub fn name3(&mut self, name: &Name3) {
        let bytes = name.0.as_bytes();
        let len = bytes.len().min(255);
        self.u8(len as u8);
        self.out.extend_from_slice(&bytes[..len]);
    }

    /// Reserve `width` zeroed bytes at the current position.
    fn reserve(&mut self, width: usize) -> Placeholder {
        let pos = self.out.len();
        self.out.resize(pos + width, 0);
        Placeholder {
            pos,
            width,
            resolved: false,
        }
    }

    /// Serialize `value` into a reservation. The value must fit the
    /// reserved width.
    fn commit_u16(&mut self, mut placeholder: Placeholder, value: u16) -> Result<(), CodecError> {
        placeholder.resolved = true;
        if placeholder.width < 2 {
            return Err(CodecError::InvalidValue);
        }
        self.out[placeholder.pos..placeholder.pos + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn phasor(&mut self, phasor: &Phasor, cfg: &PmuConfig1) -> Result<(), CodecError> {
        if phasor.layout() != cfg.format & 0x3 {
            return Err(CodecError::InvalidValue);
        }
        match *phasor {
            Phasor::RectangularInt { real, imag } => {
                self.i16(real);
                self.i16(imag);
            }
            Phasor::PolarInt { magnitude, phase } => {
                self.u16(magnitude);
                self.i16(phase);
            }
            Phasor::RectangularFloat { real, imag } => {
                self.f32(real);
                self.f32(imag);
            }
            Phasor::PolarFloat { magnitude, phase } => {
                self.f32(magnitude);
                self.f32(phase);
            }
        }
        Ok(())
    }

    fn analog(&mut self, analog: &Analog, cfg: &PmuConfig1) -> Result<(), CodecError> {
        match (analog, cfg.analog_float()) {
            (Analog::Int(v), false) => self.i16(*v),
            (Analog::Float(v), true) => self.f32(*v),
            _ => return Err(CodecError::InvalidValue),
        }
        Ok(())
    }

    fn freq(&mut self, freq: &Freq, cfg: &PmuConfig1) -> Result<(), CodecError> {
        match (freq, cfg.freq_float()) {
            (Freq::Int(v), false) => self.i16(*v),
            (Freq::Float(v), true) => self.f32(*v),
            _ => return Err(CodecError::InvalidValue),
        }
        Ok(())
    }

    fn pmu_data(&mut self, pmu: &PmuData, cfg: &PmuConfig1) -> Result<(), CodecError> {
        if pmu.phasors.len() != cfg.phinfo.len()
            || pmu.analogs.len() != cfg.aninfo.len()
            || pmu.digital.len() != cfg.dginfo.len()
        {
            return Err(CodecError::InvalidValue);
        }
        self.u16(pmu.stat);
        for phasor in &pmu.phasors {
            self.phasor(phasor, cfg)?;
        }
        self.freq(&pmu.freq, cfg)?;
        self.freq(&pmu.dfreq, cfg)?;
        for analog in &pmu.analogs {
            self.analog(analog, cfg)?;
        }
        for &word in &pmu.digital {
            self.u16(word);
        }
        Ok(())
    }

    fn data(&mut self, data: &Data) -> Result<(), CodecError> {
        let ctx = self.context.ok_or(CodecError::MissingConfig)?;
        if data.pmus.len() != ctx.num_pmu() {
            return Err(CodecError::InvalidValue);
        }
        for (index, pmu) in data.pmus.iter().enumerate() {
            self.pmu_data(pmu, ctx.pmu(index)?)?;
        }
        Ok(())
    }

    fn pmu_config1(&mut self, pmu: &PmuConfig1) {
        self.name1(&pmu.stn);
        self.u16(pmu.idcode);
        self.u16(pmu.format);
        self.u16(pmu.phinfo.len() as u16);
        self.u16(pmu.aninfo.len() as u16);
        self.u16(pmu.dginfo.len() as u16);
        for info in &pmu.phinfo {
            self.name1(&info.name);
        }
        for info in &pmu.aninfo {
            self.name1(&info.name);
        }
        for info in &pmu.dginfo {
            for name in &info.names {
                self.name1(name);
            }
        }
        for info in &pmu.phinfo {
            self.u32(info.unit);
        }
        for info in &pmu.aninfo {
            self.u32(info.unit);
        }
        for info in &pmu.dginfo {
            self.u32(info.unit);
        }
        self.u16(pmu.fnom);
        self.u16(pmu.cfgcnt);
    }

    fn config1(&mut self, config: &Config1) {
        self.u32(config.time_base);
        self.u16(config.pmus.len() as u16);
        for pmu in &config.pmus {
            self.pmu_config1(pmu);
        }
        self.u16(config.data_rate);
    }

    fn command(&mut self, command: &Command) {
        self.u16(command.cmd);
        self.out.extend_from_slice(&command.ext);
    }

    /// Append one complete frame: sync word, backpatched frame size,
    /// header fields, message body, CRC.
    pub fn frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let start = self.out.len();
        let sync = 0xAA00 | (frame.message.type_code() as u16) << 4 | frame.version as u16;

        self.u16(sync);
        let framesize = self.reserve(2);
        self.u16(frame.idcode);
        self.u32(frame.soc);
        self.u32(frame.fracsec);

        let body = match &frame.message {
            Message::Data(data) => self.data(data),
            Message::Header(header) => {
                self.out.extend_from_slice(header.data.as_bytes());
                Ok(())
            }
            Message::Config1(config) => {
                self.config1(config);
                Ok(())
            }
            Message::Config2(config) => {
                self.config1(&config.0);
                Ok(())
            }
            Message::Command(command) => {
                self.command(command);
                Ok(())
            }
            Message::Config3(_) => Err(CodecError::Unimplemented),
        };
        if let Err(err) = body {
            // Resolve the reservation, then take the partial frame back out
            // of the caller's buffer.
            self.commit_u16(framesize, 0).ok();
            self.out.truncate(start);
            return Err(err);
        }

        let total = self.out.len() - start + CRC_LEN;
        self.commit_u16(framesize, total as u16)?;

        let crc = calculate_crc(&self.out[start..]);
        self.u16(crc);
        Ok(())
    }
}

/// Decode a single frame from `buf`.
pub fn decode_frame(buf: &[u8], context: Option<&Context>) -> Result<Frame, CodecError> {
    Decoder::new(buf, context).frame()
}

/// Encode a single frame into a fresh buffer.
pub fn encode_frame(frame: &Frame, context: Option<&Context>) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    Encoder::new(&mut out, context).frame(frame)?;
    Ok(out)
}
