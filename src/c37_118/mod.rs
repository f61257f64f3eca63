//! IEEE C37.118.2 synchrophasor codec.
//!
//! [`types`] models frames as plain data; [`parser`] is the bit-exact wire
//! codec. [`StreamCodec`] ties the two to one stream: decoding or encoding
//! a Config-2 installs the [`parser::Context`] that subsequent Data frames
//! on the same stream are coded with.

pub mod parser;
pub mod types;

use self::parser::{decode_frame, encode_frame, CodecError, Context};
use self::types::{Frame, Message};

/// Stateful codec for a single synchrophasor stream.
#[derive(Debug, Default)]
pub struct StreamCodec {
    context: Option<Context>,
}

impl StreamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: Context) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Decode one frame. A successfully decoded Config-2 becomes the
    /// context for the Data frames that follow; a failed decode leaves the
    /// installed context untouched.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Frame, CodecError> {
        let frame = decode_frame(buf, self.context.as_ref())?;
        if let Message::Config2(config) = &frame.message {
            self.context = Some(Context::new(config.clone()));
        }
        Ok(frame)
    }

    /// Encode one frame, installing the context when a Config-2 goes out.
    pub fn encode(&mut self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        let bytes = encode_frame(frame, self.context.as_ref())?;
        if let Message::Config2(config) = &frame.message {
            self.context = Some(Context::new(config.clone()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::types::*;
    use super::*;

    fn config2_frame() -> Frame {
        Frame {
            version: 1,
            idcode: 1,
            soc: 0,
            fracsec: 0,
            message: Message::Config2(Config2(Config1 {
                time_base: 1_000_000,
                pmus: vec![PmuConfig1 {
                    stn: Name1::padded("PMU"),
                    idcode: 1,
                    format: FORMAT_PHASOR_FLOAT,
                    phinfo: vec![ChannelInfo {
                        name: Name1::padded("VA"),
                        unit: 0,
                    }],
                    aninfo: vec![],
                    dginfo: vec![],
                    fnom: 0,
                    cfgcnt: 0,
                }],
                data_rate: 50,
            })),
        }
    }

    fn data_frame() -> Frame {
        Frame {
            version: 1,
            idcode: 1,
            soc: 1,
            fracsec: 0,
            message: Message::Data(Data {
                pmus: vec![PmuData {
                    stat: 0,
                    phasors: vec![Phasor::RectangularFloat { real: 1.0, imag: 0.0 }],
                    freq: Freq::Int(0),
                    dfreq: Freq::Int(0),
                    analogs: vec![],
                    digital: vec![],
                }],
            }),
        }
    }

    #[test]
    fn test_config2_installs_context() {
        let mut codec = StreamCodec::new();
        assert!(codec.context().is_none());

        let config_bytes = encode_frame(&config2_frame(), None).unwrap();
        codec.decode(&config_bytes).unwrap();
        assert!(codec.context().is_some());

        // Data frames on the stream now decode with the installed layout.
        let data_bytes = {
            let mut sender = StreamCodec::new();
            sender.encode(&config2_frame()).unwrap();
            sender.encode(&data_frame()).unwrap()
        };
        let frame = codec.decode(&data_bytes).unwrap();
        assert!(frame.message.is_data());
    }

    #[test]
    fn test_data_before_config_is_rejected() {
        let data_bytes = {
            let mut sender = StreamCodec::new();
            sender.encode(&config2_frame()).unwrap();
            sender.encode(&data_frame()).unwrap()
        };

        let mut codec = StreamCodec::new();
        assert_eq!(
            codec.decode(&data_bytes).unwrap_err(),
            CodecError::MissingConfig
        );
        assert!(codec.context().is_none());
    }

    #[test]
    fn test_failed_decode_leaves_context_untouched() {
        let mut codec = StreamCodec::new();
        let config_bytes = encode_frame(&config2_frame(), None).unwrap();
        codec.decode(&config_bytes).unwrap();
        let before = codec.context().cloned();

        let mut sender = StreamCodec::new();
        sender.encode(&config2_frame()).unwrap();
        let mut data_bytes = sender.encode(&data_frame()).unwrap();
        *data_bytes.last_mut().unwrap() ^= 0x01;

        assert_eq!(
            codec.decode(&data_bytes).unwrap_err(),
            CodecError::InvalidChecksum
        );
        assert_eq!(codec.context().cloned(), before);

        // A corrupted Config-2 must not replace the context either.
        let mut second_config = encode_frame(&config2_frame(), None).unwrap();
        let len = second_config.len();
        second_config[len - 1] ^= 0x01;
        assert!(codec.decode(&second_config).is_err());
        assert_eq!(codec.context().cloned(), before);
    }
}
