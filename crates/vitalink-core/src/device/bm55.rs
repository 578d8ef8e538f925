//! Beurer BM55 blood pressure meter

use tracing::trace;

use crate::protocol::{
    Command, FrameDecodeError, FrameExchange, ProtocolError, RawFrame, BM55_PRODUCT_ID,
    BM55_VENDOR_ID,
};
use crate::reading::BloodPressureReading;

use super::{DeviceDescriptor, DeviceDriver};

/// Driver for the Beurer BM55 (USB, two user slots)
#[derive(Debug, Clone, Copy, Default)]
pub struct Bm55Driver;

impl Bm55Driver {
    /// Create the driver
    pub fn new() -> Self {
        Self
    }

    fn send(&self, link: &mut dyn FrameExchange, command: Command) -> Result<RawFrame, ProtocolError> {
        let frame = command.encode(link.builder())?;
        trace!("Sending {}", command.name());
        link.exchange(&frame)
    }
}

impl DeviceDriver for Bm55Driver {
    type Reading = BloodPressureReading;

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            make: "Beurer".to_string(),
            model: "BM-55".to_string(),
            display_name: "Beurer BM-55 Blood Pressure Meter".to_string(),
            vendor_id: BM55_VENDOR_ID,
            product_id: BM55_PRODUCT_ID,
        }
    }

    fn initialize(&self, link: &mut dyn FrameExchange) -> Result<(), ProtocolError> {
        // The answer is only an acknowledgement
        self.send(link, Command::Initialize).map(|_| ())
    }

    fn query_count(&self, link: &mut dyn FrameExchange) -> Result<u8, ProtocolError> {
        let frame = self.send(link, Command::QueryCount)?;
        Ok(frame.reading_count())
    }

    fn fetch_reading(
        &self,
        link: &mut dyn FrameExchange,
        index: u8,
    ) -> Result<Result<BloodPressureReading, FrameDecodeError>, ProtocolError> {
        let frame = self.send(link, Command::FetchReading(index))?;
        Ok(frame.decode())
    }

    fn terminate(&self, link: &mut dyn FrameExchange) -> Result<(), ProtocolError> {
        // The meter expects both steps in this order. The second step is
        // still sent when the first one fails.
        let begin = self.send(link, Command::TerminateBegin);
        let end = self.send(link, Command::TerminateEnd);
        begin.and(end).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandBuilder;

    /// Answers every command with a fixed frame and records what was sent
    struct Scripted {
        builder: CommandBuilder,
        sent: Vec<Vec<u8>>,
        answer: [u8; 8],
        fail_first: bool,
    }

    impl Scripted {
        fn new(answer: [u8; 8]) -> Self {
            Self {
                builder: CommandBuilder::default(),
                sent: Vec::new(),
                answer,
                fail_first: false,
            }
        }
    }

    impl FrameExchange for Scripted {
        fn builder(&self) -> &CommandBuilder {
            &self.builder
        }

        fn exchange(&mut self, frame: &[u8]) -> Result<RawFrame, ProtocolError> {
            self.sent.push(frame.to_vec());
            if self.fail_first && self.sent.len() == 1 {
                return Err(ProtocolError::Timeout);
            }
            Ok(RawFrame::new(self.answer))
        }
    }

    #[test]
    fn test_count_is_unsigned() {
        let mut link = Scripted::new([200, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Bm55Driver.query_count(&mut link).unwrap(), 200);
        assert_eq!(link.sent[0][0], 0xA2);
    }

    #[test]
    fn test_fetch_sends_index() {
        let mut link = Scripted::new([0, 0, 60, 6, 15, 10, 30, 23]);
        let reading = Bm55Driver.fetch_reading(&mut link, 7).unwrap().unwrap();
        assert_eq!(reading.pulse_rate(), 60);
        assert_eq!(link.sent[0], vec![0xA3, 7, 0xF4, 0xF4, 0xF4, 0xF4, 0xF4, 0xF4]);
    }

    #[test]
    fn test_terminate_sends_both_steps_after_failure() {
        let mut link = Scripted::new([0; 8]);
        link.fail_first = true;
        let result = Bm55Driver.terminate(&mut link);
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        let opcodes: Vec<u8> = link.sent.iter().map(|f| f[0]).collect();
        assert_eq!(opcodes, vec![0xF7, 0xF6]);
    }

    #[test]
    fn test_descriptor() {
        let descriptor = Bm55Driver.descriptor();
        assert_eq!(descriptor.vendor_id, 0x0c45);
        assert_eq!(descriptor.product_id, 0x7406);
        assert_eq!(
            descriptor.to_string(),
            "Beurer BM-55 Blood Pressure Meter (0c45:7406)"
        );
    }
}
