//! Serial-port stage driver for the real gantry microcontroller.

use crate::error::HwError;
use crate::protocol;
use flyrig_traits::{BoxedError, StageDriver, StageStatus, VelocityCommand};
use std::io::{Read, Write};
use std::time::Duration;

pub struct SerialStage {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialStage {
    /// Open the stage link. The firmware resets on open; give it a moment
    /// before the first command.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self, HwError> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(|e| HwError::Comm(format!("open {path}: {e}")))?;
        std::thread::sleep(Duration::from_secs(2));
        Ok(Self { port })
    }

    fn round_trip(&mut self, cmd: VelocityCommand) -> Result<StageStatus, HwError> {
        let frame = protocol::encode_velocity(cmd)?;
        self.port.write_all(&frame).map_err(map_io)?;
        let mut reply = [0u8; protocol::STATUS_LEN];
        self.port.read_exact(&mut reply).map_err(map_io)?;
        protocol::decode_status(&reply)
    }
}

fn map_io(e: std::io::Error) -> HwError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        HwError::Timeout
    } else {
        HwError::Io(e)
    }
}

impl StageDriver for SerialStage {
    fn set_velocity(&mut self, cmd: VelocityCommand) -> Result<StageStatus, BoxedError> {
        self.round_trip(cmd).map_err(|e| Box::new(e) as BoxedError)
    }

    fn teardown(&mut self) -> Result<(), BoxedError> {
        // Zero velocity before releasing the port; the firmware keeps the
        // last command otherwise.
        self.round_trip(VelocityCommand::ZERO)
            .map(|_| ())
            .map_err(|e| Box::new(e) as BoxedError)
    }
}

impl Drop for SerialStage {
    fn drop(&mut self) {
        if let Err(e) = self.round_trip(VelocityCommand::ZERO) {
            tracing::warn!(error = %e, "failed to zero stage velocity on drop");
        }
    }
}
