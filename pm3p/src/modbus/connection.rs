use std::{io, time::Duration};

use thiserror::Error;
use tokio_modbus::client::{rtu, Context as ModbusClient};
use tokio_modbus::prelude::{Reader, SlaveContext};
use tracing::{debug, error};

use crate::modbus::register::{self, DecodeError, PhaseMeasurement, RawRegisterBlock};
use crate::modbus::Unit;
use crate::Error;

/// First input register of a phase block.
pub const START_ADDRESS: u16 = 0;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Something that can open a Modbus session on the meter's bus.
#[async_trait::async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn connect(&self) -> crate::Result<ModbusClient>;

    /// Upper bound on a single request/response exchange.
    fn transaction_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }
}

/// Serial link settings. The meter only speaks 9600-8N1 RTU, so only the device path varies.
#[derive(Clone, Debug)]
pub struct Config {
    pub tty: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub flow_control: tokio_serial::FlowControl,
    pub parity: tokio_serial::Parity,
    pub timeout: Duration,
}

impl Config {
    pub fn new<S: Into<String>>(tty: S) -> Self {
        Self {
            tty: tty.into(),
            baud_rate: 9600,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            flow_control: tokio_serial::FlowControl::None,
            parity: tokio_serial::Parity::None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[async_trait::async_trait]
impl Connect for Config {
    #[tracing::instrument(level = "debug", skip(self), fields(tty = %self.tty))]
    async fn connect(&self) -> crate::Result<ModbusClient> {
        let builder = tokio_serial::new(&self.tty, self.baud_rate)
            .data_bits(self.data_bits)
            .flow_control(self.flow_control)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .timeout(self.timeout);

        let port = tokio_serial::SerialStream::open(&builder).map_err(|err| {
            error!(tty = %self.tty, %err, "Could not open serial port");
            Error::Session(err.into())
        })?;

        // The unit is switched per phase before every read.
        let client = rtu::connect_slave(port, tokio_modbus::slave::Slave::broadcast())
            .await
            .map_err(Error::Session)?;
        debug!("Serial session open");
        Ok(client)
    }

    fn transaction_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Why a single phase could not be read.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Invalid Modbus response: {0}")]
    InvalidResponse(#[source] io::Error),

    #[error("Serial link error: {0}")]
    Io(#[source] io::Error),

    #[error("No response within {0:?}")]
    Timeout(Duration),
}

impl ReadError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReadError::Decode(_) => "decode",
            ReadError::InvalidResponse(_) => "invalid_response",
            ReadError::Io(_) => "io",
            ReadError::Timeout(_) => "timeout",
        }
    }
}

/// Exception responses and frames of the wrong shape come back from `tokio_modbus` as `Other` or
/// `InvalidData`. Anything else is the link itself failing.
impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::Other => ReadError::InvalidResponse(err),
            _ => ReadError::Io(err),
        }
    }
}

/// Issues one "read input registers" exchange against `unit`.
pub async fn read_block(
    client: &mut ModbusClient,
    unit: Unit,
    timeout: Duration,
) -> Result<RawRegisterBlock, ReadError> {
    client.set_slave(unit);

    let words = tokio::time::timeout(
        timeout,
        client.read_input_registers(START_ADDRESS, register::BLOCK_LEN as u16),
    )
    .await
    .map_err(|_| ReadError::Timeout(timeout))??;

    // `Context` already rejects replies of the wrong length, so this only converts the type.
    words.try_into().map_err(|words: Vec<u16>| {
        ReadError::InvalidResponse(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "expected {} registers, got {}",
                register::BLOCK_LEN,
                words.len()
            ),
        ))
    })
}

#[tracing::instrument(level = "debug", skip_all, fields(unit = unit.0))]
pub async fn read_phase(
    client: &mut ModbusClient,
    unit: Unit,
    timeout: Duration,
) -> Result<PhaseMeasurement, ReadError> {
    let block = read_block(client, unit, timeout).await?;
    debug!(raw = ?block, "Received registers");
    Ok(register::decode(&block)?)
}

#[test]
fn default_link_is_9600_8n1() {
    use tokio_serial::*;
    let config = Config::new("/dev/ttyUSB0");
    assert!(matches!(
        config,
        Config {
            ref tty,
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            parity: Parity::None,
            ..
        } if tty == "/dev/ttyUSB0"
    ));
    assert_eq!(config.transaction_timeout(), DEFAULT_TIMEOUT);
}

#[test]
fn transport_errors_are_classified() {
    use io::ErrorKind::*;

    let exception = io::Error::new(Other, "Modbus function 4: Illegal data address");
    assert!(matches!(
        ReadError::from(exception),
        ReadError::InvalidResponse(_)
    ));
    let malformed = io::Error::new(InvalidData, "invalid response");
    assert!(matches!(
        ReadError::from(malformed),
        ReadError::InvalidResponse(_)
    ));
    let eof = io::Error::new(UnexpectedEof, "failed to fill whole buffer");
    assert!(matches!(ReadError::from(eof), ReadError::Io(_)));
    let pipe = io::Error::from(BrokenPipe);
    assert_eq!(ReadError::from(pipe).kind(), "io");
}
