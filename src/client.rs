/// Field-bus client seam
///
/// The monitor never frames Modbus packets itself. It talks to the device
/// through the [`FieldbusClient`] trait, and obtains clients from a
/// [`Connector`]. The production implementation wraps a `tokio-modbus`
/// context for both TCP and serial RTU links; tests plug in scripted mocks.
///
/// All reads are bounded by the client's I/O timeout. A read that overruns it
/// fails with [`MonitorError::Timeout`]; a read on a link that is gone fails
/// with [`MonitorError::PortClosed`].

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::*;

use crate::config::{DeviceTarget, SerialSettings};
use crate::error::{MonitorError, MonitorResult};
use crate::protocol::{RawReadResult, RegisterDescriptor, RegisterKind, SlaveId};

/// Default I/O timeout for a single read (2 seconds)
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 2000;

/// Trait defining the read operations the poll cycle needs
///
/// One read function per register kind, mirroring Modbus function codes
/// 0x01 to 0x04.
#[async_trait]
pub trait FieldbusClient: Send {
    /// Select the slave addressed by following reads
    fn set_slave(&mut self, slave_id: SlaveId);

    /// Set the I/O timeout applied to every read
    fn set_timeout(&mut self, timeout: Duration);

    /// Read coils (function code 0x01)
    async fn read_coils(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02)
    async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<bool>>;

    /// Read holding registers (function code 0x03)
    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>>;

    /// Read input registers (function code 0x04)
    async fn read_input_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>>;

    /// Check if the link is open
    fn is_open(&self) -> bool;

    /// Close the link
    async fn close(&mut self) -> MonitorResult<()>;
}

/// Opens links to a device
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: FieldbusClient + 'static;

    /// Open a link to `target`
    async fn connect(&self, target: &DeviceTarget) -> MonitorResult<Self::Client>;
}

/// Issue the kind-appropriate read for one descriptor
///
/// Selects the descriptor's slave first. Exactly one request is sent.
pub async fn read_register<C: FieldbusClient + ?Sized>(
    client: &mut C,
    descriptor: &RegisterDescriptor,
) -> MonitorResult<RawReadResult> {
    if !client.is_open() {
        return Err(MonitorError::port_closed("Port Not Open"));
    }
    client.set_slave(descriptor.slave_id);

    let address = descriptor.address;
    let quantity = descriptor.quantity;
    let raw = match descriptor.kind {
        RegisterKind::HoldingRegister => {
            RawReadResult::from_words(&client.read_holding_registers(address, quantity).await?, quantity)
        }
        RegisterKind::InputRegister => {
            RawReadResult::from_words(&client.read_input_registers(address, quantity).await?, quantity)
        }
        RegisterKind::Coil => RawReadResult::from_bits(client.read_coils(address, quantity).await?, quantity),
        RegisterKind::DiscreteInput => {
            RawReadResult::from_bits(client.read_discrete_inputs(address, quantity).await?, quantity)
        }
    };
    Ok(raw)
}

/// Field-bus client backed by a `tokio-modbus` context
pub struct ModbusContextClient {
    context: Option<Context>,
    timeout: Duration,
    target: String,
}

impl ModbusContextClient {
    /// Wrap an attached context
    pub fn new(context: Context, target: String) -> Self {
        Self {
            context: Some(context),
            timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
            target,
        }
    }

    /// Human-readable target of this link
    pub fn target(&self) -> &str {
        &self.target
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Map a tokio-modbus response onto the monitor's error type
    ///
    /// Drops the context when the failure means the link is gone so that
    /// `is_open` reports it.
    fn settle<T>(&mut self, function: u8, response: tokio_modbus::Result<T>) -> MonitorResult<T> {
        let result = match response {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(exception)) => Err(MonitorError::exception(function, u8::from(exception))),
            Err(tokio_modbus::Error::Transport(err)) => Err(MonitorError::from(err)),
            Err(err) => Err(MonitorError::io(err.to_string())),
        };

        if let Err(ref err) = result {
            if err.is_link_lost() {
                warn!("Link to {} lost: {}", self.target, err);
                self.context = None;
            }
        }
        result
    }
}

macro_rules! timed_read {
    ($self:ident, $method:ident, $function:expr, $address:ident, $quantity:ident) => {{
        let timeout = $self.timeout;
        let timeout_ms = $self.timeout_ms();
        let context = $self
            .context
            .as_mut()
            .ok_or_else(|| MonitorError::port_closed("Port Not Open"))?;
        let response = tokio::time::timeout(timeout, context.$method($address, $quantity))
            .await
            .map_err(|_| {
                MonitorError::timeout(
                    format!("{} @{} x{}", stringify!($method), $address, $quantity),
                    timeout_ms,
                )
            })?;
        $self.settle($function, response)
    }};
}

#[async_trait]
impl FieldbusClient for ModbusContextClient {
    fn set_slave(&mut self, slave_id: SlaveId) {
        if let Some(context) = self.context.as_mut() {
            context.set_slave(Slave(slave_id));
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn read_coils(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<bool>> {
        timed_read!(self, read_coils, 0x01, address, quantity)
    }

    async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<bool>> {
        timed_read!(self, read_discrete_inputs, 0x02, address, quantity)
    }

    async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>> {
        timed_read!(self, read_holding_registers, 0x03, address, quantity)
    }

    async fn read_input_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>> {
        timed_read!(self, read_input_registers, 0x04, address, quantity)
    }

    fn is_open(&self) -> bool {
        self.context.is_some()
    }

    async fn close(&mut self) -> MonitorResult<()> {
        if let Some(mut context) = self.context.take() {
            debug!("Closing link to {}", self.target);
            if let Err(err) = context.disconnect().await {
                warn!("Error while closing link to {}: {}", self.target, err);
            }
        }
        Ok(())
    }
}

/// Connector opening TCP sockets or serial ports through `tokio-modbus`
#[derive(Debug, Clone)]
pub struct ModbusConnector {
    connect_timeout: Duration,
}

impl ModbusConnector {
    /// Create a connector whose dial attempts give up after `connect_timeout`
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect_tcp(&self, host: &str, port: u16) -> MonitorResult<ModbusContextClient> {
        let target = format!("{}:{}", host, port);
        let address: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| MonitorError::connection(format!("Cannot resolve {}: {}", target, e)))?
            .next()
            .ok_or_else(|| MonitorError::connection(format!("No address for {}", target)))?;

        let context = tokio::time::timeout(self.connect_timeout, tcp::connect_slave(address, Slave(1)))
            .await
            .map_err(|_| MonitorError::connection(format!("Timed out connecting to {}", target)))?
            .map_err(|e| MonitorError::connection(format!("Failed to connect to {}: {}", target, e)))?;

        Ok(ModbusContextClient::new(context, target))
    }

    fn connect_serial(&self, settings: &SerialSettings) -> MonitorResult<ModbusContextClient> {
        let builder = tokio_serial::new(&settings.path, settings.baud_rate)
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .data_bits(settings.data_bits.into())
            .timeout(self.connect_timeout);

        let port = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| MonitorError::connection(format!("Failed to open {}: {}", settings.path, e)))?;

        Ok(ModbusContextClient::new(rtu::attach_slave(port, Slave(1)), settings.path.clone()))
    }
}

impl Default for ModbusConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for ModbusConnector {
    type Client = ModbusContextClient;

    async fn connect(&self, target: &DeviceTarget) -> MonitorResult<ModbusContextClient> {
        match target {
            DeviceTarget::Tcp { host, port } => self.connect_tcp(host, *port).await,
            DeviceTarget::Serial(settings) => self.connect_serial(settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ValueFormat;

    /// Client answering every read with a fixed pattern
    struct EchoClient {
        open: bool,
        slave: SlaveId,
    }

    #[async_trait]
    impl FieldbusClient for EchoClient {
        fn set_slave(&mut self, slave_id: SlaveId) {
            self.slave = slave_id;
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        async fn read_coils(&mut self, _address: u16, quantity: u16) -> MonitorResult<Vec<bool>> {
            Ok(vec![true; quantity as usize])
        }

        async fn read_discrete_inputs(&mut self, _address: u16, quantity: u16) -> MonitorResult<Vec<bool>> {
            Ok(vec![false; quantity as usize])
        }

        async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>> {
            Ok(vec![address; quantity as usize])
        }

        async fn read_input_registers(&mut self, _address: u16, _quantity: u16) -> MonitorResult<Vec<u16>> {
            Err(MonitorError::exception(0x04, 0x02))
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> MonitorResult<()> {
            self.open = false;
            Ok(())
        }
    }

    fn descriptor(kind: RegisterKind, address: u16, quantity: u16) -> RegisterDescriptor {
        RegisterDescriptor {
            description: "test".to_string(),
            address,
            quantity,
            kind,
            format: kind.default_format(),
            unit: String::new(),
            slave_id: 9,
        }
    }

    #[tokio::test]
    async fn test_read_register_dispatch() {
        let mut client = EchoClient { open: true, slave: 1 };

        let raw = read_register(&mut client, &descriptor(RegisterKind::HoldingRegister, 0x0102, 2))
            .await
            .unwrap();
        assert_eq!(raw.buffer, vec![0x01, 0x02, 0x01, 0x02]);
        assert_eq!(client.slave, 9);

        let raw = read_register(&mut client, &descriptor(RegisterKind::Coil, 0, 1)).await.unwrap();
        assert_eq!(raw.bits, vec![true]);

        let err = read_register(&mut client, &descriptor(RegisterKind::InputRegister, 0, 1))
            .await
            .unwrap_err();
        assert_eq!(err, MonitorError::exception(0x04, 0x02));
    }

    #[tokio::test]
    async fn test_read_register_on_closed_link() {
        let mut client = EchoClient { open: false, slave: 1 };
        let mut register = descriptor(RegisterKind::DiscreteInput, 0, 1);
        register.format = ValueFormat::Bool;

        let err = read_register(&mut client, &register).await.unwrap_err();
        assert!(err.is_link_lost());
    }
}
