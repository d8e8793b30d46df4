/// Poll cycle engine
///
/// One cycle is one sequential pass over the register catalog: select the
/// register's slave, issue exactly one read, format the value, append a row.
/// Reads are never batched or overlapped. A register whose link turns out to
/// be closed ends the cycle early and hands the connection back for
/// reconnection.

use log::{debug, info, warn};

use crate::client::{read_register, Connector};
use crate::codec::format_value;
use crate::connection::ConnectionManager;
use crate::error::{MonitorError, MonitorResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusAddress, RegisterDescriptor, RegisterKind, RowResult, StatusLabel};
use crate::utils::{OperationTimer, PerformanceMetrics};

/// Progress is reported every this many rows, and on the last row
pub const PROGRESS_REPORT_INTERVAL: usize = 5;

/// Running progress of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleProgress {
    pub completed: usize,
    pub total: usize,
    /// 0-100
    pub percent: u8,
}

impl CycleProgress {
    fn new(completed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            completed,
            total,
            percent,
        }
    }
}

/// Notifications emitted while a cycle runs
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    Progress(CycleProgress),
    ReadFailed {
        kind: RegisterKind,
        address: ModbusAddress,
        status: StatusLabel,
    },
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Every register produced a row, in catalog order
    Completed(Vec<RowResult>),
    /// The link was lost; `rows` covers only the registers before the failure
    Aborted { rows: Vec<RowResult>, reason: MonitorError },
}

/// A cycle between two reads
struct ActiveCycle {
    next: usize,
    rows: Vec<RowResult>,
    timer: OperationTimer,
}

/// Sequential poll engine
///
/// A cycle is started with [`begin`](Self::begin) and advanced one register
/// at a time with [`step`](Self::step), so a front end can react to input
/// between reads. [`run_cycle`](Self::run_cycle) drives a whole cycle.
#[derive(Default)]
pub struct PollEngine {
    active: Option<ActiveCycle>,
    metrics: PerformanceMetrics,
    logger: CallbackLogger,
}

impl PollEngine {
    pub fn new(logger: CallbackLogger) -> Self {
        Self {
            active: None,
            metrics: PerformanceMetrics::new(),
            logger,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.active.is_some()
    }

    /// Read metrics accumulated over every cycle run so far
    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Start a cycle over a catalog of `total` registers
    ///
    /// Fails with [`MonitorError::CycleBlocked`] when a cycle is already in
    /// flight or the connection is not open.
    pub fn begin<K: Connector>(&mut self, total: usize, connection: &ConnectionManager<K>) -> MonitorResult<()> {
        if self.active.is_some() {
            return Err(MonitorError::cycle_blocked("a poll cycle is already running"));
        }
        if !connection.is_open() {
            return Err(MonitorError::cycle_blocked("connection is not open"));
        }

        info!("Starting poll cycle over {} registers", total);
        self.active = Some(ActiveCycle {
            next: 0,
            rows: Vec::with_capacity(total),
            timer: OperationTimer::start(&format!("poll cycle ({} registers)", total)),
        });
        Ok(())
    }

    /// Drop the running cycle without a result
    pub fn abandon(&mut self) {
        if let Some(active) = self.active.take() {
            let duration = active.timer.stop_and_log(false);
            self.metrics.record_cycle(duration, false);
            debug!("Poll cycle abandoned after {} registers", active.rows.len());
        }
    }

    /// Read the next register of the running cycle
    ///
    /// Returns `None` while registers remain and the outcome once the cycle
    /// is over. Read failures never fail the call, they become row statuses.
    /// If the returned future is dropped mid-read the register is read again
    /// by the next call.
    pub async fn step<K, F>(
        &mut self,
        catalog: &[RegisterDescriptor],
        connection: &mut ConnectionManager<K>,
        report: &mut F,
    ) -> MonitorResult<Option<CycleOutcome>>
    where
        K: Connector,
        F: FnMut(CycleReport),
    {
        let Some(active) = self.active.as_mut() else {
            return Err(MonitorError::cycle_blocked("no poll cycle is running"));
        };
        let total = catalog.len();

        if let Some(register) = catalog.get(active.next) {
            self.logger.log_read_request(register);
            let result = match connection.client_mut() {
                Some(client) => read_register(client, register).await,
                None => Err(MonitorError::port_closed("Port Not Open")),
            };

            let row = match result {
                Ok(raw) => {
                    let value = format_value(Some(&raw), &register.format, &register.unit);
                    self.logger.log_read_response(register, &raw, &value);
                    self.metrics.record_success();
                    RowResult::ok(register, value)
                }
                Err(err) => {
                    let status = err.read_status();
                    self.metrics.record_failure();
                    self.logger.log_read_failure(register, &status.to_string(), &err.to_string());
                    report(CycleReport::ReadFailed {
                        kind: register.kind,
                        address: register.address,
                        status,
                    });

                    if err.is_link_lost() {
                        connection.mark_link_lost(&err.to_string());
                        return Ok(self.finish(Err(err)));
                    }
                    RowResult::failed(register, status)
                }
            };

            active.rows.push(row);
            active.next += 1;
            let completed = active.rows.len();
            if completed % PROGRESS_REPORT_INTERVAL == 0 || completed == total {
                report(CycleReport::Progress(CycleProgress::new(completed, total)));
            }
            if completed < total {
                return Ok(None);
            }
        }

        Ok(self.finish(Ok(())))
    }

    fn finish(&mut self, result: MonitorResult<()>) -> Option<CycleOutcome> {
        let active = self.active.take()?;
        let completed = result.is_ok();
        let duration = active.timer.stop_and_log(completed);
        self.metrics.record_cycle(duration, completed);

        match result {
            Ok(()) => {
                debug!(
                    "Cycle done: {} rows, success rate {:.1}%",
                    active.rows.len(),
                    self.metrics.success_rate()
                );
                Some(CycleOutcome::Completed(active.rows))
            }
            Err(reason) => {
                warn!("Poll cycle aborted after {} registers: {}", active.rows.len(), reason);
                Some(CycleOutcome::Aborted {
                    rows: active.rows,
                    reason,
                })
            }
        }
    }

    /// Run one whole cycle over `catalog`
    pub async fn run_cycle<K, F>(
        &mut self,
        catalog: &[RegisterDescriptor],
        connection: &mut ConnectionManager<K>,
        report: &mut F,
    ) -> MonitorResult<CycleOutcome>
    where
        K: Connector,
        F: FnMut(CycleReport),
    {
        self.begin(catalog.len(), connection)?;
        loop {
            if let Some(outcome) = self.step(catalog, connection, report).await? {
                return Ok(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FieldbusClient;
    use crate::config::DeviceTarget;
    use crate::protocol::{SlaveId, ValueFormat};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Client with scripted per-address failures
    struct ScriptedClient {
        open: bool,
        failures: HashMap<u16, MonitorError>,
        reads: Vec<(SlaveId, u16)>,
        slave: SlaveId,
    }

    impl ScriptedClient {
        fn answer(&mut self, address: u16) -> MonitorResult<()> {
            self.reads.push((self.slave, address));
            match self.failures.get(&address) {
                Some(err) => {
                    if err.is_link_lost() {
                        self.open = false;
                    }
                    Err(err.clone())
                }
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl FieldbusClient for ScriptedClient {
        fn set_slave(&mut self, slave_id: SlaveId) {
            self.slave = slave_id;
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        async fn read_coils(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<bool>> {
            self.answer(address)?;
            Ok(vec![address % 2 == 0; quantity as usize])
        }

        async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<bool>> {
            self.answer(address)?;
            Ok(vec![true; quantity as usize])
        }

        async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>> {
            self.answer(address)?;
            Ok(vec![address; quantity as usize])
        }

        async fn read_input_registers(&mut self, address: u16, quantity: u16) -> MonitorResult<Vec<u16>> {
            self.answer(address)?;
            Ok(vec![address + 1000; quantity as usize])
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> MonitorResult<()> {
            self.open = false;
            Ok(())
        }
    }

    struct ScriptedConnector {
        failures: HashMap<u16, MonitorError>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Client = ScriptedClient;

        async fn connect(&self, _target: &DeviceTarget) -> MonitorResult<ScriptedClient> {
            Ok(ScriptedClient {
                open: true,
                failures: self.failures.clone(),
                reads: Vec::new(),
                slave: 0,
            })
        }
    }

    async fn connected(failures: HashMap<u16, MonitorError>) -> ConnectionManager<ScriptedConnector> {
        let target = DeviceTarget::Tcp {
            host: "localhost".to_string(),
            port: 502,
        };
        let mut manager = ConnectionManager::new(ScriptedConnector { failures }, target);
        manager.connect_now().await;
        manager
    }

    fn holding(count: u16) -> Vec<RegisterDescriptor> {
        (0..count)
            .map(|address| RegisterDescriptor {
                description: format!("Reg {}", address),
                address,
                quantity: 1,
                kind: RegisterKind::HoldingRegister,
                format: ValueFormat::Uint16(None),
                unit: String::new(),
                slave_id: 4,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_reads_every_register_in_order() {
        let mut connection = connected(HashMap::new()).await;
        let mut engine = PollEngine::default();
        let mut progress = Vec::new();

        let outcome = engine
            .run_cycle(&holding(12), &mut connection, &mut |report| {
                if let CycleReport::Progress(p) = report {
                    progress.push(p.completed);
                }
            })
            .await
            .unwrap();

        let rows = match outcome {
            CycleOutcome::Completed(rows) => rows,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[7].formatted_value, "7");
        assert!(rows.iter().all(|r| r.status == StatusLabel::Ok));
        assert_eq!(progress, vec![5, 10, 12]);

        let reads = &connection.client_mut().unwrap().reads;
        assert_eq!(reads.len(), 12);
        assert!(reads.iter().all(|(slave, _)| *slave == 4));
        assert!(!engine.is_in_flight());
        assert_eq!(engine.metrics().completed_cycles, 1);
    }

    #[tokio::test]
    async fn test_register_errors_are_contained() {
        let mut failures = HashMap::new();
        failures.insert(1, MonitorError::exception(0x03, 0x02));
        failures.insert(2, MonitorError::timeout("read", 2000));
        failures.insert(3, MonitorError::io("garbled frame"));
        let mut connection = connected(failures).await;
        let mut engine = PollEngine::default();
        let mut failed = 0;

        let outcome = engine
            .run_cycle(&holding(5), &mut connection, &mut |report| {
                if let CycleReport::ReadFailed { .. } = report {
                    failed += 1;
                }
            })
            .await
            .unwrap();

        let CycleOutcome::Completed(rows) = outcome else {
            panic!("cycle should complete");
        };
        let statuses: Vec<String> = rows.iter().map(|r| r.status.to_string()).collect();
        assert_eq!(statuses, vec!["OK", "ERROR 2", "Timeout", "Read Fail", "OK"]);
        assert_eq!(rows[1].formatted_value, "Error");
        assert_eq!(failed, 3);
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_port_closed_aborts_cycle() {
        let mut failures = HashMap::new();
        failures.insert(3, MonitorError::port_closed("Port Not Open"));
        let mut connection = connected(failures).await;
        let mut engine = PollEngine::default();

        let outcome = engine
            .run_cycle(&holding(10), &mut connection, &mut |_| {})
            .await
            .unwrap();

        match outcome {
            CycleOutcome::Aborted { rows, reason } => {
                assert_eq!(rows.len(), 3);
                assert_eq!(rows.iter().map(|r| r.address).collect::<Vec<_>>(), vec![0, 1, 2]);
                assert!(reason.is_link_lost());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!connection.is_open());
        assert!(connection.connect().is_some());
        assert_eq!(engine.metrics().aborted_cycles, 1);
    }

    #[tokio::test]
    async fn test_cycle_blocked_when_disconnected() {
        let target = DeviceTarget::Tcp {
            host: "localhost".to_string(),
            port: 502,
        };
        let mut connection = ConnectionManager::new(
            ScriptedConnector {
                failures: HashMap::new(),
            },
            target,
        );
        let mut engine = PollEngine::default();

        let err = engine
            .run_cycle(&holding(2), &mut connection, &mut |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::CycleBlocked { .. }));
        assert!(!engine.is_in_flight());
    }

    #[tokio::test]
    async fn test_stepping_one_register_at_a_time() {
        let mut connection = connected(HashMap::new()).await;
        let mut engine = PollEngine::default();
        let catalog = holding(3);
        let mut progress = Vec::new();
        let mut sink = |report: CycleReport| {
            if let CycleReport::Progress(p) = report {
                progress.push(p.completed);
            }
        };

        assert!(engine.step(&catalog, &mut connection, &mut sink).await.is_err());

        engine.begin(catalog.len(), &connection).unwrap();
        assert!(matches!(
            engine.begin(catalog.len(), &connection),
            Err(MonitorError::CycleBlocked { .. })
        ));
        assert_eq!(engine.step(&catalog, &mut connection, &mut sink).await.unwrap(), None);
        assert_eq!(engine.step(&catalog, &mut connection, &mut sink).await.unwrap(), None);
        assert_eq!(connection.client_mut().unwrap().reads.len(), 2);
        assert!(engine.is_in_flight());

        let outcome = engine.step(&catalog, &mut connection, &mut sink).await.unwrap();
        assert!(matches!(outcome, Some(CycleOutcome::Completed(ref rows)) if rows.len() == 3));
        assert!(!engine.is_in_flight());
        assert_eq!(progress, vec![3]);
    }

    #[tokio::test]
    async fn test_abandoned_cycle_can_restart() {
        let mut connection = connected(HashMap::new()).await;
        let mut engine = PollEngine::default();
        let catalog = holding(4);

        engine.begin(catalog.len(), &connection).unwrap();
        engine.step(&catalog, &mut connection, &mut |_| {}).await.unwrap();
        engine.abandon();
        assert!(!engine.is_in_flight());
        assert_eq!(engine.metrics().aborted_cycles, 1);

        let outcome = engine.run_cycle(&catalog, &mut connection, &mut |_| {}).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(ref rows) if rows.len() == 4));
    }
}
