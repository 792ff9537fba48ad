use std::sync::Arc;

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

use crate::core::bluetooth::{BUS_LOG_TARGET, BleEvent, EventBus, LogMessage};

/// Installs `env_logger` as the console logger. `RUST_LOG` overrides `level`.
pub fn init_logging(level: LevelFilter) {
    let _ = env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
    log::info!("Logging initialized");
}

/// Forwards log records to stderr and to event subscribers as [`BleEvent::Log`].
pub struct EventLogger {
    bus: Arc<EventBus>,
    level: Level,
}

impl EventLogger {
    pub fn new(bus: Arc<EventBus>, level: Level) -> Self {
        Self { bus, level }
    }

    /// Installs the logger globally. Fails if another logger is already set.
    pub fn init(bus: Arc<EventBus>, level: Level) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(EventLogger::new(bus, level)))
            .map(|()| log::set_max_level(level.to_level_filter()))
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage::new(record.level(), record.args().to_string());
        self.bus.publish(BleEvent::Log(log_message));
    }
}

impl log::Log for EventLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("[{}] {}", record.level(), record.args());
        // Already published by the session layer itself
        if record.target() != BUS_LOG_TARGET {
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use log::Log;

    use super::*;
    use crate::core::bluetooth::EventKind;

    fn record<'a>(level: Level, target: &'a str, args: std::fmt::Arguments<'a>) -> Record<'a> {
        Record::builder().level(level).target(target).args(args).build()
    }

    #[test]
    fn records_become_log_events() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe(&[EventKind::Log]);
        let logger = EventLogger::new(bus.clone(), Level::Info);

        logger.log(&record(Level::Warn, "ble_central_lib::core", format_args!("link lost")));
        match sub.try_recv() {
            Some(BleEvent::Log(message)) => {
                assert_eq!(message.level, "WARN");
                assert_eq!(message.message, "link lost");
                assert!(chrono::DateTime::parse_from_rfc3339(&message.timestamp).is_ok());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn records_below_level_are_dropped() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe_all();
        let logger = EventLogger::new(bus.clone(), Level::Info);
        logger.log(&record(Level::Debug, "ble_central_lib", format_args!("noise")));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn bus_target_is_not_published_twice() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe_all();
        let logger = EventLogger::new(bus.clone(), Level::Trace);
        logger.log(&record(Level::Info, BUS_LOG_TARGET, format_args!("reconnected")));
        assert!(sub.try_recv().is_none());
    }
}
